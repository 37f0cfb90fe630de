use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PkiError, Result};

const DELIMITER: char = ':';

/// Canonical address of a stored artifact, serialized as `account:kind:id`.
///
/// Only the first two `:` are significant. Everything after the second
/// delimiter is the `id`, verbatim, so ids may contain `/` (and `:`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub account: String,
    pub kind: String,
    pub id: String,
}

impl ResourceId {
    pub fn new(account: impl Into<String>, kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Splits a full identifier into its three components.
    ///
    /// # Errors
    /// Returns [`PkiError::MalformedIdentifier`] if fewer than three parts are found.
    pub fn parse(full_id: &str) -> Result<Self> {
        let mut parts = full_id.splitn(3, DELIMITER);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(account), Some(kind), Some(id)) => Ok(Self::new(account, kind, id)),
            _ => Err(PkiError::MalformedIdentifier(full_id.to_string())),
        }
    }

    /// Last `/`-separated segment of the id.
    ///
    /// Certificates are stored under a serial-numbered path, so this is the
    /// serial number of a certificate resource.
    pub fn leaf(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}",
            self.account, self.kind, self.id
        )
    }
}

impl FromStr for ResourceId {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A string-valued tag attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub value: String,
}

impl Annotation {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A stored resource together with its annotations, in store-returned order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub annotations: Vec<Annotation>,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            annotations: Vec::new(),
        }
    }

    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.push(Annotation::new(name, value));
        self
    }
}

/// Selects resources when listing a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    /// Resource kind, e.g. `variable`.
    pub kind: Option<String>,
    /// Id prefix the resource must start with.
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ResourceFilter {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn search(mut self, prefix: impl Into<String>) -> Self {
        self.search = Some(prefix.into());
        self
    }

    /// Checks whether a resource id matches the kind and prefix constraints.
    ///
    /// Paging (`limit`/`offset`) is applied by the caller on the matching set.
    pub fn matches(&self, id: &ResourceId) -> bool {
        self.kind.as_deref().is_none_or(|kind| kind == id.kind)
            && self
                .search
                .as_deref()
                .is_none_or(|prefix| id.id.starts_with(prefix))
    }

    /// Applies `offset` then `limit` to an already filtered list.
    pub fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}
