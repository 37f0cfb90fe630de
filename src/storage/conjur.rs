//! Storage backend over a Conjur secret store.
//!
//! Resources are Conjur variables below a policy branch. New variables and
//! annotation updates are applied by loading policy documents, secrets through
//! the secrets API.

pub mod client;
pub mod policy;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

pub use client::{ConjurApi, PolicyMode, RestClient};

use crate::error::{PkiError, Result};
use crate::resource::{Annotation, Resource, ResourceFilter, ResourceId};
use crate::storage::{DEFAULT_SUBJECT_TEMPLATE, SUBJECT_TEMPLATE_PATH, StorageBackend};

const ROOT_BRANCH: &str = "root";

/// Adapter from a [`ConjurApi`] to the [`StorageBackend`] contract.
pub struct ConjurBackend<C> {
    api: C,
    branch: String,
}

impl<C: ConjurApi> ConjurBackend<C> {
    pub fn new(api: C, branch: impl Into<String>) -> Self {
        Self {
            api,
            branch: branch.into(),
        }
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    /// Splits a variable id into the policy branch it lives in and its id within it.
    fn locate<'a>(&'a self, id: &'a ResourceId) -> (&'a str, &'a str) {
        id.id
            .strip_prefix(self.branch.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|relative| (self.branch.as_str(), relative))
            .unwrap_or((ROOT_BRANCH, id.id.as_str()))
    }

    fn ensure_trust(&self) -> Result<()> {
        if self.api.has_trust_anchor() {
            return Ok(());
        }
        let chain = self.api.pin_trust()?;
        warn!(
            endpoint = chain.endpoint(),
            chain = %chain.to_pem(),
            "no trust anchor configured; trusting the certificate chain presented on first contact, verify it out of band"
        );
        self.api.install_trust_anchor(&chain)
    }
}

/// Decodes one resource document as returned by the Conjur API.
pub fn decode_resource(document: &Value) -> Result<Resource> {
    let id = document
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| PkiError::DecodingError(format!("resource without id: {document}")))?;
    let annotations = match document.get("annotations") {
        Some(annotations) => Vec::<Annotation>::deserialize(annotations)?,
        None => Vec::new(),
    };
    Ok(Resource {
        id: ResourceId::parse(id)?,
        annotations,
    })
}

impl<C: ConjurApi> StorageBackend for ConjurBackend<C> {
    fn bootstrap(&self) -> Result<()> {
        self.ensure_trust()?;

        let subject_template = self.variable(&format!("{}/{SUBJECT_TEMPLATE_PATH}", self.branch));
        match self.api.retrieve_secret(&subject_template) {
            Ok(_) => {
                debug!(branch = %self.branch, "configuration already present");
                Ok(())
            }
            Err(PkiError::ResourceNotFound(_)) => {
                info!(branch = %self.branch, "creating configuration policy");
                self.api.load_policy(
                    PolicyMode::Append,
                    ROOT_BRANCH,
                    &policy::config_policy(&self.branch),
                )?;
                self.api
                    .add_secret(&subject_template, DEFAULT_SUBJECT_TEMPLATE.as_bytes())
            }
            Err(err) => Err(err),
        }
    }

    fn account(&self) -> &str {
        self.api.account()
    }

    fn fetch_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        // The server search is a substring match; narrow it to a prefix match.
        let mut resources = Vec::new();
        for document in self.api.resources(filter)? {
            let resource = decode_resource(&document)?;
            if filter.matches(&resource.id) {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    fn fetch_resource(&self, id: &ResourceId) -> Result<Resource> {
        decode_resource(&self.api.resource(id)?)
    }

    fn write_annotation(&self, id: &ResourceId, key: &str, value: &str) -> Result<()> {
        let (branch, relative) = self.locate(id);
        self.api.load_policy(
            PolicyMode::Update,
            branch,
            &policy::annotation_policy(relative, key, value),
        )
    }

    fn create_resource(&self, id: &ResourceId, annotations: &[Annotation]) -> Result<()> {
        let (branch, relative) = self.locate(id);
        self.api.load_policy(
            PolicyMode::Append,
            branch,
            &policy::variable_policy(relative, annotations),
        )
    }

    fn store_secret(&self, id: &ResourceId, value: &[u8]) -> Result<()> {
        self.api.add_secret(id, value)
    }

    fn fetch_secret(&self, id: &ResourceId) -> Result<Vec<u8>> {
        self.api.retrieve_secret(id)
    }
}
