use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::{PkiError, Result};
use crate::resource::{Annotation, Resource, ResourceFilter, ResourceId};
use crate::storage::{DEFAULT_SUBJECT_TEMPLATE, SUBJECT_TEMPLATE_PATH, StorageBackend};

#[derive(Debug, Default, Clone)]
struct Entry {
    annotations: Vec<Annotation>,
    secret: Option<Vec<u8>>,
}

/// In-memory backend for tests and local development.
///
/// Thread-safe; resources are listed in identifier order.
#[derive(Debug)]
pub struct MemoryBackend {
    account: String,
    branch: String,
    data: RwLock<BTreeMap<ResourceId, Entry>>,
}

impl MemoryBackend {
    pub fn new(account: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            branch: branch.into(),
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Inserts a resource exactly as given, replacing an existing one.
    ///
    /// Lets tests seed records a well-behaved writer would never produce.
    pub fn insert_resource(&self, resource: Resource) -> Result<()> {
        let mut data = self.write()?;
        let entry = data.entry(resource.id).or_default();
        entry.annotations = resource.annotations;
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<ResourceId, Entry>>> {
        self.data
            .read()
            .map_err(|_| PkiError::BackendUnavailable("memory backend lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<ResourceId, Entry>>> {
        self.data
            .write()
            .map_err(|_| PkiError::BackendUnavailable("memory backend lock poisoned".to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new("pkiaas", "pki")
    }
}

fn set_annotation(annotations: &mut Vec<Annotation>, key: &str, value: &str) {
    match annotations.iter_mut().find(|annotation| annotation.name == key) {
        Some(annotation) => annotation.value = value.to_string(),
        None => annotations.push(Annotation::new(key, value)),
    }
}

impl StorageBackend for MemoryBackend {
    fn bootstrap(&self) -> Result<()> {
        let id = self.variable(&format!("{}/{SUBJECT_TEMPLATE_PATH}", self.branch));
        let mut data = self.write()?;
        let entry = data.entry(id).or_default();
        if entry.secret.is_none() {
            debug!("seeding default subject template");
            entry.secret = Some(DEFAULT_SUBJECT_TEMPLATE.as_bytes().to_vec());
        }
        Ok(())
    }

    fn account(&self) -> &str {
        &self.account
    }

    fn fetch_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>> {
        let data = self.read()?;
        let matching = data
            .iter()
            .filter(|(id, _)| filter.matches(id))
            .map(|(id, entry)| Resource {
                id: id.clone(),
                annotations: entry.annotations.clone(),
            })
            .collect();
        Ok(filter.page(matching))
    }

    fn fetch_resource(&self, id: &ResourceId) -> Result<Resource> {
        self.read()?
            .get(id)
            .map(|entry| Resource {
                id: id.clone(),
                annotations: entry.annotations.clone(),
            })
            .ok_or_else(|| PkiError::ResourceNotFound(id.to_string()))
    }

    fn write_annotation(&self, id: &ResourceId, key: &str, value: &str) -> Result<()> {
        let mut data = self.write()?;
        let entry = data
            .get_mut(id)
            .ok_or_else(|| PkiError::ResourceNotFound(id.to_string()))?;
        set_annotation(&mut entry.annotations, key, value);
        Ok(())
    }

    fn create_resource(&self, id: &ResourceId, annotations: &[Annotation]) -> Result<()> {
        let mut data = self.write()?;
        let entry = data.entry(id.clone()).or_default();
        for annotation in annotations {
            set_annotation(&mut entry.annotations, &annotation.name, &annotation.value);
        }
        Ok(())
    }

    fn store_secret(&self, id: &ResourceId, value: &[u8]) -> Result<()> {
        let mut data = self.write()?;
        let entry = data
            .get_mut(id)
            .ok_or_else(|| PkiError::ResourceNotFound(id.to_string()))?;
        entry.secret = Some(value.to_vec());
        Ok(())
    }

    fn fetch_secret(&self, id: &ResourceId) -> Result<Vec<u8>> {
        self.read()?
            .get(id)
            .and_then(|entry| entry.secret.clone())
            .ok_or_else(|| PkiError::ResourceNotFound(id.to_string()))
    }
}
