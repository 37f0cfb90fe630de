//! Storage backend contract.
//!
//! The secret store is the only durable state of the authority. Certificates,
//! keys, templates and configuration are stored as secrets on resources, and
//! lifecycle facts as annotations on those resources (see [`crate::annotation`]).
//!
//! All methods block. Implementations must be `Send + Sync` so one backend can
//! be shared across request threads behind an `Arc`.

pub mod conjur;
pub mod memory;
pub mod trust;

pub use memory::MemoryBackend;

use crate::annotation::get_annotation;
use crate::error::Result;
use crate::resource::{Annotation, Resource, ResourceFilter, ResourceId};

/// Resource kind every artifact of the authority is stored under.
pub const VARIABLE_KIND: &str = "variable";

/// Path, below the branch, of the subject name template.
pub const SUBJECT_TEMPLATE_PATH: &str = "config/subject-template";

/// Subject name used when no other template has been configured.
pub const DEFAULT_SUBJECT_TEMPLATE: &str =
    "CN=<CommonName>,OU=<OrganizationalUnit>,O=<Organization>,L=<Locality>,ST=<Province>,C=<Country>";

/// Key/value storage with annotated resources.
pub trait StorageBackend: Send + Sync {
    /// Prepares the backend for use.
    ///
    /// Establishes trust with the store where needed and creates the
    /// configuration resources that are missing. Safe to call repeatedly and
    /// concurrently.
    fn bootstrap(&self) -> Result<()>;

    /// The account every resource of this backend is addressed under.
    fn account(&self) -> &str;

    /// Resources matching the filter, annotations included.
    ///
    /// No match is an empty list, not an error.
    fn fetch_resources(&self, filter: &ResourceFilter) -> Result<Vec<Resource>>;

    /// Identifiers of the resources matching the filter.
    fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ResourceId>> {
        Ok(self
            .fetch_resources(filter)?
            .into_iter()
            .map(|resource| resource.id)
            .collect())
    }

    /// # Errors
    /// [`crate::error::PkiError::ResourceNotFound`] if the resource does not exist.
    fn fetch_resource(&self, id: &ResourceId) -> Result<Resource>;

    /// Value of one annotation of a resource.
    fn read_annotation(&self, id: &ResourceId, key: &str) -> Result<String> {
        let resource = self.fetch_resource(id)?;
        get_annotation(&resource, key).map(str::to_string)
    }

    /// Sets one annotation, replacing any previous value. Last writer wins.
    fn write_annotation(&self, id: &ResourceId, key: &str, value: &str) -> Result<()>;

    /// Declares a resource with its initial annotations.
    ///
    /// Existing resources are left alone apart from the given annotations,
    /// which are written over the old values.
    fn create_resource(&self, id: &ResourceId, annotations: &[Annotation]) -> Result<()>;

    /// Stores a new secret value on an existing resource.
    fn store_secret(&self, id: &ResourceId, value: &[u8]) -> Result<()>;

    /// # Errors
    /// [`crate::error::PkiError::ResourceNotFound`] if the resource does not
    /// exist or holds no secret yet.
    fn fetch_secret(&self, id: &ResourceId) -> Result<Vec<u8>>;

    /// Identifier of a variable under this backend's account.
    fn variable(&self, id: &str) -> ResourceId {
        ResourceId::new(self.account(), VARIABLE_KIND, id)
    }
}
