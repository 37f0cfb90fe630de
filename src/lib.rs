//! # pkiaas - PKI as a Service
//!
//! Issues, stores, tracks and revokes X.509 certificates for client
//! applications. All durable state lives in a secret store reached through the
//! [`storage::StorageBackend`] contract: certificates and keys as secrets,
//! lifecycle facts (revocation, expiration) as string annotations on the
//! certificate's resource.
//!
//! ## Supported Key Types
//!
//! - **RSA**: 2048, 3072, and 4096-bit keys
//! - **ECDSA**: P-256 and P-384 curves
//! - **Ed25519**
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pkiaas::authority::{AuthorityConfig, CertificateAuthority, RootRequest};
//! use pkiaas::revocation::ReasonCode;
//! use pkiaas::storage::{MemoryBackend, StorageBackend};
//! use pkiaas::template::{CertificateRequestData, Template};
//!
//! # fn main() -> Result<(), pkiaas::error::PkiError> {
//! let backend = Arc::new(MemoryBackend::default());
//! backend.bootstrap()?;
//! let ca = CertificateAuthority::new(backend, AuthorityConfig::default());
//!
//! ca.generate_root(&RootRequest::builder().common_name("Example Root".to_string()).build())?;
//! ca.create_template(
//!     &Template::builder()
//!         .template_name("web".to_string())
//!         .organization("Example Corp".to_string())
//!         .ext_key_usages(vec!["serverAuth".to_string()])
//!         .build(),
//! )?;
//!
//! let issued = ca.issue(
//!     &CertificateRequestData::builder()
//!         .template_name("web".to_string())
//!         .common_name("app.example.com".to_string())
//!         .build(),
//! )?;
//! ca.revoke(&issued.serial_number, ReasonCode::KeyCompromise)?;
//! let crl = ca.generate_crl(time::OffsetDateTime::now_utc())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`resource`]: Resource identifiers, annotations and filters
//! - [`annotation`]: The annotation vocabulary certificate state is stored in
//! - [`template`]: `<FieldName>` substitution over typed records
//! - [`revocation`]: Reading revocation and expiration facts back
//! - [`storage`]: The backend contract, an in-memory backend and the Conjur adapter
//! - [`authority`]: The certificate authority tying it all together
//! - [`key`], [`cert`], [`issuer`]: Keys, X.509 encoding and signing
//! - [`config`], [`version`]: Settings and build identity
//! - [`error`]: Error types

pub mod annotation;
pub mod authority;
pub mod cert;
pub mod config;
pub mod error;
pub mod issuer;
pub mod key;
pub mod resource;
pub mod revocation;
pub mod storage;
pub mod template;
pub mod version;
