#![allow(dead_code)]

use std::sync::Arc;

use pkiaas::authority::{AuthorityConfig, CertificateAuthority, RootRequest};
use pkiaas::key::KeyAlgorithm;
use pkiaas::storage::{MemoryBackend, StorageBackend};
use pkiaas::template::{CertificateRequestData, Template};

/// An authority over a bootstrapped in-memory store with a P-256 root CA and a
/// `server` template.
pub fn authority() -> CertificateAuthority<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new("myorg", "pki"));
    backend.bootstrap().unwrap();

    let ca = CertificateAuthority::new(backend, AuthorityConfig::default());
    ca.generate_root(
        &RootRequest::builder()
            .common_name("myca.local".to_string())
            .organization("My Org".to_string())
            .key_algo(KeyAlgorithm::EcdsaP256)
            .build(),
    )
    .unwrap();
    ca.create_template(&server_template()).unwrap();
    ca
}

pub fn server_template() -> Template {
    Template::builder()
        .template_name("server".to_string())
        .organization("My Org".to_string())
        .country("US".to_string())
        .key_usages(vec!["digitalSignature".to_string(), "keyEncipherment".to_string()])
        .ext_key_usages(vec!["serverAuth".to_string()])
        .validity_days(30)
        .max_ttl_days(365)
        .build()
}

pub fn server_request(common_name: &str) -> CertificateRequestData {
    CertificateRequestData::builder()
        .template_name("server".to_string())
        .common_name(common_name.to_string())
        .alt_names(vec![common_name.to_string()])
        .build()
}
