mod util;

use std::sync::Arc;
use std::thread;

use pkiaas::annotation::{EXPIRATION_DATE, REVOCATION_DATE, REVOCATION_REASON_CODE, REVOKED};
use pkiaas::authority::CertificateStatus;
use pkiaas::cert::Certificate;
use pkiaas::error::PkiError;
use pkiaas::resource::{Resource, ResourceId};
use pkiaas::revocation::{ReasonCode, is_expired, parse_revocation};
use pkiaas::storage::StorageBackend;
use pkiaas::storage::trust::PinnedChain;
use pkiaas::template::{CertificateRequestData, render};
use rustls::pki_types::CertificateDer;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

pub type Result<T> = std::result::Result<T, PkiError>;

/// Issues a server certificate and reads it back through every lifecycle view.
#[test]
fn issue_and_track_server_cert() -> Result<()> {
    let ca = util::authority();
    let issued = ca.issue(&util::server_request("server.myca.local"))?;

    let cert = Certificate::from_pem(&issued.certificate)?;
    assert_eq!(cert.serial_hex(), issued.serial_number);
    assert_eq!(cert.subject().to_string(), "CN=server.myca.local,O=My Org,C=US");
    assert_eq!(issued.ca_certificate, ca.ca_certificate()?);
    assert!(issued.expiration > OffsetDateTime::now_utc() + Duration::days(29));

    let now = OffsetDateTime::now_utc();
    assert_eq!(ca.status(&issued.serial_number, now)?, CertificateStatus::Active);
    assert_eq!(ca.list_certificates()?, vec![issued.serial_number.clone()]);
    Ok(())
}

#[test]
fn revoked_certificate_appears_on_crl() -> Result<()> {
    let ca = util::authority();
    let kept = ca.issue(&util::server_request("kept.myca.local"))?;
    let revoked = ca.issue(&util::server_request("revoked.myca.local"))?;

    ca.revoke(&revoked.serial_number, ReasonCode::KeyCompromise)?;

    let list = ca.revocation_list()?;
    assert!(list.contains(&revoked.serial_number));
    assert!(!list.contains(&kept.serial_number));
    assert!(list.skipped.is_empty());

    let der = ca.generate_crl(OffsetDateTime::now_utc())?;
    assert_eq!(ca.crl()?, der);
    Ok(())
}

#[test]
fn request_ttl_overrides_template_validity() -> Result<()> {
    let ca = util::authority();
    let request = CertificateRequestData::builder()
        .template_name("server".to_string())
        .common_name("short.myca.local".to_string())
        .ttl_days(2)
        .build();
    let issued = ca.issue(&request)?;
    let now = OffsetDateTime::now_utc();
    assert!(issued.expiration <= now + Duration::days(2));
    assert_eq!(ca.expired_certificates(now + Duration::days(3))?, vec![issued.serial_number]);
    Ok(())
}

#[test]
fn resource_id_format_parse() -> Result<()> {
    for (account, kind, id) in [
        ("myorg", "variable", "pki/certificates/0a1b"),
        ("a", "host", "with:colons:inside"),
        ("a", "user", ""),
    ] {
        let formatted = ResourceId::new(account, kind, id).to_string();
        let parsed: ResourceId = formatted.parse()?;
        assert_eq!((parsed.account.as_str(), parsed.kind.as_str(), parsed.id.as_str()), (account, kind, id));
    }
    assert!(matches!(ResourceId::parse("only:two"), Err(PkiError::MalformedIdentifier(_))));
    Ok(())
}

#[test]
fn empty_revoked_annotation_is_live() -> Result<()> {
    let resource = Resource::new(ResourceId::new("myorg", "variable", "pki/certificates/01"))
        .with_annotation(REVOKED, "");
    assert_eq!(pkiaas::annotation::get_annotation(&resource, REVOKED)?, "");
    assert_eq!(parse_revocation(&resource)?, None);
    Ok(())
}

#[test]
fn revoked_annotation_is_case_insensitive() -> Result<()> {
    let resource = Resource::new(ResourceId::new("myorg", "variable", "pki/certificates/0a"))
        .with_annotation(REVOKED, "TRUE")
        .with_annotation(REVOCATION_REASON_CODE, "1")
        .with_annotation(REVOCATION_DATE, "1700000000");
    let revoked = parse_revocation(&resource)?.unwrap();
    assert_eq!(revoked.serial_number, "0a");
    assert_eq!(revoked.reason_code, 1);
    assert_eq!(revoked.revocation_date, datetime!(2023-11-14 22:13:20 UTC));
    Ok(())
}

#[test]
fn expiration_buffer() {
    let now = OffsetDateTime::now_utc();
    let id = ResourceId::new("myorg", "variable", "pki/certificates/0b");
    assert!(!is_expired(&Resource::new(id.clone()), now, 0));
    assert!(!is_expired(&Resource::new(id.clone()), now + Duration::days(10_000), 30));

    let expired = Resource::new(id).with_annotation(
        EXPIRATION_DATE,
        (now - Duration::days(10)).unix_timestamp().to_string(),
    );
    assert!(is_expired(&expired, now, 5));
    assert!(!is_expired(&expired, now, 15));
}

#[test]
fn render_repeats_and_keeps_unknown_placeholders() {
    let request = util::server_request("example.com");
    assert_eq!(
        render(&request, "<CommonName> issued to <CommonName>"),
        "example.com issued to example.com"
    );
    assert_eq!(render(&request, "CN=<CommonName>,X=<Missing>"), "CN=example.com,X=<Missing>");
}

/// One of five seeded certificate records carries a non-numeric reason code;
/// the other four still make it onto the list and the CRL.
#[test]
fn corrupt_record_skipped() -> Result<()> {
    let ca = util::authority();
    let backend = ca.backend();
    for serial in ["01", "02", "03", "04", "05"] {
        let id = backend.variable(&format!("pki/certificates/{serial}"));
        let reason = if serial == "03" { "bogus" } else { "4" };
        backend.insert_resource(
            Resource::new(id)
                .with_annotation(REVOKED, "true")
                .with_annotation(REVOCATION_REASON_CODE, reason)
                .with_annotation(REVOCATION_DATE, "1700000000"),
        )?;
    }

    let list = ca.revocation_list()?;
    let serials = list
        .entries
        .iter()
        .map(|entry| entry.serial_number.as_str())
        .collect::<Vec<_>>();
    assert_eq!(serials, vec!["01", "02", "04", "05"]);
    assert_eq!(list.skipped.len(), 1);
    assert_eq!(list.skipped[0].leaf(), "03");

    assert!(matches!(
        ca.status("03", OffsetDateTime::now_utc()),
        Err(PkiError::RevocationDataCorrupt { .. })
    ));
    ca.generate_crl(OffsetDateTime::now_utc())?;
    Ok(())
}

#[test]
fn pinned_chain_requires_two_certs() -> Result<()> {
    let ca = util::authority();
    let issued = ca.issue(&util::server_request("conjur.myca.local"))?;
    let leaf = CertificateDer::from(Certificate::from_pem(&issued.certificate)?.to_der()?);
    let root = CertificateDer::from(Certificate::from_pem(&issued.ca_certificate)?.to_der()?);

    assert!(matches!(
        PinnedChain::from_peer_certificates("conjur.myca.local:443", vec![leaf.clone()]),
        Err(PkiError::InvalidEndpoint { .. })
    ));

    let chain = PinnedChain::from_peer_certificates("conjur.myca.local:443", vec![leaf.clone(), root.clone()])?;
    assert_eq!(chain.certificates(), &[leaf, root]);
    assert!(chain.to_pem().starts_with("-----BEGIN CERTIFICATE-----"));
    assert_eq!(chain.to_pem().matches("BEGIN CERTIFICATE").count(), 2);
    Ok(())
}

/// Issues and revokes from several threads sharing one authority.
#[test]
fn concurrent_issue_and_revoke() -> Result<()> {
    let ca = Arc::new(util::authority());

    let handles = (0..8)
        .map(|i| {
            let ca = Arc::clone(&ca);
            thread::spawn(move || -> Result<String> {
                let issued = ca.issue(&util::server_request(&format!("node{i}.myca.local")))?;
                if i % 2 == 0 {
                    ca.revoke(&issued.serial_number, ReasonCode::CessationOfOperation)?;
                }
                Ok(issued.serial_number)
            })
        })
        .collect::<Vec<_>>();

    let serials = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Result<Vec<_>>>()?;

    assert_eq!(ca.list_certificates()?.len(), 8);
    let list = ca.revocation_list()?;
    assert_eq!(list.entries.len(), 4);
    for (i, serial) in serials.iter().enumerate() {
        assert_eq!(list.contains(serial), i % 2 == 0);
    }
    Ok(())
}
