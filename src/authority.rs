//! The certificate authority: issues, tracks and revokes certificates on top
//! of a [`StorageBackend`].
//!
//! A certificate moves through `Requested -> Issued`, and from there is
//! `Active`, `Expired` or `Revoked`. Only `Issued` and `Revoked` are stored;
//! [`CertificateStatus`] is computed on every read, and a revoked certificate
//! stays revoked after it expires.

use std::sync::Arc;

use bon::Builder;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::annotation::{
    EXPIRATION_DATE, REVOCATION_DATE, REVOCATION_REASON_CODE, REVOKED, encode_epoch,
};
use crate::cert::crl::{CrlEntry, CrlParams, RevocationListDocument};
use crate::cert::extensions::{ExtendedKeyUsageOption, FlagSet, KeyUsages, parse_key_usage};
use crate::cert::params::{IssuanceParams, Validity, add_days, parse_subject, random_serial};
use crate::cert::{Certificate, CertificateWithPrivateKey};
use crate::config::PkiSettings;
use crate::error::{PkiError, Result};
use crate::issuer::Issuer;
use crate::key::{KeyAlgorithm, KeyPair};
use crate::resource::{Annotation, Resource, ResourceFilter, ResourceId};
use crate::revocation::{ReasonCode, RevocationList, RevokedCertificate, is_expired, parse_revocation};
use crate::storage::{DEFAULT_SUBJECT_TEMPLATE, SUBJECT_TEMPLATE_PATH, StorageBackend, VARIABLE_KIND};
use crate::template::{
    Accessor, CertificateRequestData, Placeholders, Rfc4514, Template, lookup, render,
};

const CA_CERTIFICATE: &str = "ca/certificate";
const CA_KEY: &str = "ca/key";
const CA_CRL: &str = "ca/crl";
const TEMPLATES: &str = "templates";
const CERTIFICATES: &str = "certificates";
const PRIVATE_KEYS: &str = "private-keys";

/// Tunables of a [`CertificateAuthority`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    /// Policy branch every resource lives under.
    pub branch: String,
    /// Days past `ExpirationDate` before a certificate counts as expired.
    pub expiration_buffer_days: i64,
    pub crl_validity_days: i64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        PkiSettings::default().into()
    }
}

impl From<PkiSettings> for AuthorityConfig {
    fn from(settings: PkiSettings) -> Self {
        Self {
            branch: settings.branch,
            expiration_buffer_days: settings.expiration_buffer_days,
            crl_validity_days: settings.crl_validity_days,
        }
    }
}

/// Subject and key of a new root CA.
#[derive(Debug, Clone, Builder)]
pub struct RootRequest {
    pub common_name: String,
    #[builder(default)]
    pub organization: String,
    #[builder(default)]
    pub organizational_unit: String,
    #[builder(default)]
    pub locality: String,
    #[builder(default)]
    pub province: String,
    #[builder(default)]
    pub country: String,
    #[builder(default)]
    pub key_algo: KeyAlgorithm,
    #[builder(default = 4096)]
    pub key_bits: usize,
    #[builder(default = 3650)]
    pub validity_days: i64,
}

impl RootRequest {
    const FIELDS: &'static [(&'static str, Accessor<Self>)] = &[
        ("CommonName", |r| r.common_name.clone()),
        ("Organization", |r| r.organization.clone()),
        ("OrganizationalUnit", |r| r.organizational_unit.clone()),
        ("Locality", |r| r.locality.clone()),
        ("Province", |r| r.province.clone()),
        ("Country", |r| r.country.clone()),
    ];
}

impl Placeholders for RootRequest {
    fn placeholder(&self, name: &str) -> Option<String> {
        lookup(self, Self::FIELDS, name)
    }
}

/// A freshly issued certificate and the material the requester needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub serial_number: String,
    pub certificate: String,
    pub private_key: String,
    pub ca_certificate: String,
    pub expiration: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    Active,
    Expired,
    Revoked(RevokedCertificate),
}

/// Issues and tracks certificates. Cheap to clone and safe to share across threads.
pub struct CertificateAuthority<B> {
    backend: Arc<B>,
    config: AuthorityConfig,
}

impl<B> Clone for CertificateAuthority<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

fn is_serial(serial: &str) -> bool {
    !serial.is_empty() && serial.bytes().all(|b| b.is_ascii_hexdigit())
}

fn utf8(id: &ResourceId, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| PkiError::DecodingError(format!("{id}: {e}")))
}

impl<B: StorageBackend> CertificateAuthority<B> {
    pub fn new(backend: Arc<B>, config: AuthorityConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    fn resource_id(&self, path: &str) -> ResourceId {
        self.backend
            .variable(&format!("{}/{path}", self.config.branch))
    }

    fn certificate_id(&self, serial: &str) -> Result<ResourceId> {
        if !is_serial(serial) {
            return Err(PkiError::InvalidInput(format!(
                "'{serial}' is not a hexadecimal serial number"
            )));
        }
        Ok(self.resource_id(&format!("{CERTIFICATES}/{}", serial.to_ascii_lowercase())))
    }

    fn put_secret(&self, id: &ResourceId, annotations: &[Annotation], value: &[u8]) -> Result<()> {
        self.backend.create_resource(id, annotations)?;
        self.backend.store_secret(id, value)
    }

    fn read_secret(&self, id: &ResourceId) -> Result<String> {
        utf8(id, self.backend.fetch_secret(id)?)
    }

    fn load_issuer(&self) -> Result<CertificateWithPrivateKey> {
        let cert = self.read_secret(&self.resource_id(CA_CERTIFICATE))?;
        let key = self.read_secret(&self.resource_id(CA_KEY))?;
        CertificateWithPrivateKey::from_pem(&cert, &key)
    }

    fn subject_template(&self) -> Result<String> {
        match self.read_secret(&self.resource_id(SUBJECT_TEMPLATE_PATH)) {
            Ok(template) if !template.trim().is_empty() => Ok(template),
            Ok(_) | Err(PkiError::ResourceNotFound(_)) => Ok(DEFAULT_SUBJECT_TEMPLATE.to_string()),
            Err(err) => Err(err),
        }
    }

    fn certificate_resources(&self) -> Result<Vec<Resource>> {
        let filter = ResourceFilter::kind(VARIABLE_KIND)
            .search(format!("{}/{CERTIFICATES}/", self.config.branch));
        self.backend.fetch_resources(&filter)
    }

    /// Creates a self-signed root CA and stores its key and certificate.
    ///
    /// Replaces any previous CA. Returns the certificate PEM.
    pub fn generate_root(&self, request: &RootRequest) -> Result<String> {
        let key = KeyPair::generate(request.key_algo, request.key_bits)?;
        let subject = parse_subject(&render(&Rfc4514(request), DEFAULT_SUBJECT_TEMPLATE))?;
        let params = IssuanceParams::builder()
            .subject(subject)
            .subject_public_key(key.public_key_info()?)
            .serial_number(random_serial())
            .validity(Validity::for_days(request.validity_days)?)
            .is_ca(true)
            .build();
        let cert = Certificate::new_self_signed(&params, &key)?;
        let pem = cert.to_pem()?;

        self.put_secret(&self.resource_id(CA_KEY), &[], key.to_pkcs8_pem()?.as_bytes())?;
        self.put_secret(&self.resource_id(CA_CERTIFICATE), &[], pem.as_bytes())?;
        info!(serial = %cert.serial_hex(), subject = %cert.subject(), "generated root CA");
        Ok(pem)
    }

    /// PEM of the CA certificate.
    pub fn ca_certificate(&self) -> Result<String> {
        self.read_secret(&self.resource_id(CA_CERTIFICATE))
    }

    /// Validates and stores an issuance template, replacing one of the same name.
    pub fn create_template(&self, template: &Template) -> Result<()> {
        let name = &template.template_name;
        if name.is_empty() || name.contains('/') {
            return Err(PkiError::InvalidInput(format!("invalid template name '{name}'")));
        }
        if template.key_algo == KeyAlgorithm::Rsa && !matches!(template.key_bits, 2048 | 3072 | 4096) {
            return Err(PkiError::InvalidInput(format!(
                "unsupported RSA key size {}",
                template.key_bits
            )));
        }
        if template.validity_days <= 0 || template.max_ttl_days <= 0 {
            return Err(PkiError::InvalidInput(
                "validity and maximum TTL must be positive".to_string(),
            ));
        }
        Validity::for_days(template.validity_days.max(template.max_ttl_days))?;
        key_usage(template)?;
        ext_key_usages(template)?;

        let json = serde_json::to_vec(template)?;
        self.put_secret(&self.resource_id(&format!("{TEMPLATES}/{name}")), &[], &json)?;
        info!(template = %name, "stored template");
        Ok(())
    }

    pub fn template(&self, name: &str) -> Result<Template> {
        let id = self.resource_id(&format!("{TEMPLATES}/{name}"));
        Ok(serde_json::from_slice(&self.backend.fetch_secret(&id)?)?)
    }

    pub fn list_templates(&self) -> Result<Vec<String>> {
        let filter = ResourceFilter::kind(VARIABLE_KIND)
            .search(format!("{}/{TEMPLATES}/", self.config.branch));
        Ok(self
            .backend
            .list_resources(&filter)?
            .iter()
            .map(|id| id.leaf().to_string())
            .collect())
    }

    /// Issues a certificate under the request's template.
    ///
    /// The subject is the configured subject template rendered from the request
    /// and the template, request fields taking precedence. The certificate is
    /// recorded with `Revoked=false` and its `ExpirationDate`.
    pub fn issue(&self, request: &CertificateRequestData) -> Result<IssuedCertificate> {
        if request.common_name.trim().is_empty() {
            return Err(PkiError::InvalidInput("common name is required".to_string()));
        }
        let template = self.template(&request.template_name)?;
        let ttl_days = request.ttl_days.unwrap_or(template.validity_days);
        if ttl_days <= 0 || ttl_days > template.max_ttl_days {
            return Err(PkiError::InvalidInput(format!(
                "TTL of {ttl_days} days is outside 1..={} allowed by template '{}'",
                template.max_ttl_days, template.template_name
            )));
        }

        let subject_text = render(&Rfc4514(&(request, &template)), &self.subject_template()?);
        let subject = parse_subject(&subject_text)?;
        let key = KeyPair::generate(template.key_algo, template.key_bits)?;
        let issuer = self.load_issuer()?;

        let mut validity = Validity::for_days(ttl_days)?;
        let ca_not_after = issuer.cert.not_after();
        if validity.not_after > ca_not_after {
            warn!(template = %template.template_name, "certificate lifetime capped at CA expiration");
            validity.not_after = ca_not_after;
        }

        let params = IssuanceParams::builder()
            .subject(subject)
            .subject_public_key(key.public_key_info()?)
            .serial_number(random_serial())
            .validity(validity)
            .key_usage(key_usage(&template)?)
            .ext_key_usages(ext_key_usages(&template)?)
            .alt_names(request.alt_names.clone())
            .build();
        let cert = issuer.issue(&params)?;
        let serial_number = cert.serial_hex();
        let certificate = cert.to_pem()?;
        let private_key = key.to_pkcs8_pem()?;
        let expiration = cert.not_after();

        self.put_secret(
            &self.resource_id(&format!("{CERTIFICATES}/{serial_number}")),
            &[
                Annotation::new(REVOKED, "false"),
                Annotation::new(EXPIRATION_DATE, encode_epoch(expiration)),
            ],
            certificate.as_bytes(),
        )?;
        if template.store_private_key {
            self.put_secret(
                &self.resource_id(&format!("{PRIVATE_KEYS}/{serial_number}")),
                &[],
                private_key.as_bytes(),
            )?;
        }

        info!(serial = %serial_number, template = %template.template_name, subject = %subject_text, "issued certificate");
        Ok(IssuedCertificate {
            serial_number,
            certificate,
            private_key,
            ca_certificate: issuer.cert.to_pem()?,
            expiration,
        })
    }

    /// Marks a certificate revoked as of now. Revoking again overwrites the
    /// reason and date.
    pub fn revoke(&self, serial: &str, reason: ReasonCode) -> Result<()> {
        self.revoke_at(serial, reason, OffsetDateTime::now_utc())
    }

    pub fn revoke_at(&self, serial: &str, reason: ReasonCode, at: OffsetDateTime) -> Result<()> {
        let id = self.certificate_id(serial)?;
        self.backend.fetch_resource(&id)?;
        self.backend
            .write_annotation(&id, REVOCATION_REASON_CODE, &reason.code().to_string())?;
        self.backend
            .write_annotation(&id, REVOCATION_DATE, &encode_epoch(at))?;
        self.backend.write_annotation(&id, REVOKED, "true")?;
        info!(serial, %reason, "revoked certificate");
        Ok(())
    }

    /// PEM of an issued certificate.
    pub fn certificate(&self, serial: &str) -> Result<String> {
        self.read_secret(&self.certificate_id(serial)?)
    }

    /// Serial numbers of every issued certificate, revoked and expired included.
    pub fn list_certificates(&self) -> Result<Vec<String>> {
        Ok(self
            .certificate_resources()?
            .iter()
            .map(|resource| resource.id.leaf().to_string())
            .collect())
    }

    /// # Errors
    /// [`PkiError::RevocationDataCorrupt`] if the certificate is marked revoked
    /// but its revocation facts cannot be read.
    pub fn status(&self, serial: &str, now: OffsetDateTime) -> Result<CertificateStatus> {
        let resource = self.backend.fetch_resource(&self.certificate_id(serial)?)?;
        if let Some(revoked) = parse_revocation(&resource)? {
            return Ok(CertificateStatus::Revoked(revoked));
        }
        if is_expired(&resource, now, self.config.expiration_buffer_days) {
            return Ok(CertificateStatus::Expired);
        }
        Ok(CertificateStatus::Active)
    }

    /// Every revoked certificate. Corrupt records are skipped, not fatal.
    pub fn revocation_list(&self) -> Result<RevocationList> {
        Ok(RevocationList::collect(&self.certificate_resources()?))
    }

    /// Signs a CRL of all revoked certificates, stores it and returns its DER.
    pub fn generate_crl(&self, now: OffsetDateTime) -> Result<Vec<u8>> {
        let issuer = self.load_issuer()?;
        let list = self.revocation_list()?;
        let entries = list
            .entries
            .iter()
            .filter_map(|revoked| match hex::decode(&revoked.serial_number) {
                Ok(serial_number) => Some(CrlEntry {
                    serial_number,
                    revocation_date: revoked.revocation_date,
                    reason: revoked.reason().map(Into::into),
                }),
                Err(err) => {
                    warn!(serial = %revoked.serial_number, error = %err, "leaving certificate with a non-hex serial off the CRL");
                    None
                }
            })
            .collect();

        let next_update = add_days(now, self.config.crl_validity_days).ok_or_else(|| {
            PkiError::InvalidInput(format!(
                "CRL validity of {} days is out of range",
                self.config.crl_validity_days
            ))
        })?;
        let params = CrlParams::builder()
            .this_update(now)
            .next_update(next_update)
            .number(u64::try_from(now.unix_timestamp()).unwrap_or_default())
            .entries(entries)
            .build();
        let der = RevocationListDocument::sign(&issuer, &params)?.to_der()?;
        self.put_secret(&self.resource_id(CA_CRL), &[], &der)?;
        info!(revoked = list.entries.len(), skipped = list.skipped.len(), "generated CRL");
        Ok(der)
    }

    /// The stored CRL, DER encoded.
    pub fn crl(&self) -> Result<Vec<u8>> {
        self.backend.fetch_secret(&self.resource_id(CA_CRL))
    }

    /// Serial numbers of certificates expired at `now`, honouring the
    /// configured buffer. Read only.
    pub fn expired_certificates(&self, now: OffsetDateTime) -> Result<Vec<String>> {
        Ok(self
            .certificate_resources()?
            .iter()
            .filter(|resource| is_expired(resource, now, self.config.expiration_buffer_days))
            .map(|resource| resource.id.leaf().to_string())
            .collect())
    }
}

fn key_usage(template: &Template) -> Result<FlagSet<KeyUsages>> {
    template
        .key_usages
        .iter()
        .try_fold(FlagSet::default(), |flags, name| Ok(flags | parse_key_usage(name)?))
}

fn ext_key_usages(template: &Template) -> Result<Vec<ExtendedKeyUsageOption>> {
    template
        .ext_key_usages
        .iter()
        .map(|name| name.parse())
        .collect()
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use time::macros::datetime;

    use super::*;
    use crate::storage::MemoryBackend;

    fn authority() -> CertificateAuthority<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new("acct", "pki"));
        backend.bootstrap().unwrap();
        let ca = CertificateAuthority::new(backend, AuthorityConfig::default());
        ca.generate_root(
            &RootRequest::builder()
                .common_name("Test Root".to_string())
                .key_algo(KeyAlgorithm::EcdsaP256)
                .build(),
        )
        .unwrap();
        ca.create_template(
            &Template::builder()
                .template_name("web".to_string())
                .organization("Example Corp".to_string())
                .key_usages(vec!["digitalSignature".to_string()])
                .ext_key_usages(vec!["serverAuth".to_string()])
                .validity_days(30)
                .max_ttl_days(90)
                .build(),
        )
        .unwrap();
        ca
    }

    fn request(ttl_days: Option<i64>) -> CertificateRequestData {
        CertificateRequestData::builder()
            .template_name("web".to_string())
            .common_name("app.example.com".to_string())
            .alt_names(vec!["app.example.com".to_string()])
            .maybe_ttl_days(ttl_days)
            .build()
    }

    #[test]
    fn test_issue_records_lifecycle_annotations() {
        let ca = authority();
        let issued = ca.issue(&request(None)).unwrap();

        let id = ca.certificate_id(&issued.serial_number).unwrap();
        assert_eq!(ca.backend().read_annotation(&id, REVOKED).unwrap(), "false");
        assert_eq!(
            ca.backend().read_annotation(&id, EXPIRATION_DATE).unwrap(),
            issued.expiration.unix_timestamp().to_string()
        );
        assert_eq!(ca.certificate(&issued.serial_number).unwrap(), issued.certificate);
        assert_eq!(ca.list_certificates().unwrap(), vec![issued.serial_number.clone()]);

        let cert = Certificate::from_pem(&issued.certificate).unwrap();
        assert_eq!(cert.subject().to_string(), "CN=app.example.com,O=Example Corp");
    }

    #[test]
    fn test_ttl_bounded_by_template() {
        let ca = authority();
        assert!(matches!(ca.issue(&request(Some(91))), Err(PkiError::InvalidInput(_))));
        assert!(matches!(ca.issue(&request(Some(0))), Err(PkiError::InvalidInput(_))));
        assert!(ca.issue(&request(Some(90))).is_ok());
    }

    #[test]
    fn test_unknown_template() {
        let ca = authority();
        let request = CertificateRequestData::builder()
            .template_name("missing".to_string())
            .common_name("x".to_string())
            .build();
        assert!(matches!(ca.issue(&request), Err(PkiError::ResourceNotFound(_))));
    }

    #[test]
    fn test_status_transitions() {
        let ca = authority();
        let issued = ca.issue(&request(Some(10))).unwrap();
        let serial = issued.serial_number.as_str();

        let now = OffsetDateTime::now_utc();
        assert_eq!(ca.status(serial, now).unwrap(), CertificateStatus::Active);
        assert_eq!(
            ca.status(serial, now + Duration::days(11)).unwrap(),
            CertificateStatus::Expired
        );
        assert_eq!(ca.expired_certificates(now + Duration::days(11)).unwrap(), vec![serial]);
        assert!(ca.expired_certificates(now).unwrap().is_empty());

        let at = datetime!(2024-01-01 00:00:00 UTC);
        ca.revoke_at(serial, ReasonCode::KeyCompromise, at).unwrap();
        let status = ca.status(serial, now + Duration::days(11)).unwrap();
        assert_eq!(
            status,
            CertificateStatus::Revoked(RevokedCertificate {
                serial_number: serial.to_string(),
                reason_code: 1,
                revocation_date: at,
            })
        );
    }

    #[test]
    fn test_rerevoke_overwrites() {
        let ca = authority();
        let serial = ca.issue(&request(None)).unwrap().serial_number;
        ca.revoke(&serial, ReasonCode::Superseded).unwrap();
        ca.revoke(&serial, ReasonCode::KeyCompromise).unwrap();
        let list = ca.revocation_list().unwrap();
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].reason(), Some(ReasonCode::KeyCompromise));
    }

    #[test]
    fn test_revoke_unknown_or_invalid_serial() {
        let ca = authority();
        assert!(matches!(
            ca.revoke("0abc", ReasonCode::Unspecified),
            Err(PkiError::ResourceNotFound(_))
        ));
        assert!(matches!(
            ca.revoke("../ca/key", ReasonCode::Unspecified),
            Err(PkiError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_template_validation() {
        let ca = authority();
        let bad_usage = Template::builder()
            .template_name("bad".to_string())
            .key_usages(vec!["everything".to_string()])
            .build();
        assert!(ca.create_template(&bad_usage).is_err());
        let bad_rsa = Template::builder()
            .template_name("rsa".to_string())
            .key_algo(KeyAlgorithm::Rsa)
            .key_bits(1024)
            .build();
        assert!(ca.create_template(&bad_rsa).is_err());
        assert_eq!(ca.list_templates().unwrap(), vec!["web".to_string()]);
        assert_eq!(ca.template("web").unwrap().organization, "Example Corp");
    }

    #[test]
    fn test_private_key_storage_follows_template() {
        let ca = authority();
        let issued = ca.issue(&request(None)).unwrap();
        let key_id = ca.resource_id(&format!("private-keys/{}", issued.serial_number));
        assert_eq!(ca.read_secret(&key_id).unwrap(), issued.private_key);

        ca.create_template(
            &Template::builder()
                .template_name("ephemeral".to_string())
                .store_private_key(false)
                .build(),
        )
        .unwrap();
        let issued = ca
            .issue(
                &CertificateRequestData::builder()
                    .template_name("ephemeral".to_string())
                    .common_name("tmp.example.com".to_string())
                    .build(),
            )
            .unwrap();
        let key_id = ca.resource_id(&format!("private-keys/{}", issued.serial_number));
        assert!(matches!(
            ca.backend().fetch_secret(&key_id),
            Err(PkiError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_out_of_range_lifetimes_are_rejected() {
        let ca = authority();
        let endless = Template::builder()
            .template_name("endless".to_string())
            .validity_days(3_000_000)
            .max_ttl_days(3_000_000)
            .build();
        assert!(matches!(ca.create_template(&endless), Err(PkiError::InvalidInput(_))));

        // Stored directly, skipping template validation.
        let id = ca.resource_id("templates/endless");
        ca.put_secret(&id, &[], &serde_json::to_vec(&endless).unwrap())
            .unwrap();
        let request = CertificateRequestData::builder()
            .template_name("endless".to_string())
            .common_name("x.example.com".to_string())
            .build();
        assert!(matches!(ca.issue(&request), Err(PkiError::InvalidInput(_))));

        let root = RootRequest::builder()
            .common_name("Forever Root".to_string())
            .validity_days(i64::MAX)
            .build();
        assert!(matches!(ca.generate_root(&root), Err(PkiError::InvalidInput(_))));
    }

    #[test]
    fn test_out_of_range_crl_validity_is_rejected() {
        let ca = authority();
        let ca = CertificateAuthority::new(
            Arc::clone(&ca.backend),
            AuthorityConfig {
                crl_validity_days: 5_000_000,
                ..AuthorityConfig::default()
            },
        );
        assert!(matches!(
            ca.generate_crl(OffsetDateTime::now_utc()),
            Err(PkiError::InvalidInput(_))
        ));
        assert!(matches!(ca.crl(), Err(PkiError::ResourceNotFound(_))));
    }
}
