use bon::Builder;
use const_oid::AssociatedOid;
use der::asn1::{BitString, OctetString, Uint};
use der::Encode;
use time::OffsetDateTime;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::CrlReason;
use x509_cert::serial_number::SerialNumber;

use crate::cert::extensions::{AuthorityKeyIdentifier, ToX509Extension};
use crate::cert::to_x509_time;
use crate::error::{PkiError, Result};
use crate::issuer::{Issuer, key_id};

/// One revoked certificate as it appears on a CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlEntry {
    pub serial_number: Vec<u8>,
    pub revocation_date: OffsetDateTime,
    /// Omitted from the entry when `None`.
    pub reason: Option<CrlReason>,
}

/// Contents of a certificate revocation list.
#[derive(Debug, Clone, Builder)]
pub struct CrlParams {
    pub this_update: OffsetDateTime,
    pub next_update: OffsetDateTime,
    /// Monotonic CRL number (RFC 5280, section 5.2.3).
    pub number: u64,
    #[builder(default)]
    pub entries: Vec<CrlEntry>,
}

/// A signed X.509 v2 certificate revocation list.
#[derive(Debug, Clone)]
pub struct RevocationListDocument {
    pub inner: CertificateList,
}

impl RevocationListDocument {
    /// Builds and signs a CRL with the issuer's key.
    pub fn sign<I: Issuer + ?Sized>(issuer: &I, params: &CrlParams) -> Result<Self> {
        let key = issuer.signing_key();
        let signature_algorithm = key.signature_algorithm()?;
        let issuer_key_info = key.public_key_info()?;

        let revoked_certificates = params
            .entries
            .iter()
            .map(|entry| -> Result<RevokedCert> {
                let crl_entry_extensions = match entry.reason {
                    Some(reason) => Some(vec![Extension {
                        extn_id: CrlReason::OID,
                        critical: false,
                        extn_value: OctetString::new(reason.to_der()?)?,
                    }]),
                    None => None,
                };
                Ok(RevokedCert {
                    serial_number: SerialNumber::new(&entry.serial_number)?,
                    revocation_date: to_x509_time(entry.revocation_date)?,
                    crl_entry_extensions,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let crl_number = Extension {
            extn_id: const_oid::db::rfc5280::ID_CE_CRL_NUMBER,
            critical: false,
            extn_value: OctetString::new(Uint::new(&params.number.to_be_bytes())?.to_der()?)?,
        };
        let authority_key_id = AuthorityKeyIdentifier {
            key_identifier: key_id(&issuer_key_info.subject_public_key),
        }
        .to_extension(false)?;

        let tbs_cert_list = TbsCertList {
            version: x509_cert::Version::V2,
            signature: signature_algorithm.clone(),
            issuer: issuer.issuer_name(),
            this_update: to_x509_time(params.this_update)?,
            next_update: Some(to_x509_time(params.next_update)?),
            revoked_certificates: (!revoked_certificates.is_empty()).then_some(revoked_certificates),
            crl_extensions: Some(vec![authority_key_id, crl_number]),
        };

        let signature = key.sign_data(&tbs_cert_list.to_der()?)?;

        Ok(Self {
            inner: CertificateList {
                tbs_cert_list,
                signature_algorithm,
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    pub fn to_pem(&self) -> Result<String> {
        let pem = pem::Pem::new("X509 CRL", self.to_der()?);
        Ok(pem::encode_config(
            &pem,
            pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use der::Decode;
    use time::Duration;
    use x509_cert::name::Name;

    use super::*;
    use crate::cert::params::{IssuanceParams, Validity, random_serial};
    use crate::cert::{Certificate, CertificateWithPrivateKey};
    use crate::key::KeyPair;

    fn authority() -> CertificateWithPrivateKey {
        let key = KeyPair::generate_ecdsa_p256();
        let params = IssuanceParams::builder()
            .subject(Name::from_str("CN=CRL Test CA").unwrap())
            .subject_public_key(key.public_key_info().unwrap())
            .serial_number(random_serial())
            .validity(Validity::for_days(30).unwrap())
            .is_ca(true)
            .build();
        CertificateWithPrivateKey {
            cert: Certificate::new_self_signed(&params, &key).unwrap(),
            key,
        }
    }

    #[test]
    fn test_crl_entries_and_reasons() {
        let ca = authority();
        let now = OffsetDateTime::now_utc();
        let params = CrlParams::builder()
            .this_update(now)
            .next_update(now + Duration::days(7))
            .number(3)
            .entries(vec![
                CrlEntry {
                    serial_number: vec![0x0a, 0x1b],
                    revocation_date: now,
                    reason: Some(CrlReason::KeyCompromise),
                },
                CrlEntry {
                    serial_number: vec![0x02],
                    revocation_date: now,
                    reason: None,
                },
            ])
            .build();
        let crl = RevocationListDocument::sign(&ca, &params).unwrap();
        let decoded = CertificateList::from_der(&crl.to_der().unwrap()).unwrap();

        assert_eq!(decoded.tbs_cert_list.issuer, *ca.cert.subject());
        let revoked = decoded.tbs_cert_list.revoked_certificates.unwrap();
        assert_eq!(revoked.len(), 2);
        assert_eq!(revoked[0].serial_number.as_bytes(), [0x0a, 0x1b]);
        let reason = &revoked[0].crl_entry_extensions.as_ref().unwrap()[0];
        assert_eq!(
            CrlReason::from_der(reason.extn_value.as_bytes()).unwrap(),
            CrlReason::KeyCompromise
        );
        assert!(revoked[1].crl_entry_extensions.is_none());
        assert!(crl.to_pem().unwrap().starts_with("-----BEGIN X509 CRL-----"));
    }

    #[test]
    fn test_empty_crl_has_no_entry_list() {
        let ca = authority();
        let now = OffsetDateTime::now_utc();
        let params = CrlParams::builder()
            .this_update(now)
            .next_update(now + Duration::days(1))
            .number(1)
            .build();
        let crl = RevocationListDocument::sign(&ca, &params).unwrap();
        assert!(crl.inner.tbs_cert_list.revoked_certificates.is_none());
        assert_eq!(crl.inner.tbs_cert_list.crl_extensions.as_ref().unwrap().len(), 2);
    }
}
