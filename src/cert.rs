pub mod crl;
pub mod extensions;
pub mod params;

use std::time::SystemTime;

use der::asn1::{GeneralizedTime, UtcTime};
use der::{Decode, DecodePem, Encode, EncodePem};
use time::OffsetDateTime;
use x509_cert::certificate::CertificateInner;
use x509_cert::name::Name;
use x509_cert::time::Time;

use crate::error::{PkiError, Result};
use crate::issuer::Issuer;
use crate::key::KeyPair;

/// Represents an X.509 certificate.
///
/// This struct provides methods to encode the certificate into DER or PEM formats
/// and to read back the fields the authority tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    /// Encodes the certificate into PEM format with LF line endings.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| PkiError::EncodingError(e.to_string()))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_der(der)?,
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_pem(pem.trim())?,
        })
    }

    /// Lowercase hex of the serial number, the name certificates are stored under.
    pub fn serial_hex(&self) -> String {
        hex::encode(self.inner.tbs_certificate.serial_number.as_bytes())
    }

    pub fn subject(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    pub fn not_before(&self) -> OffsetDateTime {
        from_x509_time(&self.inner.tbs_certificate.validity.not_before)
    }

    pub fn not_after(&self) -> OffsetDateTime {
        from_x509_time(&self.inner.tbs_certificate.validity.not_after)
    }

    /// Creates a new self-signed certificate.
    ///
    /// # Arguments
    /// * `params` - Subject, validity and extensions of the certificate.
    /// * `key` - The key pair used to sign the certificate. Its public half must
    ///   be `params.subject_public_key`.
    pub fn new_self_signed(params: &params::IssuanceParams, key: &KeyPair) -> Result<Self> {
        SelfSigned {
            name: params.subject.clone(),
            key,
        }
        .issue(params)
    }
}

/// Encodes a timestamp the way RFC 5280 requires: `UTCTime` through 2049,
/// `GeneralizedTime` from 2050 on.
pub(crate) fn to_x509_time(at: OffsetDateTime) -> Result<Time> {
    let at = at.replace_nanosecond(0).unwrap_or(at);
    let system_time = SystemTime::from(at);
    let time = if at.year() < 2050 {
        Time::UtcTime(UtcTime::from_system_time(system_time)?)
    } else {
        Time::GeneralTime(GeneralizedTime::from_system_time(system_time)?)
    };
    Ok(time)
}

pub(crate) fn from_x509_time(time: &Time) -> OffsetDateTime {
    OffsetDateTime::from(time.to_system_time())
}

/// Signs with `key` under `name`; the issuer of a self-signed certificate.
struct SelfSigned<'a> {
    name: Name,
    key: &'a KeyPair,
}

impl Issuer for SelfSigned<'_> {
    fn issuer_name(&self) -> Name {
        self.name.clone()
    }

    fn signing_key(&self) -> &KeyPair {
        self.key
    }
}

/// A CA certificate loaded together with its private key.
#[derive(Debug)]
pub struct CertificateWithPrivateKey {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl CertificateWithPrivateKey {
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        Ok(Self {
            cert: Certificate::from_pem(cert_pem)?,
            key: KeyPair::from_pkcs8_pem(key_pem)?,
        })
    }
}

impl Issuer for CertificateWithPrivateKey {
    fn issuer_name(&self) -> Name {
        // The name of the issuer is the subject of the certificate
        self.cert.subject().clone()
    }

    fn signing_key(&self) -> &KeyPair {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_time_encoding_switches_at_2050() {
        assert!(matches!(
            to_x509_time(datetime!(2049-12-31 23:59:59 UTC)).unwrap(),
            Time::UtcTime(_)
        ));
        assert!(matches!(
            to_x509_time(datetime!(2050-01-01 00:00:00 UTC)).unwrap(),
            Time::GeneralTime(_)
        ));
    }

    #[test]
    fn test_time_round_trip_drops_subseconds() {
        let at = datetime!(2030-06-01 12:30:45.750 UTC);
        let decoded = from_x509_time(&to_x509_time(at).unwrap());
        assert_eq!(decoded, datetime!(2030-06-01 12:30:45 UTC));
    }
}
