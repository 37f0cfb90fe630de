use std::net::IpAddr;
use std::str::FromStr;

use const_oid::AssociatedOid;
use der::{
    Encode,
    asn1::{Ia5String, OctetString},
    oid::ObjectIdentifier,
};
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::name::GeneralName;

pub use der::flagset::FlagSet;
pub use x509_cert::ext::pkix::KeyUsages;

use crate::error::{PkiError, Result};

/// Encodes a typed extension into its X.509 form.
pub trait ToX509Extension {
    /// The Object Identifier (OID) for the extension.
    const OID: ObjectIdentifier;

    /// Encodes the extension value into DER.
    fn to_x509_extension_value(&self) -> Result<Vec<u8>>;

    /// Wraps the encoded value into an `Extension`.
    fn to_extension(&self, critical: bool) -> Result<Extension> {
        Ok(Extension {
            extn_id: Self::OID,
            critical,
            extn_value: OctetString::new(self.to_x509_extension_value()?)?,
        })
    }
}

/// Subject Alternative Name. Entries that parse as IP addresses become
/// `iPAddress` names, everything else a `dNSName`.
#[derive(Debug, Clone, Default)]
pub struct SubjectAltName {
    pub names: Vec<String>,
}

impl ToX509Extension for SubjectAltName {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectAltName::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let names = self
            .names
            .iter()
            .map(|name| -> Result<GeneralName> {
                let octets = match name.parse::<IpAddr>() {
                    Ok(IpAddr::V4(ip)) => ip.octets().to_vec(),
                    Ok(IpAddr::V6(ip)) => ip.octets().to_vec(),
                    Err(_) => {
                        return Ia5String::new(name).map(GeneralName::DnsName).map_err(|e| {
                            PkiError::InvalidInput(format!("alt name '{name}': {e}"))
                        });
                    }
                };
                Ok(GeneralName::IpAddress(OctetString::new(octets)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(x509_cert::ext::pkix::SubjectAltName(names).to_der()?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicConstraints {
    pub is_ca: bool,
    pub max_path_length: Option<u8>,
}

impl ToX509Extension for BasicConstraints {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::BasicConstraints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let bc = x509_cert::ext::pkix::BasicConstraints {
            ca: self.is_ca,
            path_len_constraint: self.max_path_length,
        };
        Ok(bc.to_der()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage(pub FlagSet<KeyUsages>);

impl ToX509Extension for KeyUsage {
    const OID: ObjectIdentifier = <x509_cert::ext::pkix::KeyUsage as AssociatedOid>::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        Ok(x509_cert::ext::pkix::KeyUsage(self.0).to_der()?)
    }
}

/// Parses a key usage name as written in templates (`digitalSignature`, `keyCertSign`, ...).
pub fn parse_key_usage(name: &str) -> Result<KeyUsages> {
    let usage = match name.to_ascii_lowercase().as_str() {
        "digitalsignature" => KeyUsages::DigitalSignature,
        "nonrepudiation" | "contentcommitment" => KeyUsages::NonRepudiation,
        "keyencipherment" => KeyUsages::KeyEncipherment,
        "dataencipherment" => KeyUsages::DataEncipherment,
        "keyagreement" => KeyUsages::KeyAgreement,
        "keycertsign" | "certsign" => KeyUsages::KeyCertSign,
        "crlsign" => KeyUsages::CRLSign,
        "encipheronly" => KeyUsages::EncipherOnly,
        "decipheronly" => KeyUsages::DecipherOnly,
        _ => {
            return Err(PkiError::InvalidInput(format!(
                "unsupported key usage '{name}'"
            )));
        }
    };
    Ok(usage)
}

#[derive(Debug, Clone, Default)]
pub struct ExtendedKeyUsage {
    pub usage: Vec<ExtendedKeyUsageOption>,
}

impl ToX509Extension for ExtendedKeyUsage {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::ExtendedKeyUsage::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let oids: Vec<ObjectIdentifier> = self.usage.iter().map(|v| (*v).into()).collect();
        Ok(x509_cert::ext::pkix::ExtendedKeyUsage(oids).to_der()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKeyUsageOption {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
}

impl FromStr for ExtendedKeyUsageOption {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serverauth" => Ok(Self::ServerAuth),
            "clientauth" => Ok(Self::ClientAuth),
            "codesigning" => Ok(Self::CodeSigning),
            "emailprotection" => Ok(Self::EmailProtection),
            "timestamping" => Ok(Self::TimeStamping),
            "ocspsigning" => Ok(Self::OcspSigning),
            _ => Err(PkiError::InvalidInput(format!(
                "unsupported extended key usage '{s}'"
            ))),
        }
    }
}

impl From<ExtendedKeyUsageOption> for ObjectIdentifier {
    fn from(value: ExtendedKeyUsageOption) -> Self {
        match value {
            ExtendedKeyUsageOption::OcspSigning => const_oid::db::rfc5912::ID_KP_OCSP_SIGNING,
            ExtendedKeyUsageOption::ServerAuth => const_oid::db::rfc5912::ID_KP_SERVER_AUTH,
            ExtendedKeyUsageOption::ClientAuth => const_oid::db::rfc5912::ID_KP_CLIENT_AUTH,
            ExtendedKeyUsageOption::CodeSigning => const_oid::db::rfc5912::ID_KP_CODE_SIGNING,
            ExtendedKeyUsageOption::EmailProtection => {
                const_oid::db::rfc5912::ID_KP_EMAIL_PROTECTION
            }
            ExtendedKeyUsageOption::TimeStamping => const_oid::db::rfc5912::ID_KP_TIME_STAMPING,
        }
    }
}

/// SHA-1 of the subject public key bits, as used by both key identifier extensions.
#[derive(Debug, Clone)]
pub struct SubjectKeyIdentifier(pub Vec<u8>);

impl ToX509Extension for SubjectKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        Ok(OctetString::new(self.0.as_slice())?.to_der()?)
    }
}

#[derive(Debug, Clone)]
pub struct AuthorityKeyIdentifier {
    pub key_identifier: Vec<u8>,
}

impl ToX509Extension for AuthorityKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::AuthorityKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(self.key_identifier.as_slice())?),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        };
        Ok(aki.to_der()?)
    }
}
