use der::Encode;
use der::asn1::BitString;
use sha1::{Digest, Sha1};
use x509_cert::Version;
use x509_cert::certificate::{CertificateInner, TbsCertificateInner};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;

use crate::cert::Certificate;
use crate::cert::extensions::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages,
    SubjectAltName, SubjectKeyIdentifier, ToX509Extension,
};
use crate::cert::params::IssuanceParams;
use crate::cert::to_x509_time;
use crate::error::Result;
use crate::key::KeyPair;

/// Represents an entity capable of issuing certificates.
///
/// This trait provides methods to retrieve issuer details and issue certificates.
pub trait Issuer {
    /// Returns the distinguished name of the issuer.
    fn issuer_name(&self) -> Name;

    /// Returns the signing key of the issuer.
    fn signing_key(&self) -> &KeyPair;

    /// Issues a certificate for the given parameters.
    ///
    /// The certificate always carries basic constraints, subject and authority
    /// key identifiers. Key usage, extended key usage and subject alternative
    /// names are added when the parameters ask for them.
    fn issue(&self, params: &IssuanceParams) -> Result<Certificate> {
        let key = self.signing_key();
        let signature_algorithm = key.signature_algorithm()?;
        let issuer_key_info = key.public_key_info()?;

        let mut extensions: Vec<Extension> = vec![
            BasicConstraints {
                is_ca: params.is_ca,
                max_path_length: None,
            }
            .to_extension(true)?,
        ];

        let mut key_usage = params.key_usage;
        if params.is_ca {
            key_usage |= KeyUsages::KeyCertSign | KeyUsages::CRLSign;
        }
        if !key_usage.is_empty() {
            extensions.push(KeyUsage(key_usage).to_extension(true)?);
        }

        if !params.ext_key_usages.is_empty() {
            let extended_key_usage = ExtendedKeyUsage {
                usage: params.ext_key_usages.clone(),
            };
            extensions.push(extended_key_usage.to_extension(false)?);
        }

        if !params.alt_names.is_empty() {
            let san = SubjectAltName {
                names: params.alt_names.clone(),
            };
            extensions.push(san.to_extension(false)?);
        }

        extensions.push(
            SubjectKeyIdentifier(key_id(&params.subject_public_key.subject_public_key))
                .to_extension(false)?,
        );
        extensions.push(
            AuthorityKeyIdentifier {
                key_identifier: key_id(&issuer_key_info.subject_public_key),
            }
            .to_extension(false)?,
        );

        let tbs_certificate = TbsCertificateInner {
            version: Version::V3,
            serial_number: SerialNumber::new(&params.serial_number)?,
            signature: signature_algorithm.clone(),
            issuer: self.issuer_name(),
            validity: x509_cert::time::Validity {
                not_before: to_x509_time(params.validity.not_before)?,
                not_after: to_x509_time(params.validity.not_after)?,
            },
            subject: params.subject.clone(),
            subject_public_key_info: params.subject_public_key.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(extensions),
        };

        let signature = key.sign_data(&tbs_certificate.to_der()?)?;

        Ok(Certificate {
            inner: CertificateInner {
                tbs_certificate,
                signature_algorithm,
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }
}

/// SHA-1 over the public key bits (RFC 5280, section 4.2.1.2, method 1).
pub(crate) fn key_id(public_key: &BitString) -> Vec<u8> {
    Sha1::digest(public_key.raw_bytes()).to_vec()
}
