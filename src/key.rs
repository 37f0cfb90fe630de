use std::fmt;
use std::str::FromStr;

use der::asn1::{Any, BitString};
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use p256::ecdsa::SigningKey as P256SigningKey;
use p384::ecdsa::SigningKey as P384SigningKey;
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use crate::error::{PkiError, Result};

/// Key algorithms a template can request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "RSA")]
    Rsa,
    #[default]
    #[serde(rename = "ECDSA-P256")]
    EcdsaP256,
    #[serde(rename = "ECDSA-P384")]
    EcdsaP384,
    #[serde(rename = "ED25519")]
    Ed25519,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::EcdsaP256 => "ECDSA-P256",
            KeyAlgorithm::EcdsaP384 => "ECDSA-P384",
            KeyAlgorithm::Ed25519 => "ED25519",
        };
        f.write_str(name)
    }
}

impl FromStr for KeyAlgorithm {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RSA" => Ok(KeyAlgorithm::Rsa),
            "ECDSA" | "ECDSA-P256" | "P256" => Ok(KeyAlgorithm::EcdsaP256),
            "ECDSA-P384" | "P384" => Ok(KeyAlgorithm::EcdsaP384),
            "ED25519" => Ok(KeyAlgorithm::Ed25519),
            other => Err(PkiError::InvalidInput(format!(
                "unsupported key algorithm '{other}'"
            ))),
        }
    }
}

/// A private key together with everything needed to sign with it.
pub enum KeyPair {
    Rsa { private: Box<RsaPrivateKey> },
    EcdsaP256 { signing_key: P256SigningKey },
    EcdsaP384 { signing_key: P384SigningKey },
    Ed25519 { signing_key: Ed25519SigningKey },
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generates a key for the given algorithm. `bits` only applies to RSA.
    pub fn generate(algorithm: KeyAlgorithm, bits: usize) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::Rsa => Self::generate_rsa(bits),
            KeyAlgorithm::EcdsaP256 => Ok(Self::generate_ecdsa_p256()),
            KeyAlgorithm::EcdsaP384 => Ok(Self::generate_ecdsa_p384()),
            KeyAlgorithm::Ed25519 => Ok(Self::generate_ed25519()),
        }
    }

    /// Generate an RSA key pair with 2048, 3072 or 4096 bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        if !matches!(bits, 2048 | 3072 | 4096) {
            return Err(PkiError::InvalidInput(format!(
                "unsupported RSA key size {bits}"
            )));
        }
        let mut rng = rand_core::OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)?;
        Ok(KeyPair::Rsa {
            private: Box::new(private),
        })
    }

    pub fn generate_ecdsa_p256() -> Self {
        let mut rng = rand_core::OsRng;
        KeyPair::EcdsaP256 {
            signing_key: P256SigningKey::random(&mut rng),
        }
    }

    pub fn generate_ecdsa_p384() -> Self {
        let mut rng = rand_core::OsRng;
        KeyPair::EcdsaP384 {
            signing_key: P384SigningKey::random(&mut rng),
        }
    }

    pub fn generate_ed25519() -> Self {
        let mut rng = rand_core::OsRng;
        KeyPair::Ed25519 {
            signing_key: Ed25519SigningKey::generate(&mut rng),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeyPair::Rsa { .. } => KeyAlgorithm::Rsa,
            KeyPair::EcdsaP256 { .. } => KeyAlgorithm::EcdsaP256,
            KeyPair::EcdsaP384 { .. } => KeyAlgorithm::EcdsaP384,
            KeyPair::Ed25519 { .. } => KeyAlgorithm::Ed25519,
        }
    }

    /// Signs `data`. ECDSA signatures are DER encoded as X.509 requires.
    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyPair::Rsa { private } => {
                let signing_key =
                    rsa::pkcs1v15::SigningKey::<Sha256>::new(private.as_ref().clone());
                Ok(signing_key.sign(data).to_vec())
            }
            KeyPair::EcdsaP256 { signing_key } => {
                let signature: p256::ecdsa::Signature = signing_key.sign(data);
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::EcdsaP384 { signing_key } => {
                let signature: p384::ecdsa::Signature = signing_key.sign(data);
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyPair::Ed25519 { signing_key } => {
                Ok(ed25519_dalek::Signer::sign(signing_key, data).to_bytes().to_vec())
            }
        }
    }

    /// Algorithm identifier of signatures produced by [`KeyPair::sign_data`].
    pub fn signature_algorithm(&self) -> Result<AlgorithmIdentifierOwned> {
        let identifier = match self {
            KeyPair::Rsa { .. } => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(Any::new(der::Tag::Null, Vec::<u8>::new())?),
            },
            KeyPair::EcdsaP256 { .. } => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
                parameters: None,
            },
            KeyPair::EcdsaP384 { .. } => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_384,
                parameters: None,
            },
            KeyPair::Ed25519 { .. } => AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc8410::ID_ED_25519,
                parameters: None,
            },
        };
        Ok(identifier)
    }

    /// The public half as a SubjectPublicKeyInfo.
    pub fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let encoding_error = |e: x509_cert::spki::Error| PkiError::EncodingError(e.to_string());
        match self {
            KeyPair::Rsa { private } => {
                SubjectPublicKeyInfoOwned::from_key(RsaPublicKey::from(private.as_ref()))
                    .map_err(encoding_error)
            }
            KeyPair::EcdsaP256 { signing_key } => {
                SubjectPublicKeyInfoOwned::from_key(*signing_key.verifying_key())
                    .map_err(encoding_error)
            }
            KeyPair::EcdsaP384 { signing_key } => {
                SubjectPublicKeyInfoOwned::from_key(*signing_key.verifying_key())
                    .map_err(encoding_error)
            }
            KeyPair::Ed25519 { signing_key } => Ok(SubjectPublicKeyInfoOwned {
                algorithm: AlgorithmIdentifierOwned {
                    oid: const_oid::db::rfc8410::ID_ED_25519,
                    parameters: None,
                },
                subject_public_key: BitString::from_bytes(
                    &signing_key.verifying_key().to_bytes(),
                )?,
            }),
        }
    }

    /// PKCS#8 PEM encoding of the private key.
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = match self {
            KeyPair::Rsa { private } => private.to_pkcs8_pem(LineEnding::LF)?,
            KeyPair::EcdsaP256 { signing_key } => {
                p256::SecretKey::from_bytes(&signing_key.to_bytes())
                    .map_err(|e| PkiError::EncodingError(e.to_string()))?
                    .to_pkcs8_pem(LineEnding::LF)?
            }
            KeyPair::EcdsaP384 { signing_key } => {
                p384::SecretKey::from_bytes(&signing_key.to_bytes())
                    .map_err(|e| PkiError::EncodingError(e.to_string()))?
                    .to_pkcs8_pem(LineEnding::LF)?
            }
            KeyPair::Ed25519 { signing_key } => signing_key.to_pkcs8_pem(LineEnding::LF)?,
        };
        Ok(pem.as_str().to_owned())
    }

    /// Imports a PKCS#8 PEM private key of any supported algorithm.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        if let Ok(secret) = p256::SecretKey::from_pkcs8_pem(pem) {
            return Ok(KeyPair::EcdsaP256 {
                signing_key: P256SigningKey::from(&secret),
            });
        }
        if let Ok(secret) = p384::SecretKey::from_pkcs8_pem(pem) {
            return Ok(KeyPair::EcdsaP384 {
                signing_key: P384SigningKey::from(&secret),
            });
        }
        if let Ok(signing_key) = Ed25519SigningKey::from_pkcs8_pem(pem) {
            return Ok(KeyPair::Ed25519 { signing_key });
        }
        let private = RsaPrivateKey::from_pkcs8_pem(pem)?;
        Ok(KeyPair::Rsa {
            private: Box::new(private),
        })
    }
}
