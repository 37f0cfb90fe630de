use std::str::FromStr;

use bon::Builder;
use time::Duration;
use time::OffsetDateTime;
use x509_cert::name::Name;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

pub use crate::cert::extensions::ExtendedKeyUsageOption;
use crate::cert::extensions::{FlagSet, KeyUsages};
use crate::error::{PkiError, Result};

/// Everything an issuer needs to sign a certificate.
///
/// # Fields
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key being certified.
/// * `serial_number` - Big-endian serial, see [`random_serial`].
/// * `validity` - The `notBefore`/`notAfter` window.
/// * `is_ca` - Issue a CA certificate (adds `keyCertSign` and `cRLSign`).
/// * `key_usage` - Key usage bits; omitted from the certificate when empty.
/// * `ext_key_usages` - Extended key usages; omitted when empty.
/// * `alt_names` - DNS names or IP addresses for the SAN extension.
#[derive(Clone, Debug, Builder)]
pub struct IssuanceParams {
    pub subject: Name,
    pub subject_public_key: SubjectPublicKeyInfoOwned,
    pub serial_number: Vec<u8>,
    pub validity: Validity,
    #[builder(default)]
    pub is_ca: bool,
    #[builder(default)]
    pub key_usage: FlagSet<KeyUsages>,
    #[builder(default)]
    pub ext_key_usages: Vec<ExtendedKeyUsageOption>,
    #[builder(default)]
    pub alt_names: Vec<String>,
}

/// Certificate validity period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period starting now for the given number of days.
    pub fn for_days(days: i64) -> Result<Self> {
        Self::starting_at(OffsetDateTime::now_utc(), days)
    }

    /// Creates a validity period of `days` starting at `not_before`, truncated to whole seconds.
    ///
    /// # Errors
    /// [`PkiError::InvalidInput`] if the period ends outside the representable date range.
    pub fn starting_at(not_before: OffsetDateTime, days: i64) -> Result<Self> {
        let not_before = not_before.replace_nanosecond(0).unwrap_or(not_before);
        let not_after = add_days(not_before, days).ok_or_else(|| {
            PkiError::InvalidInput(format!("validity of {days} days is out of range"))
        })?;
        Ok(Self {
            not_before,
            not_after,
        })
    }
}

/// `at` plus `days`, or `None` when the result leaves the representable range.
pub fn add_days(at: OffsetDateTime, days: i64) -> Option<OffsetDateTime> {
    days.checked_mul(86_400)
        .map(Duration::seconds)
        .and_then(|offset| at.checked_add(offset))
}

/// Parses an RFC 4514 distinguished name, dropping attributes with an empty value.
///
/// Templates commonly reference optional fields (`O=<Organization>`); when the
/// field is empty the whole attribute is removed rather than encoded empty.
pub fn parse_subject(rfc4514: &str) -> Result<Name> {
    let kept = split_unescaped(rfc4514, ',')
        .into_iter()
        .map(str::trim)
        .filter(|attribute| {
            attribute
                .split_once('=')
                .is_some_and(|(_, value)| !value.trim().is_empty())
        })
        .collect::<Vec<_>>();
    if kept.is_empty() {
        return Err(PkiError::InvalidInput(format!(
            "subject '{rfc4514}' has no attributes"
        )));
    }
    Name::from_str(&kept.join(","))
        .map_err(|e| PkiError::InvalidInput(format!("subject '{rfc4514}': {e}")))
}

fn split_unescaped(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == separator => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Generates a random, positive, non-zero 128-bit serial number.
pub fn random_serial() -> Vec<u8> {
    let mut serial: [u8; 16] = rand::random();
    serial[0] &= 0x7F;
    serial[0] |= 0x01;
    serial.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subject_drops_empty_attributes() {
        let name = parse_subject("CN=example.com,OU=,O=Example Corp,L=,ST=,C=").unwrap();
        assert_eq!(name.to_string(), "CN=example.com,O=Example Corp");
    }

    #[test]
    fn test_parse_subject_keeps_escaped_commas() {
        let name = parse_subject("CN=Acme\\, Inc.,O=").unwrap();
        assert_eq!(name.0.len(), 1);
    }

    #[test]
    fn test_parse_subject_rejects_empty() {
        assert!(parse_subject("CN=,O=").is_err());
    }

    #[test]
    fn test_random_serial_is_positive() {
        for _ in 0..32 {
            let serial = random_serial();
            assert_eq!(serial.len(), 16);
            assert_eq!(serial[0] & 0x80, 0);
            assert_ne!(serial[0], 0);
        }
    }

    #[test]
    fn test_validity_is_whole_seconds() {
        let start = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap();
        let validity = Validity::starting_at(start, 10).unwrap();
        assert_eq!(validity.not_before.unix_timestamp(), 1_700_000_000);
        assert_eq!(validity.not_before.nanosecond(), 0);
        assert_eq!(validity.not_after - validity.not_before, Duration::days(10));
    }

    #[test]
    fn test_validity_out_of_range() {
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert!(matches!(
            Validity::starting_at(start, 3_000_000),
            Err(PkiError::InvalidInput(_))
        ));
        assert!(matches!(
            Validity::starting_at(start, i64::MAX),
            Err(PkiError::InvalidInput(_))
        ));
        assert!(Validity::starting_at(start, 36_500).is_ok());
    }

    #[test]
    fn test_add_days() {
        let start = OffsetDateTime::from_unix_timestamp(0).unwrap();
        assert_eq!(add_days(start, 1).unwrap().unix_timestamp(), 86_400);
        assert_eq!(add_days(start, -1).unwrap().unix_timestamp(), -86_400);
        assert_eq!(add_days(start, i64::MAX / 86_400 + 1), None);
        assert_eq!(add_days(start, 5_000_000), None);
    }
}
