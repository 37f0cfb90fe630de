//! Encodes certificate state as string annotations on a resource.
//!
//! The backend only knows unstructured key/value tags, so serial numbers,
//! expiration and revocation facts are written as the fixed keys below.
//! Timestamps are decimal epoch seconds.

use time::OffsetDateTime;

use crate::error::{PkiError, Result};
use crate::resource::Resource;

/// `"true"` when the certificate has been revoked.
pub const REVOKED: &str = "Revoked";
/// RFC 5280 reason code as a decimal integer.
pub const REVOCATION_REASON_CODE: &str = "RevocationReasonCode";
/// Epoch seconds of the revocation.
pub const REVOCATION_DATE: &str = "RevocationDate";
/// Epoch seconds after which the certificate is no longer valid.
pub const EXPIRATION_DATE: &str = "ExpirationDate";

/// Returns the value of the first annotation named `key`.
///
/// A present annotation with an empty value is a success with `""`; only a
/// missing key is an error.
pub fn get_annotation<'a>(resource: &'a Resource, key: &str) -> Result<&'a str> {
    resource
        .annotations
        .iter()
        .find(|annotation| annotation.name == key)
        .map(|annotation| annotation.value.as_str())
        .ok_or_else(|| PkiError::AnnotationNotFound {
            resource: resource.id.to_string(),
            key: key.to_string(),
        })
}

/// Only a case-insensitive `"true"` counts as set.
pub fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

pub fn encode_epoch(at: OffsetDateTime) -> String {
    at.unix_timestamp().to_string()
}

pub fn decode_epoch(value: &str) -> Result<OffsetDateTime> {
    let seconds: i64 = value
        .trim()
        .parse()
        .map_err(|_| PkiError::ExpirationDataCorrupt(format!("'{value}' is not an epoch")))?;
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|e| PkiError::ExpirationDataCorrupt(format!("'{value}': {e}")))
}
