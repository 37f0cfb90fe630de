//! Revocation and expiration facts read back from certificate annotations.

use std::fmt;
use std::str::FromStr;

use time::OffsetDateTime;
use tracing::warn;
use x509_cert::ext::pkix::CrlReason;

use crate::annotation::{
    EXPIRATION_DATE, REVOCATION_DATE, REVOCATION_REASON_CODE, REVOKED, decode_epoch,
    get_annotation, is_true,
};
use crate::cert::params::add_days;
use crate::error::{PkiError, Result};
use crate::resource::{Resource, ResourceId};

/// A certificate that has been revoked, as recorded on its resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedCertificate {
    pub serial_number: String,
    /// Kept verbatim, even when it is not a code [`ReasonCode`] knows.
    pub reason_code: i64,
    pub revocation_date: OffsetDateTime,
}

impl RevokedCertificate {
    pub fn reason(&self) -> Option<ReasonCode> {
        ReasonCode::try_from(self.reason_code).ok()
    }
}

/// CRL reason codes of RFC 5280, section 5.3.1. Value 7 is unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl ReasonCode {
    const ALL: [(ReasonCode, &'static str); 10] = [
        (ReasonCode::Unspecified, "unspecified"),
        (ReasonCode::KeyCompromise, "keyCompromise"),
        (ReasonCode::CaCompromise, "cACompromise"),
        (ReasonCode::AffiliationChanged, "affiliationChanged"),
        (ReasonCode::Superseded, "superseded"),
        (ReasonCode::CessationOfOperation, "cessationOfOperation"),
        (ReasonCode::CertificateHold, "certificateHold"),
        (ReasonCode::RemoveFromCrl, "removeFromCRL"),
        (ReasonCode::PrivilegeWithdrawn, "privilegeWithdrawn"),
        (ReasonCode::AaCompromise, "aACompromise"),
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(reason, _)| *reason == self)
            .map(|(_, name)| *name)
            .unwrap_or("unspecified")
    }
}

impl TryFrom<i64> for ReasonCode {
    type Error = PkiError;

    fn try_from(code: i64) -> Result<Self> {
        Self::ALL
            .iter()
            .map(|(reason, _)| *reason)
            .find(|reason| reason.code() == code)
            .ok_or_else(|| PkiError::InvalidInput(format!("unknown revocation reason code {code}")))
    }
}

/// Accepts the numeric code or the RFC 5280 name, case-insensitively.
impl FromStr for ReasonCode {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(code) = s.trim().parse::<i64>() {
            return Self::try_from(code);
        }
        Self::ALL
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(reason, _)| *reason)
            .ok_or_else(|| PkiError::InvalidInput(format!("unknown revocation reason '{s}'")))
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<ReasonCode> for CrlReason {
    fn from(reason: ReasonCode) -> Self {
        match reason {
            ReasonCode::Unspecified => CrlReason::Unspecified,
            ReasonCode::KeyCompromise => CrlReason::KeyCompromise,
            ReasonCode::CaCompromise => CrlReason::CaCompromise,
            ReasonCode::AffiliationChanged => CrlReason::AffiliationChanged,
            ReasonCode::Superseded => CrlReason::Superseded,
            ReasonCode::CessationOfOperation => CrlReason::CessationOfOperation,
            ReasonCode::CertificateHold => CrlReason::CertificateHold,
            ReasonCode::RemoveFromCrl => CrlReason::RemoveFromCRL,
            ReasonCode::PrivilegeWithdrawn => CrlReason::PrivilegeWithdrawn,
            ReasonCode::AaCompromise => CrlReason::AaCompromise,
        }
    }
}

/// Reads the revocation facts of a certificate resource.
///
/// Returns `Ok(None)` unless `Revoked` is a case-insensitive `"true"`; a
/// missing or empty `Revoked` annotation means the certificate is live. A
/// certificate resource that never received a `Revoked` annotation is therefore
/// treated as live rather than reported as corrupt. A revoked certificate must also carry a parsable `RevocationReasonCode` and
/// `RevocationDate`.
///
/// # Errors
/// [`PkiError::RevocationDataCorrupt`] when the certificate is marked revoked
/// but its reason code or date is missing or unparsable.
pub fn parse_revocation(resource: &Resource) -> Result<Option<RevokedCertificate>> {
    let Ok(revoked) = get_annotation(resource, REVOKED) else {
        return Ok(None);
    };
    if !is_true(revoked) {
        return Ok(None);
    }

    let serial_number = resource.id.leaf().to_string();
    let corrupt = |reason: String| PkiError::RevocationDataCorrupt {
        serial: serial_number.clone(),
        reason,
    };

    let code = get_annotation(resource, REVOCATION_REASON_CODE).map_err(|e| corrupt(e.to_string()))?;
    let reason_code = code
        .trim()
        .parse::<i64>()
        .map_err(|_| corrupt(format!("reason code '{code}' is not an integer")))?;
    let date = get_annotation(resource, REVOCATION_DATE).map_err(|e| corrupt(e.to_string()))?;
    let revocation_date = decode_epoch(date).map_err(|e| corrupt(e.to_string()))?;

    Ok(Some(RevokedCertificate {
        serial_number,
        reason_code,
        revocation_date,
    }))
}

/// Whether the certificate expired more than `buffer_days` before `now`.
///
/// Fails open: a missing or unparsable `ExpirationDate`, or a buffer that
/// pushes the deadline past the representable range, is "not expired".
pub fn is_expired(resource: &Resource, now: OffsetDateTime, buffer_days: i64) -> bool {
    get_annotation(resource, EXPIRATION_DATE)
        .and_then(decode_epoch)
        .ok()
        .and_then(|expiration| add_days(expiration, buffer_days))
        .is_some_and(|deadline| now > deadline)
}

/// All revoked certificates among a set of resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationList {
    pub entries: Vec<RevokedCertificate>,
    /// Resources marked revoked whose revocation facts could not be read.
    pub skipped: Vec<ResourceId>,
}

impl RevocationList {
    /// Collects the revoked certificates in store order.
    ///
    /// A corrupt record is logged and skipped; it never fails the whole list.
    pub fn collect<'a>(resources: impl IntoIterator<Item = &'a Resource>) -> Self {
        let mut list = Self::default();
        for resource in resources {
            match parse_revocation(resource) {
                Ok(Some(revoked)) => list.entries.push(revoked),
                Ok(None) => {}
                Err(err) => {
                    warn!(resource = %resource.id, error = %err, "skipping corrupt revocation record");
                    list.skipped.push(resource.id.clone());
                }
            }
        }
        list
    }

    pub fn contains(&self, serial_number: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.serial_number == serial_number)
    }
}
