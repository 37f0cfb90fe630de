//! Placeholder substitution for certificate and configuration text.
//!
//! A template text contains `<FieldName>` tokens. [`render`] replaces every
//! token whose name is a field of the record with the field's textual value in
//! a single left-to-right pass. Substituted values are never rescanned, so a
//! value that itself looks like `<OtherField>` stays literal. Tokens that do not
//! name a field are left untouched.
//!
//! ```
//! use pkiaas::template::{render, CertificateRequestData};
//!
//! let request = CertificateRequestData::builder()
//!     .template_name("web".to_string())
//!     .common_name("example.com".to_string())
//!     .build();
//! assert_eq!(
//!     render(&request, "<CommonName> issued to <CommonName> by <Missing>"),
//!     "example.com issued to example.com by <Missing>"
//! );
//! ```

use std::sync::LazyLock;

use bon::Builder;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::key::KeyAlgorithm;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([A-Za-z_][A-Za-z0-9_]*)>").expect("placeholder pattern is valid")
});

/// Reads one field of a record as text.
pub type Accessor<R> = fn(&R) -> String;

/// A record whose fields can be substituted into a template by name.
pub trait Placeholders {
    /// Textual value of the field called `name`, or `None` if the record has no such field.
    fn placeholder(&self, name: &str) -> Option<String>;
}

/// Looks `name` up in a static name-to-accessor table.
pub fn lookup<R>(record: &R, fields: &[(&str, Accessor<R>)], name: &str) -> Option<String> {
    fields
        .iter()
        .find(|(field, _)| *field == name)
        .map(|(_, accessor)| accessor(record))
}

/// Substitutes every known `<FieldName>` token of `text` with the record's value.
pub fn render<P: Placeholders + ?Sized>(record: &P, text: &str) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            record
                .placeholder(&caps[1])
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Two records rendered in one pass; the first one wins on shared names.
impl<A: Placeholders + ?Sized, B: Placeholders + ?Sized> Placeholders for (&A, &B) {
    fn placeholder(&self, name: &str) -> Option<String> {
        self.0
            .placeholder(name)
            .or_else(|| self.1.placeholder(name))
    }
}

/// Escapes values for use inside an RFC 4514 distinguished name string.
pub struct Rfc4514<'a, P: ?Sized>(pub &'a P);

impl<P: Placeholders + ?Sized> Placeholders for Rfc4514<'_, P> {
    fn placeholder(&self, name: &str) -> Option<String> {
        self.0.placeholder(name).map(|value| escape_rfc4514(&value))
    }
}

fn escape_rfc4514(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let special = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (i == 0 && matches!(c, '#' | ' '))
            || (i == last && c == ' ');
        if special {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// An issuance profile: how certificates requested under this name are built.
///
/// Stored as JSON in the backend; every field is also a placeholder named in
/// PascalCase (`<TemplateName>`, `<Organization>`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    pub template_name: String,
    #[builder(default)]
    #[serde(default)]
    pub key_algo: KeyAlgorithm,
    /// RSA modulus size; ignored for elliptic curve keys.
    #[builder(default = 2048)]
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,
    #[builder(default)]
    #[serde(default)]
    pub organization: String,
    #[builder(default)]
    #[serde(default)]
    pub organizational_unit: String,
    #[builder(default)]
    #[serde(default)]
    pub locality: String,
    #[builder(default)]
    #[serde(default)]
    pub province: String,
    #[builder(default)]
    #[serde(default)]
    pub country: String,
    /// Key usage names such as `digitalSignature` or `keyEncipherment`.
    #[builder(default)]
    #[serde(default)]
    pub key_usages: Vec<String>,
    /// Extended key usage names such as `serverAuth` or `clientAuth`.
    #[builder(default)]
    #[serde(default)]
    pub ext_key_usages: Vec<String>,
    #[builder(default = 365)]
    #[serde(default = "default_days")]
    pub validity_days: i64,
    #[serde(rename = "MaxTTLDays", default = "default_days")]
    #[builder(default = 365)]
    pub max_ttl_days: i64,
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub store_private_key: bool,
}

fn default_key_bits() -> usize {
    2048
}

fn default_days() -> i64 {
    365
}

fn default_true() -> bool {
    true
}

impl Template {
    const FIELDS: &'static [(&'static str, Accessor<Self>)] = &[
        ("TemplateName", |t| t.template_name.clone()),
        ("KeyAlgo", |t| t.key_algo.to_string()),
        ("KeyBits", |t| t.key_bits.to_string()),
        ("Organization", |t| t.organization.clone()),
        ("OrganizationalUnit", |t| t.organizational_unit.clone()),
        ("Locality", |t| t.locality.clone()),
        ("Province", |t| t.province.clone()),
        ("Country", |t| t.country.clone()),
        ("KeyUsages", |t| t.key_usages.join(",")),
        ("ExtKeyUsages", |t| t.ext_key_usages.join(",")),
        ("ValidityDays", |t| t.validity_days.to_string()),
        ("MaxTTLDays", |t| t.max_ttl_days.to_string()),
        ("StorePrivateKey", |t| t.store_private_key.to_string()),
    ];
}

impl Placeholders for Template {
    fn placeholder(&self, name: &str) -> Option<String> {
        lookup(self, Self::FIELDS, name)
    }
}

/// A request for a new certificate under a template.
#[derive(Clone, Debug, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateRequestData {
    pub template_name: String,
    pub common_name: String,
    /// DNS names or IP addresses for the subject alternative name extension.
    #[builder(default)]
    #[serde(default)]
    pub alt_names: Vec<String>,
    /// Requested lifetime; the template's validity applies when absent.
    #[serde(rename = "TTLDays", default)]
    pub ttl_days: Option<i64>,
}

impl CertificateRequestData {
    const FIELDS: &'static [(&'static str, Accessor<Self>)] = &[
        ("TemplateName", |r| r.template_name.clone()),
        ("CommonName", |r| r.common_name.clone()),
        ("AltNames", |r| r.alt_names.join(",")),
        ("TTLDays", |r| r.ttl_days.map(|d| d.to_string()).unwrap_or_default()),
    ];
}

impl Placeholders for CertificateRequestData {
    fn placeholder(&self, name: &str) -> Option<String> {
        lookup(self, Self::FIELDS, name)
    }
}
