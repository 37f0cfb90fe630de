//! Policy documents the adapter loads to declare variables and set annotations.
//!
//! Each document is a fixed text with `<FieldName>` placeholders rendered from
//! a small record. Values are emitted as JSON strings, which YAML reads as
//! double-quoted scalars, so user data never changes the document structure.

use crate::resource::Annotation;
use crate::template::{Accessor, Placeholders, lookup, render};

/// Declares the configuration variables of a branch. Loaded into `root`.
pub const CONFIG_POLICY: &str = "\
- !policy
  id: <Branch>
  body:
  - !variable ca/certificate
  - !variable ca/key
  - !variable ca/crl
  - !variable config/subject-template
";

/// Declares one variable with its initial annotations.
pub const VARIABLE_POLICY: &str = "\
- !variable
  id: <Id>
  annotations: <Annotations>
";

/// Sets one annotation on an existing variable.
pub const ANNOTATION_POLICY: &str = "\
- !variable
  id: <Id>
  annotations:
    <Key>: <Value>
";

fn quoted(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

pub struct BranchPolicy {
    pub branch: String,
}

impl BranchPolicy {
    const FIELDS: &'static [(&'static str, Accessor<Self>)] = &[("Branch", |p| quoted(&p.branch))];
}

impl Placeholders for BranchPolicy {
    fn placeholder(&self, name: &str) -> Option<String> {
        lookup(self, Self::FIELDS, name)
    }
}

pub struct VariableDeclaration {
    pub id: String,
    pub annotations: Vec<Annotation>,
}

impl VariableDeclaration {
    const FIELDS: &'static [(&'static str, Accessor<Self>)] = &[
        ("Id", |p| quoted(&p.id)),
        ("Annotations", |p| {
            let pairs = p
                .annotations
                .iter()
                .map(|a| format!("{}: {}", quoted(&a.name), quoted(&a.value)))
                .collect::<Vec<_>>();
            format!("{{{}}}", pairs.join(", "))
        }),
    ];
}

impl Placeholders for VariableDeclaration {
    fn placeholder(&self, name: &str) -> Option<String> {
        lookup(self, Self::FIELDS, name)
    }
}

pub struct AnnotationUpdate {
    pub id: String,
    pub key: String,
    pub value: String,
}

impl AnnotationUpdate {
    const FIELDS: &'static [(&'static str, Accessor<Self>)] = &[
        ("Id", |p| quoted(&p.id)),
        ("Key", |p| quoted(&p.key)),
        ("Value", |p| quoted(&p.value)),
    ];
}

impl Placeholders for AnnotationUpdate {
    fn placeholder(&self, name: &str) -> Option<String> {
        lookup(self, Self::FIELDS, name)
    }
}

pub fn config_policy(branch: &str) -> String {
    let policy = BranchPolicy {
        branch: branch.to_string(),
    };
    render(&policy, CONFIG_POLICY)
}

pub fn variable_policy(id: &str, annotations: &[Annotation]) -> String {
    let policy = VariableDeclaration {
        id: id.to_string(),
        annotations: annotations.to_vec(),
    };
    render(&policy, VARIABLE_POLICY)
}

pub fn annotation_policy(id: &str, key: &str, value: &str) -> String {
    let policy = AnnotationUpdate {
        id: id.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    };
    render(&policy, ANNOTATION_POLICY)
}
