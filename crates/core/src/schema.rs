//! Field schema compilation and the key namespaces records live under.
//!
//! Every `VECTOR` field is split into two physical attributes: a TEXT shadow
//! under the declared name, which keeps the source text filterable, and a
//! dense vector attribute under `<name>_vec`.

use crate::config::VectorConfig;
use crate::{FieldSchema, FieldSet, FieldType};
use serde_json::{Map, Value};
use tracing::warn;

pub const VECTOR_SUFFIX: &str = "_vec";
pub const ID_ATTRIBUTE: &str = "__uid";

const INDEX_NAMESPACE: &str = "idx";
const RECORD_NAMESPACE: &str = "vs";
const PARENT_SEGMENT: &str = "parent";

pub fn index_key(index: &str) -> String {
    format!("{INDEX_NAMESPACE}:{index}")
}

pub fn record_prefix(index: &str) -> String {
    format!("{RECORD_NAMESPACE}:{index}:")
}

pub fn record_key(index: &str, id: &str) -> String {
    format!("{}{id}", record_prefix(index))
}

pub fn parent_key(index: &str, uid: &str) -> String {
    format!("{}{PARENT_SEGMENT}:{uid}", record_prefix(index))
}

/// Pattern matching every key stored for an index, parents included.
pub fn record_pattern(index: &str) -> String {
    format!("{}*", record_prefix(index))
}

pub fn vector_attribute_name(field: &str) -> String {
    format!("{field}{VECTOR_SUFFIX}")
}

pub fn is_vector_attribute(name: &str) -> bool {
    name.ends_with(VECTOR_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Text,
    Tag,
    Numeric,
    Vector(VectorConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
    pub sortable: bool,
}

impl Attribute {
    fn scalar(name: impl Into<String>, kind: AttributeKind, sortable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            sortable,
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self.kind {
            AttributeKind::Text => FieldType::Text,
            AttributeKind::Tag => FieldType::Tag,
            AttributeKind::Numeric => FieldType::Numeric,
            AttributeKind::Vector(_) => FieldType::Vector,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub prefix: String,
    pub attributes: Vec<Attribute>,
}

impl IndexDefinition {
    pub fn field_set(&self) -> FieldSet {
        self.attributes
            .iter()
            .map(|attribute| FieldSchema {
                name: attribute.name.clone(),
                field_type: attribute.field_type(),
                sortable: attribute.sortable,
            })
            .collect()
    }

    pub fn vector_config(&self) -> Option<VectorConfig> {
        self.attributes.iter().find_map(|attribute| match attribute.kind {
            AttributeKind::Vector(config) => Some(config),
            _ => None,
        })
    }
}

/// Maps declared fields to physical attributes. Never fails: duplicate
/// attribute names keep their first definition.
pub fn compile_attributes(fields: &[FieldSchema], vector: &VectorConfig) -> Vec<Attribute> {
    let mut attributes: Vec<Attribute> = Vec::with_capacity(fields.len() + 1);

    for field in fields {
        let compiled = match field.field_type {
            FieldType::Vector => vec![
                Attribute::scalar(&field.name, AttributeKind::Text, field.sortable),
                Attribute::scalar(
                    vector_attribute_name(&field.name),
                    AttributeKind::Vector(*vector),
                    false,
                ),
            ],
            FieldType::Tag => vec![Attribute::scalar(&field.name, AttributeKind::Tag, field.sortable)],
            FieldType::Numeric => vec![Attribute::scalar(
                &field.name,
                AttributeKind::Numeric,
                field.sortable,
            )],
            FieldType::Text => vec![Attribute::scalar(&field.name, AttributeKind::Text, field.sortable)],
        };

        for attribute in compiled {
            if attributes.iter().any(|existing| existing.name == attribute.name) {
                warn!(attribute = %attribute.name, "duplicate attribute skipped");
                continue;
            }
            attributes.push(attribute);
        }
    }

    attributes
}

/// Builds the full index definition, including the internal id attribute.
pub fn compile_schema(index: &str, fields: &[FieldSchema], vector: &VectorConfig) -> IndexDefinition {
    let mut attributes = compile_attributes(fields, vector);
    if !attributes.iter().any(|attribute| attribute.name == ID_ATTRIBUTE) {
        attributes.push(Attribute::scalar(ID_ATTRIBUTE, AttributeKind::Tag, false));
    }

    IndexDefinition {
        name: index.to_string(),
        prefix: record_prefix(index),
        attributes,
    }
}

/// Reads field declarations shaped as `{name: {type, sortable}}` or the
/// shorthand `{name: "TYPE"}`.
pub fn fields_from_declarations(declarations: &Map<String, Value>) -> Vec<FieldSchema> {
    declarations
        .iter()
        .map(|(name, declaration)| {
            let (declared, sortable) = match declaration {
                Value::String(declared) => (declared.as_str(), false),
                Value::Object(spec) => (
                    spec.get("type").and_then(Value::as_str).unwrap_or_default(),
                    spec.get("sortable").and_then(Value::as_bool).unwrap_or(false),
                ),
                _ => ("", false),
            };

            FieldSchema {
                name: name.clone(),
                field_type: FieldType::from_declared(declared),
                sortable,
            }
        })
        .collect()
}
