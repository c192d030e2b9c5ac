use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Declared type of an index field. Unknown declarations fall back to
/// [`FieldType::Text`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Text,
    Tag,
    Numeric,
    Vector,
}

impl FieldType {
    pub fn from_declared(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TAG" => FieldType::Tag,
            "NUMERIC" => FieldType::Numeric,
            "VECTOR" => FieldType::Vector,
            _ => FieldType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Tag => "TAG",
            FieldType::Numeric => "NUMERIC",
            FieldType::Vector => "VECTOR",
        }
    }
}

impl From<String> for FieldType {
    fn from(value: String) -> Self {
        FieldType::from_declared(&value)
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub sortable: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            sortable: false,
        }
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }
}

/// Physical attributes of an index, in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<FieldSchema>,
}

impl FieldSet {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// The index carries at most one vector attribute; the first wins.
    pub fn vector_field(&self) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|field| field.field_type == FieldType::Vector)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<FieldSchema> for FieldSet {
    fn from_iter<T: IntoIterator<Item = FieldSchema>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A normalized scalar ready to be written into a backend record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Vector(Vec<f32>),
}

impl FieldValue {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Text(text) => text.as_bytes().to_vec(),
            FieldValue::Number(number) => number.to_string().into_bytes(),
            FieldValue::Vector(vector) => crate::store::encode_vector(vector),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(number) => Some(*number),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub key: String,
    pub fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentDocument {
    pub uid: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentView {
    pub uid: String,
    pub chunks: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub value: Map<String, Value>,
}

impl SearchHit {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.value.get(field)
    }

    /// Distance score of a KNN hit. A present but non-numeric score reads
    /// as 0.
    pub fn dist(&self) -> Option<f64> {
        self.value.get(crate::query::DISTANCE_FIELD).map(|raw| match raw {
            Value::Number(number) => number.as_f64().unwrap_or(0.0),
            Value::String(text) => text.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub parents: bool,
}

fn default_limit() -> usize {
    10
}

impl SearchRequest {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            query: None,
            filters: Map::new(),
            combinator: Combinator::And,
            limit: default_limit(),
            parents: false,
        }
    }

    /// Free text with surrounding whitespace removed; blank text counts as
    /// absent.
    pub fn free_text(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<ParentView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_declared_type_falls_back_to_text() {
        assert_eq!(FieldType::from_declared("GEO"), FieldType::Text);
        assert_eq!(FieldType::from_declared("numeric"), FieldType::Numeric);
    }

    #[test]
    fn field_schema_deserializes_declared_types() {
        let field: FieldSchema =
            serde_json::from_value(json!({"name": "price", "type": "NUMERIC", "sortable": true}))
                .expect("valid field");
        assert_eq!(field, FieldSchema::new("price", FieldType::Numeric).sortable());
    }

    #[test]
    fn blank_free_text_is_absent() {
        let mut request = SearchRequest::new("products");
        request.query = Some("   ".to_string());
        assert_eq!(request.free_text(), None);
    }

    #[test]
    fn malformed_distance_reads_as_zero() {
        let hit = SearchHit {
            id: "a".to_string(),
            value: json!({"dist": "n/a"}).as_object().cloned().unwrap_or_default(),
        };
        assert_eq!(hit.dist(), Some(0.0));
    }
}
