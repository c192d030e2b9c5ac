//! Compiles attribute filters and free text into a single hybrid query.
//!
//! Three shapes come out of [`QueryCompiler::compile`]:
//!
//! - attribute-only: `@price:[20 20] @color:{red}`
//! - literal text, optionally constrained: `red shoes @price:[20 20]`
//! - KNN over the index's vector attribute, pre-filtered by the attribute
//!   clause or unconstrained: `(@color:{red})=>[KNN 5 @embedding_vec $BLOB AS dist]`
//!
//! Queries render in RediSearch dialect 2. The vector itself never appears
//! in the query string; it is bound as the `BLOB` parameter.

use crate::coercion::{parse_maybe_currency, stringify};
use crate::embeddings::EmbeddingGateway;
use crate::store::encode_vector;
use crate::{Combinator, FieldSet, FieldType, SearchError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

pub const DISTANCE_FIELD: &str = "dist";
pub const VECTOR_PARAM: &str = "BLOB";
pub const PARENT_REFERENCE_FIELD: &str = "content_parent_uids";
pub const QUERY_DIALECT: u32 = 2;

static TAG_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^A-Za-z0-9_])").expect("Invalid tag escape pattern"));

static TEXT_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^\w\s])").expect("Invalid text escape pattern"));

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Inclusive numeric range; exact matches use a degenerate range.
    Range { field: String, min: f64, max: f64 },
    /// Set membership over a TAG attribute.
    Tags { field: String, values: Vec<String> },
    /// Every token must appear in the attribute.
    Tokens { field: String, text: String },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Predicate::Range { field, .. }
            | Predicate::Tags { field, .. }
            | Predicate::Tokens { field, .. } => field,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Predicate::Range { field, min, max } => format!("@{field}:[{min} {max}]"),
            Predicate::Tags { field, values } => {
                let members = values
                    .iter()
                    .map(|value| escape_tag(value))
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!("@{field}:{{{members}}}")
            }
            Predicate::Tokens { field, text } => format!("@{field}:({})", escape_text(text)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorClause {
    /// Physical vector attribute, e.g. `embedding_vec`.
    pub field: String,
    pub vector: Vec<f32>,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    pub field: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub text: Option<String>,
    pub predicates: Vec<Predicate>,
    pub vector: Option<VectorClause>,
    pub combinator: Combinator,
    pub sort_by: Option<SortBy>,
    /// Projection; empty means every stored field.
    pub return_fields: Vec<String>,
    pub limit: usize,
}

impl CompiledQuery {
    fn join(&self, clauses: &[String]) -> String {
        match self.combinator {
            Combinator::And => clauses.join(" "),
            Combinator::Or => format!("({})", clauses.join(" | ")),
        }
    }

    fn rendered_predicates(&self) -> Vec<String> {
        self.predicates.iter().map(Predicate::render).collect()
    }

    /// The query string in the store's query language.
    pub fn query_string(&self) -> String {
        let predicates = self.rendered_predicates();

        if let Some(vector) = &self.vector {
            let prefilter = if predicates.is_empty() {
                "*".to_string()
            } else {
                match self.combinator {
                    Combinator::And => format!("({})", predicates.join(" ")),
                    Combinator::Or => self.join(&predicates),
                }
            };
            return format!(
                "{prefilter}=>[KNN {} @{} ${VECTOR_PARAM} AS {DISTANCE_FIELD}]",
                vector.k, vector.field
            );
        }

        match &self.text {
            Some(text) if predicates.is_empty() => text.clone(),
            Some(text) => {
                let mut clauses = Vec::with_capacity(predicates.len() + 1);
                clauses.push(text.clone());
                clauses.extend(predicates);
                self.join(&clauses)
            }
            None => self.join(&predicates),
        }
    }

    /// Binary query parameters.
    pub fn params(&self) -> Vec<(String, Vec<u8>)> {
        self.vector
            .iter()
            .map(|clause| (VECTOR_PARAM.to_string(), encode_vector(&clause.vector)))
            .collect()
    }
}

pub fn escape_tag(value: &str) -> String {
    TAG_SPECIAL.replace_all(value.trim(), r"\$1").into_owned()
}

pub fn escape_text(value: &str) -> String {
    TEXT_SPECIAL.replace_all(value.trim(), r"\$1").into_owned()
}

pub struct QueryCompiler<'a> {
    gateway: &'a EmbeddingGateway,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(gateway: &'a EmbeddingGateway) -> Self {
        Self { gateway }
    }

    /// Returns `Ok(None)` when there is nothing to search for.
    pub async fn compile(
        &self,
        fields: &FieldSet,
        free_text: Option<&str>,
        filters: &Map<String, Value>,
        combinator: Combinator,
        limit: usize,
        want_parents: bool,
    ) -> Result<Option<CompiledQuery>, SearchError> {
        let predicates = build_predicates(fields, filters)?;
        let free_text = free_text.map(str::trim).filter(|text| !text.is_empty());

        let mut query = CompiledQuery {
            text: None,
            predicates,
            vector: None,
            combinator,
            sort_by: None,
            return_fields: Vec::new(),
            limit,
        };

        match (free_text, fields.vector_field()) {
            (Some(text), Some(vector_field)) => {
                let embedding = self.gateway.embed(text).await?;
                query.vector = Some(VectorClause {
                    field: vector_field.name.clone(),
                    vector: embedding,
                    k: limit,
                });
                query.sort_by = Some(SortBy {
                    field: DISTANCE_FIELD.to_string(),
                    ascending: true,
                });
                query.return_fields = fields
                    .iter()
                    .filter(|field| field.field_type != FieldType::Vector)
                    .map(|field| field.name.clone())
                    .chain(std::iter::once(DISTANCE_FIELD.to_string()))
                    .collect();
                if want_parents
                    && !query
                        .return_fields
                        .iter()
                        .any(|field| field == PARENT_REFERENCE_FIELD)
                {
                    query.return_fields.push(PARENT_REFERENCE_FIELD.to_string());
                }
            }
            (Some(text), None) => query.text = Some(text.to_string()),
            (None, _) if !query.predicates.is_empty() => {}
            (None, _) => return Ok(None),
        }

        debug!(query = %query.query_string(), limit, "compiled query");
        Ok(Some(query))
    }
}

/// One predicate per filter that names a declared attribute; filters on
/// unknown attributes are ignored.
pub fn build_predicates(
    fields: &FieldSet,
    filters: &Map<String, Value>,
) -> Result<Vec<Predicate>, SearchError> {
    let mut predicates = Vec::new();

    for (key, value) in filters {
        let Some(field) = fields.get(key) else {
            continue;
        };

        let predicate = match field.field_type {
            FieldType::Numeric => {
                let number = numeric_filter(value).ok_or_else(|| {
                    SearchError::QueryCompile(format!(
                        "filter `{key}` expects a number, got {}",
                        stringify(value)
                    ))
                })?;
                Predicate::Range {
                    field: key.clone(),
                    min: number,
                    max: number,
                }
            }
            FieldType::Tag => {
                let values = tag_members(value);
                if values.is_empty() {
                    return Err(SearchError::QueryCompile(format!(
                        "filter `{key}` has no tag values"
                    )));
                }
                Predicate::Tags {
                    field: key.clone(),
                    values,
                }
            }
            FieldType::Text | FieldType::Vector => {
                let text = stringify(value);
                if escape_text(&text).is_empty() {
                    return Err(SearchError::QueryCompile(format!(
                        "filter `{key}` has no searchable text"
                    )));
                }
                Predicate::Tokens {
                    field: key.clone(),
                    text,
                }
            }
        };

        predicates.push(predicate);
    }

    Ok(predicates)
}

fn numeric_filter(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => parse_maybe_currency(text),
        _ => None,
    }
}

fn tag_members(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items.iter().map(stringify).collect(),
        other => stringify(other).split(',').map(str::to_string).collect(),
    };

    raw.into_iter()
        .map(|member| member.trim().to_string())
        .filter(|member| !member.is_empty())
        .collect()
}
