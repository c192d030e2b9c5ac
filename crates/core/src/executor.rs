use crate::query::{CompiledQuery, DISTANCE_FIELD};
use crate::schema::{is_vector_attribute, record_prefix};
use crate::store::StoredDocument;
use crate::traits::SearchStore;
use crate::{FieldSet, FieldType, SearchError, SearchHit};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Runs a compiled query and normalizes the raw documents into hits.
///
/// Errors from the store are reported as [`SearchError::SearchFailed`],
/// except a missing index or an unreachable store, which keep their own
/// classification.
pub async fn execute<S>(
    store: &S,
    index: &str,
    fields: &FieldSet,
    query: &CompiledQuery,
) -> Result<Vec<SearchHit>, SearchError>
where
    S: SearchStore + ?Sized,
{
    let documents = store.search(index, query).await.map_err(|error| match error {
        missing @ SearchError::IndexMissing(_) => missing,
        unavailable @ SearchError::StoreUnavailable(_) => unavailable,
        other => SearchError::search_failed(other),
    })?;

    let prefix = record_prefix(index);
    let mut hits: Vec<SearchHit> = documents
        .into_iter()
        .map(|document| normalize_document(&prefix, fields, document))
        .collect();

    if query.vector.is_some() {
        sort_by_distance(&mut hits);
    }

    Ok(hits)
}

pub fn normalize_document(prefix: &str, fields: &FieldSet, document: StoredDocument) -> SearchHit {
    let id = document.id(prefix);
    SearchHit {
        id,
        value: normalize_fields(Some(fields), document.fields),
    }
}

/// Drops vector attributes and decodes the remaining raw values. NUMERIC
/// attributes and the distance score become JSON numbers; strings that look
/// like embedded JSON are parsed.
///
/// With a schema only attributes declared VECTOR are dropped. Without one
/// (parent chunks) the `_vec` naming convention decides.
pub fn normalize_fields(fields: Option<&FieldSet>, raw: Vec<(String, Vec<u8>)>) -> Map<String, Value> {
    let mut value = Map::new();

    for (name, bytes) in raw {
        let declared = fields
            .and_then(|fields| fields.get(&name))
            .map(|field| field.field_type);
        let vector = match fields {
            Some(_) => declared == Some(FieldType::Vector),
            None => is_vector_attribute(&name),
        };
        if vector {
            continue;
        }

        let text = String::from_utf8_lossy(&bytes).into_owned();
        let numeric = declared == Some(FieldType::Numeric) || name == DISTANCE_FIELD;
        value.insert(name, decode_value(text, numeric));
    }

    value
}

fn decode_value(text: String, numeric: bool) -> Value {
    if numeric {
        if let Some(number) = text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
        {
            return Value::Number(number);
        }
    }

    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
            return parsed;
        }
    }

    Value::String(text)
}

/// Closest first. A missing or non-numeric distance sorts as 0, so
/// malformed scores rise to the front; the sort is stable, so ties keep the
/// store's order.
pub fn sort_by_distance(hits: &mut [SearchHit]) {
    hits.sort_by(|left, right| {
        let left = left.dist().unwrap_or(0.0);
        let right = right.dist().unwrap_or(0.0);
        left.partial_cmp(&right).unwrap_or(Ordering::Equal)
    });
}
