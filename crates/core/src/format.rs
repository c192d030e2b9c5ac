//! InstantSearch (Algolia-compatible) rendering of search hits.

use crate::{IngestError, SearchHit};
use serde_json::{json, Map, Value};

/// Renames hit attributes for the client. Each entry maps an output name to
/// a stored attribute; an empty mapping passes hits through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitMapping {
    entries: Vec<(String, String)>,
}

impl HitMapping {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Parses `output=attribute` pairs such as `name=product_name`.
    pub fn parse<I, T>(pairs: I) -> Result<Self, IngestError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let entries = pairs
            .into_iter()
            .map(|pair| {
                let pair = pair.as_ref();
                match pair.split_once('=') {
                    Some((output, source)) if !output.trim().is_empty() && !source.trim().is_empty() => {
                        Ok((output.trim().to_string(), source.trim().to_string()))
                    }
                    _ => Err(IngestError::InvalidArgument(format!(
                        "expected output=attribute, got {pair}"
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn apply(&self, hit: &SearchHit) -> Map<String, Value> {
        let mut rendered = if self.entries.is_empty() {
            hit.value.clone()
        } else {
            self.entries
                .iter()
                .map(|(output, source)| {
                    (output.clone(), hit.get(source).cloned().unwrap_or(Value::Null))
                })
                .collect()
        };
        rendered.insert("objectID".to_string(), Value::String(hit.id.clone()));
        rendered
    }
}

/// One page holding every hit.
pub fn instantsearch_response(
    query: &str,
    hits: &[SearchHit],
    mapping: &HitMapping,
    elapsed_ms: u64,
) -> Value {
    let rendered: Vec<Value> = hits
        .iter()
        .map(|hit| Value::Object(mapping.apply(hit)))
        .collect();
    let nb_hits = rendered.len();

    json!({
        "exhaustive": { "nbHits": true, "typo": true },
        "exhaustiveNbHits": true,
        "exhaustiveType": true,
        "hits": rendered,
        "hitsPerPage": nb_hits,
        "nbHits": nb_hits,
        "nbPages": 1,
        "page": 0,
        "params": "",
        "processingTimeMS": elapsed_ms,
        "query": query,
        "renderingContent": {},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit() -> SearchHit {
        SearchHit {
            id: "42".to_string(),
            value: json!({"product_name": "Red Shoes", "technical_details": "size 9", "dist": 0.1})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        }
    }

    #[test]
    fn mapping_renames_attributes() -> Result<(), IngestError> {
        let mapping = HitMapping::parse(["name=product_name", "description = technical_details"])?;
        let response = instantsearch_response("red", &[hit()], &mapping, 3);

        assert_eq!(response["nbHits"], json!(1));
        assert_eq!(response["query"], json!("red"));
        assert_eq!(response["processingTimeMS"], json!(3));
        assert_eq!(
            response["hits"][0],
            json!({"name": "Red Shoes", "description": "size 9", "objectID": "42"})
        );
        Ok(())
    }

    #[test]
    fn empty_mapping_passes_hits_through() {
        let response = instantsearch_response("", &[hit()], &HitMapping::default(), 0);
        assert_eq!(response["hits"][0]["product_name"], json!("Red Shoes"));
        assert_eq!(response["hits"][0]["objectID"], json!("42"));
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert!(HitMapping::parse(["name"]).is_err());
        assert!(HitMapping::parse(["=product_name"]).is_err());
    }
}
