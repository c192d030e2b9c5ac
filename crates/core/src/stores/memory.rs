//! In-process store. Evaluates compiled queries against their structure
//! rather than parsing the query string, which keeps search behavior
//! testable without a running search engine.

use crate::config::DistanceMetric;
use crate::query::{CompiledQuery, Predicate, DISTANCE_FIELD};
use crate::schema::{Attribute, AttributeKind, IndexDefinition};
use crate::store::{decode_vector, ScanPage, StoredDocument};
use crate::traits::SearchStore;
use crate::{Combinator, FieldSet, FieldValue, SearchError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

type Hash = Vec<(String, Vec<u8>)>;

#[derive(Default)]
pub struct MemoryStore {
    indexes: RwLock<BTreeMap<String, IndexDefinition>>,
    hashes: RwLock<BTreeMap<String, Hash>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.hashes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hashes.read().await.is_empty()
    }
}

fn field<'a>(hash: &'a Hash, name: &str) -> Option<&'a [u8]> {
    hash.iter()
        .find(|(field, _)| field == name)
        .map(|(_, value)| value.as_slice())
}

fn field_text(hash: &Hash, name: &str) -> Option<String> {
    field(hash, name).map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_tokens(haystack: &[String], needle: &str) -> bool {
    let wanted = tokens(needle);
    !wanted.is_empty() && wanted.iter().all(|token| haystack.contains(token))
}

fn matches_predicate(hash: &Hash, predicate: &Predicate) -> bool {
    let Some(stored) = field_text(hash, predicate.field()) else {
        return false;
    };

    match predicate {
        Predicate::Range { min, max, .. } => stored
            .trim()
            .parse::<f64>()
            .map(|value| *min <= value && value <= *max)
            .unwrap_or(false),
        Predicate::Tags { values, .. } => stored
            .split(',')
            .map(|member| member.trim().to_lowercase())
            .any(|member| values.iter().any(|value| value.trim().to_lowercase() == member)),
        Predicate::Tokens { text, .. } => contains_tokens(&tokens(&stored), text),
    }
}

fn matches_text(hash: &Hash, definition: &IndexDefinition, text: &str) -> bool {
    let haystack: Vec<String> = definition
        .attributes
        .iter()
        .filter(|attribute| attribute.kind == AttributeKind::Text)
        .filter_map(|attribute| field_text(hash, &attribute.name))
        .flat_map(|value| tokens(&value))
        .collect();
    contains_tokens(&haystack, text)
}

fn combine(combinator: Combinator, results: &[bool]) -> bool {
    match combinator {
        Combinator::And => results.iter().all(|result| *result),
        Combinator::Or => results.iter().any(|result| *result),
    }
}

fn distance(metric: DistanceMetric, left: &[f32], right: &[f32]) -> f64 {
    match metric {
        DistanceMetric::L2 => left
            .iter()
            .zip(right)
            .map(|(a, b)| f64::from(a - b).powi(2))
            .sum(),
        DistanceMetric::Cosine => {
            let dot: f64 = left.iter().zip(right).map(|(a, b)| f64::from(a * b)).sum();
            let norm = |vector: &[f32]| vector.iter().map(|v| f64::from(v * v)).sum::<f64>().sqrt();
            let magnitude = norm(left) * norm(right);
            if magnitude == 0.0 {
                1.0
            } else {
                1.0 - dot / magnitude
            }
        }
    }
}

fn project(hash: &Hash, return_fields: &[String], dist: Option<f64>) -> Hash {
    let mut projected: Hash = if return_fields.is_empty() {
        hash.clone()
    } else {
        return_fields
            .iter()
            .filter_map(|name| field(hash, name).map(|value| (name.clone(), value.to_vec())))
            .collect()
    };

    if let Some(dist) = dist {
        if return_fields.is_empty() || return_fields.iter().any(|name| name == DISTANCE_FIELD) {
            projected.push((DISTANCE_FIELD.to_string(), dist.to_string().into_bytes()));
        }
    }
    projected
}

/// Redis-style glob: `*`, `?` and backslash escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_at(&pattern, &text)
}

fn glob_at(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|skip| glob_at(rest, &text[skip..])),
        Some(('?', rest)) => !text.is_empty() && glob_at(rest, &text[1..]),
        Some(('\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_at(&rest[1..], &text[1..])
        }
        Some((literal, rest)) => text.first() == Some(literal) && glob_at(rest, &text[1..]),
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), SearchError> {
        let mut indexes = self.indexes.write().await;
        if indexes.contains_key(&definition.name) {
            return Err(SearchError::SchemaConflict(definition.name.clone()));
        }
        indexes.insert(definition.name.clone(), definition.clone());
        Ok(())
    }

    async fn alter_index(&self, index: &str, attributes: &[Attribute]) -> Result<(), SearchError> {
        let mut indexes = self.indexes.write().await;
        let definition = indexes
            .get_mut(index)
            .ok_or_else(|| SearchError::IndexMissing(index.to_string()))?;

        if let Some(duplicate) = attributes.iter().find(|attribute| {
            definition
                .attributes
                .iter()
                .any(|existing| existing.name == attribute.name)
        }) {
            return Err(SearchError::SchemaConflict(format!(
                "Duplicate field in schema: {}",
                duplicate.name
            )));
        }
        definition.attributes.extend(attributes.iter().cloned());
        Ok(())
    }

    async fn drop_index(&self, index: &str) -> Result<(), SearchError> {
        self.indexes
            .write()
            .await
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| SearchError::IndexMissing(index.to_string()))
    }

    async fn list_indexes(&self) -> Result<Vec<String>, SearchError> {
        Ok(self.indexes.read().await.keys().cloned().collect())
    }

    async fn index_info(&self, index: &str) -> Result<FieldSet, SearchError> {
        self.indexes
            .read()
            .await
            .get(index)
            .map(IndexDefinition::field_set)
            .ok_or_else(|| SearchError::IndexMissing(index.to_string()))
    }

    async fn search(
        &self,
        index: &str,
        query: &CompiledQuery,
    ) -> Result<Vec<StoredDocument>, SearchError> {
        let definition = self
            .indexes
            .read()
            .await
            .get(index)
            .cloned()
            .ok_or_else(|| SearchError::IndexMissing(index.to_string()))?;
        let hashes = self.hashes.read().await;

        let members = hashes
            .iter()
            .filter(|(key, _)| key.starts_with(&definition.prefix));

        let mut matched: Vec<(&String, &Hash, Option<f64>)> = Vec::new();
        for (key, hash) in members {
            let mut results: Vec<bool> = query
                .predicates
                .iter()
                .map(|predicate| matches_predicate(hash, predicate))
                .collect();

            if let Some(clause) = &query.vector {
                if !results.is_empty() && !combine(query.combinator, &results) {
                    continue;
                }
                let metric = definition
                    .vector_config()
                    .map(|config| config.metric)
                    .unwrap_or_default();
                let Some(stored) = field(hash, &clause.field).and_then(decode_vector) else {
                    continue;
                };
                if stored.len() != clause.vector.len() {
                    continue;
                }
                matched.push((key, hash, Some(distance(metric, &stored, &clause.vector))));
                continue;
            }

            if let Some(text) = &query.text {
                results.insert(0, matches_text(hash, &definition, text));
            }
            if !results.is_empty() && combine(query.combinator, &results) {
                matched.push((key, hash, None));
            }
        }

        if let Some(clause) = &query.vector {
            matched.sort_by(|left, right| {
                left.2
                    .partial_cmp(&right.2)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            matched.truncate(clause.k);
        }

        Ok(matched
            .into_iter()
            .take(query.limit)
            .map(|(key, hash, dist)| StoredDocument {
                key: key.clone(),
                fields: project(hash, &query.return_fields, dist),
            })
            .collect())
    }

    async fn hash_set(&self, key: &str, fields: &[(String, FieldValue)]) -> Result<(), SearchError> {
        let mut hashes = self.hashes.write().await;
        let hash = hashes.entry(key.to_string()).or_default();
        for (name, value) in fields {
            let bytes = value.to_bytes();
            match hash.iter_mut().find(|(field, _)| field == name) {
                Some(slot) => slot.1 = bytes,
                None => hash.push((name.clone(), bytes)),
            }
        }
        Ok(())
    }

    async fn hash_get(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, SearchError> {
        Ok(self
            .hashes
            .read()
            .await
            .get(key)
            .and_then(|hash| field(hash, name))
            .map(<[u8]>::to_vec))
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>, SearchError> {
        Ok(self.hashes.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<bool, SearchError> {
        Ok(self.hashes.write().await.remove(key).is_some())
    }

    /// Returns every match in a single page.
    async fn scan(&self, pattern: &str, _cursor: u64) -> Result<ScanPage, SearchError> {
        let keys = self
            .hashes
            .read()
            .await
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        Ok(ScanPage { cursor: 0, keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("vs:books:*", "vs:books:42"));
        assert!(glob_match("vs:books:*", "vs:books:parent:p1"));
        assert!(!glob_match("vs:books:*", "vs:bookshelf:1"));
        assert!(glob_match("vs:?:1", "vs:a:1"));
        assert!(glob_match(r"vs:\*", "vs:*"));
        assert!(!glob_match(r"vs:\*", "vs:a"));
    }

    #[test]
    fn cosine_distance_of_identical_vectors_is_zero() {
        let vector = [0.6f32, 0.8];
        assert!(distance(DistanceMetric::Cosine, &vector, &vector).abs() < 1e-6);
        assert!((distance(DistanceMetric::L2, &[0.0, 0.0], &[3.0, 4.0]) - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn hash_set_overwrites_fields_in_place() -> Result<(), SearchError> {
        let store = MemoryStore::new();
        store
            .hash_set("k", &[("a".to_string(), FieldValue::Text("1".to_string()))])
            .await?;
        store
            .hash_set("k", &[("a".to_string(), FieldValue::Number(2.0))])
            .await?;

        assert_eq!(store.hash_get("k", "a").await?, Some(b"2".to_vec()));
        assert_eq!(store.len().await, 1);
        assert!(store.delete("k").await?);
        assert!(!store.delete("k").await?);
        Ok(())
    }
}
