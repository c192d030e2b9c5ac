use crate::executor::normalize_fields;
use crate::query::PARENT_REFERENCE_FIELD;
use crate::schema::{parent_key, record_key};
use crate::traits::SearchStore;
use crate::{FieldValue, ParentDocument, ParentView, SearchError, SearchHit};
use futures::future::{join_all, try_join_all};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const ITEMS_FIELD: &str = "items";
pub const UID_FIELD: &str = "uid";

/// Parent ids referenced by a hit, from either a comma-separated string or
/// an array.
pub fn parent_references(hit: &SearchHit) -> Vec<String> {
    let raw: Vec<String> = match hit.get(PARENT_REFERENCE_FIELD) {
        Some(Value::String(joined)) => joined.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::Number(number)) => vec![number.to_string()],
        _ => Vec::new(),
    };

    raw.into_iter()
        .map(|uid| uid.trim().to_string())
        .filter(|uid| !uid.is_empty())
        .collect()
}

pub fn split_items(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stores a parent document as `uid` plus comma-joined `items`.
pub async fn put_parent<S>(store: &S, index: &str, parent: &ParentDocument) -> Result<(), SearchError>
where
    S: SearchStore + ?Sized,
{
    let fields = vec![
        (UID_FIELD.to_string(), FieldValue::Text(parent.uid.clone())),
        (ITEMS_FIELD.to_string(), FieldValue::Text(parent.items.join(","))),
    ];
    store.hash_set(&parent_key(index, &parent.uid), &fields).await
}

/// Reassembles the parents referenced by ranked chunk hits.
///
/// Views follow hit rank; a parent referenced by several hits appears once,
/// at its first reference. Hits without references, missing parents and
/// missing chunks contribute nothing.
pub async fn expand<S>(
    store: &S,
    index: &str,
    hits: &[SearchHit],
    limit: usize,
) -> Result<Vec<ParentView>, SearchError>
where
    S: SearchStore + ?Sized,
{
    let mut seen = HashSet::new();
    let uids: Vec<String> = hits
        .iter()
        .flat_map(parent_references)
        .filter(|uid| seen.insert(uid.clone()))
        .collect();

    let views = try_join_all(uids.iter().map(|uid| load_parent(store, index, uid))).await?;

    Ok(views.into_iter().flatten().take(limit).collect())
}

async fn load_parent<S>(store: &S, index: &str, uid: &str) -> Result<Option<ParentView>, SearchError>
where
    S: SearchStore + ?Sized,
{
    let Some(items) = store.hash_get(&parent_key(index, uid), ITEMS_FIELD).await? else {
        debug!(parent = uid, "parent document missing");
        return Ok(None);
    };
    let items = split_items(&String::from_utf8_lossy(&items));

    let fetched = join_all(items.iter().map(|id| {
        let key = record_key(index, id);
        async move { store.hash_get_all(&key).await }
    }))
    .await;

    let mut chunks = Vec::with_capacity(items.len());
    for (id, result) in items.iter().zip(fetched) {
        match result {
            Ok(fields) if !fields.is_empty() => chunks.push(normalize_fields(None, fields)),
            Ok(_) => debug!(parent = uid, chunk = %id, "chunk missing"),
            Err(error) => warn!(parent = uid, chunk = %id, %error, "chunk unreadable"),
        }
    }

    Ok(Some(ParentView {
        uid: uid.to_string(),
        chunks,
    }))
}
