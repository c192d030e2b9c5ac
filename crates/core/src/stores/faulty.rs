use crate::query::CompiledQuery;
use crate::schema::{Attribute, IndexDefinition};
use crate::store::{ScanPage, StoredDocument};
use crate::stores::MemoryStore;
use crate::traits::SearchStore;
use crate::{FieldSet, FieldValue, SearchError};
use async_trait::async_trait;

/// In-memory store that fails selected operations the way a backend would.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    reject_searches: bool,
    unreadable: Vec<String>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_searches(mut self) -> Self {
        self.reject_searches = true;
        self
    }

    /// `hash_get_all` on `key` fails.
    pub fn unreadable(mut self, key: impl Into<String>) -> Self {
        self.unreadable.push(key.into());
        self
    }

    fn backend_error(details: &str) -> SearchError {
        SearchError::BackendResponse {
            backend: "redis".to_string(),
            details: details.to_string(),
        }
    }
}

#[async_trait]
impl SearchStore for FaultyStore {
    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), SearchError> {
        self.inner.create_index(definition).await
    }

    async fn alter_index(&self, index: &str, attributes: &[Attribute]) -> Result<(), SearchError> {
        self.inner.alter_index(index, attributes).await
    }

    async fn drop_index(&self, index: &str) -> Result<(), SearchError> {
        self.inner.drop_index(index).await
    }

    async fn list_indexes(&self) -> Result<Vec<String>, SearchError> {
        self.inner.list_indexes().await
    }

    async fn index_info(&self, index: &str) -> Result<FieldSet, SearchError> {
        self.inner.index_info(index).await
    }

    async fn search(
        &self,
        index: &str,
        query: &CompiledQuery,
    ) -> Result<Vec<StoredDocument>, SearchError> {
        if self.reject_searches {
            return Err(Self::backend_error("Syntax error at offset 0"));
        }
        self.inner.search(index, query).await
    }

    async fn hash_set(&self, key: &str, fields: &[(String, FieldValue)]) -> Result<(), SearchError> {
        self.inner.hash_set(key, fields).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, SearchError> {
        self.inner.hash_get(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>, SearchError> {
        if self.unreadable.iter().any(|unreadable| unreadable == key) {
            return Err(Self::backend_error("WRONGTYPE"));
        }
        self.inner.hash_get_all(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, SearchError> {
        self.inner.delete(key).await
    }

    async fn scan(&self, pattern: &str, cursor: u64) -> Result<ScanPage, SearchError> {
        self.inner.scan(pattern, cursor).await
    }
}
