use crate::query::CompiledQuery;
use crate::schema::{Attribute, IndexDefinition};
use crate::store::{ScanPage, StoredDocument};
use crate::{FieldSet, FieldValue, SearchError};
use async_trait::async_trait;

/// Key/value + attribute index + vector index store that executes compiled
/// queries. Index arguments are logical index names, not backend keys.
#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), SearchError>;

    async fn alter_index(&self, index: &str, attributes: &[Attribute]) -> Result<(), SearchError>;

    /// Drops the definition only; member records are left in place.
    async fn drop_index(&self, index: &str) -> Result<(), SearchError>;

    async fn list_indexes(&self) -> Result<Vec<String>, SearchError>;

    async fn index_info(&self, index: &str) -> Result<FieldSet, SearchError>;

    async fn search(
        &self,
        index: &str,
        query: &CompiledQuery,
    ) -> Result<Vec<StoredDocument>, SearchError>;

    async fn hash_set(&self, key: &str, fields: &[(String, FieldValue)]) -> Result<(), SearchError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, SearchError>;

    /// All fields of a hash; an absent key yields an empty list.
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>, SearchError>;

    /// Returns whether a key was removed. Deleting an absent key is not an
    /// error.
    async fn delete(&self, key: &str) -> Result<bool, SearchError>;

    async fn scan(&self, pattern: &str, cursor: u64) -> Result<ScanPage, SearchError>;
}
