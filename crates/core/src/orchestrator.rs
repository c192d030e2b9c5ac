use crate::archive::{BlobStore, CONTENT_TYPE};
use crate::config::ServiceConfig;
use crate::embeddings::EmbeddingGateway;
use crate::executor::execute;
use crate::ingest::{IngestionPipeline, IngestionReport};
use crate::parents;
use crate::query::QueryCompiler;
use crate::schema::{compile_attributes, compile_schema, record_pattern};
use crate::sweeper::{delete_documents, spawn_sweep, BulkDeleteReport, SweepHandle};
use crate::traits::SearchStore;
use crate::{
    FieldSchema, FieldSet, IngestError, ParentDocument, SearchError, SearchRequest, SearchResponse,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    /// Etag of the archived original, when archiving succeeded.
    pub etag: Option<String>,
    pub written: Vec<String>,
    pub failed: Vec<(usize, String)>,
}

impl From<IngestionReport> for UploadOutcome {
    fn from(report: IngestionReport) -> Self {
        Self {
            etag: None,
            written: report.written,
            failed: report
                .failed
                .into_iter()
                .map(|failure| (failure.row, failure.reason))
                .collect(),
        }
    }
}

pub struct SearchCoordinator<S: SearchStore + ?Sized + 'static> {
    store: Arc<S>,
    gateway: Arc<EmbeddingGateway>,
    config: ServiceConfig,
    archive: Option<Arc<dyn BlobStore>>,
}

impl<S: SearchStore + ?Sized + 'static> SearchCoordinator<S> {
    pub fn new(store: Arc<S>, gateway: Arc<EmbeddingGateway>, config: ServiceConfig) -> Self {
        Self {
            store,
            gateway,
            config,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn BlobStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn pipeline(&self) -> IngestionPipeline<'_, S> {
        IngestionPipeline::new(self.store.as_ref(), self.gateway.as_ref())
            .with_options(self.config.coercion)
            .with_concurrency(self.config.ingest_concurrency)
    }

    /// An existing index is reported, not treated as a failure.
    pub async fn create_index(
        &self,
        name: &str,
        fields: &[FieldSchema],
    ) -> Result<IndexOutcome, SearchError> {
        let definition = compile_schema(name, fields, &self.config.vector);
        match self.store.create_index(&definition).await {
            Ok(()) => Ok(IndexOutcome::Created),
            Err(error) if error.is_schema_conflict() => {
                warn!(index = name, %error, "index exists already, skipped creation");
                Ok(IndexOutcome::AlreadyExists)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn alter_index(&self, name: &str, fields: &[FieldSchema]) -> Result<(), SearchError> {
        let attributes = compile_attributes(fields, &self.config.vector);
        self.store.alter_index(name, &attributes).await?;
        info!(index = name, added = attributes.len(), "index altered");
        Ok(())
    }

    /// Drops the definition. Member records are only removed when
    /// `delete_records` is set, by a sweep the caller may await.
    pub async fn drop_index(
        &self,
        name: &str,
        delete_records: bool,
    ) -> Result<Option<SweepHandle>, SearchError> {
        self.store.drop_index(name).await?;
        info!(index = name, delete_records, "index dropped");
        Ok(delete_records.then(|| self.sweep(record_pattern(name))))
    }

    pub async fn list_indexes(&self) -> Result<Vec<String>, SearchError> {
        self.store.list_indexes().await
    }

    pub async fn index_fields(&self, name: &str) -> Result<FieldSet, SearchError> {
        self.store.index_info(name).await
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let fields = self.store.index_info(&request.index).await?;

        let compiled = QueryCompiler::new(&self.gateway)
            .compile(
                &fields,
                request.free_text(),
                &request.filters,
                request.combinator,
                request.limit,
                request.parents,
            )
            .await
            .map_err(|error| match error {
                unavailable @ SearchError::EmbeddingUnavailable(_) => {
                    SearchError::search_failed(unavailable)
                }
                other => other,
            })?;

        let Some(query) = compiled else {
            debug!(index = %request.index, "nothing to search");
            return Ok(SearchResponse::default());
        };

        let hits = execute(self.store.as_ref(), &request.index, &fields, &query).await?;
        let parents = if request.parents {
            parents::expand(self.store.as_ref(), &request.index, &hits, request.limit).await?
        } else {
            Vec::new()
        };

        debug!(index = %request.index, hits = hits.len(), parents = parents.len(), "search finished");
        Ok(SearchResponse { hits, parents })
    }

    pub async fn ingest_documents(
        &self,
        index: &str,
        documents: Value,
    ) -> Result<IngestionReport, IngestError> {
        let fields = self.store.index_info(index).await?;
        self.pipeline().ingest_json(index, &fields, documents).await
    }

    pub async fn ingest_file(&self, index: &str, path: &Path) -> Result<IngestionReport, IngestError> {
        let fields = self.store.index_info(index).await?;
        self.pipeline().ingest_file(index, &fields, path).await
    }

    /// Archives the raw file under `<index>/<original_name>` when a blob
    /// store is configured, then ingests its rows. Archive failures are
    /// logged and do not stop indexing.
    pub async fn upload_csv(
        &self,
        index: &str,
        path: &Path,
        original_name: &str,
        content_type: Option<&str>,
    ) -> Result<UploadOutcome, IngestError> {
        let etag = match &self.archive {
            Some(archive) => {
                let mut metadata = Map::new();
                metadata.insert(
                    CONTENT_TYPE.to_string(),
                    Value::String(content_type.unwrap_or("text/csv").to_string()),
                );
                let object_name = format!("{index}/{original_name}");
                match archive
                    .put(&self.config.archive_bucket, &object_name, path, &metadata)
                    .await
                {
                    Ok(etag) => {
                        info!(%object_name, %etag, "file uploaded successfully");
                        Some(etag)
                    }
                    Err(error) => {
                        warn!(%object_name, %error, "archiving upload failed");
                        None
                    }
                }
            }
            None => None,
        };

        let fields = self.store.index_info(index).await?;
        let bytes = tokio::fs::read(path).await?;
        let report = self
            .pipeline()
            .ingest_csv(index, &fields, bytes.as_slice())
            .await?;

        Ok(UploadOutcome {
            etag,
            ..UploadOutcome::from(report)
        })
    }

    pub async fn put_parent(&self, index: &str, parent: &ParentDocument) -> Result<(), SearchError> {
        parents::put_parent(self.store.as_ref(), index, parent).await
    }

    pub async fn delete_documents(&self, index: &str, uids: &[String]) -> BulkDeleteReport {
        let report = delete_documents(self.store.as_ref(), index, uids).await;
        info!(
            index,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "bulk delete finished"
        );
        report
    }

    pub fn sweep(&self, pattern: String) -> SweepHandle {
        info!(%pattern, "sweep started");
        spawn_sweep(Arc::clone(&self.store), pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DirectoryBlobStore;
    use crate::config::VectorConfig;
    use crate::embeddings::{Embedder, ModelLoader, ModelSource};
    use crate::stores::faulty::FaultyStore;
    use crate::stores::MemoryStore;
    use async_trait::async_trait;
    use crate::{Combinator, FieldType};
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    const DIMENSIONS: usize = 16;

    fn coordinator() -> (Arc<MemoryStore>, SearchCoordinator<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(EmbeddingGateway::new(
            ModelSource::Ngram {
                dimensions: DIMENSIONS,
            },
            DIMENSIONS,
            4,
        ));
        let config = ServiceConfig {
            vector: VectorConfig {
                dimension: DIMENSIONS,
                ..VectorConfig::default()
            },
            ..ServiceConfig::default()
        };
        (Arc::clone(&store), SearchCoordinator::new(store, gateway, config))
    }

    fn product_fields() -> Vec<FieldSchema> {
        vec![
            FieldSchema::new("title", FieldType::Text),
            FieldSchema::new("price", FieldType::Numeric),
            FieldSchema::new("embedding", FieldType::Vector),
        ]
    }

    #[tokio::test]
    async fn red_shoes_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let (_, coordinator) = coordinator();
        coordinator.create_index("products", &product_fields()).await?;

        let report = coordinator
            .ingest_documents(
                "products",
                json!({"title": "Red Shoes", "price": "$19.99", "embedding": "comfortable red shoes"}),
            )
            .await?;
        assert!(report.is_complete());

        let mut request = SearchRequest::new("products");
        request.query = Some("red shoes".to_string());
        request.limit = 5;
        let response = coordinator.search(&request).await?;

        assert_eq!(response.hits.len(), 1);
        let hit = &response.hits[0];
        assert_eq!(hit.get("title"), Some(&json!("Red Shoes")));
        assert_eq!(hit.get("price"), Some(&json!(19.99)));
        assert!(hit.get("dist").is_some_and(Value::is_number));
        assert!(hit.get("embedding_vec").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn knn_results_are_ordered_by_distance() -> Result<(), Box<dyn std::error::Error>> {
        let (_, coordinator) = coordinator();
        coordinator.create_index("products", &product_fields()).await?;
        coordinator
            .ingest_documents(
                "products",
                json!([
                    {"id": "1", "title": "Boots", "price": 80, "embedding": "winter leather boots"},
                    {"id": "2", "title": "Red Shoes", "price": 20, "embedding": "red shoes"},
                    {"id": "3", "title": "Hat", "price": 15, "embedding": "straw sun hat"}
                ]),
            )
            .await?;

        let mut request = SearchRequest::new("products");
        request.query = Some("red shoes".to_string());
        let response = coordinator.search(&request).await?;

        assert_eq!(response.hits[0].id, "2");
        let distances: Vec<f64> = response.hits.iter().filter_map(|hit| hit.dist()).collect();
        assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));
        Ok(())
    }

    #[tokio::test]
    async fn empty_request_returns_no_hits() -> Result<(), Box<dyn std::error::Error>> {
        let (_, coordinator) = coordinator();
        coordinator.create_index("products", &product_fields()).await?;

        let mut request = SearchRequest::new("products");
        request.query = Some("   ".to_string());
        let response = coordinator.search(&request).await?;
        assert!(response.hits.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn filters_combine_with_or() -> Result<(), Box<dyn std::error::Error>> {
        let (_, coordinator) = coordinator();
        coordinator
            .create_index(
                "items",
                &[
                    FieldSchema::new("color", FieldType::Tag),
                    FieldSchema::new("price", FieldType::Numeric),
                ],
            )
            .await?;
        coordinator
            .ingest_documents(
                "items",
                json!([
                    {"id": "a", "color": "red", "price": 5},
                    {"id": "b", "color": "blue", "price": 7},
                    {"id": "c", "color": "green", "price": 9}
                ]),
            )
            .await?;

        let mut request = SearchRequest::new("items");
        request.filters = json!({"color": "red", "price": 7}).as_object().cloned().unwrap_or_default();

        let and = coordinator.search(&request).await?;
        assert!(and.hits.is_empty());

        request.combinator = Combinator::Or;
        let or = coordinator.search(&request).await?;
        let mut ids: Vec<&str> = or.hits.iter().map(|hit| hit.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_index_is_reported() -> Result<(), SearchError> {
        let (_, coordinator) = coordinator();
        let fields = product_fields();

        assert_eq!(coordinator.create_index("products", &fields).await?, IndexOutcome::Created);
        assert_eq!(
            coordinator.create_index("products", &fields).await?,
            IndexOutcome::AlreadyExists
        );
        assert_eq!(coordinator.list_indexes().await?, vec!["products".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn alter_adds_fields() -> Result<(), SearchError> {
        let (_, coordinator) = coordinator();
        coordinator.create_index("products", &product_fields()).await?;
        coordinator
            .alter_index("products", &[FieldSchema::new("brand", FieldType::Tag)])
            .await?;

        let fields = coordinator.index_fields("products").await?;
        assert_eq!(fields.get("brand").map(|field| field.field_type), Some(FieldType::Tag));
        Ok(())
    }

    #[tokio::test]
    async fn missing_index_is_classified() {
        let (_, coordinator) = coordinator();
        let result = coordinator.search(&SearchRequest::new("nope")).await;
        assert!(matches!(result, Err(SearchError::IndexMissing(_))));
    }

    #[tokio::test]
    async fn drop_with_records_sweeps_them() -> Result<(), Box<dyn std::error::Error>> {
        let (store, coordinator) = coordinator();
        coordinator.create_index("products", &product_fields()).await?;
        coordinator
            .ingest_documents("products", json!([{"title": "a"}, {"title": "b"}]))
            .await?;

        let handle = coordinator.drop_index("products", true).await?;
        let report = match handle {
            Some(handle) => handle.wait().await?,
            None => return Err("expected a sweep".into()),
        };

        assert_eq!(report.deleted, 2);
        assert!(store.is_empty().await);
        assert!(coordinator.drop_index("products", false).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn bulk_delete_reports_every_uid() -> Result<(), Box<dyn std::error::Error>> {
        let (store, coordinator) = coordinator();
        coordinator.create_index("products", &product_fields()).await?;
        coordinator
            .ingest_documents("products", json!({"id": "a", "title": "only"}))
            .await?;

        let report = coordinator
            .delete_documents("products", &["a".to_string(), "b".to_string()])
            .await;

        assert_eq!(report.deleted, vec!["a".to_string(), "b".to_string()]);
        assert!(report.failed.is_empty());
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn search_expands_parents() -> Result<(), Box<dyn std::error::Error>> {
        let (_, coordinator) = coordinator();
        let mut fields = product_fields();
        fields.push(FieldSchema::new("content_parent_uids", FieldType::Text));
        coordinator.create_index("docs", &fields).await?;
        coordinator
            .ingest_documents(
                "docs",
                json!([
                    {"id": "c1", "title": "intro", "embedding": "red shoes intro", "content_parent_uids": "p1"},
                    {"id": "c2", "title": "body", "embedding": "sizing table"}
                ]),
            )
            .await?;
        coordinator
            .put_parent(
                "docs",
                &ParentDocument {
                    uid: "p1".to_string(),
                    items: vec!["c1".to_string(), "c2".to_string()],
                },
            )
            .await?;

        let mut request = SearchRequest::new("docs");
        request.query = Some("red shoes".to_string());
        request.parents = true;
        let response = coordinator.search(&request).await?;

        assert_eq!(response.parents.len(), 1);
        assert_eq!(response.parents[0].uid, "p1");
        assert_eq!(response.parents[0].chunks.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn upload_archives_and_ingests() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let csv = dir.path().join("tmp-upload");
        fs::write(&csv, "title,price\nRed Shoes,$19.99\nBlue Hat,12\n")?;

        let (store, coordinator) = coordinator();
        let archive = DirectoryBlobStore::new(dir.path().join("archive"));
        let coordinator = coordinator.with_archive(Arc::new(archive));
        coordinator.create_index("products", &product_fields()).await?;

        let outcome = coordinator
            .upload_csv("products", &csv, "products.csv", Some("text/csv"))
            .await?;

        assert!(outcome.etag.is_some());
        assert_eq!(outcome.written.len(), 2);
        assert!(dir.path().join("archive/uploads/products/products.csv").exists());
        assert_eq!(store.len().await, 2);
        Ok(())
    }

    struct OfflineLoader;

    #[async_trait]
    impl ModelLoader for OfflineLoader {
        async fn load(&self) -> Result<Arc<dyn Embedder>, SearchError> {
            Err(SearchError::EmbeddingUnavailable("model offline".to_string()))
        }
    }

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            vector: VectorConfig {
                dimension: DIMENSIONS,
                ..VectorConfig::default()
            },
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn store_rejection_is_reported_as_search_failed() -> Result<(), SearchError> {
        let store = Arc::new(FaultyStore::new().reject_searches());
        let gateway = Arc::new(EmbeddingGateway::new(
            ModelSource::Ngram {
                dimensions: DIMENSIONS,
            },
            DIMENSIONS,
            4,
        ));
        let coordinator = SearchCoordinator::new(store, gateway, test_config());
        coordinator.create_index("products", &product_fields()).await?;

        let mut request = SearchRequest::new("products");
        request.query = Some("red shoes".to_string());

        match coordinator.search(&request).await {
            Err(SearchError::SearchFailed { source }) => {
                assert!(matches!(*source, SearchError::BackendResponse { .. }));
            }
            other => panic!("unexpected result {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_is_reported_as_search_failed() -> Result<(), SearchError> {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(EmbeddingGateway::new(OfflineLoader, DIMENSIONS, 4));
        let coordinator = SearchCoordinator::new(store, gateway, test_config());
        coordinator.create_index("products", &product_fields()).await?;

        let mut request = SearchRequest::new("products");
        request.query = Some("red shoes".to_string());

        match coordinator.search(&request).await {
            Err(SearchError::SearchFailed { source }) => {
                assert!(matches!(*source, SearchError::EmbeddingUnavailable(_)));
            }
            other => panic!("unexpected result {other:?}"),
        }
        Ok(())
    }
}
