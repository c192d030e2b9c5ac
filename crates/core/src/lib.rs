pub mod archive;
pub mod coercion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod executor;
pub mod format;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod parents;
pub mod query;
pub mod schema;
pub mod store;
pub mod stores;
pub mod sweeper;
pub mod traits;

pub use archive::{BlobStore, DirectoryBlobStore};
pub use config::{CoercionOptions, DistanceMetric, NumericMode, ServiceConfig, VectorConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingGateway, EmbeddingInput, HttpEmbedder, ModelLoader,
    ModelSource, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, SearchError};
pub use format::{instantsearch_response, HitMapping};
pub use ingest::{discover_data_files, FailedRow, IngestionPipeline, IngestionReport};
pub use models::{
    Combinator, FieldSchema, FieldSet, FieldType, FieldValue, ParentDocument, ParentView, Record,
    SearchHit, SearchRequest, SearchResponse,
};
pub use orchestrator::{IndexOutcome, SearchCoordinator, UploadOutcome};
pub use query::{CompiledQuery, QueryCompiler};
pub use schema::{compile_schema, fields_from_declarations, IndexDefinition};
pub use stores::{MemoryStore, RedisStore};
pub use sweeper::{BulkDeleteReport, SweepHandle, SweepReport};
pub use traits::SearchStore;
