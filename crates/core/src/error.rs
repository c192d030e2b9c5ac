use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("field `{field}` rejected value {value:?}")]
    InvalidValue { field: String, value: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("index already exists: {0}")]
    SchemaConflict(String),

    #[error("unknown index: {0}")]
    IndexMissing(String),

    #[error("embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("query compile failure: {0}")]
    QueryCompile(String),

    #[error("search failed: {source}")]
    SearchFailed {
        #[source]
        source: Box<SearchError>,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("redis error: {0}")]
    Redis(redis::RedisError),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("background task failed: {0}")]
    Background(String),
}

impl SearchError {
    /// Wraps a compile or execution error into the single condition the
    /// search path reports.
    pub fn search_failed(source: SearchError) -> Self {
        match source {
            already @ SearchError::SearchFailed { .. } => already,
            other => SearchError::SearchFailed {
                source: Box::new(other),
            },
        }
    }

    pub fn is_schema_conflict(&self) -> bool {
        matches!(self, SearchError::SchemaConflict(_))
    }
}

impl From<redis::RedisError> for SearchError {
    fn from(error: redis::RedisError) -> Self {
        let message = error.to_string();
        // `-Index already exists` arrives as code `Index`, detail `already exists`.
        let lowered = match (error.code(), error.detail()) {
            (Some(code), Some(detail)) => format!("{code} {detail} {message}"),
            _ => message.clone(),
        }
        .to_lowercase();

        if lowered.contains("index already exists") {
            SearchError::SchemaConflict(message)
        } else if lowered.contains("unknown index name") || lowered.contains("no such index") {
            SearchError::IndexMissing(message)
        } else if error.is_io_error() || error.is_connection_refusal() || error.is_connection_dropped() {
            SearchError::StoreUnavailable(message)
        } else {
            SearchError::Redis(error)
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
