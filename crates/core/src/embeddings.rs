use crate::coercion::stringify;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info};
use url::Url;

const DEFAULT: usize = 512;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed_sync(text))
    }
}

/// Remote model reached over HTTP. Accepts either `{"embedding": [...]}` or
/// the `{"data": [{"embedding": [...]}]}` response shape.
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, api_key: Option<String>, dimensions: usize) -> Result<Self, SearchError> {
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(endpoint)?,
            api_key,
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "input": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| SearchError::EmbeddingUnavailable(error.to_string()))?;
        if !response.status().is_success() {
            return Err(SearchError::EmbeddingUnavailable(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| SearchError::EmbeddingUnavailable(error.to_string()))?;
        let values = body
            .pointer("/embedding")
            .or_else(|| body.pointer("/data/0/embedding"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SearchError::EmbeddingUnavailable("response carries no embedding".to_string())
            })?;

        values
            .iter()
            .map(|value| {
                value.as_f64().map(|number| number as f32).ok_or_else(|| {
                    SearchError::EmbeddingUnavailable(format!("non-numeric component {value}"))
                })
            })
            .collect()
    }
}

/// Produces the model on first use.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Embedder>, SearchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Ngram {
        dimensions: usize,
    },
    Http {
        endpoint: String,
        api_key: Option<String>,
        dimensions: usize,
    },
}

#[async_trait]
impl ModelLoader for ModelSource {
    async fn load(&self) -> Result<Arc<dyn Embedder>, SearchError> {
        match self {
            ModelSource::Ngram { dimensions } => Ok(Arc::new(CharacterNgramEmbedder {
                dimensions: *dimensions,
            })),
            ModelSource::Http {
                endpoint,
                api_key,
                dimensions,
            } => {
                let embedder = HttpEmbedder::new(endpoint, api_key.clone(), *dimensions)
                    .map_err(|error| SearchError::EmbeddingUnavailable(error.to_string()))?;
                Ok(Arc::new(embedder))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingInput {
    Text(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    /// Arrays embed as a batch of their stringified items; anything else as
    /// one text.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => EmbeddingInput::Batch(items.iter().map(stringify).collect()),
            other => EmbeddingInput::Text(stringify(other)),
        }
    }
}

impl From<&str> for EmbeddingInput {
    fn from(value: &str) -> Self {
        EmbeddingInput::Text(value.to_string())
    }
}

impl From<String> for EmbeddingInput {
    fn from(value: String) -> Self {
        EmbeddingInput::Text(value)
    }
}

impl From<Vec<String>> for EmbeddingInput {
    fn from(value: Vec<String>) -> Self {
        EmbeddingInput::Batch(value)
    }
}

/// Owned handle to the embedding model. The model is loaded on first use;
/// concurrent first callers share a single load, and a failed load is
/// retried by the next caller.
pub struct EmbeddingGateway {
    loader: Box<dyn ModelLoader>,
    model: OnceCell<Arc<dyn Embedder>>,
    dimensions: usize,
    permits: Semaphore,
}

impl EmbeddingGateway {
    pub fn new(loader: impl ModelLoader + 'static, dimensions: usize, max_in_flight: usize) -> Self {
        Self {
            loader: Box::new(loader),
            model: OnceCell::new(),
            dimensions,
            permits: Semaphore::new(max_in_flight.max(1)),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> Result<Arc<dyn Embedder>, SearchError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                info!(dimensions = self.dimensions, "loading embedding model");
                let model = self.loader.load().await.map_err(|error| match error {
                    unavailable @ SearchError::EmbeddingUnavailable(_) => unavailable,
                    other => SearchError::EmbeddingUnavailable(other.to_string()),
                })?;

                if model.dimensions() != self.dimensions {
                    return Err(SearchError::EmbeddingUnavailable(format!(
                        "model produces {} dimensions, expected {}",
                        model.dimensions(),
                        self.dimensions
                    )));
                }
                Ok(model)
            })
            .await?;

        Ok(Arc::clone(model))
    }

    pub async fn embed(&self, input: impl Into<EmbeddingInput>) -> Result<Vec<f32>, SearchError> {
        let input = input.into();
        let model = self.model().await?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|error| SearchError::EmbeddingUnavailable(error.to_string()))?;

        let vector = match input {
            EmbeddingInput::Text(text) => model.embed(&text).await?,
            EmbeddingInput::Batch(texts) => {
                let mut pooled = vec![0f32; self.dimensions];
                for text in &texts {
                    let vector = model.embed(text).await?;
                    self.check_length(&vector)?;
                    for (slot, value) in pooled.iter_mut().zip(vector) {
                        *slot += value;
                    }
                }
                if !texts.is_empty() {
                    let count = texts.len() as f32;
                    for slot in &mut pooled {
                        *slot /= count;
                    }
                }
                pooled
            }
        };

        self.check_length(&vector)?;
        debug!(dimensions = vector.len(), "embedded input");
        Ok(vector)
    }

    fn check_length(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimensions {
            return Err(SearchError::EmbeddingUnavailable(format!(
                "embedding length {} != {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}
