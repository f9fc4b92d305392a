use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;
use crate::lexical::tokenize;
use crate::traits::Embedder;
use crate::vector::unit_length;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Feature-hashing embedder over words and character trigrams. Needs no
/// model and is stable across runs and platforms.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let buckets = vector.len() as u64;

        for word in tokenize(text) {
            let bucket = (fnv1a(b"w:", word.as_bytes()) % buckets) as usize;
            vector[bucket] += WORD_WEIGHT;

            let chars = format!(" {word} ").chars().collect::<Vec<_>>();
            for window in chars.windows(3) {
                let trigram = window.iter().collect::<String>();
                let bucket = (fnv1a(b"t:", trigram.as_bytes()) % buckets) as usize;
                vector[bucket] += TRIGRAM_WEIGHT;
            }
        }

        unit_length(vector)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}

fn fnv1a(prefix: &[u8], bytes: &[u8]) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in prefix.iter().chain(bytes) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

/// Calls a remote embedding endpoint. Accepts OpenAI-style
/// (`data[0].embedding`), Ollama-style (`embedding`) and batch-style
/// (`embeddings[0]`) response bodies.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: Url,
    model: Option<String>,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, dimensions: usize, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            model: None,
            api_key: None,
            dimensions,
            client,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| EmbeddingError::Unavailable("no embedding endpoint configured".to_string()))?;
        let embedder = Self::new(endpoint, config.dimensions, Duration::from_secs(config.timeout_secs))?;
        Ok(match &config.model {
            Some(model) => embedder.with_model(model.clone()),
            None => embedder,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut body = json!({ "input": text, "prompt": text });
        if let Some(model) = &self.model {
            body["model"] = Value::String(model.clone());
        }

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: self.endpoint.to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let embedding = parse_embedding(&parsed).ok_or_else(|| EmbeddingError::BackendResponse {
            backend: self.endpoint.to_string(),
            details: "response carries no embedding array".to_string(),
        })?;

        if embedding.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        debug!(endpoint = %self.endpoint, dimensions = embedding.len(), "remote embedding received");
        Ok(embedding)
    }
}

pub(crate) fn parse_embedding(body: &Value) -> Option<Vec<f32>> {
    let array = ["/data/0/embedding", "/embedding", "/embeddings/0"]
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(Value::as_array))?;
    array
        .iter()
        .map(|value| value.as_f64().map(|value| value as f32))
        .collect()
}
