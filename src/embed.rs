use crate::error::PipelineError;
use crate::segment::to_wakati;
use rayon::prelude::*;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::thread;
use std::time::Duration;

/// Narrow interface to the embedding step. The pipeline treats a call as an
/// opaque blocking operation; any parallelism lives inside the
/// implementation.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut batch = self.embed_batch(&[text.to_string()])?;
        batch
            .pop()
            .ok_or_else(|| PipelineError::Backend("backend returned no query embedding".into()))
    }
}

/// Which backend produced (or should reproduce) an index's embeddings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmbedderBackend {
    /// Deterministic feature-hashing embedder; fully offline.
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint.
    Remote { endpoint: String, model: String },
}

/// Persistable description of the embedding setup.
///
/// This is what gets stored alongside a built index; the runtime handle is
/// never serialized and is reconstructed from this config on load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedderConfig {
    pub backend: EmbedderBackend,
    pub dimension: usize,
    /// L2-normalize vectors before insertion and at query time, making
    /// inner-product scores cosine similarities.
    pub normalize: bool,
    /// Pre-tokenize text into script runs before embedding, for scripts
    /// without whitespace word boundaries.
    pub segment_cjk: bool,
}

/// Reconstructs a runtime embedder from its persisted configuration.
///
/// Remote backends read their API key from `OPENAI_API_KEY` at
/// reconstruction time; credentials are never part of the persisted state.
pub fn from_config(config: &EmbedderConfig) -> Result<Box<dyn Embedder>, PipelineError> {
    let inner: Box<dyn Embedder> = match &config.backend {
        EmbedderBackend::Hashing => Box::new(HashEmbedder::new(config.dimension)),
        EmbedderBackend::Remote { endpoint, model } => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                PipelineError::Backend("OPENAI_API_KEY not set for remote embeddings".into())
            })?;
            Box::new(RemoteEmbedder::new(
                api_key,
                endpoint.clone(),
                model.clone(),
                config.dimension,
            )?)
        }
    };

    Ok(Box::new(ConfiguredEmbedder {
        inner,
        normalize: config.normalize,
        segment_cjk: config.segment_cjk,
    }))
}

/// Applies the configured preprocessing (script-run segmentation) and
/// postprocessing (L2 normalization) around any backend, so documents and
/// queries always go through the same transformations.
struct ConfiguredEmbedder {
    inner: Box<dyn Embedder>,
    normalize: bool,
    segment_cjk: bool,
}

impl ConfiguredEmbedder {
    fn preprocess(&self, text: &str) -> String {
        if self.segment_cjk {
            to_wakati(text)
        } else {
            text.to_string()
        }
    }
}

impl Embedder for ConfiguredEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let processed: Vec<String> = texts.iter().map(|t| self.preprocess(t)).collect();
        let mut vectors = self.inner.embed_batch(&processed)?;
        if self.normalize {
            for v in &mut vectors {
                l2_normalize(v);
            }
        }
        Ok(vectors)
    }
}

/// Deterministic feature-hashing embedder over word unigrams and bigrams.
///
/// Not a learned model, but reproducible, offline, and good enough for
/// lexical-overlap similarity; identical input always produces identical
/// vectors, which the cache and export layers rely on.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "embedding dimension must be positive");
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        for token in &tokens {
            self.bump(&mut v, token.as_bytes());
        }
        for pair in tokens.windows(2) {
            let mut hasher = FxHasher::default();
            hasher.write(pair[0].as_bytes());
            hasher.write(b" ");
            hasher.write(pair[1].as_bytes());
            self.bump_hashed(&mut v, hasher.finish());
        }

        l2_normalize(&mut v);
        v
    }

    fn bump(&self, v: &mut [f32], token: &[u8]) {
        let mut hasher = FxHasher::default();
        hasher.write(token);
        self.bump_hashed(v, hasher.finish());
    }

    fn bump_hashed(&self, v: &mut [f32], hash: u64) {
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
        v[bucket] += sign;
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.par_iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Blocking client for OpenAI-compatible embedding endpoints, with bounded
/// retry on rate limits and server errors.
pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    max_retries: usize,
}

impl RemoteEmbedder {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimension: usize,
    ) -> Result<Self, PipelineError> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::Backend("empty API key".into()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| PipelineError::Backend("API key is not a valid header value".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()
            .map_err(|e| PipelineError::Backend(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            dimension,
            max_retries: 4,
        })
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn backoff(attempt: usize) -> Duration {
        Duration::from_millis(500 * (1 << attempt.min(5) as u32))
    }
}

impl Embedder for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: texts,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let mut parsed: EmbeddingResponse = resp.json().map_err(|e| {
                        PipelineError::Backend(format!("unparsable embedding response: {e}"))
                    })?;
                    parsed.data.sort_by_key(|entry| entry.index);
                    if parsed.data.len() != texts.len() {
                        return Err(PipelineError::Backend(format!(
                            "backend returned {} embeddings for {} inputs",
                            parsed.data.len(),
                            texts.len()
                        )));
                    }
                    for entry in &parsed.data {
                        if entry.embedding.len() != self.dimension {
                            return Err(PipelineError::Backend(format!(
                                "backend returned {}-dimensional vector, expected {}",
                                entry.embedding.len(),
                                self.dimension
                            )));
                        }
                    }
                    return Ok(parsed.data.into_iter().map(|e| e.embedding).collect());
                }
                Ok(resp) => {
                    let status = resp.status();
                    if Self::should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(Self::backoff(attempt));
                        continue;
                    }
                    let body = resp.text().unwrap_or_else(|_| "<body unavailable>".into());
                    return Err(PipelineError::Backend(format!(
                        "embedding request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                    if retryable && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(Self::backoff(attempt));
                        continue;
                    }
                    return Err(PipelineError::Backend(format!("embedding request error: {err}")));
                }
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Scales a vector to unit length; zero vectors stay zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
