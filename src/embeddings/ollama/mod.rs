
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::EngineError;
use crate::config::EmbeddingConfig;
use crate::embeddings::{EmbeddingProvider, ProviderIdentity};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Pauses between attempts for transient failures. The schedule length
/// bounds the retries: a request is sent at most `len + 1` times.
const RETRY_SCHEDULE: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_millis(1_000),
    Duration::from_millis(4_000),
];

/// Embedding provider backed by an Ollama-compatible HTTP API.
#[derive(Debug)]
pub struct OllamaProvider {
    base_url: Url,
    model: String,
    batch_size: u32,
    dimension: u32,
    agent: ureq::Agent,
    retry_schedule: Vec<Duration>,
    model_digest: OnceLock<String>,
}

/// How a failed request should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    /// Server-side or transport trouble that tends to clear on its own.
    Transient,
    /// The request itself is unacceptable; repeating it cannot help.
    Permanent,
}

fn classify_failure(error: &ureq::Error) -> FailureKind {
    match error {
        // 5xx means the server is struggling; 429 asks us to back off.
        ureq::Error::StatusCode(status) if *status >= 500 || *status == 429 => {
            FailureKind::Transient
        }
        ureq::Error::StatusCode(_) => FailureKind::Permanent,
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    model: String,
    #[serde(rename = "input")]
    inputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaProvider {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .endpoint_url()
            .context("Failed to build embedding endpoint URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size,
            dimension: config.embedding_dimension,
            agent,
            retry_schedule: RETRY_SCHEDULE.to_vec(),
            model_digest: OnceLock::new(),
        })
    }

    /// Override the pauses between retry attempts. An empty schedule
    /// fails fast after the first attempt.
    #[inline]
    pub fn with_retry_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.retry_schedule = schedule;
        self
    }

    /// Test connection to the server and verify model availability.
    /// Also resolves the model digest used in the provider identity.
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;

        let Some(model) = models.iter().find(|m| m.name == self.model) else {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            anyhow::bail!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available
            );
        };

        if let Some(digest) = &model.digest {
            let _ = self.model_digest.set(digest.clone());
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// List the models the server has available.
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .send_with_retry("list models", || {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .send_with_retry("embed", || {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        self.check_dimension(&embed_response.embedding)?;
        Ok(embed_response.embedding)
    }

    fn generate_embeddings_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.len() == 1 {
            return Ok(vec![self.generate_embedding(&texts[0])?]);
        }

        let request = BatchEmbedRequest {
            model: self.model.clone(),
            inputs: texts.to_vec(),
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build batch embedding URL")?;

        let request_json = serde_json::to_string(&request)
            .context("Failed to serialize batch embedding request")?;

        let response_text = self
            .send_with_retry("embed batch", || {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate batch embeddings")?;

        let batch_response: BatchEmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse batch embedding response")?;

        if batch_response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                batch_response.embeddings.len()
            );
        }

        for embedding in &batch_response.embeddings {
            self.check_dimension(embedding)?;
        }

        Ok(batch_response.embeddings)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension as usize {
            anyhow::bail!(
                "Model returned {}-dimensional embedding, expected {}",
                embedding.len(),
                self.dimension
            );
        }
        Ok(())
    }

    /// Send a request, retrying transient failures along the configured
    /// pause schedule. Permanent failures return immediately; the last
    /// transient error is returned once the schedule is exhausted.
    fn send_with_retry<F>(&self, operation: &str, mut send: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut pauses = self.retry_schedule.iter();

        loop {
            let error = match send() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            match classify_failure(&error) {
                FailureKind::Permanent => {
                    debug!("{operation}: permanent failure, not retrying");
                    return Err(anyhow::anyhow!("{operation}: {error}"));
                }
                FailureKind::Transient => {
                    let Some(pause) = pauses.next() else {
                        error!(
                            "{operation}: still failing after {} attempts against {}",
                            self.retry_schedule.len() + 1,
                            self.base_url
                        );
                        return Err(anyhow::anyhow!(
                            "{operation}: gave up after {} attempts: {error}",
                            self.retry_schedule.len() + 1
                        ));
                    };

                    warn!("{operation}: transient failure, retrying in {pause:?}: {error}");
                    std::thread::sleep(*pause);
                }
            }
        }
    }
}

impl EmbeddingProvider for OllamaProvider {
    #[inline]
    fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.generate_embedding(text)
            .map_err(|e| EngineError::EmbeddingProviderFailed(format!("{e:#}")))
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());

        // Process in batches to avoid overwhelming the server.
        for chunk in texts.chunks(self.batch_size as usize) {
            let batch = self
                .generate_embeddings_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))
                .map_err(|e| EngineError::EmbeddingProviderFailed(format!("{e:#}")))?;
            results.extend(batch);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    #[inline]
    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            model: self.model.clone(),
            version: self
                .model_digest
                .get()
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            dimension: self.dimension,
        }
    }
}
