//! Subject classification through an LLM.
//!
//! Defines the [`SubjectModel`] trait and its implementations:
//! - **[`DisabledModel`]**: never called; everything is Unclassified.
//! - **[`OpenAiChatModel`]**: an OpenAI-compatible `/chat/completions`
//!   endpoint with configurable `base_url` and `model`.
//!
//! [`Classifier`] wraps a model with the cache, a global concurrency
//! limit, per-call timeouts and retry with backoff, and maps the answer
//! onto the taxonomy as a [`SubjectMatch`].
//!
//! # Retry Strategy
//!
//! - Network errors, HTTP 429, 5xx, timeouts and malformed replies → retry
//! - Any other 4xx (including auth) → fail immediately
//! - Backoff: `backoff_base_ms · 2^(attempt-1)`, exponent capped at 5
//!
//! The concurrency permit is held for the call only, never across a
//! backoff sleep.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use paperweave_core::models::Metadata;
use paperweave_core::response::{parse_answer, ClassifyRequest, ModelAnswer, SYSTEM_PROMPT};
use paperweave_core::taxonomy::{SubjectMatch, Taxonomy};
use tokio::sync::Semaphore;

use crate::cache::ClassificationCache;
use crate::catalog::CachedAnswer;
use crate::config::ClassifierConfig;
use crate::error::ClassificationError;

/// A backend that answers one classification request with raw text.
#[async_trait]
pub trait SubjectModel: Send + Sync {
    /// Model identifier, for logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: &ClassifyRequest) -> Result<String, ClassificationError>;
}

pub struct DisabledModel;

#[async_trait]
impl SubjectModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &ClassifyRequest) -> Result<String, ClassificationError> {
        Err(ClassificationError::Disabled)
    }
}

pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiChatModel {
    pub fn new(config: &ClassifierConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl SubjectModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ClassifyRequest) -> Result<String, ClassificationError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": request.to_prompt() },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response.json().await.map_err(map_reqwest_error)?;
            return chat_content(&json);
        }

        if status.as_u16() == 429 {
            return Err(ClassificationError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ClassificationError::Server(status.as_u16()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClassificationError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ClassificationError {
    if e.is_timeout() {
        ClassificationError::Timeout
    } else if e.is_decode() {
        ClassificationError::MalformedResponse(
            paperweave_core::error::MalformedResponse::new(e.to_string()),
        )
    } else {
        ClassificationError::Network(e.to_string())
    }
}

/// Extracts `choices[0].message.content` from a chat completion.
fn chat_content(json: &serde_json::Value) -> Result<String, ClassificationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ClassificationError::MalformedResponse(paperweave_core::error::MalformedResponse::new(
                "chat completion without choices[0].message.content",
            ))
        })
}

/// Instantiates the configured model.
pub fn create_model(config: &ClassifierConfig) -> anyhow::Result<Arc<dyn SubjectModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => {
            let Some(key) = config.resolve_api_key() else {
                bail!(
                    "classifier.provider = \"openai\" needs classifier.api_key, PAPERWEAVE_API_KEY or OPENAI_API_KEY"
                );
            };
            Ok(Arc::new(OpenAiChatModel::new(config, key)?))
        }
        other => bail!("Unknown classifier provider: {}", other),
    }
}

/// Outcome of one classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// `None` when the classifier is disabled.
    pub answer: Option<ModelAnswer>,
    pub matched: SubjectMatch,
    pub cached: bool,
}

pub struct Classifier {
    model: Arc<dyn SubjectModel>,
    enabled: bool,
    limiter: Arc<Semaphore>,
    cache: Arc<ClassificationCache>,
    max_attempts: u32,
    backoff_base: Duration,
    call_timeout: Duration,
    min_similarity: f64,
    calls: AtomicUsize,
}

impl Classifier {
    pub fn new(
        config: &ClassifierConfig,
        model: Arc<dyn SubjectModel>,
        cache: Arc<ClassificationCache>,
    ) -> Self {
        Self {
            model,
            enabled: config.is_enabled(),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            cache,
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            call_timeout: Duration::from_secs(config.timeout_secs),
            min_similarity: config.min_match_similarity,
            calls: AtomicUsize::new(0),
        }
    }

    /// Model calls made so far, retries included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Version string stored with each classification. Results made while
    /// the classifier was disabled carry a distinct version so enabling it
    /// later reclassifies them.
    pub fn effective_version(&self, taxonomy: &Taxonomy) -> String {
        if self.enabled {
            taxonomy.version().to_string()
        } else {
            format!("disabled:{}", taxonomy.version())
        }
    }

    pub async fn classify(
        &self,
        content_hash: &str,
        metadata: &Metadata,
        taxonomy: &Taxonomy,
    ) -> Result<Classification, ClassificationError> {
        if !self.enabled {
            return Ok(Classification {
                answer: None,
                matched: SubjectMatch::Unclassified,
                cached: false,
            });
        }

        let version = taxonomy.version();
        if let Some(answer) = self.cache.get(content_hash, version).await {
            tracing::debug!(hash = %content_hash, "classification cache hit");
            return Ok(Classification {
                matched: taxonomy.resolve(&answer.subject_name, self.min_similarity),
                answer: Some(answer),
                cached: true,
            });
        }

        let request = ClassifyRequest::new(metadata, taxonomy.candidate_paths());
        let answer = self.call_with_retry(&request).await?;

        self.cache
            .insert(CachedAnswer {
                content_hash: content_hash.to_string(),
                taxonomy_version: version.to_string(),
                answer: answer.clone(),
            })
            .await;

        Ok(Classification {
            matched: taxonomy.resolve(&answer.subject_name, self.min_similarity),
            answer: Some(answer),
            cached: false,
        })
    }

    async fn call_with_retry(
        &self,
        request: &ClassifyRequest,
    ) -> Result<ModelAnswer, ClassificationError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self.call_once(request).await;
            match result {
                Ok(answer) => return Ok(answer),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                    tracing::debug!(
                        model = self.model.name(),
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "retrying classification"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, request: &ClassifyRequest) -> Result<ModelAnswer, ClassificationError> {
        let raw = {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| ClassificationError::Network("model limiter closed".into()))?;
            self.calls.fetch_add(1, Ordering::Relaxed);
            match tokio::time::timeout(self.call_timeout, self.model.complete(request)).await {
                Ok(result) => result?,
                Err(_) => return Err(ClassificationError::Timeout),
            }
        };
        Ok(parse_answer(&raw)?)
    }
}
