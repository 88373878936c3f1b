//! Image-generation backend seam.
//!
//! A worker service hands each task to a [`Generator`] together with a
//! [`ProgressReporter`] bound to the task's job record. The shipped
//! implementation, [`Txt2ImgClient`], talks to the Stable Diffusion web UI
//! HTTP API using [`reqwest`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sdpool_core::job::JobState;
use sdpool_core::store::JobStore;
use sdpool_core::task::Task;
use serde::Deserialize;

use crate::config::ServiceConfig;

/// How often [`Txt2ImgClient`] polls the backend for progress.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from a generation attempt. Every variant ends the task as failed.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Backend error ({status}): {body}")]
    Backend { status: u16, body: String },

    /// The job record was reaped while the task was running.
    #[error("Generation cancelled: job is no longer live")]
    Cancelled,
}

/// Performs the work for one task.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run `task` to completion and return the result document.
    ///
    /// Implementations should call [`ProgressReporter::report`] as work
    /// proceeds and may stop early with [`GenerationError::Cancelled`] when
    /// it returns `false`.
    async fn generate(
        &self,
        task: &Task,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, GenerationError>;
}

/// Builds one [`Generator`] per enabled service configuration.
pub trait GeneratorFactory: Send + Sync {
    fn build(&self, config: &ServiceConfig) -> Arc<dyn Generator>;
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Writes monotonic progress for one job.
///
/// Values that do not exceed the last recorded percentage are ignored, and
/// percentages are capped at 99: only the worker marks a job completed.
pub struct ProgressReporter {
    job_store: Arc<dyn JobStore>,
    task_id: String,
    last: AtomicU8,
}

impl ProgressReporter {
    pub fn new(job_store: Arc<dyn JobStore>, task_id: impl Into<String>) -> Self {
        Self {
            job_store,
            task_id: task_id.into(),
            last: AtomicU8::new(0),
        }
    }

    /// Highest percentage recorded so far.
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::Acquire)
    }

    /// Record `percent` if it moves the job forward.
    ///
    /// Returns `false` once the job is gone or terminal, meaning further
    /// work will not be recorded. Store failures are logged and treated as
    /// still live.
    pub async fn report(&self, percent: u8) -> bool {
        let percent = percent.min(99);
        if percent <= self.last() {
            return true;
        }

        match self
            .job_store
            .update_progress(&self.task_id, JobState::running(percent))
            .await
        {
            Ok(true) => {
                self.last.fetch_max(percent, Ordering::AcqRel);
                true
            }
            Ok(false) => {
                tracing::debug!(task_id = %self.task_id, percent, "Progress update rejected, job not live");
                false
            }
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, error = %e, "Failed to record progress");
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Txt2ImgClient
// ---------------------------------------------------------------------------

/// HTTP client for one Stable Diffusion web UI instance.
pub struct Txt2ImgClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
}

/// Body of `GET /sdapi/v1/progress`.
#[derive(Debug, Deserialize)]
struct ProgressResponse {
    /// Fraction complete in `0.0..=1.0`.
    progress: f64,
}

impl Txt2ImgClient {
    /// Create a client for `api_url`, e.g. `http://host:7860`.
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.api_url, path));
        match &self.api_key {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }

    /// Current backend progress as a whole percentage.
    async fn fetch_progress(&self) -> Result<u8, GenerationError> {
        let response = self
            .request(reqwest::Method::GET, "/sdapi/v1/progress")
            .query(&[("skip_current_image", "true")])
            .send()
            .await?;
        let body: ProgressResponse = Self::parse_response(response).await?;
        Ok(percent_from_fraction(body.progress))
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GenerationError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl Generator for Txt2ImgClient {
    async fn generate(
        &self,
        task: &Task,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, GenerationError> {
        let submit = self
            .request(reqwest::Method::POST, "/sdapi/v1/txt2img")
            .json(&task.payload)
            .send();
        tokio::pin!(submit);

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        poll.tick().await;

        loop {
            tokio::select! {
                response = &mut submit => {
                    return Self::parse_response(response?).await;
                }
                _ = poll.tick() => {
                    match self.fetch_progress().await {
                        Ok(percent) => {
                            if !progress.report(percent).await {
                                return Err(GenerationError::Cancelled);
                            }
                        }
                        Err(e) => {
                            tracing::debug!(task_id = %task.task_id, error = %e, "Progress poll failed");
                        }
                    }
                }
            }
        }
    }
}

/// Builds a [`Txt2ImgClient`] per configuration, sharing one connection pool.
pub struct Txt2ImgFactory {
    client: reqwest::Client,
    poll_interval: Duration,
}

impl Txt2ImgFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for Txt2ImgFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorFactory for Txt2ImgFactory {
    fn build(&self, config: &ServiceConfig) -> Arc<dyn Generator> {
        Arc::new(
            Txt2ImgClient::with_client(
                self.client.clone(),
                config.api_url.clone(),
                config.api_key.clone(),
            )
            .with_poll_interval(self.poll_interval),
        )
    }
}

fn percent_from_fraction(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}
