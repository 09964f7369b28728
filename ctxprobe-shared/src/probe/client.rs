//! # Inference Client
//!
//! HTTP client for an Ollama-compatible inference server. The
//! [`InferenceBackend`] trait is the seam the orchestrator drives; the
//! [`OllamaClient`] implementation talks to `/api/tags`, `/api/version` and
//! `/api/generate`.

use crate::config::ProbeTimings;
use crate::probe::errors::{ProbeError, ProbeResult};
use crate::probe::types::{ModelDescriptor, StepMetrics};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Characters of synthetic prompt per two expected tokens (3.5 per token).
pub const PROMPT_CHARS_PER_TOKEN_X2: u64 = 7;

/// The prompt is sized to this many tenths of the target context.
pub const PROMPT_OVERSIZE_TENTHS: u64 = 11;

/// Placeholder for versions and digests the server did not report.
pub const UNKNOWN: &str = "Unknown";

const FILLER_LINE: &str = "function test() { const x = 100; return x * 2; } // Filler.\n";
const DIGEST_LEN: usize = 12;
const MEASURE_TEMPERATURE: f32 = 0.1;

/// Operations the orchestrator needs from an inference server.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// List the models the server has available, sorted by name.
    ///
    /// # Errors
    /// Returns [`ProbeError::Connectivity`] if the server cannot be queried.
    async fn list_models(&self) -> ProbeResult<Vec<ModelDescriptor>>;

    /// Server version string, or [`UNKNOWN`].
    async fn version(&self) -> String;

    /// Shortened digest of `model`, or [`UNKNOWN`].
    async fn digest(&self, model: &str) -> String;

    /// Ask the server to release `model` immediately. Best effort.
    async fn unload(&self, model: &str);

    /// Force the server to load `model` with `context` tokens of capacity. Best effort.
    async fn preload(&self, model: &str, context: u32);

    /// Run one timed generation at `context`.
    ///
    /// # Errors
    /// Returns [`ProbeError::ServerStatus`] for non-success responses,
    /// [`ProbeError::Timeout`] when `timeout` elapses, and
    /// [`ProbeError::Transport`] or [`ProbeError::InvalidResponse`] otherwise.
    async fn measure(
        &self,
        model: &str,
        context: u32,
        num_predict: u32,
        timeout: Duration,
    ) -> ProbeResult<StepMetrics>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u32>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_ctx: u32,
    num_predict: u32,
    temperature: f32,
}

/// Subset of the generate response used for metrics. Durations are nanoseconds.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerateResponse {
    /// Wall-clock time of the whole request
    pub total_duration: u64,
    /// Generated tokens
    pub eval_count: u32,
    /// Time spent generating
    pub eval_duration: u64,
    /// Prompt tokens evaluated
    pub prompt_eval_count: u32,
    /// Time spent on the prompt
    pub prompt_eval_duration: u64,
}

impl GenerateResponse {
    /// Convert to step metrics, guarding against zero durations.
    #[must_use]
    pub fn to_metrics(&self) -> StepMetrics {
        StepMetrics {
            actual_context: self.prompt_eval_count,
            generated_tokens: self.eval_count,
            eval_tps: throughput(self.eval_count, self.eval_duration),
            prompt_tps: throughput(self.prompt_eval_count, self.prompt_eval_duration),
            total_duration_secs: nanos_to_secs(self.total_duration),
        }
    }
}

fn nanos_to_secs(nanos: u64) -> f64 {
    Duration::from_nanos(nanos).as_secs_f64()
}

/// Tokens per second; a zero duration counts as one second.
fn throughput(count: u32, duration_nanos: u64) -> f64 {
    let secs = nanos_to_secs(duration_nanos);
    let secs = if secs > 0.0 { secs } else { 1.0 };
    f64::from(count) / secs
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: Option<String>,
}

/// Synthetic prompt long enough to fill roughly `context` tokens, plus headroom.
#[must_use]
pub fn synthetic_prompt(context: u32) -> String {
    let target_tokens = u64::from(context) * PROMPT_OVERSIZE_TENTHS / 10;
    let chars_needed = usize::try_from(target_tokens * PROMPT_CHARS_PER_TOKEN_X2 / 2)
        .unwrap_or(usize::MAX);
    FILLER_LINE.chars().cycle().take(chars_needed).collect()
}

fn short_digest(digest: &str) -> String {
    digest.chars().take(DIGEST_LEN).collect()
}

/// Client for an Ollama-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    server_url: Url,
    api_base: Url,
    timings: ProbeTimings,
}

impl OllamaClient {
    /// Build a client for the server at `server_url`.
    ///
    /// # Errors
    /// Returns [`ProbeError::InvalidConfiguration`] if the URL cannot serve as an API base
    /// or the HTTP client cannot be constructed.
    pub fn new(server_url: Url, timings: ProbeTimings) -> ProbeResult<Self> {
        let mut base = server_url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let api_base = base
            .join("api/")
            .map_err(|err| ProbeError::invalid_config("server_url", err.to_string()))?;

        let client = Client::builder()
            .user_agent(concat!("ctxprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ProbeError::invalid_config("http_client", err.to_string()))?;

        Ok(Self {
            client,
            server_url,
            api_base,
            timings,
        })
    }

    fn endpoint(&self, path: &str) -> ProbeResult<Url> {
        self.api_base
            .join(path)
            .map_err(|err| ProbeError::invalid_config("server_url", err.to_string()))
    }

    async fn fetch_tags(&self) -> ProbeResult<Vec<TagEntry>> {
        let timeout = self.timings.lookup_timeout;
        let response = self
            .client
            .get(self.endpoint("tags")?)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| ProbeError::from_reqwest(&err, timeout.as_secs()))?;

        if !response.status().is_success() {
            return Err(ProbeError::ServerStatus {
                status: response.status().as_u16(),
            });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|err| ProbeError::from_reqwest(&err, timeout.as_secs()))?;
        Ok(tags.models)
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn list_models(&self) -> ProbeResult<Vec<ModelDescriptor>> {
        let tags = self
            .fetch_tags()
            .await
            .map_err(|err| ProbeError::connectivity(self.server_url.as_str(), err.to_string()))?;

        let mut models: Vec<ModelDescriptor> = tags
            .into_iter()
            .map(|entry| ModelDescriptor {
                digest: short_digest(&entry.digest),
                name: entry.name,
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        info!(count = models.len(), "models discovered");
        Ok(models)
    }

    async fn version(&self) -> String {
        let timeout = self.timings.lookup_timeout;
        let request = async {
            let response = self
                .client
                .get(self.endpoint("version")?)
                .timeout(timeout)
                .send()
                .await
                .map_err(|err| ProbeError::from_reqwest(&err, timeout.as_secs()))?;
            let body: VersionResponse = response
                .json()
                .await
                .map_err(|err| ProbeError::from_reqwest(&err, timeout.as_secs()))?;
            Ok::<_, ProbeError>(body.version)
        };

        match request.await {
            Ok(Some(version)) => version,
            Ok(None) => UNKNOWN.to_string(),
            Err(err) => {
                warn!(error = %err, "could not read server version");
                UNKNOWN.to_string()
            }
        }
    }

    async fn digest(&self, model: &str) -> String {
        let latest = format!("{model}:latest");
        match self.fetch_tags().await {
            Ok(tags) => tags
                .iter()
                .find(|entry| entry.name == model || entry.name == latest)
                .map_or_else(|| UNKNOWN.to_string(), |entry| short_digest(&entry.digest)),
            Err(err) => {
                warn!(model, error = %err, "could not look up model digest");
                UNKNOWN.to_string()
            }
        }
    }

    async fn unload(&self, model: &str) {
        let payload = GenerateRequest {
            model,
            prompt: None,
            stream: None,
            options: None,
            keep_alive: Some(0),
        };

        let result = match self.endpoint("generate") {
            Ok(url) => self
                .client
                .post(url)
                .json(&payload)
                .timeout(self.timings.unload_timeout)
                .send()
                .await
                .map(|_| ())
                .map_err(|err| ProbeError::from_reqwest(&err, self.timings.unload_timeout.as_secs())),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                debug!(model, "unload requested");
                tokio::time::sleep(self.timings.unload_settle).await;
            }
            Err(err) => debug!(model, error = %err, "unload failed, continuing"),
        }
    }

    async fn preload(&self, model: &str, context: u32) {
        let payload = GenerateRequest {
            model,
            prompt: Some(""),
            stream: Some(false),
            options: Some(GenerateOptions {
                num_ctx: context,
                num_predict: 1,
                temperature: 0.0,
            }),
            keep_alive: None,
        };

        let Ok(url) = self.endpoint("generate") else {
            return;
        };
        match self
            .client
            .post(url)
            .json(&payload)
            .timeout(self.timings.preload_timeout)
            .send()
            .await
        {
            Ok(response) => debug!(model, context, status = %response.status(), "preload finished"),
            Err(err) => debug!(model, context, error = %err, "preload failed, continuing"),
        }
    }

    async fn measure(
        &self,
        model: &str,
        context: u32,
        num_predict: u32,
        timeout: Duration,
    ) -> ProbeResult<StepMetrics> {
        let prompt = synthetic_prompt(context);
        let payload = GenerateRequest {
            model,
            prompt: Some(&prompt),
            stream: Some(false),
            options: Some(GenerateOptions {
                num_ctx: context,
                num_predict,
                temperature: MEASURE_TEMPERATURE,
            }),
            keep_alive: None,
        };

        debug!(model, context, prompt_chars = prompt.len(), "sending measurement request");
        let response = self
            .client
            .post(self.endpoint("generate")?)
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| ProbeError::from_reqwest(&err, timeout.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(model, context, status = status.as_u16(), "server rejected measurement");
            return Err(ProbeError::ServerStatus {
                status: status.as_u16(),
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|err| ProbeError::from_reqwest(&err, timeout.as_secs()))?;
        Ok(body.to_metrics())
    }
}
