use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, ProviderError, Result};
use crate::models::provider::{CooldownPolicy, LlmProvider, ProviderSpec, SamplingParams};
use crate::models::stats::ProviderStats;

/// Vendor-specific pieces plugged into the shared [`ChatProvider`] call path.
pub trait ChatDialect: Send + Sync {
    fn endpoint(&self, base_url: &str) -> String {
        join_url(base_url, "chat/completions")
    }

    fn headers(&self, api_key: &str) -> std::result::Result<HeaderMap, String> {
        bearer_headers(api_key)
    }

    fn build_body(&self, model: &str, prompt: &str, sampling: &SamplingParams) -> Value;

    /// Extracts the generated text; an `Err` describes what was missing.
    fn parse_response(&self, body: Value) -> std::result::Result<String, String>;
}

pub fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub fn bearer_headers(api_key: &str) -> std::result::Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();

    let auth_value = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|e| format!("Invalid API key format: {}", e))?;
    headers.insert(AUTHORIZATION, auth_value);

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}

/// Reads a `Retry-After` header given in (possibly fractional) seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers
        .get(RETRY_AFTER)
        .or_else(|| headers.get("x-ratelimit-reset-after"))
        .and_then(|v| v.to_str().ok())?;

    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

pub fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    if body.chars().count() <= LIMIT {
        return body.to_string();
    }
    let head: String = body.chars().take(LIMIT).collect();
    format!("{}...", head)
}

/// Identity, HTTP client, stats and failure bookkeeping shared by every provider.
pub struct ProviderCore {
    spec: ProviderSpec,
    client: Client,
    stats: ProviderStats,
    cooldowns: CooldownPolicy,
    sampling: SamplingParams,
}

impl ProviderCore {
    pub fn new(spec: ProviderSpec, cooldowns: CooldownPolicy, sampling: SamplingParams) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(Error::Http)?;

        info!(
            "Created provider '{}' (model={}, rpm={}, enabled={})",
            spec.name,
            spec.model,
            spec.requests_per_minute,
            spec.is_enabled()
        );

        Ok(Self {
            spec,
            client,
            stats: ProviderStats::new(),
            cooldowns,
            sampling,
        })
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    pub fn cooldowns(&self) -> &CooldownPolicy {
        &self.cooldowns
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn api_key(&self) -> std::result::Result<&str, ProviderError> {
        self.spec
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::not_enabled(self.name()))
    }

    pub fn succeed(&self, text: String, elapsed: Duration) -> std::result::Result<String, ProviderError> {
        self.stats.record_call(true, None);
        debug!("{} generated {} chars in {:?}", self.name(), text.len(), elapsed);
        Ok(text)
    }

    /// Records a failed call and applies `cooldown`, if any.
    pub fn fail(&self, error: ProviderError, cooldown: Option<Duration>) -> ProviderError {
        self.stats.record_call(false, Some(&error.message));
        if let Some(duration) = cooldown {
            self.stats.set_cooldown(duration);
            warn!("{} failed ({}), cooling down for {:?}: {}", self.name(), error.kind, duration, error.message);
        } else {
            warn!("{} failed ({}): {}", self.name(), error.kind, error.message);
        }
        error
    }

    pub fn transport_failure(&self, error: reqwest::Error, timeout: Duration) -> ProviderError {
        // URLs may carry credentials (query-string auth), never echo them.
        let error = error.without_url();
        if error.is_timeout() {
            self.fail(
                ProviderError::timeout(self.name(), format!("No response within {:?}", timeout)),
                None,
            )
        } else {
            self.fail(
                ProviderError::failure(self.name(), format!("HTTP request failed: {}", error)),
                None,
            )
        }
    }

    /// Classifies a non-success HTTP status and records it.
    pub fn status_failure(&self, status: StatusCode, retry_after: Option<Duration>, body: &str) -> ProviderError {
        let detail = truncate_body(body);
        if status == StatusCode::TOO_MANY_REQUESTS {
            let cooldown = self.cooldowns.for_rate_limit(retry_after);
            self.fail(
                ProviderError::rate_limited(self.name(), format!("Rate limited (HTTP {}): {}", status.as_u16(), detail), retry_after),
                Some(cooldown),
            )
        } else if status.is_server_error() {
            self.fail(
                ProviderError::failure(self.name(), format!("Server error {}: {}", status, detail)),
                Some(self.cooldowns.server_error),
            )
        } else {
            self.fail(
                ProviderError::failure(self.name(), format!("API error {}: {}", status, detail)),
                None,
            )
        }
    }

    /// Sends a prepared request and decodes the JSON body, classifying every failure.
    pub async fn send_json(&self, request: RequestBuilder, timeout: Duration) -> std::result::Result<Value, ProviderError> {
        let start_time = Instant::now();

        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_failure(e, timeout))?;

        let status = response.status();
        debug!("{} responded {} in {:?}", self.name(), status, start_time.elapsed());

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let retry_after = retry_after.or_else(|| retry_after_from_body(&body));
            return Err(self.status_failure(status, retry_after, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_failure(e, timeout))?;

        serde_json::from_str(&body).map_err(|e| {
            self.fail(
                ProviderError::failure(self.name(), format!("Failed to parse response: {}", e)),
                None,
            )
        })
    }
}

fn retry_after_from_body(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .or_else(|| {
            value
                .get("retry_after")
                .and_then(Value::as_f64)
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
        })
}

/// Provider built on the shared bearer-header call path.
pub struct ChatProvider<D> {
    core: ProviderCore,
    dialect: D,
}

impl<D: ChatDialect> ChatProvider<D> {
    pub fn new(spec: ProviderSpec, dialect: D, cooldowns: CooldownPolicy, sampling: SamplingParams) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::new(spec, cooldowns, sampling)?,
            dialect,
        })
    }

    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    pub fn endpoint(&self) -> String {
        self.dialect.endpoint(&self.core.spec().base_url)
    }
}

#[async_trait]
impl<D: ChatDialect> LlmProvider for ChatProvider<D> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn model(&self) -> &str {
        &self.core.spec().model
    }

    fn rpm_limit(&self) -> u32 {
        self.core.spec().requests_per_minute
    }

    fn is_enabled(&self) -> bool {
        self.core.spec().is_enabled()
    }

    fn stats(&self) -> &ProviderStats {
        self.core.stats()
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> std::result::Result<String, ProviderError> {
        let api_key = self.core.api_key()?;
        let start_time = Instant::now();

        let headers = self
            .dialect
            .headers(api_key)
            .map_err(|e| self.core.fail(ProviderError::failure(self.name(), e), None))?;
        let body = self.dialect.build_body(self.model(), prompt, self.core.sampling());

        debug!("Sending request to {}: model={}, prompt_chars={}", self.name(), self.model(), prompt.len());

        let request = self.core.client().post(self.endpoint()).headers(headers).json(&body);
        let response = self.core.send_json(request, timeout).await?;

        match self.dialect.parse_response(response) {
            Ok(text) if !text.trim().is_empty() => self.core.succeed(text, start_time.elapsed()),
            Ok(_) => Err(self.core.fail(ProviderError::failure(self.name(), "Response contained empty text"), None)),
            Err(reason) => Err(self.core.fail(
                ProviderError::failure(self.name(), format!("Unexpected response shape: {}", reason)),
                None,
            )),
        }
    }
}

impl<D> fmt::Debug for ChatProvider<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatProvider")
            .field("spec", self.core.spec())
            .finish()
    }
}
