use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use crate::error::{ProviderError, Result};
use crate::models::chat::{parse_retry_after, ProviderCore};
use crate::models::provider::{CooldownPolicy, LlmProvider, ProviderSpec, SamplingParams, VendorDefaults};
use crate::models::stats::ProviderStats;

// Free tier allows 15 RPM on flash models.
pub const DEFAULTS: VendorDefaults = VendorDefaults {
    name: "gemini",
    base_url: "https://generativelanguage.googleapis.com/v1beta",
    model: "gemini-2.0-flash",
    requests_per_minute: 12,
    api_key_env: "GEMINI_API_KEY",
};

/// Native `generateContent` client. The key travels as a `?key=` query
/// parameter, so the shared bearer-header call path does not apply.
pub struct GeminiProvider {
    core: ProviderCore,
}

impl GeminiProvider {
    pub fn new(spec: ProviderSpec, cooldowns: CooldownPolicy, sampling: SamplingParams) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::new(spec, cooldowns, sampling)?,
        })
    }

    fn request_url(&self, api_key: &str) -> std::result::Result<Url, String> {
        let spec = self.core.spec();
        let raw = format!(
            "{}/models/{}:generateContent",
            spec.base_url.trim_end_matches('/'),
            spec.model
        );
        let mut url = Url::parse(&raw).map_err(|e| format!("Invalid Gemini endpoint: {}", e))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    fn build_request<'a>(&self, prompt: &'a str) -> GeminiRequest<'a> {
        let sampling = self.core.sampling();
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: sampling.temperature,
                max_output_tokens: sampling.max_tokens,
            },
        }
    }
}

/// Concatenates `candidates[0].content.parts[*].text`.
fn extract_text(response: GeminiResponse) -> std::result::Result<String, String> {
    let candidate = match response.candidates.into_iter().next() {
        Some(candidate) => candidate,
        None => {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!("Prompt blocked: {}", r))
                .unwrap_or_else(|| "No candidates in response".to_string());
            return Err(reason);
        }
    };

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
        return Err(format!("Candidate has no text (finishReason={})", reason));
    }

    Ok(text)
}

/// Reads `RetryInfo.retryDelay` (e.g. `"37s"`) out of a Google RPC error body.
fn retry_delay_from_error(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/details")?
        .as_array()?
        .iter()
        .filter_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
        .find_map(|delay| {
            delay
                .trim()
                .trim_end_matches('s')
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
        })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
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

        let url = self
            .request_url(api_key)
            .map_err(|e| self.core.fail(ProviderError::failure(self.name(), e), None))?;
        let request_body = self.build_request(prompt);

        debug!("Sending request to Gemini: model={}, prompt_chars={}", self.model(), prompt.len());

        let response = self
            .core
            .client()
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&request_body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.core.transport_failure(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let header_hint = parse_retry_after(response.headers());
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            let retry_after = header_hint.or_else(|| retry_delay_from_error(&error_text));
            return Err(self.core.status_failure(status, retry_after, &error_text));
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.core.transport_failure(e, timeout))?;

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            self.core.fail(
                ProviderError::failure(self.name(), format!("Failed to parse response: {}", e)),
                None,
            )
        })?;

        match extract_text(gemini_response) {
            Ok(text) if !text.trim().is_empty() => self.core.succeed(text, start_time.elapsed()),
            Ok(_) => Err(self.core.fail(ProviderError::failure(self.name(), "Response contained empty text"), None)),
            Err(reason) => Err(self.core.fail(
                ProviderError::failure(self.name(), format!("Unexpected response shape: {}", reason)),
                None,
            )),
        }
    }
}

impl fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("spec", self.core.spec())
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}
