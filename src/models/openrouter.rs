use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::models::chat::{bearer_headers, ChatDialect, ChatProvider};
use crate::models::openai_compat::{openai_body, openai_text};
use crate::models::provider::{SamplingParams, VendorDefaults};

// ":free" models are capped at 20 RPM.
pub const DEFAULTS: VendorDefaults = VendorDefaults {
    name: "openrouter",
    base_url: "https://openrouter.ai/api/v1",
    model: "meta-llama/llama-3.3-70b-instruct:free",
    requests_per_minute: 15,
    api_key_env: "OPENROUTER_API_KEY",
};

const APP_REFERER: &str = "https://github.com/airotator/airotator";
const APP_TITLE: &str = "airotator";

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRouterChat;

pub type OpenRouterProvider = ChatProvider<OpenRouterChat>;

impl ChatDialect for OpenRouterChat {
    fn headers(&self, api_key: &str) -> Result<HeaderMap, String> {
        let mut headers = bearer_headers(api_key)?;
        headers.insert("HTTP-Referer", HeaderValue::from_static(APP_REFERER));
        headers.insert("X-Title", HeaderValue::from_static(APP_TITLE));
        Ok(headers)
    }

    fn build_body(&self, model: &str, prompt: &str, sampling: &SamplingParams) -> Value {
        openai_body(model, prompt, sampling)
    }

    fn parse_response(&self, body: Value) -> Result<String, String> {
        // Upstream failures can arrive as HTTP 200 with an error envelope.
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown upstream error");
            return Err(format!("upstream error: {}", message));
        }
        openai_text(body)
    }
}
