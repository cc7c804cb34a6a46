use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::chat::ChatDialect;
use crate::models::provider::SamplingParams;

// OpenAI-style chat completion wire format, spoken by most free-tier vendors.
#[derive(Debug, Serialize)]
pub(crate) struct OpenAIRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAIMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

pub(crate) fn openai_request<'a>(model: &'a str, prompt: &'a str, sampling: &SamplingParams) -> OpenAIRequest<'a> {
    OpenAIRequest {
        model,
        messages: vec![OpenAIMessage {
            role: "user",
            content: prompt,
        }],
        temperature: Some(sampling.temperature),
        max_tokens: Some(sampling.max_tokens),
        stream: false,
    }
}

pub fn openai_body(model: &str, prompt: &str, sampling: &SamplingParams) -> Value {
    serde_json::to_value(openai_request(model, prompt, sampling)).unwrap_or(Value::Null)
}

/// Unwraps `{choices: [{message: {content}}]}`.
pub fn openai_text(body: Value) -> Result<String, String> {
    let response: OpenAIResponse =
        serde_json::from_value(body).map_err(|e| format!("not a chat completion: {}", e))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| "No choices in response".to_string())?;

    choice
        .message
        .content
        .ok_or_else(|| "Choice message has no content".to_string())
}

/// Dialect for any endpoint that follows the OpenAI chat completion contract as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAICompatChat;

impl ChatDialect for OpenAICompatChat {
    fn build_body(&self, model: &str, prompt: &str, sampling: &SamplingParams) -> Value {
        openai_body(model, prompt, sampling)
    }

    fn parse_response(&self, body: Value) -> Result<String, String> {
        openai_text(body)
    }
}
