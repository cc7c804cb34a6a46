use serde::Deserialize;
use serde_json::Value;

use crate::models::chat::{ChatDialect, ChatProvider};
use crate::models::openai_compat::openai_body;
use crate::models::provider::{SamplingParams, VendorDefaults};

pub const DEFAULTS: VendorDefaults = VendorDefaults {
    name: "mistral",
    base_url: "https://api.mistral.ai/v1",
    model: "mistral-small-latest",
    requests_per_minute: 50,
    api_key_env: "MISTRAL_API_KEY",
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MistralChat;

pub type MistralProvider = ChatProvider<MistralChat>;

#[derive(Debug, Deserialize)]
struct MistralResponse {
    #[serde(default)]
    choices: Vec<MistralChoice>,
}

#[derive(Debug, Deserialize)]
struct MistralChoice {
    message: MistralMessage,
}

#[derive(Debug, Deserialize)]
struct MistralMessage {
    content: Option<MistralContent>,
}

// Reasoning models answer with typed chunks instead of a plain string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MistralContent {
    Text(String),
    Chunks(Vec<MistralChunk>),
}

#[derive(Debug, Deserialize)]
struct MistralChunk {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ChatDialect for MistralChat {
    fn build_body(&self, model: &str, prompt: &str, sampling: &SamplingParams) -> Value {
        openai_body(model, prompt, sampling)
    }

    fn parse_response(&self, body: Value) -> Result<String, String> {
        let response: MistralResponse =
            serde_json::from_value(body).map_err(|e| format!("not a chat completion: {}", e))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "No choices in response".to_string())?
            .message
            .content
            .ok_or_else(|| "Choice message has no content".to_string())?;

        match content {
            MistralContent::Text(text) => Ok(text),
            MistralContent::Chunks(chunks) => {
                let text = chunks
                    .into_iter()
                    .filter(|chunk| chunk.kind == "text")
                    .filter_map(|chunk| chunk.text)
                    .collect::<Vec<_>>()
                    .join("");
                if text.is_empty() {
                    Err("No text chunks in message content".to_string())
                } else {
                    Ok(text)
                }
            }
        }
    }
}
