use serde::Deserialize;
use serde_json::Value;

use crate::models::chat::{join_url, ChatDialect, ChatProvider};
use crate::models::openai_compat::openai_request;
use crate::models::provider::{SamplingParams, VendorDefaults};

// Trial keys allow 20 chat calls per minute.
pub const DEFAULTS: VendorDefaults = VendorDefaults {
    name: "cohere",
    base_url: "https://api.cohere.com/v2",
    model: "command-r-plus-08-2024",
    requests_per_minute: 15,
    api_key_env: "COHERE_API_KEY",
};

#[derive(Debug, Clone, Copy, Default)]
pub struct CohereChat;

pub type CohereProvider = ChatProvider<CohereChat>;

#[derive(Debug, Deserialize)]
struct CohereResponse {
    message: Option<CohereMessage>,
}

#[derive(Debug, Deserialize)]
struct CohereMessage {
    #[serde(default)]
    content: Vec<CohereContent>,
}

#[derive(Debug, Deserialize)]
struct CohereContent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl ChatDialect for CohereChat {
    fn endpoint(&self, base_url: &str) -> String {
        join_url(base_url, "chat")
    }

    fn build_body(&self, model: &str, prompt: &str, sampling: &SamplingParams) -> Value {
        // v2 chat takes the same messages array, minus the `stream: false` noise.
        let mut body = serde_json::to_value(openai_request(model, prompt, sampling)).unwrap_or(Value::Null);
        if let Some(object) = body.as_object_mut() {
            object.remove("stream");
        }
        body
    }

    /// Unwraps `{message: {content: [{type: "text", text}]}}`.
    fn parse_response(&self, body: Value) -> Result<String, String> {
        let response: CohereResponse =
            serde_json::from_value(body).map_err(|e| format!("not a chat response: {}", e))?;

        let message = response
            .message
            .ok_or_else(|| "Response has no message".to_string())?;

        let text = message
            .content
            .into_iter()
            .filter(|part| part.kind.as_deref().map_or(true, |kind| kind == "text"))
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            Err("Message has no text content".to_string())
        } else {
            Ok(text)
        }
    }
}
