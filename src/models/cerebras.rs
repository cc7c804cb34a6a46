use serde::Serialize;
use serde_json::Value;

use crate::models::chat::{ChatDialect, ChatProvider};
use crate::models::openai_compat::{openai_request, openai_text, OpenAIMessage};
use crate::models::provider::{SamplingParams, VendorDefaults};

pub const DEFAULTS: VendorDefaults = VendorDefaults {
    name: "cerebras",
    base_url: "https://api.cerebras.ai/v1",
    model: "llama-3.3-70b",
    requests_per_minute: 25,
    api_key_env: "CEREBRAS_API_KEY",
};

/// OpenAI-compatible, but the output budget is `max_completion_tokens`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CerebrasChat;

pub type CerebrasProvider = ChatProvider<CerebrasChat>;

#[derive(Debug, Serialize)]
struct CerebrasRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f32,
    max_completion_tokens: u32,
    stream: bool,
}

impl ChatDialect for CerebrasChat {
    fn build_body(&self, model: &str, prompt: &str, sampling: &SamplingParams) -> Value {
        let base = openai_request(model, prompt, sampling);
        let request = CerebrasRequest {
            model: base.model,
            messages: base.messages,
            temperature: sampling.temperature,
            max_completion_tokens: sampling.max_tokens,
            stream: false,
        };
        serde_json::to_value(request).unwrap_or(Value::Null)
    }

    fn parse_response(&self, body: Value) -> Result<String, String> {
        openai_text(body)
    }
}
