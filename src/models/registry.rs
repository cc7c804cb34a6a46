use std::sync::Arc;
use tracing::{debug, info};

use crate::app::config::{AppConfig, VendorConfig};
use crate::error::Result;
use crate::models::cerebras::{self, CerebrasChat};
use crate::models::chat::ChatProvider;
use crate::models::cohere::{self, CohereChat};
use crate::models::gemini::{self, GeminiProvider};
use crate::models::groq;
use crate::models::mistral::{self, MistralChat};
use crate::models::openai_compat::OpenAICompatChat;
use crate::models::openrouter::{self, OpenRouterChat};
use crate::models::provider::{CooldownPolicy, LlmProvider, ProviderSpec, SamplingParams, VendorDefaults};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Groq,
    Cerebras,
    Gemini,
    OpenRouter,
    Mistral,
    Cohere,
}

impl Vendor {
    /// Rotation order.
    pub const ALL: [Vendor; 6] = [
        Vendor::Groq,
        Vendor::Cerebras,
        Vendor::Gemini,
        Vendor::OpenRouter,
        Vendor::Mistral,
        Vendor::Cohere,
    ];

    pub fn defaults(&self) -> &'static VendorDefaults {
        match self {
            Vendor::Groq => &groq::DEFAULTS,
            Vendor::Cerebras => &cerebras::DEFAULTS,
            Vendor::Gemini => &gemini::DEFAULTS,
            Vendor::OpenRouter => &openrouter::DEFAULTS,
            Vendor::Mistral => &mistral::DEFAULTS,
            Vendor::Cohere => &cohere::DEFAULTS,
        }
    }

    pub fn name(&self) -> &'static str {
        self.defaults().name
    }

    pub fn from_name(name: &str) -> Option<Vendor> {
        Vendor::ALL.into_iter().find(|vendor| vendor.name().eq_ignore_ascii_case(name))
    }

    pub fn spec(&self, config: &VendorConfig) -> ProviderSpec {
        let defaults = self.defaults();
        ProviderSpec::new(
            defaults.name,
            config.api_key.clone(),
            config.model.clone().unwrap_or_else(|| defaults.model.to_string()),
            config.requests_per_minute.unwrap_or(defaults.requests_per_minute),
            config.base_url.clone().unwrap_or_else(|| defaults.base_url.to_string()),
        )
    }

    pub fn build(&self, spec: ProviderSpec, cooldowns: CooldownPolicy, sampling: SamplingParams) -> Result<Arc<dyn LlmProvider>> {
        let provider: Arc<dyn LlmProvider> = match self {
            Vendor::Groq => Arc::new(ChatProvider::new(spec, OpenAICompatChat, cooldowns, sampling)?),
            Vendor::Cerebras => Arc::new(ChatProvider::new(spec, CerebrasChat, cooldowns, sampling)?),
            Vendor::Gemini => Arc::new(GeminiProvider::new(spec, cooldowns, sampling)?),
            Vendor::OpenRouter => Arc::new(ChatProvider::new(spec, OpenRouterChat, cooldowns, sampling)?),
            Vendor::Mistral => Arc::new(ChatProvider::new(spec, MistralChat, cooldowns, sampling)?),
            Vendor::Cohere => Arc::new(ChatProvider::new(spec, CohereChat, cooldowns, sampling)?),
        };
        Ok(provider)
    }
}

/// Instantiates every vendor that has a credential, in rotation order.
pub fn build_providers(config: &AppConfig) -> Result<Vec<Arc<dyn LlmProvider>>> {
    let cooldowns = config.cooldown.to_policy();
    let sampling = config.sampling.to_params();

    let mut providers = Vec::new();
    for vendor in Vendor::ALL {
        let spec = vendor.spec(config.providers.get(vendor));
        if !spec.is_enabled() {
            debug!("Skipping {}: no API key configured", vendor.name());
            continue;
        }
        providers.push(vendor.build(spec, cooldowns, sampling)?);
    }

    info!("Configured {} of {} AI providers", providers.len(), Vendor::ALL.len());
    Ok(providers)
}
