pub mod stats;
pub mod provider;
pub mod chat;
pub mod openai_compat;
pub mod groq;
pub mod cerebras;
pub mod gemini;
pub mod openrouter;
pub mod mistral;
pub mod cohere;
pub mod registry;
pub mod rotator;

pub use chat::{ChatDialect, ChatProvider, ProviderCore};
pub use gemini::GeminiProvider;
pub use provider::{
    CooldownPolicy, LlmProvider, ProviderSpec, ProviderStatus, ProviderStatusReport,
    SamplingParams, VendorDefaults,
};
pub use registry::{build_providers, Vendor};
pub use rotator::{ProviderRotator, RotationDefaults, RotatorSummary};
pub use stats::{ProviderStats, StatsSnapshot};
