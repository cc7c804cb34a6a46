use crate::models::chat::ChatProvider;
use crate::models::openai_compat::OpenAICompatChat;
use crate::models::provider::VendorDefaults;

// Free tier allows 30 RPM on most models.
pub const DEFAULTS: VendorDefaults = VendorDefaults {
    name: "groq",
    base_url: "https://api.groq.com/openai/v1",
    model: "llama-3.3-70b-versatile",
    requests_per_minute: 25,
    api_key_env: "GROQ_API_KEY",
};

// Groq speaks the OpenAI chat completion contract unchanged.
pub type GroqProvider = ChatProvider<OpenAICompatChat>;
