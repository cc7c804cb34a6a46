use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::provider::{CooldownPolicy, SamplingParams};
use crate::models::registry::Vendor;

pub const ENV_PREFIX: &str = "AIROTATOR";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub providers: ProvidersConfig,
    #[validate(nested)]
    pub rotation: RotationConfig,
    #[validate(nested)]
    pub cooldown: CooldownConfig,
    #[validate(nested)]
    pub sampling: SamplingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProvidersConfig {
    #[validate(nested)]
    pub groq: VendorConfig,
    #[validate(nested)]
    pub cerebras: VendorConfig,
    #[validate(nested)]
    pub gemini: VendorConfig,
    #[validate(nested)]
    pub openrouter: VendorConfig,
    #[validate(nested)]
    pub mistral: VendorConfig,
    #[validate(nested)]
    pub cohere: VendorConfig,
}

#[derive(Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VendorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub requests_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RotationConfig {
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
    #[validate(range(min = 1))]
    pub max_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CooldownConfig {
    #[validate(range(min = 1))]
    pub rate_limit_secs: u64,
    #[validate(range(min = 1))]
    pub server_error_secs: u64,
    pub honor_retry_after: bool,
    #[validate(range(min = 1))]
    pub max_retry_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SamplingConfig {
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: f32,
    #[validate(range(min = 1))]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// File name for a daily-rolling log under the logs directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 60,
            server_error_secs: 30,
            honor_retry_after: true,
            max_retry_after_secs: 300,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        let params = SamplingParams::default();
        Self {
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl fmt::Debug for VendorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

impl VendorConfig {
    pub fn has_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

impl ProvidersConfig {
    pub fn get(&self, vendor: Vendor) -> &VendorConfig {
        match vendor {
            Vendor::Groq => &self.groq,
            Vendor::Cerebras => &self.cerebras,
            Vendor::Gemini => &self.gemini,
            Vendor::OpenRouter => &self.openrouter,
            Vendor::Mistral => &self.mistral,
            Vendor::Cohere => &self.cohere,
        }
    }

    pub fn get_mut(&mut self, vendor: Vendor) -> &mut VendorConfig {
        match vendor {
            Vendor::Groq => &mut self.groq,
            Vendor::Cerebras => &mut self.cerebras,
            Vendor::Gemini => &mut self.gemini,
            Vendor::OpenRouter => &mut self.openrouter,
            Vendor::Mistral => &mut self.mistral,
            Vendor::Cohere => &mut self.cohere,
        }
    }
}

impl CooldownConfig {
    pub fn to_policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            rate_limited: Duration::from_secs(self.rate_limit_secs),
            server_error: Duration::from_secs(self.server_error_secs),
            honor_retry_after: self.honor_retry_after,
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
        }
    }
}

impl SamplingConfig {
    pub fn to_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl AppConfig {
    /// Layers the optional file, `AIROTATOR__*` overrides and the
    /// conventional `<VENDOR>_API_KEY` variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from: {:?}", path);
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;
        config.apply_env_keys_from(|name| std::env::var(name).ok());
        config.validate()?;

        debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Fills missing credentials from `lookup`, keyed by the vendor's
    /// conventional variable name.
    pub fn apply_env_keys_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for vendor in Vendor::ALL {
            let entry = self.providers.get_mut(vendor);
            if entry.has_key() {
                continue;
            }
            if let Some(key) = lookup(vendor.defaults().api_key_env).filter(|key| !key.trim().is_empty()) {
                debug!("Using {} for {}", vendor.defaults().api_key_env, vendor.name());
                entry.api_key = Some(key);
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        info!("Saving configuration to: {:?}", path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;

        info!("Configuration saved successfully");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;
        if self.logging.level.trim().is_empty() {
            return Err(Error::validation("Logging level must not be empty"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.rotation.timeout_secs)
    }

    pub fn configured_vendors(&self) -> Vec<Vendor> {
        Vendor::ALL
            .into_iter()
            .filter(|vendor| self.providers.get(*vendor).has_key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rotation.timeout_secs, 30);
        assert_eq!(config.rotation.max_retries, 3);
        assert_eq!(config.cooldown.rate_limit_secs, 60);
        assert_eq!(config.logging.level, "info");
        assert!(config.configured_vendors().is_empty());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.rotation.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sampling.temperature = 2.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.providers.mistral.requests_per_minute = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rotation.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_keys_fill_only_missing() {
        let mut config = AppConfig::default();
        config.providers.groq.api_key = Some("from-file".to_string());

        let env: HashMap<&str, &str> = [
            ("GROQ_API_KEY", "from-env"),
            ("GEMINI_API_KEY", "AIza-env"),
            ("COHERE_API_KEY", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env_keys_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.providers.groq.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.providers.gemini.api_key.as_deref(), Some("AIza-env"));
        assert!(config.providers.cohere.api_key.is_none());
        assert_eq!(config.configured_vendors(), vec![Vendor::Groq, Vendor::Gemini]);
    }

    #[test]
    fn test_policy_conversion() {
        let mut config = AppConfig::default();
        config.cooldown.rate_limit_secs = 90;
        config.cooldown.honor_retry_after = false;

        let policy = config.cooldown.to_policy();
        assert_eq!(policy.rate_limited, Duration::from_secs(90));
        assert_eq!(policy.server_error, Duration::from_secs(30));
        assert!(!policy.honor_retry_after);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let mut config = AppConfig::default();
        config.providers.openrouter.api_key = Some("sk-or-secret".to_string());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-or-secret"));
        assert!(rendered.contains("***"));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.rotation.max_retries = 5;
        config.providers.cerebras.model = Some("llama3.1-8b".to_string());
        config.providers.cerebras.requests_per_minute = Some(10);
        config.save(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[rotation]"));
        assert!(content.contains("max_retries = 5"));

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.rotation.max_retries, 5);
        assert_eq!(loaded.providers.cerebras.model.as_deref(), Some("llama3.1-8b"));
        assert_eq!(loaded.providers.cerebras.requests_per_minute, Some(10));
        assert_eq!(loaded.cooldown.server_error_secs, 30);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sampling]\ntemperature = 0.2\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert!((config.sampling.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.sampling.max_tokens, 1024);
        assert_eq!(config.rotation.timeout_secs, 30);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[rotation]\nmax_retries = 0\n").unwrap();

        assert!(AppConfig::load(Some(&path)).is_err());
    }
}
