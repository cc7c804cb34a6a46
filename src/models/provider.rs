use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ProviderError;
use crate::models::stats::{ProviderStats, StatsSnapshot};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn rpm_limit(&self) -> u32;
    fn is_enabled(&self) -> bool;
    fn stats(&self) -> &ProviderStats;

    /// Performs exactly one HTTP call against the vendor.
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError>;

    fn status(&self) -> ProviderStatus {
        ProviderStatus::derive(self.is_enabled(), self.stats(), self.rpm_limit())
    }

    fn is_available(&self) -> bool {
        self.status() == ProviderStatus::Available
    }

    fn set_cooldown(&self, duration: Duration) {
        self.stats().set_cooldown(duration);
    }

    fn report(&self) -> ProviderStatusReport {
        let stats = self.stats().snapshot();
        let status = self.status();
        ProviderStatusReport {
            name: self.name().to_string(),
            model: self.model().to_string(),
            status,
            available: status == ProviderStatus::Available,
            calls_made: stats.calls_made,
            calls_succeeded: stats.calls_succeeded,
            calls_failed: stats.calls_failed,
            success_rate: stats.success_rate,
            calls_last_minute: stats.calls_last_minute,
            rpm_limit: self.rpm_limit(),
            last_error: stats.last_error.clone(),
            stats,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Disabled,
    RateLimited,
    Available,
}

impl ProviderStatus {
    pub fn derive(enabled: bool, stats: &ProviderStats, rpm_limit: u32) -> Self {
        if !enabled {
            ProviderStatus::Disabled
        } else if stats.is_on_cooldown() || stats.calls_in_last_minute() >= rpm_limit as usize {
            ProviderStatus::RateLimited
        } else {
            ProviderStatus::Available
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Disabled => "DISABLED",
            ProviderStatus::RateLimited => "RATE_LIMITED",
            ProviderStatus::Available => "AVAILABLE",
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and endpoint of one configured provider.
#[derive(Clone)]
pub struct ProviderSpec {
    pub name: String,
    pub api_key: Option<String>,
    pub model: String,
    pub requests_per_minute: u32,
    pub base_url: String,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, api_key: Option<String>, model: impl Into<String>, requests_per_minute: u32, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
            requests_per_minute,
            base_url: base_url.into(),
        }
    }

    pub fn from_defaults(defaults: &VendorDefaults, api_key: Option<String>) -> Self {
        Self::new(defaults.name, api_key, defaults.model, defaults.requests_per_minute, defaults.base_url)
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("name", &self.name)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Built-in endpoint, model and self-imposed RPM ceiling of a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorDefaults {
    pub name: &'static str,
    pub base_url: &'static str,
    pub model: &'static str,
    pub requests_per_minute: u32,
    pub api_key_env: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Self-imposed cooldowns applied after classified failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownPolicy {
    pub rate_limited: Duration,
    pub server_error: Duration,
    pub honor_retry_after: bool,
    pub max_retry_after: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            rate_limited: Duration::from_secs(60),
            server_error: Duration::from_secs(30),
            honor_retry_after: true,
            max_retry_after: Duration::from_secs(300),
        }
    }
}

impl CooldownPolicy {
    /// Hints are capped at `max_retry_after` and never go below the
    /// server-error cooldown.
    pub fn for_rate_limit(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) if self.honor_retry_after && !hint.is_zero() => {
                hint.min(self.max_retry_after).max(self.server_error)
            }
            _ => self.rate_limited,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatusReport {
    pub name: String,
    pub model: String,
    pub status: ProviderStatus,
    pub available: bool,
    pub calls_made: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub success_rate: f64,
    pub calls_last_minute: usize,
    pub rpm_limit: u32,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub stats: StatsSnapshot,
}
