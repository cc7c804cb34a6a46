use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl Error {
    pub fn platform(msg: impl Into<String>) -> Self {
        Error::Platform(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::Validation(errors.to_string())
    }
}

/// Name reported on failures that no single provider can be blamed for.
pub const ROTATOR_SOURCE: &str = "rotator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// No credential configured; the network was never touched.
    NotEnabled,
    RateLimited,
    Timeout,
    /// Malformed response, unexpected HTTP status or transport error.
    Failure,
    /// Every attempt failed, or nothing could be attempted at all.
    Exhausted,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderErrorKind::NotEnabled => "not enabled",
            ProviderErrorKind::RateLimited => "rate limited",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Failure => "failure",
            ProviderErrorKind::Exhausted => "exhausted",
        };
        f.write_str(label)
    }
}

/// Failure surfaced by a provider or by the rotator.
///
/// `rate_limited` and `timeout` describe the terminal failure. For a
/// rotator-level `Exhausted` error they are copied from the last attempt.
#[derive(Error, Debug, Clone)]
#[error("[{provider}] {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub rate_limited: bool,
    pub timeout: bool,
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
            rate_limited: kind == ProviderErrorKind::RateLimited,
            timeout: kind == ProviderErrorKind::Timeout,
            retry_after: None,
        }
    }

    pub fn not_enabled(provider: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = format!("{} provider is not enabled (no API key configured)", provider);
        Self::new(provider, ProviderErrorKind::NotEnabled, message)
    }

    pub fn rate_limited(provider: impl Into<String>, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let mut error = Self::new(provider, ProviderErrorKind::RateLimited, message);
        error.retry_after = retry_after;
        error
    }

    pub fn timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Timeout, message)
    }

    pub fn failure(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Failure, message)
    }

    pub fn exhausted(message: impl Into<String>, last: Option<&ProviderError>) -> Self {
        let mut error = Self::new(ROTATOR_SOURCE, ProviderErrorKind::Exhausted, message);
        if let Some(last) = last {
            error.rate_limited = last.rate_limited;
            error.timeout = last.timeout;
            error.retry_after = last.retry_after;
        }
        error
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout
    }
}
