pub mod app;
pub mod cli;
pub mod error;
pub mod models;
pub mod platform;

pub use error::{Error, ProviderError, Result};
pub use models::{LlmProvider, ProviderRotator};
