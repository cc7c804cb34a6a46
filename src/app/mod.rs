pub mod config;

pub use config::{AppConfig, CooldownConfig, LoggingConfig, ProvidersConfig, RotationConfig, SamplingConfig, VendorConfig};
