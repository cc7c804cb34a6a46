use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::app::AppConfig;
use crate::error::{Error, Result};
use crate::models::{ProviderRotator, ProviderStatusReport, RotatorSummary, Vendor};

#[derive(Parser)]
#[command(name = "airotator")]
#[command(about = "Rotates prompts across free-tier LLM providers with fallback and cooldowns")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a prompt through the rotation and print the reply
    Generate {
        prompt: String,

        /// Per-attempt timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Maximum number of provider attempts
        #[arg(short, long)]
        max_retries: Option<usize>,
    },

    /// Show the status of every configured provider
    Status {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List supported vendors and their defaults
    Providers,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn generate(config: &AppConfig, prompt: &str, timeout: Option<u64>, max_retries: Option<usize>) -> Result<String> {
    let rotator = ProviderRotator::from_config(config)?;
    let timeout = timeout.map(Duration::from_secs).unwrap_or(rotator.defaults().timeout);
    let max_retries = max_retries.unwrap_or(rotator.defaults().max_retries);

    let text = rotator.generate(prompt, timeout, max_retries).await?;
    Ok(text)
}

pub fn status(config: &AppConfig, json: bool) -> Result<String> {
    let rotator = ProviderRotator::from_config(config)?;
    let summary = rotator.summary();
    if json {
        Ok(serde_json::to_string_pretty(&summary)?)
    } else {
        Ok(render_status(&summary))
    }
}

pub fn render_status(summary: &RotatorSummary) -> String {
    let mut lines = vec![format!(
        "{} provider(s) configured, {} enabled, {} available",
        summary.total, summary.enabled, summary.available
    )];
    if summary.providers.is_empty() {
        lines.push("Set one of the *_API_KEY variables or run `airotator init` to create a config file.".to_string());
        return join_lines(lines);
    }

    lines.push(format!(
        "{:<12} {:<14} {:>5} {:>8} {:>8} {:>8}  {}",
        "PROVIDER", "STATUS", "RPM", "LAST 60S", "CALLS", "SUCCESS", "MODEL"
    ));
    for report in &summary.providers {
        lines.push(render_row(report));
        if let Some(error) = &report.last_error {
            lines.push(format!("{:<12} last error: {}", "", error));
        }
    }
    join_lines(lines)
}

fn join_lines(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn render_row(report: &ProviderStatusReport) -> String {
    format!(
        "{:<12} {:<14} {:>5} {:>8} {:>8} {:>7.1}%  {}",
        report.name,
        report.status.as_str(),
        report.rpm_limit,
        report.calls_last_minute,
        report.calls_made,
        report.success_rate,
        report.model
    )
}

pub fn render_providers(config: &AppConfig) -> String {
    let mut lines = vec![format!(
        "{:<12} {:<11} {:>5}  {:<20} {:<40} {}",
        "VENDOR", "CONFIGURED", "RPM", "KEY VARIABLE", "MODEL", "BASE URL"
    )];
    for vendor in Vendor::ALL {
        let defaults = vendor.defaults();
        let spec = vendor.spec(config.providers.get(vendor));
        lines.push(format!(
            "{:<12} {:<11} {:>5}  {:<20} {:<40} {}",
            defaults.name,
            if spec.is_enabled() { "yes" } else { "no" },
            spec.requests_per_minute,
            defaults.api_key_env,
            spec.model,
            spec.base_url
        ));
    }
    join_lines(lines)
}

pub async fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::validation(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }

    AppConfig::default().save(path).await?;
    info!("Default configuration written to {:?}", path);
    Ok(())
}
