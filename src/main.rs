use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use airotator::app::{AppConfig, LoggingConfig};
use airotator::cli::{self, Cli, Commands};
use airotator::platform::AppPaths;

fn log_filter(level: &str, debug: bool) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid logging level")?;
    if debug {
        filter = filter.add_directive("airotator=debug".parse()?);
    }
    Ok(filter)
}

/// Loads the configuration under a stderr-only subscriber, since the
/// configured level and log file are not known yet.
fn load_config(path: Option<&Path>, debug: bool) -> anyhow::Result<AppConfig> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&LoggingConfig::default().level, debug)?)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::with_default(bootstrap, || AppConfig::load(path)).context("failed to load configuration")
}

fn init_logging(config: &AppConfig, paths: Option<&AppPaths>, debug: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = log_filter(&config.logging.level, debug)?;

    let (file_layer, guard) = match (&config.logging.file, paths) {
        (Some(file_name), Some(paths)) => {
            paths.ensure_dirs_exist()?;
            let appender = tracing_appender::rolling::daily(paths.logs_dir(), file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn config_path(cli: &Cli, paths: Option<&AppPaths>) -> Option<PathBuf> {
    cli.config.clone().or_else(|| paths.map(AppPaths::config_file))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = AppPaths::new().ok();
    let path = config_path(&cli, paths.as_ref());

    if let Commands::Init { force } = cli.command {
        let path = path.context("no configuration path; pass --config")?;
        cli::init(&path, force).await?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let config = load_config(path.as_deref(), cli.debug)?;
    let _guard = init_logging(&config, paths.as_ref(), cli.debug)?;
    info!("Starting airotator {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &path {
        info!("Using configuration file {:?} (present: {})", path, path.exists());
    }

    match cli.command {
        Commands::Generate { prompt, timeout, max_retries } => {
            let text = cli::generate(&config, &prompt, timeout, max_retries).await?;
            println!("{}", text);
        }
        Commands::Status { json } => println!("{}", cli::status(&config, json)?.trim_end()),
        Commands::Providers => print!("{}", cli::render_providers(&config)),
        Commands::Init { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_runs_before_global_subscriber() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\n\n[rotation]\nmax_retries = 2\n").unwrap();

        let config = load_config(Some(&path), true).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.rotation.max_retries, 2);
        assert!(!tracing::dispatcher::has_been_set());
    }

    #[test]
    fn test_load_config_reports_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sampling]\ntemperature = 9.0\n").unwrap();

        let err = load_config(Some(&path), false).unwrap_err();
        assert!(err.to_string().contains("failed to load configuration"));
    }
}
