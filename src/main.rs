use anyhow::{Context, Result};
use clap::Parser;
use hermes_wake::cli::Cli;
use hermes_wake::config::Config;
use hermes_wake::decoder::DecoderLoader;
use hermes_wake::service::run_service;
use std::path::Path;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let config = cli.apply(config)?;
    init_logging(config.debug);

    info!(version = %hermes_wake::version_string(), "Starting hermes-wake");
    let loader = create_loader(&config)?;
    run_service(config, loader).await?;

    Ok(())
}

fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        match Config::default_path() {
            Some(path) => Config::load_or_default(&path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        }
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

#[cfg(feature = "pocketsphinx")]
fn create_loader(config: &Config) -> Result<Arc<dyn DecoderLoader>> {
    Ok(Arc::new(hermes_wake::decoder::SphinxLoader::new(config.debug)))
}

#[cfg(not(feature = "pocketsphinx"))]
fn create_loader(_config: &Config) -> Result<Arc<dyn DecoderLoader>> {
    anyhow::bail!(
        "hermes-wake was built without a keyphrase decoder; rebuild with `--features pocketsphinx`"
    )
}
