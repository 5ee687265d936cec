mod demo;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simplarchiver_core::{
    load_config, metrics, validate_config, Config, ConfigError, Controller, Pair, PairConfig,
    WithCallback,
};

use demo::{LogReactor, LogSink, SleepSource};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Demo sources per pair
const DEMO_SOURCES: usize = 2;

/// Items each demo source yields per cycle
const DEMO_ITEMS: usize = 3;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("simplarchiver {} starting", VERSION);

    // Determine config path
    let config_path = std::env::var("SIMPLARCHIVER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound(path)) => {
            warn!("No configuration at {}, running a single demo pair", path);
            demo_config()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load config from {:?}", config_path))
        }
    };

    validate_config(&config).context("Configuration validation failed")?;
    info!("Configuration loaded with {} pairs", config.pairs.len());

    let mut controller = Controller::new();
    for entry in &config.pairs {
        controller.add_pair(demo_pair(entry));
    }

    controller.run_until(shutdown_signal()).await;

    debug!("Final metrics:\n{}", metrics::encode_metrics());
    info!("simplarchiver stopped");
    Ok(())
}

fn demo_config() -> Config {
    let mut pair = PairConfig::named("demo");
    pair.interval_secs = 30;
    Config { pairs: vec![pair] }
}

/// Builds a pair of sleeping sources and a logging sink for one config entry.
fn demo_pair(entry: &PairConfig) -> Pair<String> {
    let mut pair = Pair::from_config(entry);
    for i in 0..DEMO_SOURCES {
        pair.add_source(SleepSource::new(
            format!("{}-source-{}", entry.name, i),
            DEMO_ITEMS,
            Duration::from_secs(1),
        ));
    }
    pair.add_sink(WithCallback::new(
        LogSink::new(format!("{}-sink", entry.name)),
        LogReactor,
    ));
    pair
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
