/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Live feeds kept in sync with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coinmux_adapter::TungsteniteConnector;
use coinmux_feeds::{FeedHub, StreamConfig};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "coinmux-feeds", version, about = "Keeps aggregator feeds live over shared sockets")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting coinmux-feeds"
    );

    let config = load_config(&args.config_path)?;
    info!(
        feed_count = config.feeds.len(),
        families = ?config.families(),
        "configuration loaded"
    );

    if args.dry_run {
        for entry in &config.feeds {
            info!(
                feed = %entry.name(),
                family = %entry.feed.family(),
                slot = entry.feed.slot(),
                "feed configured"
            );
        }
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let hub = FeedHub::start_with_shutdown(&config, Arc::new(TungsteniteConnector), shutdown.clone())
        .context("start feed hub")?;
    spawn_status_logging(&hub, shutdown.clone());

    shutdown.cancelled().await;
    info!("shutdown signal received");

    hub.shutdown_and_wait(SHUTDOWN_TIMEOUT)
        .await
        .context("shutdown feeds")?;
    info!("feeds shutdown complete");

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<StreamConfig> {
    let path_str = path
        .to_str()
        .context("config path must be valid utf-8")?;
    StreamConfig::from_file(path_str).context("load config")
}

/// Log connection state per family and liveness flips per feed.
fn spawn_status_logging(hub: &FeedHub, shutdown: CancellationToken) {
    for (family, mut state_rx) in hub.connection_states() {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *state_rx.borrow_and_update();
                        info!(%family, ?state, "connection state changed");
                    }
                }
            }
        });
    }

    for feed in hub.feeds() {
        let name = feed.name.clone();
        let mut state_rx = feed.state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut was_live = false;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = state_rx.borrow_and_update().clone();
                        if state.live != was_live {
                            was_live = state.live;
                            info!(
                                feed = %name,
                                live = state.live,
                                events_applied = state.events_applied,
                                reconnects = state.reconnects,
                                failures = state.failures,
                                "feed status changed"
                            );
                        }
                    }
                }
            }
        });
    }
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
