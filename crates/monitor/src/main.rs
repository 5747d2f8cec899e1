//! Price Mirror Monitor
//!
//! Polls an oracle on the origin chain and its mirror on the destination
//! chain, follows mirror updates live, and reports the comparison.

use std::env;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use config::{Config, Environment, File};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use mirror_core::format::{format_price, format_timestamp, shorten_hex};
use mirror_core::{ChainRole, MonitorConfig};
use mirror_feed::MirrorMonitor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    init_logging();
    info!("Starting Price Mirror Monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(
        "Origin feed {} via {}, destination store {} via {}",
        config.origin.contract_address,
        config.origin.rpc_url,
        config.destination.contract_address,
        config.destination.rpc_url
    );

    let report_interval = config.report_interval();
    let monitor = MirrorMonitor::connect(config).context("building monitor")?;
    monitor.start();

    let mut ticker = tokio::time::interval(report_interval.max(Duration::from_millis(1)));
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => report(&monitor),
            _ = &mut shutdown => break,
        }
    }

    monitor.stop();
    info!("Shutdown complete");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Defaults, then `mirror.toml` (or `$MIRROR_CONFIG`), then `MIRROR__*` env vars
fn load_config() -> anyhow::Result<MonitorConfig> {
    let file = env::var("MIRROR_CONFIG").unwrap_or_else(|_| "mirror".to_string());

    let config: MonitorConfig = Config::builder()
        .add_source(Config::try_from(&MonitorConfig::default())?)
        .add_source(File::with_name(&file).required(false))
        .add_source(Environment::with_prefix("MIRROR").separator("__").try_parsing(true))
        .build()?
        .try_deserialize()
        .context("parsing configuration")?;

    config.validate()?;
    Ok(config)
}

fn report(monitor: &MirrorMonitor) {
    let view = monitor.comparison();

    for state in [&view.origin, &view.destination] {
        match state.usable_sample() {
            Some(sample) => info!(
                "{:<11} ${} round {} updated {}",
                state.chain.name(),
                format_price(sample.price),
                sample.round_id,
                format_timestamp(sample.updated_at)
            ),
            None => info!("{:<11} no price yet ({:?})", state.chain.name(), state.phase),
        }
        if let Some(err) = &state.last_error {
            warn!("{} last error after {} attempt(s): {}", state.chain, err.attempts, err.message);
        }
    }

    match (view.delta, view.latency_seconds) {
        (Some(delta), Some(latency)) => info!(
            "Delta ${:.2} ({:+.3}%) {:?}, mirror lag {}s",
            delta.absolute_usd, delta.percentage, delta.trend, latency
        ),
        _ => info!("Delta unavailable until both chains report"),
    }

    let events = monitor.events();
    info!(
        "{} mirror updates tracked, live: {}, series points: {}",
        events.events.len(),
        events.is_listening,
        monitor.series().len()
    );
    if let Some(latest) = events.events.first() {
        info!(
            "Latest mirror update round {} in block {} tx {}",
            latest.round_id,
            latest.block_number,
            latest.transaction_hash.as_deref().map(|tx| shorten_hex(tx, 6)).unwrap_or_else(|| "-".to_string())
        );
    }

    for status in monitor.network_status() {
        if !status.healthy {
            warn!("{} RPC unreachable", status.chain);
        }
    }

    if let Ok(json) = serde_json::to_string(&view) {
        debug!("Comparison snapshot: {}", json);
    }

    if monitor.poller(ChainRole::Destination).snapshot().is_stale(
        now_unix(),
        monitor.config().poller.stale_after(),
    ) {
        warn!("Destination price is stale");
    }
}

fn now_unix() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}
