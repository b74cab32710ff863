use anyhow::Context;
use channelbot::api::{ExchangeClient, ExchangeConfig};
use channelbot::execution::{InstrumentWorker, PriceFeed, WorkerConfig};
use channelbot::indicators::DonchianChannel;
use channelbot::models::Tick;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const TICK_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("channelbot starting");

    let exchange_cfg = load_exchange_config()?;
    let products = products_from_env();
    let high_period = env_parse("HIGH_PERIOD", DonchianChannel::DEFAULT_HIGH_PERIOD);
    let low_period = env_parse("LOW_PERIOD", DonchianChannel::DEFAULT_LOW_PERIOD);
    let worker_cfg = WorkerConfig {
        order_size: env_parse("ORDER_SIZE", 0.01),
        poll_interval: Duration::from_secs(env_parse("STATUS_POLL_SECS", 5)),
        ..WorkerConfig::default()
    };
    let feed_interval = Duration::from_secs(env_parse("TICK_POLL_SECS", 5));

    tracing::info!("Configuration:");
    tracing::info!("  Exchange: {}", exchange_cfg.url);
    tracing::info!("  Channel periods: {}/{}", high_period, low_period);
    tracing::info!("  Order size: {}", worker_cfg.order_size);
    tracing::info!("  Products: {}", products.join(", "));

    let client = Arc::new(ExchangeClient::new(exchange_cfg.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One feed + worker pair per instrument; no state crosses instruments
    let mut workers: Vec<(String, JoinHandle<()>, JoinHandle<_>)> = Vec::new();
    for product in &products {
        let channel = DonchianChannel::new(high_period, low_period)
            .context("invalid channel periods")?;
        let worker =
            InstrumentWorker::new(product, channel, Arc::clone(&client), worker_cfg.clone());

        let (tick_tx, tick_rx) = mpsc::channel::<Tick>(TICK_CHANNEL_CAPACITY);
        let feed = PriceFeed::new(exchange_cfg.url.clone(), product);

        let feed_handle = tokio::spawn(feed.run(tick_tx, feed_interval, shutdown_rx.clone()));
        let worker_handle = tokio::spawn(worker.run(tick_rx, shutdown_rx.clone()));
        workers.push((product.clone(), feed_handle, worker_handle));
    }

    tracing::info!("{} instrument worker(s) running, Ctrl+C to stop", workers.len());
    tokio::signal::ctrl_c().await.context("signal handler")?;
    tracing::info!("shutting down...");
    shutdown_tx.send(true).ok();

    // Join everything so in-flight placements drain instead of being killed
    for (product, feed_handle, worker_handle) in workers {
        let _ = feed_handle.await;
        match worker_handle.await {
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(state) => tracing::info!(product = %product, %state, "final instrument state"),
                Err(e) => tracing::error!(product = %product, "failed to encode state: {e}"),
            },
            Err(e) => tracing::error!(product = %product, "worker task failed: {e}"),
        }
    }

    tracing::info!("channelbot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "channelbot=info".into()),
        )
        .init();
}

fn load_exchange_config() -> anyhow::Result<ExchangeConfig> {
    Ok(ExchangeConfig {
        url: std::env::var("EXCHANGE_URL")
            .unwrap_or_else(|_| "https://api.exchange.coinbase.com".to_string()),
        access_key: std::env::var("CB_ACCESS_KEY").context("CB_ACCESS_KEY not set")?,
        access_passphrase: std::env::var("CB_ACCESS_PASSPHRASE")
            .context("CB_ACCESS_PASSPHRASE not set")?,
        access_secret: std::env::var("CB_ACCESS_SECRET").context("CB_ACCESS_SECRET not set")?,
        request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 10)),
        max_attempts: env_parse("MAX_REQUEST_ATTEMPTS", 3),
    })
}

fn products_from_env() -> Vec<String> {
    std::env::var("PRODUCT_IDS")
        .unwrap_or_else(|_| "BTC-USD".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
