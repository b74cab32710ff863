use crate::api::ExchangeError;
use crate::models::Tick;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
    time: DateTime<Utc>,
}

/// Polls the exchange's public ticker and hands typed ticks to a worker
///
/// Deliberately dumb transport glue: no backfill, no resubscribe logic.
/// A failed poll is logged and the next interval tries again.
pub struct PriceFeed {
    http: Client,
    url: String,
    product_id: String,
}

impl PriceFeed {
    pub fn new(url: String, product_id: &str) -> Self {
        Self {
            http: Client::new(),
            url,
            product_id: product_id.to_string(),
        }
    }

    pub async fn fetch_tick(&self) -> Result<Tick, ExchangeError> {
        let url = format!("{}/products/{}/ticker", self.url, self.product_id);
        let res = self.http.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
        let text = res.text().await?;
        let ticker: TickerResponse = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Protocol(format!("{e} (body: {text})")))?;
        let price: f64 = ticker
            .price
            .parse()
            .map_err(|e| ExchangeError::Protocol(format!("unparseable price: {e}")))?;
        Ok(Tick::new(ticker.time, price))
    }

    /// Poll until shutdown or until the consumer goes away
    pub async fn run(
        self,
        ticks: mpsc::Sender<Tick>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.fetch_tick().await {
                        Ok(tick) => {
                            if ticks.send(tick).await.is_err() {
                                tracing::info!(product = %self.product_id, "tick consumer gone, feed stopping");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(product = %self.product_id, "tick fetch failed: {e}");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!(product = %self.product_id, "price feed stopping");
                    break;
                }
            }
        }
    }
}
