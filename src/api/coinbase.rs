use crate::api::ExponentialBackoff;
use crate::models::{Order, OrderStatus, Side};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Decimal epoch seconds with millisecond precision
///
/// Whole seconds would collide across sub-second retries and re-sign a
/// byte-identical message; the exchange accepts fractional timestamps.
fn request_timestamp() -> String {
    let ms = Utc::now().timestamp_millis();
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

pub const ORDER_PATH: &str = "/orders";
pub const CANCEL_PATH: &str = "/orders/batch_cancel";

/// Failure taxonomy for exchange requests
///
/// Only `Transport` is safely retryable; a retry re-signs with a fresh
/// timestamp but keeps the same client request id. Any of these leaving
/// `place_order` means exchange-side state is unknown - callers must
/// reconcile, not assume the order was dropped.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("request signing failed: {0}")]
    Signing(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected response shape: {0}")]
    Protocol(String),
    #[error("exchange rejected the request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Transport(err.to_string())
    }
}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transport(_))
    }
}

/// Connection settings for the exchange order API
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub url: String,
    pub access_key: String,
    pub access_passphrase: String,
    /// Base64-encoded shared secret
    pub access_secret: String,
    /// Per-request deadline
    pub request_timeout: Duration,
    /// Attempt budget for retryable failures (minimum 1)
    pub max_attempts: u32,
}

/// Acknowledged order placement
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub accepted: bool,
    pub exchange_id: String,
    pub attempts: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody<'a> {
    product_id: &'a str,
    side: Side,
    size: String,
    price: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody<'a> {
    order_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceResponse {
    order_id: String,
    success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    order_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelResponse {
    order_id: String,
    success: bool,
}

/// Authenticated client for the Coinbase Exchange order endpoints
///
/// Every request signs `timestamp + method + path + body` with HMAC-SHA256
/// keyed by the base64-decoded shared secret and sends the base64-encoded
/// signature in `CB-ACCESS-SIGN`. Timestamps are generated at signing time,
/// one per attempt - the exchange treats a reused timestamp as replay.
#[derive(Debug, Clone)]
pub struct ExchangeClient {
    cfg: ExchangeConfig,
    http: Client,
}

impl ExchangeClient {
    pub fn new(cfg: ExchangeConfig) -> Self {
        Self {
            cfg,
            http: Client::new(),
        }
    }

    /// Place an order, retrying transport failures with backoff
    ///
    /// The order's `client_id` identifies the intent across all attempts;
    /// only the timestamp and signature differ between them.
    pub async fn place_order(&self, order: &Order) -> Result<PlacedOrder, ExchangeError> {
        let body = serde_json::to_string(&OrderBody {
            product_id: &order.product_id,
            side: order.side,
            size: order.size.to_string(),
            price: order.price.to_string(),
        })
        .map_err(|e| ExchangeError::Protocol(e.to_string()))?;

        let (response, attempts) = self
            .send_signed::<PlaceResponse>(Method::POST, ORDER_PATH, Some(&body))
            .await?;

        tracing::info!(
            client_id = %order.client_id,
            exchange_id = %response.order_id,
            success = response.success,
            attempts,
            "order placement resolved"
        );
        Ok(PlacedOrder {
            accepted: response.success,
            exchange_id: response.order_id,
            attempts,
        })
    }

    /// Ask the exchange for an order's status
    ///
    /// Never fails: a poller must survive transient glitches, so any
    /// transport or parse failure resolves to the `Unknown` sentinel and
    /// an error log. `Unknown` means "we could not ask", not "the
    /// exchange said so".
    pub async fn check_order_status(&self, exchange_id: &str) -> OrderStatus {
        let path = format!("{}/historical/{}", ORDER_PATH, exchange_id);
        match self
            .attempt_signed::<StatusResponse>(Method::GET, &path, None)
            .await
        {
            Ok(response) => {
                tracing::info!(
                    exchange_id = %response.order_id,
                    status = %response.status,
                    "order status"
                );
                OrderStatus::from_exchange(&response.status)
            }
            Err(err) => {
                tracing::error!(%exchange_id, "order status check failed: {err}");
                OrderStatus::Unknown
            }
        }
    }

    /// Cancel one or more unfilled orders
    pub async fn cancel_orders(&self, exchange_ids: &[String]) -> Result<bool, ExchangeError> {
        let body = serde_json::to_string(&CancelBody {
            order_ids: exchange_ids,
        })
        .map_err(|e| ExchangeError::Protocol(e.to_string()))?;

        let (response, _attempts) = self
            .send_signed::<CancelResponse>(Method::POST, CANCEL_PATH, Some(&body))
            .await?;

        tracing::info!(
            exchange_id = %response.order_id,
            success = response.success,
            "cancel request resolved"
        );
        Ok(response.success)
    }

    /// Sign the exchange's canonical message for one attempt
    fn sign(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, ExchangeError> {
        let secret = BASE64
            .decode(&self.cfg.access_secret)
            .map_err(|e| ExchangeError::Signing(format!("secret is not valid base64: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// One signed request: fresh timestamp, fresh signature
    async fn attempt_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<T, ExchangeError> {
        let timestamp = request_timestamp();
        let payload = body.unwrap_or("");
        let signature = self.sign(&timestamp, method.as_str(), path, payload)?;

        // Required headers: https://docs.cloud.coinbase.com/exchange/docs/rest-auth
        let mut req = self
            .http
            .request(method, format!("{}{}", self.cfg.url, path))
            .timeout(self.cfg.request_timeout)
            .header("Content-Type", "application/json")
            .header("CB-ACCESS-KEY", &self.cfg.access_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header("CB-ACCESS-PASSPHRASE", &self.cfg.access_passphrase);
        if let Some(b) = body {
            req = req.body(b.to_string());
        }

        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;

        if status.is_client_error() {
            return Err(ExchangeError::Rejected(format!("{status}: {text}")));
        }
        if !status.is_success() {
            return Err(ExchangeError::Transport(format!(
                "exchange returned {status}"
            )));
        }
        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Protocol(format!("{e} (body: {text})")))
    }

    /// Signed request with a bounded retry budget for transport failures
    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<(T, u32), ExchangeError> {
        let budget = self.cfg.max_attempts.max(1);
        let mut backoff = ExponentialBackoff::default();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt_signed::<T>(method.clone(), path, body).await {
                Ok(parsed) => return Ok((parsed, attempts)),
                Err(err) if err.is_retryable() && attempts < budget => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        path,
                        attempt = attempts,
                        "retryable exchange failure: {err}; retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    // base64 of "top secret"
    const TEST_SECRET: &str = "dG9wIHNlY3JldA==";

    fn test_config(url: String) -> ExchangeConfig {
        ExchangeConfig {
            url,
            access_key: "test-key".into(),
            access_passphrase: "test-pass".into(),
            access_secret: TEST_SECRET.into(),
            request_timeout: Duration::from_secs(5),
            max_attempts: 2,
        }
    }

    fn test_order() -> Order {
        Order::new("BTC-USD", Side::Buy, 0.5, 40000.0)
    }

    // HMAC-SHA256 output is 32 bytes, so the base64 signature is 44 chars
    const SIGNATURE_PATTERN: &str = r"^[A-Za-z0-9+/]{43}=$";

    #[test]
    fn test_signature_is_base64_of_32_bytes() {
        let client = ExchangeClient::new(test_config("http://unused".into()));
        let signature = client
            .sign("1700000000", "POST", ORDER_PATH, "{}")
            .unwrap();
        let raw = BASE64.decode(&signature).unwrap();
        assert_eq!(raw.len(), 32);
    }

    #[test]
    fn test_fresh_timestamp_means_fresh_signature() {
        let client = ExchangeClient::new(test_config("http://unused".into()));
        let first = client.sign("1700000000", "POST", ORDER_PATH, "{}").unwrap();
        let second = client.sign("1700000001", "POST", ORDER_PATH, "{}").unwrap();
        let repeat = client.sign("1700000000", "POST", ORDER_PATH, "{}").unwrap();
        assert_ne!(first, second);
        assert_eq!(first, repeat); // deterministic for identical inputs
    }

    #[test]
    fn test_request_timestamp_is_fractional_and_moves() {
        let first = request_timestamp();
        let (secs, millis) = first.split_once('.').unwrap();
        assert!(secs.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(millis.len(), 3);
        assert!(millis.chars().all(|c| c.is_ascii_digit()));

        std::thread::sleep(Duration::from_millis(5));
        assert_ne!(first, request_timestamp());
    }

    /// A transport retry must not reuse the previous attempt's timestamp
    /// or signature, even when both attempts land inside the same second
    #[tokio::test]
    async fn test_retry_re_signs_with_distinct_timestamp() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        // Serve two 502s while capturing each attempt's auth headers;
        // mockito cannot hand back per-request header values
        let capture = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let header = |name: &str| {
                    head.lines()
                        .find(|l| l.to_ascii_lowercase().starts_with(name))
                        .and_then(|l| l.split_once(':'))
                        .map(|(_, v)| v.trim().to_string())
                        .expect("auth header missing")
                };
                seen.push((header("cb-access-timestamp"), header("cb-access-sign")));
                stream
                    .write_all(
                        b"HTTP/1.1 502 Bad Gateway\r\nconnection: close\r\ncontent-length: 0\r\n\r\n",
                    )
                    .await
                    .unwrap();
                stream.shutdown().await.ok();
            }
            seen
        });

        let client = ExchangeClient::new(test_config(url));
        let err = client.place_order(&test_order()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Transport(_)));

        let seen = capture.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0].0, seen[1].0, "retry reused the timestamp");
        assert_ne!(seen[0].1, seen[1].1, "retry reused the signature");
    }

    #[test]
    fn test_undecodable_secret_is_a_signing_error() {
        let mut cfg = test_config("http://unused".into());
        cfg.access_secret = "!!! not base64 !!!".into();
        let client = ExchangeClient::new(cfg);
        let err = client.sign("1700000000", "POST", ORDER_PATH, "{}").unwrap_err();
        assert!(matches!(err, ExchangeError::Signing(_)));
    }

    #[tokio::test]
    async fn test_place_order_sends_auth_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders")
            .match_header("Content-Type", "application/json")
            .match_header("CB-ACCESS-KEY", "test-key")
            .match_header("CB-ACCESS-PASSPHRASE", "test-pass")
            .match_header("CB-ACCESS-SIGN", Matcher::Regex(SIGNATURE_PATTERN.into()))
            .match_header(
                "CB-ACCESS-TIMESTAMP",
                Matcher::Regex(r"^\d+\.\d{3}$".into()),
            )
            .match_body(Matcher::JsonString(
                r#"{"productId":"BTC-USD","side":"buy","size":"0.5","price":"40000"}"#.into(),
            ))
            .with_status(200)
            .with_body(r#"{"orderId":"ex-123","success":true}"#)
            .create_async()
            .await;

        let client = ExchangeClient::new(test_config(server.url()));
        let placed = client.place_order(&test_order()).await.unwrap();

        assert!(placed.accepted);
        assert_eq!(placed.exchange_id, "ex-123");
        assert_eq!(placed.attempts, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_place_order_client_error_is_rejected_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders")
            .with_status(400)
            .with_body(r#"{"message":"insufficient funds"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = ExchangeClient::new(test_config(server.url()));
        let err = client.place_order(&test_order()).await.unwrap_err();

        assert!(matches!(err, ExchangeError::Rejected(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_place_order_retries_server_errors_up_to_budget() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders")
            .with_status(502)
            .expect(2) // max_attempts in test_config
            .create_async()
            .await;

        let client = ExchangeClient::new(test_config(server.url()));
        let err = client.place_order(&test_order()).await.unwrap_err();

        assert!(matches!(err, ExchangeError::Transport(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_place_response_is_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/orders")
            .with_status(200)
            .with_body("not json at all")
            .create_async()
            .await;

        let client = ExchangeClient::new(test_config(server.url()));
        let err = client.place_order(&test_order()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_status_check_maps_exchange_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/orders/historical/ex-123")
            .match_header("CB-ACCESS-SIGN", Matcher::Regex(SIGNATURE_PATTERN.into()))
            .with_status(200)
            .with_body(r#"{"orderId":"ex-123","status":"FILLED"}"#)
            .create_async()
            .await;

        let client = ExchangeClient::new(test_config(server.url()));
        let status = client.check_order_status("ex-123").await;
        assert_eq!(status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_status_check_never_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/orders/historical/ex-123")
            .with_status(200)
            .with_body("<html>gateway error</html>")
            .create_async()
            .await;

        let client = ExchangeClient::new(test_config(server.url()));
        assert_eq!(
            client.check_order_status("ex-123").await,
            OrderStatus::Unknown
        );

        // Unreachable host: still just Unknown
        let client = ExchangeClient::new(test_config("http://127.0.0.1:1".into()));
        assert_eq!(
            client.check_order_status("ex-123").await,
            OrderStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_cancel_orders() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders/batch_cancel")
            .match_header("CB-ACCESS-SIGN", Matcher::Regex(SIGNATURE_PATTERN.into()))
            .match_body(Matcher::JsonString(r#"{"orderIds":["ex-123"]}"#.into()))
            .with_status(200)
            .with_body(r#"{"orderId":"ex-123","success":true}"#)
            .create_async()
            .await;

        let client = ExchangeClient::new(test_config(server.url()));
        let accepted = client.cancel_orders(&["ex-123".to_string()]).await.unwrap();
        assert!(accepted);
        mock.assert_async().await;
    }
}
