use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One timestamped price observation from the market feed
///
/// `high`/`low` carry the period range when the feed supplies one;
/// plain trade ticks leave them unset and the trade price stands in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub high: Option<f64>,
    pub low: Option<f64>,
}

impl Tick {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            price,
            high: None,
            low: None,
        }
    }

    pub fn with_range(timestamp: DateTime<Utc>, price: f64, high: f64, low: f64) -> Self {
        Self {
            timestamp,
            price,
            high: Some(high),
            low: Some(low),
        }
    }

    /// High of the period, falling back to the trade price
    pub fn period_high(&self) -> f64 {
        self.high.unwrap_or(self.price)
    }

    /// Low of the period, falling back to the trade price
    pub fn period_low(&self) -> f64 {
        self.low.unwrap_or(self.price)
    }
}

/// Order side as the exchange spells it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Order lifecycle status
///
/// `Filled`, `Cancelled` and `Rejected` are terminal and immutable once
/// reached. `Unknown` means the exchange could not be asked (or answered
/// with something unparseable) - the order may or may not exist over there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    Cancelled,
    Rejected,
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Map an exchange status string, anything unrecognized becomes `Unknown`
    pub fn from_exchange(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "PENDING" | "RECEIVED" => OrderStatus::Pending,
            "OPEN" | "ACTIVE" => OrderStatus::Open,
            "FILLED" | "DONE" => OrderStatus::Filled,
            "CANCELLED" | "CANCELED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Unknown,
        }
    }
}

/// An order placed (or about to be placed) by this process
///
/// `client_id` identifies one trading intent and never changes across
/// retries of that intent; `exchange_id` arrives with the exchange's
/// acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_id: Uuid,
    pub exchange_id: Option<String>,
    pub product_id: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub status: OrderStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(product_id: &str, side: Side, size: f64, price: f64) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            exchange_id: None,
            product_id: product_id.to_string(),
            side,
            size,
            price,
            status: OrderStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

/// Direction of the confirmed position in an instrument
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionSide {
    Flat,
    Long,
    Short,
}

/// Confirmed position for one instrument
///
/// Mutated only by the decision engine in response to confirmed fills or
/// cancellations, never by the execution client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub product_id: String,
    pub side: PositionSide,
    pub open_order: Option<Uuid>,
}

impl Position {
    pub fn flat(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            side: PositionSide::Flat,
            open_order: None,
        }
    }
}
