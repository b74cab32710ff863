// Order execution module
// Tracker, per-instrument worker loop, and the ticker price feed

pub mod price_feed;
pub mod tracker;
pub mod worker;

pub use price_feed::PriceFeed;
pub use tracker::{OrderTracker, TrackerError};
pub use worker::{InstrumentWorker, WorkerConfig};
