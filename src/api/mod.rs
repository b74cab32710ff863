// Exchange API module
pub mod backoff;
pub mod coinbase;

pub use backoff::ExponentialBackoff;
pub use coinbase::{ExchangeClient, ExchangeConfig, ExchangeError, PlacedOrder};
