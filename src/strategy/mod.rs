// Trading decision module
pub mod channel_breakout;

pub use channel_breakout::{Action, DecisionEngine};
