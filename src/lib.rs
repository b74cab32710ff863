// Core modules
pub mod api;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod strategy;

// Re-export commonly used types
pub use models::*;
pub use strategy::{Action, DecisionEngine};
