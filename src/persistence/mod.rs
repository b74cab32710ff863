//! Save/restore hooks for per-instrument trading state.
//!
//! Durable storage is deferred; these types are the seam a future store
//! attaches to without touching the pipeline.

use crate::execution::OrderTracker;
use crate::models::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point-in-time state for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub position: Position,
    pub tracker: OrderTracker,
    pub taken_at: DateTime<Utc>,
}

impl InstrumentSnapshot {
    pub fn new(position: Position, tracker: OrderTracker) -> Self {
        Self {
            position,
            tracker,
            taken_at: Utc::now(),
        }
    }
}

/// Attachment point for a durable order/position store
pub trait StateStore: Send + Sync {
    fn save(&mut self, snapshot: &InstrumentSnapshot) -> anyhow::Result<()>;
    fn load(&self, product_id: &str) -> anyhow::Result<Option<InstrumentSnapshot>>;
}

/// In-memory store, keyed by instrument
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: HashMap<String, InstrumentSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn save(&mut self, snapshot: &InstrumentSnapshot) -> anyhow::Result<()> {
        self.snapshots
            .insert(snapshot.position.product_id.clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, product_id: &str) -> anyhow::Result<Option<InstrumentSnapshot>> {
        Ok(self.snapshots.get(product_id).cloned())
    }
}
