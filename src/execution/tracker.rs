use crate::models::{Order, OrderStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("instrument already has an open order {0}")]
    ActiveOrderExists(Uuid),
    #[error("unknown order {0}")]
    UnknownOrder(Uuid),
}

/// In-memory book of orders placed by this process for one instrument
///
/// Pure bookkeeping: no network, no signal logic. Enforces the
/// at-most-one-non-terminal-order invariant the decision engine relies on,
/// and keeps terminal statuses immutable once reached. One tracker per
/// instrument; nothing is shared across instruments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderTracker {
    orders: HashMap<Uuid, Order>,
    active: Option<Uuid>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly created order as the instrument's active order
    pub fn record(&mut self, order: Order) -> Result<(), TrackerError> {
        if let Some(active) = self.active_order() {
            return Err(TrackerError::ActiveOrderExists(active.client_id));
        }
        self.active = Some(order.client_id);
        self.orders.insert(order.client_id, order);
        Ok(())
    }

    /// Apply a status update, ignoring attempts to move past a terminal state
    pub fn update_status(
        &mut self,
        client_id: Uuid,
        status: OrderStatus,
    ) -> Result<OrderStatus, TrackerError> {
        let order = self
            .orders
            .get_mut(&client_id)
            .ok_or(TrackerError::UnknownOrder(client_id))?;
        if !order.status.is_terminal() {
            order.status = status;
        }
        let resolved = order.status;
        if resolved.is_terminal() && self.active == Some(client_id) {
            self.active = None;
        }
        Ok(resolved)
    }

    /// Attach the exchange's order id once the placement is acknowledged
    pub fn set_exchange_id(
        &mut self,
        client_id: Uuid,
        exchange_id: String,
    ) -> Result<(), TrackerError> {
        let order = self
            .orders
            .get_mut(&client_id)
            .ok_or(TrackerError::UnknownOrder(client_id))?;
        order.exchange_id = Some(exchange_id);
        Ok(())
    }

    /// Record how many placement attempts the intent has consumed
    pub fn set_attempts(&mut self, client_id: Uuid, attempts: u32) -> Result<(), TrackerError> {
        let order = self
            .orders
            .get_mut(&client_id)
            .ok_or(TrackerError::UnknownOrder(client_id))?;
        order.attempts = attempts;
        Ok(())
    }

    /// The instrument's non-terminal order, if any
    pub fn active_order(&self) -> Option<&Order> {
        self.active
            .and_then(|id| self.orders.get(&id))
            .filter(|order| !order.status.is_terminal())
    }

    pub fn get(&self, client_id: Uuid) -> Option<&Order> {
        self.orders.get(&client_id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn order() -> Order {
        Order::new("BTC-USD", Side::Buy, 0.5, 40000.0)
    }

    #[test]
    fn test_record_and_lookup() {
        let mut tracker = OrderTracker::new();
        let o = order();
        let id = o.client_id;
        tracker.record(o).unwrap();

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.active_order().unwrap().client_id, id);
    }

    #[test]
    fn test_second_active_order_refused() {
        let mut tracker = OrderTracker::new();
        tracker.record(order()).unwrap();

        let err = tracker.record(order()).unwrap_err();
        assert!(matches!(err, TrackerError::ActiveOrderExists(_)));
    }

    #[test]
    fn test_terminal_status_frees_instrument() {
        let mut tracker = OrderTracker::new();
        let o = order();
        let id = o.client_id;
        tracker.record(o).unwrap();

        tracker.update_status(id, OrderStatus::Open).unwrap();
        assert!(tracker.active_order().is_some());

        tracker.update_status(id, OrderStatus::Filled).unwrap();
        assert!(tracker.active_order().is_none());

        // Instrument is free for a new intent, history is kept
        tracker.record(order()).unwrap();
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_terminal_status_is_immutable() {
        let mut tracker = OrderTracker::new();
        let o = order();
        let id = o.client_id;
        tracker.record(o).unwrap();

        tracker.update_status(id, OrderStatus::Rejected).unwrap();
        let resolved = tracker.update_status(id, OrderStatus::Open).unwrap();
        assert_eq!(resolved, OrderStatus::Rejected);
        assert_eq!(tracker.get(id).unwrap().status, OrderStatus::Rejected);
    }

    #[test]
    fn test_unknown_status_keeps_order_active() {
        let mut tracker = OrderTracker::new();
        let o = order();
        let id = o.client_id;
        tracker.record(o).unwrap();

        tracker.update_status(id, OrderStatus::Unknown).unwrap();
        assert!(tracker.active_order().is_some());
        assert!(matches!(
            tracker.record(order()),
            Err(TrackerError::ActiveOrderExists(_))
        ));
    }

    #[test]
    fn test_update_unknown_order() {
        let mut tracker = OrderTracker::new();
        let err = tracker
            .update_status(Uuid::new_v4(), OrderStatus::Open)
            .unwrap_err();
        assert!(matches!(err, TrackerError::UnknownOrder(_)));
    }

    #[test]
    fn test_attempt_bookkeeping() {
        let mut tracker = OrderTracker::new();
        let o = order();
        let id = o.client_id;
        tracker.record(o).unwrap();

        tracker.set_exchange_id(id, "ex-1".into()).unwrap();
        tracker.set_attempts(id, 3).unwrap();

        let stored = tracker.get(id).unwrap();
        assert_eq!(stored.exchange_id.as_deref(), Some("ex-1"));
        assert_eq!(stored.attempts, 3);
    }
}
