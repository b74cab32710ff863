use crate::execution::OrderTracker;
use crate::indicators::{ChannelState, Classification};
use crate::models::{Order, OrderStatus, Position, PositionSide, Side};
use uuid::Uuid;

/// Intended action for the current tick, at most one per instrument cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    EnterLong,
    ExitLong,
    EnterShort,
    ExitShort,
    Hold,
}

impl Action {
    /// Order side that realizes this action, `None` for `Hold`
    pub fn side(&self) -> Option<Side> {
        match self {
            Action::EnterLong | Action::ExitShort => Some(Side::Buy),
            Action::ExitLong | Action::EnterShort => Some(Side::Sell),
            Action::Hold => None,
        }
    }

    /// Position side this action moves toward once the order fills
    pub fn target(&self) -> Option<PositionSide> {
        match self {
            Action::EnterLong => Some(PositionSide::Long),
            Action::EnterShort => Some(PositionSide::Short),
            Action::ExitLong | Action::ExitShort => Some(PositionSide::Flat),
            Action::Hold => None,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTransition {
    client_id: Uuid,
    target: PositionSide,
}

/// State machine mapping channel classifications to order intents
///
/// One engine per instrument. The position side only moves on a confirmed
/// fill; until then the transition stays speculative and a rejection or
/// cancellation falls back to the prior confirmed side.
#[derive(Debug)]
pub struct DecisionEngine {
    position: Position,
    pending: Option<PendingTransition>,
}

impl DecisionEngine {
    pub fn new(product_id: &str) -> Self {
        Self {
            position: Position::flat(product_id),
            pending: None,
        }
    }

    /// Resume from a restored position. Any speculative transition is
    /// dropped; the worker's status polling re-derives in-flight state.
    pub fn with_position(mut position: Position) -> Self {
        position.open_order = None;
        Self {
            position,
            pending: None,
        }
    }

    /// Decide what to do about the tick that produced `state`
    ///
    /// Never emits a second intent while the tracker holds a non-terminal
    /// order, no matter how the exits line up - slow acknowledgements and
    /// retries must not stack orders.
    pub fn on_tick(&mut self, state: &ChannelState, price: f64, tracker: &OrderTracker) -> Action {
        if tracker.active_order().is_some() {
            return Action::Hold;
        }

        match state.classify(price) {
            Classification::Warming => Action::Hold,
            classification => match self.position.side {
                PositionSide::Flat => match classification {
                    Classification::Breakout => Action::EnterLong,
                    Classification::Breakdown => Action::EnterShort,
                    _ => Action::Hold,
                },
                PositionSide::Long => {
                    // Exit on a breakdown or once price gives up the mid band
                    if classification == Classification::Breakdown || price < state.mid {
                        Action::ExitLong
                    } else {
                        Action::Hold
                    }
                }
                PositionSide::Short => {
                    if classification == Classification::Breakout || price > state.mid {
                        Action::ExitShort
                    } else {
                        Action::Hold
                    }
                }
            },
        }
    }

    /// Note that an action became an order handed to the execution client
    pub fn on_action_dispatched(&mut self, action: Action, order: &Order) {
        let Some(target) = action.target() else {
            return;
        };
        self.pending = Some(PendingTransition {
            client_id: order.client_id,
            target,
        });
        self.position.open_order = Some(order.client_id);
    }

    /// Apply a confirmed order outcome
    ///
    /// `Filled` commits the pending transition; `Rejected`/`Cancelled`
    /// reverts to the prior confirmed side. Non-terminal updates change
    /// nothing here.
    pub fn on_order_update(&mut self, client_id: Uuid, status: OrderStatus) {
        let Some(pending) = &self.pending else {
            return;
        };
        if pending.client_id != client_id {
            return;
        }
        match status {
            OrderStatus::Filled => {
                self.position.side = pending.target;
                self.position.open_order = None;
                self.pending = None;
            }
            OrderStatus::Rejected | OrderStatus::Cancelled => {
                self.position.open_order = None;
                self.pending = None;
            }
            _ => {}
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn has_pending_transition(&self) -> bool {
        self.pending.is_some()
    }
}
