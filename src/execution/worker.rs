use crate::api::{ExchangeClient, ExchangeError};
use crate::execution::OrderTracker;
use crate::indicators::DonchianChannel;
use crate::models::{Order, OrderStatus, Tick};
use crate::persistence::InstrumentSnapshot;
use crate::strategy::DecisionEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Outcome of an asynchronous exchange call, routed back into the worker
/// loop so all state mutation stays on one task
#[derive(Debug)]
enum OrderEvent {
    Placed {
        client_id: Uuid,
        exchange_id: String,
        accepted: bool,
        attempts: u32,
    },
    PlacementFailed {
        client_id: Uuid,
        error: ExchangeError,
    },
    StatusChecked {
        client_id: Uuid,
        status: OrderStatus,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Order size for every entry and exit
    pub order_size: f64,
    /// How often to reconcile the active order against the exchange
    pub poll_interval: Duration,
    /// Reconcile polls before a never-acknowledged order is written off
    pub max_reconcile_attempts: u32,
    /// How long shutdown waits for an in-flight placement to resolve
    pub drain_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            order_size: 0.01,
            poll_interval: Duration::from_secs(5),
            max_reconcile_attempts: 6,
            drain_grace: Duration::from_secs(5),
        }
    }
}

/// Per-instrument consumer: owns this instrument's channel engine,
/// decision engine and order tracker, and processes ticks strictly in
/// arrival order
///
/// Exchange calls are spawned off the loop and report back over an event
/// channel, so a slow exchange never stalls band updates. The decision
/// engine's in-flight guard keeps a second order from going out in the
/// meantime.
pub struct InstrumentWorker {
    product_id: String,
    channel: DonchianChannel,
    engine: DecisionEngine,
    tracker: OrderTracker,
    client: Arc<ExchangeClient>,
    config: WorkerConfig,
    reconcile_attempts: u32,
    fatal: bool,
}

impl InstrumentWorker {
    pub fn new(
        product_id: &str,
        channel: DonchianChannel,
        client: Arc<ExchangeClient>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            product_id: product_id.to_string(),
            channel,
            engine: DecisionEngine::new(product_id),
            tracker: OrderTracker::new(),
            client,
            config,
            reconcile_attempts: 0,
            fatal: false,
        }
    }

    /// Resume from a saved snapshot
    pub fn with_state(
        snapshot: InstrumentSnapshot,
        channel: DonchianChannel,
        client: Arc<ExchangeClient>,
        config: WorkerConfig,
    ) -> Self {
        let product_id = snapshot.position.product_id.clone();
        Self {
            product_id,
            channel,
            engine: DecisionEngine::with_position(snapshot.position),
            tracker: snapshot.tracker,
            client,
            config,
            reconcile_attempts: 0,
            fatal: false,
        }
    }

    /// Consume ticks until shutdown, the feed closing, or a signing fault
    ///
    /// Returns the final state snapshot for the caller to persist or log.
    pub async fn run(
        mut self,
        mut ticks: mpsc::Receiver<Tick>,
        mut shutdown: watch::Receiver<bool>,
    ) -> InstrumentSnapshot {
        let (event_tx, mut event_rx) = mpsc::channel::<OrderEvent>(16);
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(product = %self.product_id, "instrument worker starting");

        loop {
            tokio::select! {
                maybe_tick = ticks.recv() => {
                    match maybe_tick {
                        Some(tick) => self.on_tick(tick, &event_tx),
                        None => {
                            tracing::info!(product = %self.product_id, "tick feed closed");
                            break;
                        }
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.on_event(event);
                    if self.fatal {
                        tracing::error!(product = %self.product_id, "stopping on configuration fault");
                        break;
                    }
                }
                _ = poll.tick() => self.poll_active_order(&event_tx),
                _ = shutdown.changed() => {
                    tracing::info!(product = %self.product_id, "shutdown requested");
                    break;
                }
            }
        }

        self.drain(&mut event_rx).await;
        self.snapshot()
    }

    pub fn snapshot(&self) -> InstrumentSnapshot {
        InstrumentSnapshot::new(self.engine.position().clone(), self.tracker.clone())
    }

    /// Update bands, run the decision engine, dispatch at most one order
    fn on_tick(&mut self, tick: Tick, event_tx: &mpsc::Sender<OrderEvent>) {
        let state = self.channel.update(&tick);
        let action = self.engine.on_tick(&state, tick.price, &self.tracker);

        tracing::debug!(
            product = %self.product_id,
            price = tick.price,
            upper = state.upper,
            lower = state.lower,
            mid = state.mid,
            warm = state.warm,
            ?action,
            "tick processed"
        );

        let Some(side) = action.side() else {
            return;
        };

        let order = Order::new(&self.product_id, side, self.config.order_size, tick.price);
        if let Err(e) = self.tracker.record(order.clone()) {
            // The engine's guard makes this unreachable; refuse to stack orders anyway
            tracing::error!(product = %self.product_id, "refusing duplicate order: {e}");
            return;
        }
        self.engine.on_action_dispatched(action, &order);

        tracing::info!(
            product = %self.product_id,
            client_id = %order.client_id,
            ?action,
            side = side.as_str(),
            size = order.size,
            price = order.price,
            "dispatching order"
        );
        self.dispatch_place(order, event_tx.clone());
    }

    fn dispatch_place(&self, order: Order, tx: mpsc::Sender<OrderEvent>) {
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            let client_id = order.client_id;
            let event = match client.place_order(&order).await {
                Ok(placed) => OrderEvent::Placed {
                    client_id,
                    exchange_id: placed.exchange_id,
                    accepted: placed.accepted,
                    attempts: placed.attempts,
                },
                Err(error) => OrderEvent::PlacementFailed { client_id, error },
            };
            let _ = tx.send(event).await;
        });
    }

    fn on_event(&mut self, event: OrderEvent) {
        match event {
            OrderEvent::Placed {
                client_id,
                exchange_id,
                accepted,
                attempts,
            } => {
                if let Err(e) = self.tracker.set_exchange_id(client_id, exchange_id) {
                    tracing::error!(product = %self.product_id, "acknowledgement for unknown order: {e}");
                    return;
                }
                if let Err(e) = self.tracker.set_attempts(client_id, attempts) {
                    tracing::error!(product = %self.product_id, "failed to record attempts: {e}");
                }
                let status = if accepted {
                    OrderStatus::Open
                } else {
                    OrderStatus::Rejected
                };
                self.apply_status(client_id, status);
            }
            OrderEvent::PlacementFailed { client_id, error } => match error {
                ExchangeError::Rejected(reason) => {
                    tracing::info!(product = %self.product_id, %client_id, "order rejected: {reason}");
                    self.apply_status(client_id, OrderStatus::Rejected);
                }
                ExchangeError::Signing(reason) => {
                    // Exhausted signing budget means bad credentials, not a bad market
                    tracing::error!(
                        product = %self.product_id,
                        %client_id,
                        "signing failed, check exchange credentials: {reason}"
                    );
                    self.apply_status(client_id, OrderStatus::Unknown);
                    self.fatal = true;
                }
                other => {
                    // Outcome ambiguous: the exchange may have the order.
                    // Keep it non-terminal and let reconciliation decide.
                    tracing::error!(
                        product = %self.product_id,
                        %client_id,
                        "order placement outcome unknown: {other}"
                    );
                    self.apply_status(client_id, OrderStatus::Unknown);
                }
            },
            OrderEvent::StatusChecked { client_id, status } => {
                if status == OrderStatus::Unknown {
                    tracing::warn!(
                        product = %self.product_id,
                        %client_id,
                        "status poll could not confirm order state"
                    );
                    return;
                }
                self.apply_status(client_id, status);
            }
        }
    }

    fn apply_status(&mut self, client_id: Uuid, status: OrderStatus) {
        let resolved = match self.tracker.update_status(client_id, status) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(product = %self.product_id, "failed to update order: {e}");
                return;
            }
        };
        tracing::info!(
            product = %self.product_id,
            %client_id,
            status = ?resolved,
            "order status updated"
        );
        self.engine.on_order_update(client_id, resolved);
        if resolved.is_terminal() {
            self.reconcile_attempts = 0;
        }
    }

    /// Reconcile the active order against the exchange
    ///
    /// Acknowledged orders get a status poll. An order stuck `Unknown`
    /// with no exchange id can never be polled; after a bounded number of
    /// cycles it is written off as rejected so the instrument does not
    /// freeze forever.
    fn poll_active_order(&mut self, event_tx: &mpsc::Sender<OrderEvent>) {
        let Some(order) = self.tracker.active_order() else {
            return;
        };
        let client_id = order.client_id;
        let exchange_id = order.exchange_id.clone();
        let status = order.status;

        match (exchange_id, status) {
            (Some(exchange_id), _) => {
                let client = Arc::clone(&self.client);
                let tx = event_tx.clone();
                tokio::spawn(async move {
                    let status = client.check_order_status(&exchange_id).await;
                    let _ = tx.send(OrderEvent::StatusChecked { client_id, status }).await;
                });
            }
            (None, OrderStatus::Unknown) => {
                self.reconcile_attempts += 1;
                if self.reconcile_attempts >= self.config.max_reconcile_attempts {
                    tracing::error!(
                        product = %self.product_id,
                        %client_id,
                        attempts = self.reconcile_attempts,
                        "order never acknowledged, writing it off as rejected"
                    );
                    self.apply_status(client_id, OrderStatus::Rejected);
                }
            }
            // Placement still in flight, its outcome event will arrive
            (None, _) => {}
        }
    }

    /// Let an in-flight placement resolve, then reconcile whatever is left
    ///
    /// Nothing in flight is silently dropped: a live order on the book is
    /// cancelled, and an order that cannot be confirmed leaves as
    /// `Unknown` in the final snapshot.
    async fn drain(&mut self, event_rx: &mut mpsc::Receiver<OrderEvent>) {
        let deadline = tokio::time::Instant::now() + self.config.drain_grace;
        while self
            .tracker
            .active_order()
            .is_some_and(|o| o.status == OrderStatus::Pending)
        {
            match tokio::time::timeout_at(deadline, event_rx.recv()).await {
                Ok(Some(event)) => self.on_event(event),
                _ => break,
            }
        }

        let Some(order) = self.tracker.active_order() else {
            return;
        };
        let client_id = order.client_id;
        let exchange_id = order.exchange_id.clone();

        let mut status = match &exchange_id {
            Some(id) => self.client.check_order_status(id).await,
            None => OrderStatus::Unknown,
        };

        // Don't leave a live order on the book with nobody watching it
        if matches!(status, OrderStatus::Open | OrderStatus::Pending) {
            if let Some(id) = &exchange_id {
                status = match self.client.cancel_orders(std::slice::from_ref(id)).await {
                    Ok(true) => OrderStatus::Cancelled,
                    Ok(false) => OrderStatus::Unknown,
                    Err(e) => {
                        tracing::error!(product = %self.product_id, "cancel on shutdown failed: {e}");
                        OrderStatus::Unknown
                    }
                };
            }
        }
        if status == OrderStatus::Pending {
            status = OrderStatus::Unknown;
        }

        tracing::warn!(
            product = %self.product_id,
            %client_id,
            final_status = ?status,
            "shutting down with an unresolved order"
        );
        self.apply_status(client_id, status);
    }
}
