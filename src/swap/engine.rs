//! Swap engine
//!
//! Hosts one state-machine instance per order. All mutations to an order go
//! through this engine under a per-order lock (single writer); watchers,
//! dispatcher reports and timer ticks are its only inputs. The engine owns
//! persistence around transitions and turns emitted `ActionKind`s into
//! dispatchable intents.

use crate::chain::ChainManager;
use crate::config::RelayerConfig;
use crate::dispatch::{ActionIntent, ActionOutcome, ActionReport};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{EscrowEvent, EscrowEventKind, OrderId};
use crate::store::StateStore;
use crate::swap::machine::{self, ActionKind, StepOutcome, SwapInput, SwapState};
use crate::swap::order::{NewSwapOrder, SwapOrder};
use crate::vault::{Secret, SecretVault};

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

pub struct SwapEngine {
    store: Arc<dyn StateStore>,
    vault: Arc<SecretVault>,
    chains: Arc<ChainManager>,
    actions_tx: mpsc::Sender<ActionIntent>,
    /// Per-order records behind per-order locks
    orders: DashMap<OrderId, Arc<Mutex<SwapOrder>>>,
    config: RelayerConfig,
    shutdown: Arc<RwLock<bool>>,
}

impl SwapEngine {
    /// Create the engine, loading every non-terminal order from the store.
    pub async fn new(
        store: Arc<dyn StateStore>,
        vault: Arc<SecretVault>,
        chains: Arc<ChainManager>,
        actions_tx: mpsc::Sender<ActionIntent>,
        config: RelayerConfig,
    ) -> RelayerResult<Self> {
        let orders = DashMap::new();
        for order in store.active_orders().await? {
            orders.insert(order.order_id, Arc::new(Mutex::new(order)));
        }
        info!("Swap engine loaded {} active orders", orders.len());

        Ok(Self {
            store,
            vault,
            chains,
            actions_tx,
            orders,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Main engine loop: merge watcher events, dispatcher reports and timer
    /// ticks into the per-order transition function.
    pub async fn run(
        &self,
        mut events_rx: mpsc::Receiver<EscrowEvent>,
        mut reports_rx: mpsc::Receiver<ActionReport>,
    ) -> RelayerResult<()> {
        let mut tick = interval(Duration::from_millis(self.config.tick_interval_ms));
        let mut archive_tick = interval(Duration::from_secs(60));

        info!("Swap engine started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                Some(event) = events_rx.recv() => {
                    self.handle_event(event).await;
                }

                Some(report) = reports_rx.recv() => {
                    self.handle_report(report).await;
                }

                _ = tick.tick() => {
                    self.tick_orders().await;
                }

                _ = archive_tick.tick() => {
                    self.archive_expired().await;
                }
            }
        }

        info!("Swap engine stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Swap engine shutdown initiated");
    }

    /// Order intake from the API layer. Validation failures reject the order
    /// before it ever reaches `AwaitingFunding`.
    pub async fn submit_order(
        &self,
        new_order: NewSwapOrder,
        secret: Secret,
    ) -> RelayerResult<OrderId> {
        let order = new_order.into_order(Utc::now())?;
        let order_id = order.order_id;

        if self.orders.contains_key(&order_id)
            || self.store.get_order(&order_id).await?.is_some()
        {
            return Err(RelayerError::OrderRejected(format!(
                "order {} already exists",
                hex::encode(order_id)
            )));
        }

        self.vault.store(order_id, secret, &order.hashlock).await?;
        self.store.upsert_order(&order).await?;
        self.orders
            .insert(order_id, Arc::new(Mutex::new(order)));

        crate::metrics::record_order_submitted();
        info!("Accepted swap order {}", hex::encode(order_id));
        Ok(order_id)
    }

    pub async fn get_order(&self, order_id: &OrderId) -> Option<SwapOrder> {
        let entry = self.orders.get(order_id).map(|e| e.value().clone());
        match entry {
            Some(order) => Some(order.lock().await.clone()),
            None => None,
        }
    }

    /// Apply one normalized escrow event.
    pub async fn handle_event(&self, event: EscrowEvent) {
        let entry = match self.orders.get(&event.order_id) {
            Some(e) => e.value().clone(),
            None => {
                // The escrow contract hosts orders this instance never
                // accepted; not ours to drive.
                debug!(
                    "Event for unknown order {} on chain {}",
                    hex::encode(event.order_id),
                    event.chain_id
                );
                return;
            }
        };

        let mut order = entry.lock().await;

        let leg = match order.leg_for_chain(event.chain_id) {
            Some(leg) => leg,
            None => {
                warn!(
                    "Event for order {} from chain {} which is on neither leg",
                    order.id_hex(),
                    event.chain_id
                );
                return;
            }
        };

        match &event.kind {
            EscrowEventKind::Funded { hashlock, .. } if *hashlock != order.hashlock => {
                warn!(
                    "Funded event for order {} carries a foreign hashlock",
                    order.id_hex()
                );
                order.needs_attention = true;
            }
            EscrowEventKind::Claimed { secret } => {
                // A claim publishes the preimage; make sure the vault has it
                // so the counter-leg claim can be built.
                let secret = Secret::new(*secret);
                let hashlock = order.hashlock;
                if let Err(e) = self.vault.observe(order.order_id, secret, &hashlock).await {
                    warn!("Failed to record observed preimage: {}", e);
                }
            }
            _ => {}
        }

        let input = SwapInput::Leg {
            leg,
            kind: event.kind.clone(),
            block: event.block,
        };
        let outcome = machine::step(&mut order, &input);
        self.post_step(&mut order, outcome).await;
    }

    /// Apply a dispatcher report.
    pub async fn handle_report(&self, report: ActionReport) {
        let entry = match self.orders.get(&report.order_id) {
            Some(e) => e.value().clone(),
            None => return,
        };
        let mut order = entry.lock().await;

        match report.outcome {
            ActionOutcome::Submitted { tx_hash } => {
                debug!(
                    "{} submitted for order {}: {:?}",
                    report.kind.as_str(),
                    order.id_hex(),
                    tx_hash
                );
                if report.kind == ActionKind::ClaimDest {
                    let outcome = machine::step(&mut order, &SwapInput::SecretPublished);
                    self.post_step(&mut order, outcome).await;
                }
            }

            ActionOutcome::Confirmed { block } => {
                debug!(
                    "{} confirmed for order {} at block {}",
                    report.kind.as_str(),
                    order.id_hex(),
                    block
                );
                // State advances on the corresponding escrow event
                if order.last_error.take().is_some() {
                    self.persist(&mut order).await;
                }
            }

            ActionOutcome::Reverted { reason } => {
                // The escrow has moved on without us; events reconcile the
                // record, we only keep the diagnostic.
                warn!(
                    "{} reverted for order {}: {}",
                    report.kind.as_str(),
                    order.id_hex(),
                    reason
                );
                order.last_error = Some(format!("{} reverted: {}", report.kind.as_str(), reason));
                order.retry_count += 1;
                self.persist(&mut order).await;
            }

            ActionOutcome::Failed { error } => {
                warn!(
                    "{} failed for order {}: {}",
                    report.kind.as_str(),
                    order.id_hex(),
                    error
                );
                order.last_error = Some(format!("{} failed: {}", report.kind.as_str(), error));
                order.retry_count += 1;
                self.persist(&mut order).await;
            }
        }
    }

    /// Run a timer tick over every live order. Re-derives due actions, so a
    /// restart or a lost submission heals here.
    pub async fn tick_orders(&self) {
        let entries: Vec<_> = self
            .orders
            .iter()
            .map(|e| e.value().clone())
            .collect();

        for entry in entries {
            let mut order = entry.lock().await;
            if order.state.is_halted() {
                continue;
            }

            let (source_height, dest_height) = match (
                self.chains.last_height(order.source_chain),
                self.chains.last_height(order.dest_chain),
            ) {
                (Some(s), Some(d)) => (s, d),
                // No confirmed view of one of the chains yet
                _ => continue,
            };

            let input = SwapInput::Tick {
                source_height,
                dest_height,
            };
            let outcome = machine::step(&mut order, &input);
            self.post_step(&mut order, outcome).await;
        }
    }

    /// Archive terminal orders once their retention window lapses.
    pub async fn archive_expired(&self) {
        let retention = chrono::Duration::seconds(self.config.retention_secs as i64);
        let now = Utc::now();

        let entries: Vec<_> = self.orders.iter().map(|e| e.value().clone()).collect();
        let mut to_archive = Vec::new();
        for entry in entries {
            let order = entry.lock().await;
            if order.state.is_terminal() && order.updated_at + retention <= now {
                to_archive.push(order.order_id);
            }
        }

        for order_id in to_archive {
            if let Err(e) = self.store.archive_order(&order_id).await {
                error!("Failed to archive order {}: {}", hex::encode(order_id), e);
                continue;
            }
            if let Err(e) = self.vault.erase(&order_id).await {
                warn!(
                    "Failed to erase secret for archived order {}: {}",
                    hex::encode(order_id),
                    e
                );
            }
            self.orders.remove(&order_id);
            info!("Archived order {}", hex::encode(order_id));
        }
    }

    /// Shared post-transition handling: anomalies, secret visibility,
    /// persistence and action dispatch.
    async fn post_step(&self, order: &mut SwapOrder, outcome: StepOutcome) {
        if let Some(anomaly) = &outcome.anomaly {
            error!("CRITICAL: {}", anomaly);
            crate::metrics::record_invariant_violation();
            order.last_error = Some(anomaly.clone());
        }

        // The order record learns the secret exactly when it becomes public.
        if matches!(
            order.state,
            SwapState::SecretRevealed | SwapState::DestClaimed | SwapState::Completed
        ) && order.secret.is_none()
        {
            order.secret = self.vault.get(&order.order_id);
        }

        if outcome.changed {
            self.persist(order).await;
            crate::metrics::record_swap_state(order.state.as_str());
        }

        for kind in &outcome.actions {
            self.dispatch(order, *kind).await;
        }
    }

    async fn persist(&self, order: &mut SwapOrder) {
        order.updated_at = Utc::now();
        if let Err(e) = self.store.upsert_order(order).await {
            // The in-memory record stays authoritative; the next transition
            // retries the write.
            error!("Failed to persist order {}: {}", order.id_hex(), e);
        }
    }

    async fn dispatch(&self, order: &mut SwapOrder, kind: ActionKind) {
        let secret = if kind.is_claim() {
            match self.vault.get(&order.order_id).or(order.secret) {
                Some(s) => Some(s),
                None => {
                    error!(
                        "No preimage available for {} on order {}",
                        kind.as_str(),
                        order.id_hex()
                    );
                    order.needs_attention = true;
                    order.last_error =
                        Some(format!("{}: no preimage available", kind.as_str()));
                    self.persist(order).await;
                    return;
                }
            }
        } else {
            None
        };

        let leg = kind.leg();
        let intent = ActionIntent {
            order_id: order.order_id,
            kind,
            chain_id: order.chain_for_leg(leg),
            escrow: order.escrow_for_leg(leg).to_string(),
            secret,
        };

        crate::metrics::record_action_dispatched(kind.as_str());
        if self.actions_tx.send(intent).await.is_err() {
            warn!("Action channel closed, dispatcher gone");
        }
    }
}
