//! Action dispatcher and retry engine
//!
//! Consumes transaction intents from the swap engine, serializes them per
//! (order, leg), caps outstanding transactions per chain, and submits through
//! the chain adapter. Transient failures back off exponentially up to a
//! retry cap; reverted transactions are reported back for reconciliation
//! against chain events instead of being retried blindly.

use crate::chain::{ChainManager, EscrowCall, TxOutcome};
use crate::config::RelayerConfig;
use crate::events::{Leg, OrderId};
use crate::swap::machine::ActionKind;
use crate::vault::Secret;

use dashmap::DashMap;
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// A transaction intent emitted by the state machine.
#[derive(Debug, Clone)]
pub struct ActionIntent {
    pub order_id: OrderId,
    pub kind: ActionKind,
    pub chain_id: u64,
    pub escrow: String,
    /// Preimage for claim intents; refunds carry none.
    pub secret: Option<Secret>,
}

/// What became of a dispatched action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Accepted by the RPC; for a destination claim this is the moment the
    /// secret goes public.
    Submitted { tx_hash: H256 },
    Confirmed { block: u64 },
    /// On-chain rejection; the escrow has moved on. Reconciled via events.
    Reverted { reason: String },
    /// Gave up after retries or lost track of the transaction.
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct ActionReport {
    pub order_id: OrderId,
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
}

pub struct ActionDispatcher {
    chains: Arc<ChainManager>,
    config: RelayerConfig,
    /// One in-flight action per (order, leg)
    in_flight: DashMap<(OrderId, Leg), ActionKind>,
    /// Per-chain transaction slots
    chain_slots: DashMap<u64, Arc<Semaphore>>,
    reports_tx: mpsc::Sender<ActionReport>,
    shutdown: Arc<RwLock<bool>>,
}

impl ActionDispatcher {
    pub fn new(
        chains: Arc<ChainManager>,
        config: RelayerConfig,
        reports_tx: mpsc::Sender<ActionReport>,
    ) -> Self {
        Self {
            chains,
            config,
            in_flight: DashMap::new(),
            chain_slots: DashMap::new(),
            reports_tx,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main dispatch loop
    pub async fn run(self: Arc<Self>, mut intents_rx: mpsc::Receiver<ActionIntent>) {
        info!("Action dispatcher started");

        while let Some(intent) = intents_rx.recv().await {
            if *self.shutdown.read().await {
                break;
            }
            self.clone().handle(intent);
        }

        info!("Action dispatcher stopped");
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }

    /// Admit an intent, dropping it if the same (order, leg) already has a
    /// transaction in flight.
    fn handle(self: Arc<Self>, intent: ActionIntent) {
        let key = (intent.order_id, intent.kind.leg());

        if self.in_flight.contains_key(&key) {
            debug!(
                "Dropping {} for order {}: action already in flight on {} leg",
                intent.kind.as_str(),
                hex::encode(intent.order_id),
                intent.kind.leg().as_str()
            );
            return;
        }
        self.in_flight.insert(key, intent.kind);

        tokio::spawn(async move {
            self.execute(&intent).await;
            self.in_flight.remove(&key);
        });
    }

    /// Submit one intent with retry, reporting every outcome to the engine.
    async fn execute(&self, intent: &ActionIntent) {
        let adapter = match self.chains.get_adapter(intent.chain_id) {
            Ok(a) => a,
            Err(e) => {
                self.report(intent, ActionOutcome::Failed { error: e.to_string() })
                    .await;
                return;
            }
        };

        let call = match self.build_call(intent) {
            Ok(call) => call,
            Err(message) => {
                error!(
                    "Cannot build {} for order {}: {}",
                    intent.kind.as_str(),
                    hex::encode(intent.order_id),
                    message
                );
                self.report(intent, ActionOutcome::Failed { error: message })
                    .await;
                return;
            }
        };

        // Bound outstanding transactions per chain
        let slots = self
            .chain_slots
            .entry(intent.chain_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent_txs)))
            .clone();
        let _permit = match slots.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            match adapter.submit(call.clone()).await {
                Ok(handle) => {
                    self.report(
                        intent,
                        ActionOutcome::Submitted {
                            tx_hash: handle.tx_hash,
                        },
                    )
                    .await;

                    let outcome = match adapter
                        .wait_for_confirmation(&handle, adapter.confirmation_depth())
                        .await
                    {
                        Ok(TxOutcome::Confirmed { block }) => {
                            crate::metrics::record_action(intent.kind.as_str(), "confirmed");
                            ActionOutcome::Confirmed { block }
                        }
                        Ok(TxOutcome::Reverted { reason }) => {
                            crate::metrics::record_action(intent.kind.as_str(), "reverted");
                            ActionOutcome::Reverted { reason }
                        }
                        Ok(TxOutcome::TimedOut) => {
                            // The tx may still land; events reconcile either way
                            crate::metrics::record_action(intent.kind.as_str(), "timed_out");
                            ActionOutcome::Failed {
                                error: "confirmation timeout".to_string(),
                            }
                        }
                        Err(e) => {
                            crate::metrics::record_action(intent.kind.as_str(), "lost");
                            ActionOutcome::Failed {
                                error: format!("confirmation tracking failed: {}", e),
                            }
                        }
                    };
                    self.report(intent, outcome).await;
                    return;
                }

                Err(e) if e.is_reverted() => {
                    crate::metrics::record_action(intent.kind.as_str(), "reverted");
                    self.report(intent, ActionOutcome::Reverted { reason: e.to_string() })
                        .await;
                    return;
                }

                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_delay_ms, attempt);
                    warn!(
                        "Retryable error submitting {} for order {} (attempt {}/{}): {}; \
                         backing off {:?}",
                        intent.kind.as_str(),
                        hex::encode(intent.order_id),
                        attempt,
                        self.config.max_retries,
                        e,
                        delay
                    );
                    crate::metrics::record_action_retry(intent.chain_id);
                    tokio::time::sleep(delay).await;
                }

                Err(e) => {
                    error!(
                        "Giving up on {} for order {} after {} attempts: {}",
                        intent.kind.as_str(),
                        hex::encode(intent.order_id),
                        attempt,
                        e
                    );
                    crate::metrics::record_action(intent.kind.as_str(), "failed");
                    self.report(intent, ActionOutcome::Failed { error: e.to_string() })
                        .await;
                    return;
                }
            }
        }
    }

    fn build_call(&self, intent: &ActionIntent) -> Result<EscrowCall, String> {
        if intent.kind.is_claim() {
            let secret = intent
                .secret
                .ok_or_else(|| "claim intent without a preimage".to_string())?;
            Ok(EscrowCall::Claim {
                escrow: intent.escrow.clone(),
                order_id: intent.order_id,
                secret,
            })
        } else {
            Ok(EscrowCall::Refund {
                escrow: intent.escrow.clone(),
                order_id: intent.order_id,
            })
        }
    }

    async fn report(&self, intent: &ActionIntent, outcome: ActionOutcome) {
        let report = ActionReport {
            order_id: intent.order_id,
            kind: intent.kind,
            outcome,
        };
        if self.reports_tx.send(report).await.is_err() {
            warn!("Report channel closed, engine gone");
        }
    }
}

/// Exponential backoff, capped at one minute.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay_ms = base_ms.saturating_mul(1u64 << exp).min(60_000);
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::adapter::{MockChainAdapter, TxHandle};
    use crate::error::RelayerError;
    use crate::store::MemoryStateStore;

    fn test_config(max_retries: u32) -> RelayerConfig {
        RelayerConfig {
            instance_id: "test".to_string(),
            poll_interval_ms: 50,
            tick_interval_ms: 50,
            max_scan_batch: 1000,
            max_concurrent_txs: 4,
            max_retries,
            retry_delay_ms: 1,
            confirmation_timeout_secs: 5,
            health_check_interval_secs: 30,
            retention_secs: 3600,
        }
    }

    async fn dispatcher_with(
        adapter: MockChainAdapter,
        max_retries: u32,
    ) -> (Arc<ActionDispatcher>, mpsc::Receiver<ActionReport>) {
        let store = Arc::new(MemoryStateStore::new());
        let (events_tx, _events_rx) = mpsc::channel(16);
        let chains = Arc::new(
            ChainManager::from_adapters(
                vec![Arc::new(adapter)],
                store,
                events_tx,
                Duration::from_millis(50),
                1000,
            )
            .await
            .unwrap(),
        );

        let (reports_tx, reports_rx) = mpsc::channel(16);
        let dispatcher = Arc::new(ActionDispatcher::new(
            chains,
            test_config(max_retries),
            reports_tx,
        ));
        (dispatcher, reports_rx)
    }

    fn refund_intent() -> ActionIntent {
        ActionIntent {
            order_id: [1u8; 32],
            kind: ActionKind::RefundDest,
            chain_id: 1,
            escrow: "0xbbbb".to_string(),
            secret: None,
        }
    }

    #[tokio::test]
    async fn reports_submitted_then_confirmed() {
        let mut adapter = MockChainAdapter::new();
        adapter.expect_chain_id().return_const(1u64);
        adapter.expect_confirmation_depth().return_const(2u64);
        adapter.expect_submit().times(1).returning(|_| {
            Ok(TxHandle {
                tx_hash: H256::repeat_byte(7),
                chain_id: 1,
            })
        });
        adapter
            .expect_wait_for_confirmation()
            .times(1)
            .returning(|_, _| Ok(TxOutcome::Confirmed { block: 120 }));

        let (dispatcher, mut reports) = dispatcher_with(adapter, 3).await;
        dispatcher.execute(&refund_intent()).await;

        let first = reports.recv().await.unwrap();
        assert!(matches!(first.outcome, ActionOutcome::Submitted { .. }));
        let second = reports.recv().await.unwrap();
        assert_eq!(second.outcome, ActionOutcome::Confirmed { block: 120 });
    }

    #[tokio::test]
    async fn retries_transient_errors_with_backoff() {
        let mut adapter = MockChainAdapter::new();
        adapter.expect_chain_id().return_const(1u64);
        adapter.expect_confirmation_depth().return_const(2u64);

        let mut attempts = 0;
        adapter.expect_submit().times(3).returning(move |_| {
            attempts += 1;
            if attempts < 3 {
                Err(RelayerError::Timeout {
                    operation: "submit".to_string(),
                })
            } else {
                Ok(TxHandle {
                    tx_hash: H256::repeat_byte(7),
                    chain_id: 1,
                })
            }
        });
        adapter
            .expect_wait_for_confirmation()
            .returning(|_, _| Ok(TxOutcome::Confirmed { block: 120 }));

        let (dispatcher, mut reports) = dispatcher_with(adapter, 5).await;
        dispatcher.execute(&refund_intent()).await;

        assert!(matches!(
            reports.recv().await.unwrap().outcome,
            ActionOutcome::Submitted { .. }
        ));
    }

    #[tokio::test]
    async fn reverted_submissions_are_not_retried() {
        let mut adapter = MockChainAdapter::new();
        adapter.expect_chain_id().return_const(1u64);
        adapter.expect_confirmation_depth().return_const(2u64);
        adapter.expect_submit().times(1).returning(|_| {
            Err(RelayerError::TxReverted {
                chain_id: 1,
                reason: "already refunded".to_string(),
            })
        });

        let (dispatcher, mut reports) = dispatcher_with(adapter, 5).await;
        dispatcher.execute(&refund_intent()).await;

        let report = reports.recv().await.unwrap();
        assert!(matches!(report.outcome, ActionOutcome::Reverted { .. }));
    }

    #[tokio::test]
    async fn claim_without_secret_fails_cleanly() {
        let mut adapter = MockChainAdapter::new();
        adapter.expect_chain_id().return_const(1u64);
        let (dispatcher, mut reports) = dispatcher_with(adapter, 3).await;

        let mut intent = refund_intent();
        intent.kind = ActionKind::ClaimDest;
        dispatcher.execute(&intent).await;

        let report = reports.recv().await.unwrap();
        assert!(matches!(report.outcome, ActionOutcome::Failed { .. }));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(500, 20), Duration::from_millis(60_000));
    }
}
