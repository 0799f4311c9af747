//! End-to-end swap lifecycle tests against simulated chains
//!
//! A `SimChain` stands in for a chain family behind the `ChainAdapter`
//! trait: it serves heights and escrow events, and executes submitted
//! claims/refunds by emitting the corresponding event a block later.

use async_trait::async_trait;
use ethers::types::{H256, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;

use htlc_relayer::chain::{ChainAdapter, ChainManager, EscrowCall, TxHandle, TxOutcome};
use htlc_relayer::config::RelayerConfig;
use htlc_relayer::dispatch::ActionDispatcher;
use htlc_relayer::error::RelayerResult;
use htlc_relayer::events::{EscrowEvent, EscrowEventKind, OrderId};
use htlc_relayer::store::{MemoryStateStore, StateStore};
use htlc_relayer::swap::{NewSwapOrder, SwapEngine, SwapState};
use htlc_relayer::vault::{Secret, SecretVault};

struct SimChain {
    chain_id: u64,
    height: AtomicU64,
    events: StdMutex<Vec<EscrowEvent>>,
    submissions: StdMutex<Vec<String>>,
}

impl SimChain {
    fn new(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            height: AtomicU64::new(1),
            events: StdMutex::new(Vec::new()),
            submissions: StdMutex::new(Vec::new()),
        })
    }

    fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    fn push_event(&self, order_id: OrderId, kind: EscrowEventKind, block: u64) {
        self.events.lock().unwrap().push(EscrowEvent {
            chain_id: self.chain_id,
            order_id,
            kind,
            block,
            tx_hash: H256::random(),
        });
        if block > self.height.load(Ordering::SeqCst) {
            self.set_height(block);
        }
    }

    fn fund(&self, order_id: OrderId, hashlock: [u8; 32], timeout: u64, block: u64) {
        self.push_event(
            order_id,
            EscrowEventKind::Funded {
                hashlock,
                amount: U256::from(100u64),
                timeout,
            },
            block,
        );
    }

    fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainAdapter for SimChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn confirmation_depth(&self) -> u64 {
        0
    }

    async fn current_height(&self) -> RelayerResult<u64> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn submit(&self, call: EscrowCall) -> RelayerResult<TxHandle> {
        self.submissions.lock().unwrap().push(call.method().to_string());

        // The simulated chain executes the call in the next block
        let execution_block = self.height.load(Ordering::SeqCst) + 1;
        match &call {
            EscrowCall::Claim {
                order_id, secret, ..
            } => {
                self.push_event(
                    *order_id,
                    EscrowEventKind::Claimed {
                        secret: *secret.as_bytes(),
                    },
                    execution_block,
                );
            }
            EscrowCall::Refund { order_id, .. } => {
                self.push_event(*order_id, EscrowEventKind::Refunded, execution_block);
            }
        }

        Ok(TxHandle {
            tx_hash: H256::random(),
            chain_id: self.chain_id,
        })
    }

    async fn wait_for_confirmation(
        &self,
        _handle: &TxHandle,
        _min_confirmations: u64,
    ) -> RelayerResult<TxOutcome> {
        Ok(TxOutcome::Confirmed {
            block: self.height.load(Ordering::SeqCst),
        })
    }

    async fn escrow_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> RelayerResult<Vec<EscrowEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block >= from_block && e.block <= to_block)
            .cloned()
            .collect())
    }
}

fn fast_config() -> RelayerConfig {
    RelayerConfig {
        instance_id: "test".to_string(),
        poll_interval_ms: 20,
        tick_interval_ms: 20,
        max_scan_batch: 10_000,
        max_concurrent_txs: 4,
        max_retries: 3,
        retry_delay_ms: 10,
        confirmation_timeout_secs: 5,
        health_check_interval_secs: 30,
        retention_secs: 3600,
    }
}

const TIMEOUT_DEST: u64 = 500;
const TIMEOUT_SOURCE: u64 = 600;

fn order_for(secret: &Secret, id: u8) -> NewSwapOrder {
    NewSwapOrder {
        order_id: [id; 32],
        source_chain: 1,
        dest_chain: 137,
        hashlock: secret.hashlock(),
        source_escrow: "0x1111111111111111111111111111111111111111".to_string(),
        dest_escrow: "0x2222222222222222222222222222222222222222".to_string(),
        maker_amount: U256::from(100u64),
        taker_amount: U256::from(200u64),
        timeout_source: TIMEOUT_SOURCE,
        timeout_dest: TIMEOUT_DEST,
    }
}

struct Harness {
    engine: Arc<SwapEngine>,
    source: Arc<SimChain>,
    dest: Arc<SimChain>,
}

/// Wire up store, vault, watchers, engine and dispatcher against two
/// simulated chains and spawn every loop.
async fn start_harness() -> Harness {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let source = SimChain::new(1);
    let dest = SimChain::new(137);

    let (events_tx, events_rx) = mpsc::channel(1024);
    let (actions_tx, actions_rx) = mpsc::channel(256);
    let (reports_tx, reports_rx) = mpsc::channel(256);

    let chains = Arc::new(
        ChainManager::from_adapters(
            vec![source.clone() as Arc<dyn ChainAdapter>, dest.clone()],
            store.clone(),
            events_tx,
            Duration::from_millis(20),
            10_000,
        )
        .await
        .unwrap(),
    );

    let vault = Arc::new(SecretVault::load(store.clone()).await.unwrap());
    let engine = Arc::new(
        SwapEngine::new(
            store.clone(),
            vault,
            chains.clone(),
            actions_tx,
            fast_config(),
        )
        .await
        .unwrap(),
    );
    let dispatcher = Arc::new(ActionDispatcher::new(
        chains.clone(),
        fast_config(),
        reports_tx,
    ));

    tokio::spawn({
        let chains = chains.clone();
        async move {
            let _ = chains.start_watchers().await;
        }
    });
    tokio::spawn({
        let engine = engine.clone();
        async move {
            let _ = engine.run(events_rx, reports_rx).await;
        }
    });
    tokio::spawn(dispatcher.run(actions_rx));

    Harness {
        engine,
        source,
        dest,
    }
}

async fn wait_for_state(
    engine: &SwapEngine,
    order_id: &OrderId,
    expected: SwapState,
) -> SwapState {
    for _ in 0..250 {
        if let Some(order) = engine.get_order(order_id).await {
            if order.state == expected {
                return order.state;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine
        .get_order(order_id)
        .await
        .map(|o| o.state)
        .unwrap_or(SwapState::AwaitingFunding)
}

#[tokio::test]
async fn funded_swap_runs_to_completion() {
    let harness = start_harness().await;

    let secret = Secret::new([7u8; 32]);
    let order = order_for(&secret, 1);
    let order_id = order.order_id;
    let hashlock = order.hashlock;

    harness
        .engine
        .submit_order(order, secret)
        .await
        .unwrap();

    // Both legs fund; the coordinator takes it from there
    harness.source.fund(order_id, hashlock, TIMEOUT_SOURCE, 100);
    harness.dest.fund(order_id, hashlock, TIMEOUT_DEST, 101);

    let state = wait_for_state(&harness.engine, &order_id, SwapState::Completed).await;
    assert_eq!(state, SwapState::Completed);

    let order = harness.engine.get_order(&order_id).await.unwrap();
    assert!(order.secret.is_some(), "secret recorded once revealed");
    assert!(order.source_leg.claimed());
    assert!(order.dest_leg.claimed());
    assert!(!order.needs_attention);

    // Claims only, never a refund
    assert!(harness.dest.submission_count() >= 1);
    assert!(harness.source.submission_count() >= 1);
    assert!(harness.dest.submissions.lock().unwrap().iter().all(|m| m == "claim"));
    assert!(harness.source.submissions.lock().unwrap().iter().all(|m| m == "claim"));
}

#[tokio::test]
async fn unfunded_swap_expires_without_any_transaction() {
    let harness = start_harness().await;

    let secret = Secret::new([8u8; 32]);
    let order = order_for(&secret, 2);
    let order_id = order.order_id;

    harness
        .engine
        .submit_order(order, secret)
        .await
        .unwrap();

    // Nobody funds; the dest timeout passes
    harness.source.set_height(TIMEOUT_DEST + 1);
    harness.dest.set_height(TIMEOUT_DEST + 1);

    let state = wait_for_state(&harness.engine, &order_id, SwapState::ExpiredUnfunded).await;
    assert_eq!(state, SwapState::ExpiredUnfunded);

    assert_eq!(harness.source.submission_count(), 0);
    assert_eq!(harness.dest.submission_count(), 0);

    let order = harness.engine.get_order(&order_id).await.unwrap();
    assert!(order.secret.is_none(), "no disclosure for an unfunded swap");
}

#[tokio::test]
async fn contradictory_dest_events_halt_the_order() {
    let harness = start_harness().await;

    let secret = Secret::new([9u8; 32]);
    let order = order_for(&secret, 3);
    let order_id = order.order_id;
    let hashlock = order.hashlock;

    harness
        .engine
        .submit_order(order, secret)
        .await
        .unwrap();

    harness.source.fund(order_id, hashlock, TIMEOUT_SOURCE, 100);
    harness.dest.fund(order_id, hashlock, TIMEOUT_DEST, 101);

    let state = wait_for_state(&harness.engine, &order_id, SwapState::Completed).await;
    assert_eq!(state, SwapState::Completed);

    // A refund event appears on the already-claimed dest leg
    let refund_block = harness.dest.current_height().await.unwrap() + 1;
    harness
        .dest
        .push_event(order_id, EscrowEventKind::Refunded, refund_block);

    let state = wait_for_state(&harness.engine, &order_id, SwapState::Inconsistent).await;
    assert_eq!(state, SwapState::Inconsistent);

    let order = harness.engine.get_order(&order_id).await.unwrap();
    assert!(order.needs_attention);
}

/// Restart recovery: processing half the event sequence, restarting from the
/// persisted store, then processing the rest must land in the same final
/// state as an uninterrupted run.
#[tokio::test]
async fn restart_recovery_reproduces_final_state() {
    async fn direct_engine(
        store: Arc<dyn StateStore>,
    ) -> (Arc<SwapEngine>, mpsc::Receiver<htlc_relayer::dispatch::ActionIntent>) {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (actions_tx, actions_rx) = mpsc::channel(256);
        let chains = Arc::new(
            ChainManager::from_adapters(
                Vec::new(),
                store.clone(),
                events_tx,
                Duration::from_millis(20),
                1000,
            )
            .await
            .unwrap(),
        );
        let vault = Arc::new(SecretVault::load(store.clone()).await.unwrap());
        let engine = Arc::new(
            SwapEngine::new(store, vault, chains, actions_tx, fast_config())
                .await
                .unwrap(),
        );
        (engine, actions_rx)
    }

    let secret = Secret::new([5u8; 32]);
    let order_id = [4u8; 32];
    let hashlock = secret.hashlock();

    let event = |chain_id: u64, kind: EscrowEventKind, block: u64| EscrowEvent {
        chain_id,
        order_id,
        kind,
        block,
        tx_hash: H256::zero(),
    };
    let sequence = vec![
        event(
            1,
            EscrowEventKind::Funded {
                hashlock,
                amount: U256::from(100u64),
                timeout: TIMEOUT_SOURCE,
            },
            100,
        ),
        event(
            137,
            EscrowEventKind::Funded {
                hashlock,
                amount: U256::from(100u64),
                timeout: TIMEOUT_DEST,
            },
            101,
        ),
        event(
            137,
            EscrowEventKind::Claimed {
                secret: *secret.as_bytes(),
            },
            110,
        ),
        event(
            1,
            EscrowEventKind::Claimed {
                secret: *secret.as_bytes(),
            },
            115,
        ),
    ];

    // Uninterrupted run
    let store_a: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let (engine_a, _actions_a) = direct_engine(store_a.clone()).await;
    engine_a
        .submit_order(order_for(&secret, 4), secret)
        .await
        .unwrap();
    for e in &sequence {
        engine_a.handle_event(e.clone()).await;
    }
    let final_a = engine_a.get_order(&order_id).await.unwrap();
    assert_eq!(final_a.state, SwapState::Completed);

    // Interrupted run: crash after the funding events
    let store_b: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let (engine_b1, _actions_b1) = direct_engine(store_b.clone()).await;
    engine_b1
        .submit_order(order_for(&secret, 4), secret)
        .await
        .unwrap();
    for e in &sequence[..2] {
        engine_b1.handle_event(e.clone()).await;
    }
    drop(engine_b1);

    // Fresh process over the same store picks up the rest
    let (engine_b2, _actions_b2) = direct_engine(store_b.clone()).await;
    for e in &sequence[2..] {
        engine_b2.handle_event(e.clone()).await;
    }

    let final_b = engine_b2.get_order(&order_id).await.unwrap();
    assert_eq!(final_b.state, final_a.state);
    assert_eq!(final_b.source_leg, final_a.source_leg);
    assert_eq!(final_b.dest_leg, final_a.dest_leg);
    assert_eq!(final_b.secret, final_a.secret);
}
