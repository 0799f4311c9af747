//! Per-chain escrow event watcher
//!
//! Polls the chain adapter from a durable cursor up to the reorg-safe head
//! (current height minus the confirmation depth), normalizes escrow logs and
//! hands them to the swap engine. The cursor only advances after a scan's
//! events have all been handed off, so delivery is at-least-once; the engine
//! treats replays as no-ops. After downtime the watcher resumes from the
//! persisted cursor, never from the current head.

use crate::chain::adapter::ChainAdapter;
use crate::error::RelayerResult;
use crate::events::EscrowEvent;
use crate::store::StateStore;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

pub struct EventWatcher {
    adapter: Arc<dyn ChainAdapter>,
    store: Arc<dyn StateStore>,
    events_tx: mpsc::Sender<EscrowEvent>,
    poll_interval: Duration,
    max_scan_batch: u64,
    /// In-memory copy of the durable cursor
    cursor: RwLock<u64>,
    /// Last observed head per chain, shared with the engine for timer ticks
    heights: Arc<DashMap<u64, u64>>,
}

impl EventWatcher {
    pub async fn new(
        adapter: Arc<dyn ChainAdapter>,
        store: Arc<dyn StateStore>,
        events_tx: mpsc::Sender<EscrowEvent>,
        poll_interval: Duration,
        max_scan_batch: u64,
        heights: Arc<DashMap<u64, u64>>,
    ) -> RelayerResult<Self> {
        let cursor = store.get_cursor(adapter.chain_id()).await?;

        Ok(Self {
            adapter,
            store,
            events_tx,
            poll_interval,
            max_scan_batch,
            cursor: RwLock::new(cursor),
            heights,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.adapter.chain_id()
    }

    /// Main polling loop
    pub async fn run(&self, shutdown: Arc<RwLock<bool>>) -> RelayerResult<()> {
        loop {
            if *shutdown.read().await {
                return Ok(());
            }

            if let Err(e) = self.scan_once().await {
                warn!("Watcher scan failed for chain {}: {}", self.chain_id(), e);
                crate::metrics::record_watcher_error(self.chain_id());
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One scan window: cursor+1 up to the reorg-safe head, batch-limited.
    pub async fn scan_once(&self) -> RelayerResult<()> {
        let chain_id = self.chain_id();

        let head = self.adapter.current_height().await?;
        self.heights.insert(chain_id, head);
        crate::metrics::record_chain_height(chain_id, head);

        let safe_head = head.saturating_sub(self.adapter.confirmation_depth());
        let cursor = *self.cursor.read().await;
        if safe_head <= cursor {
            return Ok(());
        }

        let from_block = cursor + 1;
        let to_block = std::cmp::min(safe_head, cursor + self.max_scan_batch);

        debug!(
            "Chain {}: scanning blocks {} to {} (head {})",
            chain_id, from_block, to_block, head
        );

        let events = self.adapter.escrow_events(from_block, to_block).await?;

        for event in events {
            crate::metrics::record_event(chain_id, event.kind.name());
            if self.events_tx.send(event).await.is_err() {
                // Engine gone; keep the cursor so nothing is lost
                warn!("Event channel closed, holding cursor for chain {}", chain_id);
                return Ok(());
            }
        }

        // Hand-off complete, the cursor may move
        *self.cursor.write().await = to_block;
        self.store.save_cursor(chain_id, to_block).await?;
        crate::metrics::record_cursor(chain_id, to_block);

        Ok(())
    }
}
