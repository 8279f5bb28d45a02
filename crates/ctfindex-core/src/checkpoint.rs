//! Sync checkpoint: the scanner's durable position for crash recovery.
//!
//! A single logical row holds the last fully processed block and the running
//! trade total. The scanner advances it only after a batch's trades are
//! committed, so on restart it resumes at `last_block + 1` and at worst
//! re-scans (idempotently) the batch that was in flight.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::IndexerError;

/// Blocks behind the head a fresh store starts from.
pub const DEFAULT_INITIAL_OFFSET: u64 = 1000;

/// The persisted sync position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Last block whose trades are durably stored.
    pub last_block: u64,
    /// Trades inserted over the store's lifetime.
    pub total_trades: u64,
    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

impl SyncCheckpoint {
    pub fn new(last_block: u64, total_trades: u64) -> Self {
        Self {
            last_block,
            total_trades,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Storage for the single checkpoint row.
///
/// Implemented by `MemoryCheckpointStore` here and by the backends in
/// `ctfindex-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<SyncCheckpoint>, IndexerError>;

    /// Atomically upsert the row.
    async fn save(&self, checkpoint: SyncCheckpoint) -> Result<(), IndexerError>;
}

/// Guards checkpoint reads and writes for one scanner.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    initial_offset: u64,
    cached: Option<SyncCheckpoint>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, initial_offset: u64) -> Self {
        Self {
            store,
            initial_offset,
            cached: None,
        }
    }

    /// The last checkpoint read or written through this manager.
    pub fn current(&self) -> Option<SyncCheckpoint> {
        self.cached
    }

    /// Read the stored checkpoint without initialising it.
    pub async fn load(&mut self) -> Result<Option<SyncCheckpoint>, IndexerError> {
        let cp = self.store.load().await?;
        if cp.is_some() {
            self.cached = cp;
        }
        Ok(cp)
    }

    /// Return the checkpoint, creating it on first run at
    /// `current_height - initial_offset` (saturating at 0).
    pub async fn get(&mut self, current_height: u64) -> Result<SyncCheckpoint, IndexerError> {
        if let Some(cp) = self.load().await? {
            return Ok(cp);
        }
        let cp = SyncCheckpoint::new(current_height.saturating_sub(self.initial_offset), 0);
        tracing::info!(
            last_block = cp.last_block,
            current_height,
            initial_offset = self.initial_offset,
            "Initialising sync checkpoint"
        );
        self.store.save(cp).await?;
        self.cached = Some(cp);
        Ok(cp)
    }

    /// Overwrite the checkpoint. Moving `last_block` backwards is rejected.
    pub async fn set(
        &mut self,
        block: u64,
        total_trades: u64,
    ) -> Result<SyncCheckpoint, IndexerError> {
        if let Some(current) = self.existing().await? {
            if block < current.last_block {
                return Err(IndexerError::CheckpointRegression {
                    current: current.last_block,
                    attempted: block,
                });
            }
        }
        self.persist(SyncCheckpoint::new(block, total_trades)).await
    }

    /// Record a committed batch `[from, to]` with `inserted` new trades.
    ///
    /// `last_block` moves to `max(last_block, to)` only when the batch is
    /// contiguous with the checkpoint (`from <= last_block + 1`). A batch that
    /// starts past a gap adds to the total but leaves `last_block` alone, so
    /// the unscanned blocks in between are still picked up on resume.
    /// Re-scanning an older range never moves the checkpoint back.
    pub async fn advance(
        &mut self,
        from: u64,
        to: u64,
        inserted: u64,
    ) -> Result<SyncCheckpoint, IndexerError> {
        let (last_block, total) = match self.existing().await? {
            Some(cp) if from <= cp.last_block.saturating_add(1) => {
                (cp.last_block.max(to), cp.total_trades + inserted)
            }
            Some(cp) => {
                tracing::warn!(
                    from,
                    to,
                    last_block = cp.last_block,
                    "Batch is not contiguous with the checkpoint; keeping last_block"
                );
                (cp.last_block, cp.total_trades + inserted)
            }
            None => (to, inserted),
        };
        self.persist(SyncCheckpoint::new(last_block, total)).await
    }

    async fn existing(&mut self) -> Result<Option<SyncCheckpoint>, IndexerError> {
        match self.cached {
            Some(cp) => Ok(Some(cp)),
            None => self.load().await,
        }
    }

    async fn persist(&mut self, cp: SyncCheckpoint) -> Result<SyncCheckpoint, IndexerError> {
        self.store.save(cp).await?;
        self.cached = Some(cp);
        Ok(cp)
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory checkpoint row for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    row: RwLock<Option<SyncCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<SyncCheckpoint>, IndexerError> {
        Ok(*self.row.read().await)
    }

    async fn save(&self, checkpoint: SyncCheckpoint) -> Result<(), IndexerError> {
        *self.row.write().await = Some(checkpoint);
        Ok(())
    }
}
