//! The checkpointed scan loop.
//!
//! Each cycle takes the next block range after the cursor, fetches the tracked
//! logs, decodes and enriches them, stores the trades in one transaction and
//! only then advances the checkpoint. A failure anywhere in the cycle leaves
//! the checkpoint untouched, so the same range is requested again.
//!
//! # Bounded mode
//! Scan up to `to` (or the current head) and return a [`ScanSummary`]. A batch
//! that keeps failing aborts the run after `max_batch_retries` retries.
//!
//! # Continuous mode
//! Catch up, then poll the head every `poll_interval_ms`. Failures are logged
//! and retried forever; the loop exits only when the cancellation token
//! fires, which is checked between batches and during sleeps.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use ctfindex_core::checkpoint::{CheckpointManager, CheckpointStore, SyncCheckpoint};
use ctfindex_core::decoder::TradeLogDecoder;
use ctfindex_core::enricher::MarketEnricher;
use ctfindex_core::error::IndexerError;
use ctfindex_core::indexer::{ScannerConfig, ScannerState};
use ctfindex_core::store::TradeStore;
use ctfindex_core::types::Trade;

use crate::client::ChainClient;

/// Result of a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub from_block: u64,
    pub to_block: u64,
    pub trades_inserted: u64,
}

pub struct IndexerScanner<C: ChainClient> {
    config: ScannerConfig,
    client: C,
    decoder: TradeLogDecoder,
    enricher: Option<MarketEnricher>,
    trades: Arc<dyn TradeStore>,
    checkpoint: CheckpointManager,
    state: ScannerState,
}

impl<C: ChainClient> IndexerScanner<C> {
    pub fn new(
        config: ScannerConfig,
        client: C,
        trades: Arc<dyn TradeStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        enricher: Option<MarketEnricher>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        Ok(Self {
            decoder: TradeLogDecoder::new(config.exchanges.clone(), config.topic0),
            checkpoint: CheckpointManager::new(checkpoints, config.initial_offset),
            config,
            client,
            enricher,
            trades,
            state: ScannerState::Idle,
        })
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// The checkpoint as last seen by this scanner.
    pub fn checkpoint(&self) -> Option<SyncCheckpoint> {
        self.checkpoint.current()
    }

    /// Fetch, decode, enrich and store `[from, to]`, then advance the
    /// checkpoint to `to`. Returns the number of newly inserted trades.
    ///
    /// The state is `Committed` on success and `BatchFailed` on error.
    pub async fn scan_batch(&mut self, from: u64, to: u64) -> Result<u64, IndexerError> {
        self.state = ScannerState::ScanningBatch;
        match self.commit_batch(from, to).await {
            Ok(inserted) => {
                self.state = ScannerState::Committed;
                Ok(inserted)
            }
            Err(e) => {
                self.state = ScannerState::BatchFailed;
                Err(e)
            }
        }
    }

    async fn commit_batch(&mut self, from: u64, to: u64) -> Result<u64, IndexerError> {
        let logs = self
            .client
            .get_logs(from, to, self.decoder.exchanges(), self.decoder.topic0())
            .await?;

        let decoded = self
            .decoder
            .decode_batch(&logs, chrono::Utc::now().timestamp());
        let candidates = match &self.enricher {
            Some(enricher) => enricher.enrich_batch(decoded.trades).await,
            None => decoded.trades,
        };

        let inserted = if candidates.is_empty() {
            0
        } else {
            self.trades.insert_trades(&candidates).await?
        };
        let cp = self.checkpoint.advance(from, to, inserted).await?;
        let volume: f64 = candidates
            .iter()
            .filter(|t| t.price_valid)
            .map(Trade::notional)
            .sum();

        tracing::info!(
            from,
            to,
            logs = logs.len(),
            decoded = candidates.len(),
            inserted,
            removed = decoded.removed,
            non_collateral = decoded.non_collateral,
            rejected = decoded.rejected,
            volume,
            total = cp.total_trades,
            "Batch committed"
        );
        Ok(inserted)
    }

    fn batch_end(&self, from: u64, target: u64) -> u64 {
        from.saturating_add(self.config.batch_size - 1).min(target)
    }

    /// Scan to `to` (default: current head) and stop.
    ///
    /// An explicit `from` starts the cursor there; otherwise the scan resumes
    /// after the checkpoint. The persisted checkpoint only moves forward.
    pub async fn run_bounded(
        &mut self,
        from: Option<u64>,
        to: Option<u64>,
    ) -> Result<ScanSummary, IndexerError> {
        let height = self.client.latest_height().await?;
        let cp = self.checkpoint.get(height).await?;

        let target = match to {
            Some(to) if to > height => {
                tracing::warn!(to, height, "Requested end block is past the head; clamping");
                height
            }
            Some(to) => to,
            None => height,
        };
        let start = from.unwrap_or(cp.last_block + 1);

        let mut summary = ScanSummary {
            from_block: start,
            to_block: target,
            trades_inserted: 0,
        };
        if start > target {
            tracing::info!(start, target, "Nothing to scan");
            self.state = ScannerState::Stopped;
            return Ok(summary);
        }

        tracing::info!(from = start, to = target, height, "Starting bounded scan");

        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut next = start;
        while next <= target {
            let end = self.batch_end(next, target);
            let mut failures = 0u32;
            loop {
                match self.scan_batch(next, end).await {
                    Ok(inserted) => {
                        summary.trades_inserted += inserted;
                        break;
                    }
                    Err(e) => {
                        failures += 1;
                        if failures > self.config.max_batch_retries {
                            tracing::error!(
                                from = next,
                                to = end,
                                failures,
                                error = %e,
                                "Batch failed; giving up"
                            );
                            self.state = ScannerState::Stopped;
                            let reason =
                                format!("batch [{next}, {end}] failed {failures} times: {e}");
                            return Err(IndexerError::Aborted { reason });
                        }
                        tracing::warn!(
                            from = next,
                            to = end,
                            attempt = failures,
                            error = %e,
                            "Batch failed; retrying"
                        );
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
            next = end + 1;
        }

        self.state = ScannerState::Stopped;
        tracing::info!(
            from = summary.from_block,
            to = summary.to_block,
            inserted = summary.trades_inserted,
            "Bounded scan complete"
        );
        Ok(summary)
    }

    /// Follow the chain head until `cancel` fires.
    ///
    /// `from` overrides the starting cursor like in bounded mode.
    pub async fn run_continuous(
        &mut self,
        from: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<ScanSummary, IndexerError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);

        let mut cursor = from;
        let mut target: Option<u64> = None;
        let mut summary = ScanSummary {
            from_block: from.unwrap_or(0),
            to_block: 0,
            trades_inserted: 0,
        };

        tracing::info!(poll_ms = self.config.poll_interval_ms, "Starting continuous scan");

        while !cancel.is_cancelled() {
            // Refresh the head once the known target is exhausted.
            let needs_head = match (cursor, target) {
                (Some(c), Some(t)) => c > t,
                _ => true,
            };
            if needs_head {
                let height = match self.client.latest_height().await {
                    Ok(h) => h,
                    Err(e) => {
                        self.state = ScannerState::BatchFailed;
                        tracing::warn!(error = %e, "Failed to read chain head; retrying");
                        if sleep_or_cancel(retry_delay, &cancel).await {
                            break;
                        }
                        continue;
                    }
                };
                if cursor.is_none() {
                    match self.checkpoint.get(height).await {
                        Ok(cp) => {
                            cursor = Some(cp.last_block + 1);
                            summary.from_block = cp.last_block + 1;
                        }
                        Err(e) => {
                            self.state = ScannerState::BatchFailed;
                            tracing::warn!(error = %e, "Failed to read checkpoint; retrying");
                            if sleep_or_cancel(retry_delay, &cancel).await {
                                break;
                            }
                            continue;
                        }
                    }
                }
                target = Some(height);
            }

            let (Some(next), Some(head)) = (cursor, target) else {
                continue;
            };
            if next > head {
                self.state = ScannerState::WaitingForNewBlocks;
                tracing::debug!(next, head, "Caught up; waiting for new blocks");
                if sleep_or_cancel(poll, &cancel).await {
                    break;
                }
                continue;
            }

            let end = self.batch_end(next, head);
            match self.scan_batch(next, end).await {
                Ok(inserted) => {
                    summary.trades_inserted += inserted;
                    summary.to_block = end;
                    cursor = Some(end + 1);
                }
                Err(e) => {
                    tracing::warn!(from = next, to = end, error = %e, "Batch failed; retrying");
                    if sleep_or_cancel(retry_delay, &cancel).await {
                        break;
                    }
                }
            }
        }

        self.state = ScannerState::Stopped;
        tracing::info!(
            inserted = summary.trades_inserted,
            last_block = summary.to_block,
            "Continuous scan stopped"
        );
        Ok(summary)
    }
}

/// Sleep for `duration`; returns `true` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use alloy_primitives::{Address, B256, U256};
    use async_trait::async_trait;

    use ctfindex_core::decoder::{CTF_EXCHANGE, ORDER_FILLED_TOPIC};
    use ctfindex_core::types::{to_hex_0x, Enrichment, RawLog, Side, Trade, TradeKey};
    use ctfindex_storage::InMemoryStorage;

    // ─── Scripted chain ───────────────────────────────────────────────────────

    #[derive(Default)]
    struct MockChain {
        height: Mutex<u64>,
        logs: Mutex<Vec<RawLog>>,
        requests: Mutex<Vec<(u64, u64)>>,
        /// Remaining `latest_height` calls that fail.
        height_failures: AtomicU32,
        /// Remaining `get_logs` calls that fail (after being recorded).
        log_failures: AtomicU32,
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    impl MockChain {
        fn with_height(height: u64) -> Arc<Self> {
            let chain = Self::default();
            *chain.height.lock().unwrap() = height;
            Arc::new(chain)
        }

        fn push_log(&self, log: RawLog) {
            self.logs.lock().unwrap().push(log);
        }

        fn set_height(&self, height: u64) {
            *self.height.lock().unwrap() = height;
        }

        fn requests(&self) -> Vec<(u64, u64)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn latest_height(&self) -> Result<u64, IndexerError> {
            if take_failure(&self.height_failures) {
                return Err(IndexerError::Connectivity("connection reset".into()));
            }
            Ok(*self.height.lock().unwrap())
        }

        async fn get_logs(
            &self,
            from: u64,
            to: u64,
            _addresses: &[Address],
            _topic0: B256,
        ) -> Result<Vec<RawLog>, IndexerError> {
            self.requests.lock().unwrap().push((from, to));
            if take_failure(&self.log_failures) {
                return Err(IndexerError::Connectivity("HTTP 503: unavailable".into()));
            }
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| {
                    let b = l.block_number_u64().unwrap_or(0);
                    b >= from && b <= to
                })
                .cloned()
                .collect())
        }

        async fn transaction_logs(
            &self,
            tx_hash: B256,
        ) -> Result<Option<Vec<RawLog>>, IndexerError> {
            let hash = to_hex_0x(tx_hash.as_slice());
            let logs: Vec<RawLog> = self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.tx_hash == hash)
                .cloned()
                .collect();
            Ok((!logs.is_empty()).then_some(logs))
        }
    }

    /// Trade store whose first `failures` inserts fail.
    struct FlakyStore {
        inner: Arc<InMemoryStorage>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl TradeStore for FlakyStore {
        async fn insert_trades(&self, trades: &[Trade]) -> Result<u64, IndexerError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(IndexerError::Storage("database is locked".into()));
            }
            self.inner.insert_trades(trades).await
        }

        async fn trade_count(&self) -> Result<u64, IndexerError> {
            self.inner.trade_count().await
        }

        async fn unenriched_trades(&self, limit: usize) -> Result<Vec<Trade>, IndexerError> {
            self.inner.unenriched_trades(limit).await
        }

        async fn set_enrichment(
            &self,
            key: TradeKey,
            e: &Enrichment,
        ) -> Result<bool, IndexerError> {
            self.inner.set_enrichment(key, e).await
        }
    }

    // ─── Log fixtures ─────────────────────────────────────────────────────────

    fn word_u256(v: U256) -> String {
        hex::encode(v.to_be_bytes::<32>())
    }

    fn word_address(a: Address) -> String {
        format!("{:0>64}", hex::encode(a.as_slice()))
    }

    fn fill_log(
        block: u64,
        tx_byte: u8,
        log_index: u64,
        maker_asset: u64,
        taker_asset: u64,
        maker_amount: u64,
        taker_amount: u64,
    ) -> RawLog {
        let data = [
            hex::encode(B256::repeat_byte(0x0d)),
            word_address(Address::repeat_byte(0xa1)),
            word_address(Address::repeat_byte(0xb2)),
            word_u256(U256::from(maker_asset)),
            word_u256(U256::from(taker_asset)),
            word_u256(U256::from(maker_amount)),
            word_u256(U256::from(taker_amount)),
            word_u256(U256::ZERO),
        ]
        .concat();
        RawLog {
            address: to_hex_0x(CTF_EXCHANGE.as_slice()),
            topics: vec![to_hex_0x(ORDER_FILLED_TOPIC.as_slice())],
            data: format!("0x{data}"),
            block_number: format!("0x{block:x}"),
            tx_hash: to_hex_0x(B256::repeat_byte(tx_byte).as_slice()),
            log_index: format!("0x{log_index:x}"),
            block_timestamp: None,
            removed: None,
        }
    }

    fn config(batch_size: u64) -> ScannerConfig {
        ScannerConfig {
            batch_size,
            poll_interval_ms: 10,
            retry_delay_ms: 1,
            max_batch_retries: 3,
            ..Default::default()
        }
    }

    fn scanner(
        chain: Arc<MockChain>,
        storage: Arc<InMemoryStorage>,
        batch_size: u64,
    ) -> IndexerScanner<Arc<MockChain>> {
        IndexerScanner::new(config(batch_size), chain, storage.clone(), storage, None).unwrap()
    }

    // ─── Tests ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn single_buy_end_to_end() {
        let chain = MockChain::with_height(1000);
        chain.push_log(fill_log(1000, 0x11, 0, 0, 42, 1_000_000, 2_000_000));
        let storage = Arc::new(InMemoryStorage::new());
        storage.save(SyncCheckpoint::new(999, 0)).await.unwrap();

        let mut s = scanner(chain.clone(), storage.clone(), 100);
        let summary = s.run_bounded(Some(1000), Some(1000)).await.unwrap();

        assert_eq!(
            summary,
            ScanSummary { from_block: 1000, to_block: 1000, trades_inserted: 1 }
        );
        let trades = storage.all_trades().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[0].token_id, U256::from(42u64));
        assert_eq!(trades[0].price, 0.5);

        let cp = storage.load().await.unwrap().unwrap();
        assert_eq!(cp.last_block, 1000);
        assert_eq!(cp.total_trades, 1);
        assert_eq!(s.state(), ScannerState::Stopped);
    }

    #[tokio::test]
    async fn reingesting_same_range_inserts_nothing() {
        let chain = MockChain::with_height(2000);
        chain.push_log(fill_log(1500, 0x11, 0, 0, 42, 1_000_000, 2_000_000));
        chain.push_log(fill_log(1500, 0x11, 1, 42, 0, 2_000_000, 1_000_000));
        let storage = Arc::new(InMemoryStorage::new());

        let mut s = scanner(chain.clone(), storage.clone(), 250);
        let first = s.run_bounded(Some(1400), Some(1600)).await.unwrap();
        assert_eq!(first.trades_inserted, 2);

        let second = s.run_bounded(Some(1400), Some(1600)).await.unwrap();
        assert_eq!(second.trades_inserted, 0);
        assert_eq!(storage.trade_count().await.unwrap(), 2);
        assert_eq!(storage.load().await.unwrap().unwrap().total_trades, 2);
    }

    #[tokio::test]
    async fn storage_failure_leaves_checkpoint_and_retries_same_range() {
        let chain = MockChain::with_height(5000);
        chain.push_log(fill_log(4010, 0x21, 0, 0, 7, 300_000, 1_000_000));
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .save(SyncCheckpoint::new(3999, 0))
            .await
            .unwrap();

        let flaky = Arc::new(FlakyStore {
            inner: storage.clone(),
            failures: AtomicU32::new(1),
        });
        let mut s =
            IndexerScanner::new(config(100), chain.clone(), flaky, storage.clone(), None).unwrap();

        let err = s.scan_batch(4000, 4099).await.unwrap_err();
        assert!(err.is_storage());
        assert_eq!(storage.load().await.unwrap().unwrap().last_block, 3999);
        assert_eq!(s.state(), ScannerState::BatchFailed);

        let summary = s.run_bounded(None, Some(4099)).await.unwrap();
        assert_eq!(summary.from_block, 4000);
        assert_eq!(summary.trades_inserted, 1);
        assert_eq!(chain.requests(), vec![(4000, 4099), (4000, 4099)]);
        assert_eq!(storage.load().await.unwrap().unwrap().last_block, 4099);
    }

    #[tokio::test]
    async fn persistent_failure_aborts_bounded_run() {
        let chain = MockChain::with_height(100);
        chain.push_log(fill_log(50, 0x31, 0, 0, 7, 1, 2));
        let storage = Arc::new(InMemoryStorage::new());
        let flaky = Arc::new(FlakyStore {
            inner: storage.clone(),
            failures: AtomicU32::new(u32::MAX),
        });
        let mut s =
            IndexerScanner::new(config(1000), chain.clone(), flaky, storage.clone(), None).unwrap();

        let err = s.run_bounded(Some(0), Some(100)).await.unwrap_err();
        assert!(matches!(err, IndexerError::Aborted { .. }));
        // One attempt plus three retries.
        assert_eq!(chain.requests().len(), 4);
        assert_eq!(s.state(), ScannerState::Stopped);
    }

    #[tokio::test]
    async fn batches_respect_ceiling_and_target() {
        let chain = MockChain::with_height(10_000);
        let storage = Arc::new(InMemoryStorage::new());
        let mut s = scanner(chain.clone(), storage.clone(), 100);

        s.run_bounded(Some(1), Some(250)).await.unwrap();
        assert_eq!(chain.requests(), vec![(1, 100), (101, 200), (201, 250)]);
    }

    #[tokio::test]
    async fn first_run_starts_behind_head() {
        let chain = MockChain::with_height(50_000);
        let storage = Arc::new(InMemoryStorage::new());
        let mut s = scanner(chain.clone(), storage.clone(), 1000);

        let summary = s.run_bounded(None, None).await.unwrap();
        assert_eq!(summary.from_block, 49_001);
        assert_eq!(summary.to_block, 50_000);
        assert_eq!(chain.requests(), vec![(49_001, 50_000)]);
    }

    #[tokio::test]
    async fn rescanning_old_range_keeps_checkpoint() {
        let chain = MockChain::with_height(9000);
        let storage = Arc::new(InMemoryStorage::new());
        storage.save(SyncCheckpoint::new(8000, 10)).await.unwrap();

        let mut s = scanner(chain.clone(), storage.clone(), 500);
        s.run_bounded(Some(100), Some(200)).await.unwrap();
        assert_eq!(storage.load().await.unwrap().unwrap().last_block, 8000);
    }

    #[tokio::test]
    async fn explicit_start_past_checkpoint_leaves_gap_for_resume() {
        let chain = MockChain::with_height(7000);
        chain.push_log(fill_log(5500, 0x61, 0, 0, 9, 500_000, 1_000_000));
        chain.push_log(fill_log(2500, 0x62, 0, 0, 9, 250_000, 1_000_000));
        let storage = Arc::new(InMemoryStorage::new());
        storage.save(SyncCheckpoint::new(100, 0)).await.unwrap();
        let mut s = scanner(chain.clone(), storage.clone(), 1000);

        let ahead = s.run_bounded(Some(5000), Some(5999)).await.unwrap();
        assert_eq!(ahead.trades_inserted, 1);
        let cp = storage.load().await.unwrap().unwrap();
        assert_eq!(cp.last_block, 100);
        assert_eq!(cp.total_trades, 1);

        let resumed = s.run_bounded(None, Some(6999)).await.unwrap();
        assert_eq!(resumed.from_block, 101);
        assert_eq!(chain.requests()[1], (101, 1100));
        // The gap trade is picked up; the one already stored is not counted twice.
        assert_eq!(resumed.trades_inserted, 1);
        let cp = storage.load().await.unwrap().unwrap();
        assert_eq!(cp.last_block, 6999);
        assert_eq!(cp.total_trades, 2);
    }

    #[tokio::test]
    async fn non_collateral_log_dropped() {
        let chain = MockChain::with_height(10);
        chain.push_log(fill_log(5, 0x41, 0, 3, 4, 1_000_000, 1_000_000));
        chain.push_log(fill_log(5, 0x41, 1, 0, 4, 250_000, 1_000_000));
        let storage = Arc::new(InMemoryStorage::new());

        let mut s = scanner(chain, storage.clone(), 100);
        let summary = s.run_bounded(Some(1), Some(10)).await.unwrap();
        assert_eq!(summary.trades_inserted, 1);
        assert_eq!(storage.all_trades().await[0].log_index, 1);
    }

    #[tokio::test]
    async fn continuous_follows_head_until_cancelled() {
        let chain = MockChain::with_height(100);
        chain.push_log(fill_log(100, 0x51, 0, 0, 9, 100_000, 1_000_000));
        chain.push_log(fill_log(150, 0x52, 0, 0, 9, 200_000, 1_000_000));
        let storage = Arc::new(InMemoryStorage::new());
        let mut s = scanner(chain.clone(), storage.clone(), 1000);

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let summary = s.run_continuous(Some(90), cancel).await;
                (s, summary)
            })
        };

        // Wait for the first catch-up, then move the head.
        for _ in 0..200 {
            if storage.trade_count().await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        chain.set_height(160);
        for _ in 0..200 {
            if storage.trade_count().await.unwrap() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let (s, summary) = handle.await.unwrap();
        let summary = summary.unwrap();
        assert_eq!(summary.trades_inserted, 2);
        assert_eq!(summary.to_block, 160);
        assert_eq!(s.state(), ScannerState::Stopped);
        assert_eq!(storage.load().await.unwrap().unwrap().last_block, 160);
    }

    #[tokio::test]
    async fn continuous_rides_out_transient_failures() {
        let chain = MockChain::with_height(100);
        chain.push_log(fill_log(95, 0x71, 0, 0, 9, 300_000, 1_000_000));
        chain.height_failures.store(2, Ordering::SeqCst);
        chain.log_failures.store(2, Ordering::SeqCst);
        let storage = Arc::new(InMemoryStorage::new());
        storage.save(SyncCheckpoint::new(89, 0)).await.unwrap();
        let mut s = scanner(chain.clone(), storage.clone(), 1000);

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let summary = s.run_continuous(None, cancel).await;
                (s, summary)
            })
        };

        for _ in 0..400 {
            if storage.trade_count().await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Still running after the failures; only cancellation stops it.
        assert!(!handle.is_finished());
        cancel.cancel();

        let (s, summary) = handle.await.unwrap();
        let summary = summary.unwrap();
        assert_eq!(summary.from_block, 90);
        assert_eq!(summary.trades_inserted, 1);
        assert_eq!(summary.to_block, 100);
        assert_eq!(s.state(), ScannerState::Stopped);
        assert_eq!(chain.requests(), vec![(90, 100), (90, 100), (90, 100)]);
        assert_eq!(storage.load().await.unwrap().unwrap().last_block, 100);
    }

    #[tokio::test]
    async fn cancelled_before_start_scans_nothing() {
        let chain = MockChain::with_height(100);
        let storage = Arc::new(InMemoryStorage::new());
        let mut s = scanner(chain.clone(), storage, 10);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = s.run_continuous(None, cancel).await.unwrap();
        assert_eq!(summary.trades_inserted, 0);
        assert!(chain.requests().is_empty());
    }
}
