//! Block scanner — walks the ledger window by window into the raw event store.
//!
//! # Pass
//! 1. Take the scan lease (skip if another pass holds it).
//! 2. Load the cursor (last fully stored block) and the confirmed target
//!    `tip - confirmation_depth`. A cursor at or past the target is
//!    "up to date", not an error.
//! 3. For each window `[cursor + 1, end]`: fetch logs for both contracts,
//!    sort them, resolve transactions and block timestamps, append the whole
//!    window, then advance the cursor to `end`.
//!
//! The dead zone is never fetched: the cursor jumps straight to its exit.
//! Transient failures retry the same window with capped exponential backoff
//! and the pass gives up with `RetriesExhausted` after `max_retries`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use tileindex_core::checkpoint::{CheckpointManager, CheckpointStore, CursorKind};
use tileindex_core::config::{DeadZone, IndexerConfig};
use tileindex_core::error::IndexerError;
use tileindex_core::lease::{PassLease, PassOutcome, PassStats};
use tileindex_core::store::RawEventStore;
use tileindex_core::types::{normalize_hash, AppendOutcome, NewRawEvent};

use crate::client::{LedgerClient, RawLog};
use crate::retry::RetryPolicy;

/// Scan parameters, usually derived from `IndexerConfig`.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub start_block: u64,
    pub confirmation_depth: u64,
    pub batch_size: u64,
    pub dead_zone: Option<DeadZone>,
    pub addresses: Vec<Address>,
    pub topics: Vec<B256>,
}

impl ScanSettings {
    pub fn from_config(config: &IndexerConfig, topics: Vec<B256>) -> Self {
        Self {
            start_block: config.start_block,
            confirmation_depth: config.confirmation_depth,
            batch_size: config.batch_size.max(1),
            dead_zone: config.dead_zone,
            addresses: vec![config.contracts.primary, config.contracts.wrapper],
            topics,
        }
    }
}

/// Result of one fully stored window.
#[derive(Debug, Default, Clone, Copy)]
struct WindowStats {
    inserted: u64,
    duplicates: u64,
}

pub struct BlockScanner {
    client: Arc<dyn LedgerClient>,
    events: Arc<dyn RawEventStore>,
    checkpoint: CheckpointManager,
    settings: ScanSettings,
    retry: RetryPolicy,
    lease: PassLease,
}

impl BlockScanner {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        events: Arc<dyn RawEventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: ScanSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            events,
            checkpoint: CheckpointManager::new(checkpoints, CursorKind::Scan),
            settings,
            retry,
            lease: PassLease::new(),
        }
    }

    pub fn lease(&self) -> &PassLease {
        &self.lease
    }

    /// Run one scan pass from the cursor up to the confirmed tip.
    pub async fn run_pass(&self) -> Result<PassOutcome, IndexerError> {
        let Some(_guard) = self.lease.try_acquire() else {
            info!("scan pass already in progress, skipping");
            return Ok(PassOutcome::Skipped);
        };

        let mut cursor = match self.checkpoint.load().await? {
            Some(block) => block,
            None => self.settings.start_block.saturating_sub(1),
        };
        let mut stats = PassStats {
            cursor,
            ..Default::default()
        };

        let tip = self
            .with_retry("eth_blockNumber", || self.client.block_number())
            .await?;
        let target = tip.saturating_sub(self.settings.confirmation_depth);

        if cursor >= target {
            info!(cursor, target, "scan up to date");
            return Ok(PassOutcome::Completed(stats));
        }

        info!(from = cursor + 1, target, "scan pass starting");

        while cursor < target {
            let next = cursor + 1;

            if let Some(zone) = self.settings.dead_zone.filter(|z| z.contains(next)) {
                let exit = zone.resume_at - 1;
                info!(from = next, resume_at = zone.resume_at, "skipping dead zone");
                self.checkpoint.advance(exit).await?;
                stats.units += exit - cursor;
                cursor = exit;
                continue;
            }

            let end = self.window_end(next, target);
            let window = self
                .with_retry("scan window", || self.scan_window(next, end))
                .await?;

            self.checkpoint.advance(end).await?;
            stats.units += end - cursor;
            stats.applied += window.inserted;
            stats.duplicates += window.duplicates;
            cursor = end;

            info!(
                window_start = next,
                window_end = end,
                target,
                stored = window.inserted,
                duplicates = window.duplicates,
                "scan window complete"
            );
        }

        stats.cursor = cursor;
        info!(
            blocks = stats.units,
            stored = stats.applied,
            cursor,
            "scan pass complete"
        );
        Ok(PassOutcome::Completed(stats))
    }

    /// Last block of the window starting at `next`: at most `batch_size`
    /// blocks, never past `target`, never into the dead zone.
    fn window_end(&self, next: u64, target: u64) -> u64 {
        let mut end = next
            .saturating_add(self.settings.batch_size - 1)
            .min(target);
        if let Some(zone) = self.settings.dead_zone {
            if zone.start > next && end >= zone.start {
                end = zone.start - 1;
            }
        }
        end
    }

    /// Fetch, resolve and store every tracked log in `[from, to]`.
    async fn scan_window(&self, from: u64, to: u64) -> Result<WindowStats, IndexerError> {
        let logs = self
            .client
            .logs(&self.settings.addresses, &self.settings.topics, from, to)
            .await?;

        let mut positioned = Vec::with_capacity(logs.len());
        for log in logs.into_iter().filter(|l| !l.is_removed()) {
            positioned.push((log.block_number_u64()?, log.log_index_u32()?, log));
        }
        positioned.sort_by_key(|(block, index, _)| (*block, *index));

        let mut transactions: HashMap<String, Value> = HashMap::new();
        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut batch = Vec::with_capacity(positioned.len());

        for (block, log_index, log) in positioned {
            let tx_hash = normalize_hash(&log.tx_hash);

            let transaction = match transactions.get(&tx_hash) {
                Some(tx) => tx.clone(),
                None => {
                    let tx = self.client.transaction(&tx_hash).await?.ok_or_else(|| {
                        IndexerError::Rpc(format!("transaction {tx_hash} not found"))
                    })?;
                    transactions.insert(tx_hash.clone(), tx.clone());
                    tx
                }
            };

            let timestamp = match timestamps.get(&block) {
                Some(ts) => *ts,
                None => {
                    let ts = self.client.block_timestamp(block).await?;
                    timestamps.insert(block, ts);
                    ts
                }
            };

            batch.push(NewRawEvent {
                block_number: block,
                tx_hash,
                log_index,
                log: log_json(&log)?,
                transaction: with_timestamp(transaction, timestamp)?,
            });
        }

        let mut stats = WindowStats::default();
        if batch.is_empty() {
            return Ok(stats);
        }
        for outcome in self.events.append_batch(batch).await? {
            match outcome {
                AppendOutcome::Inserted { .. } => stats.inserted += 1,
                AppendOutcome::Duplicate => stats.duplicates += 1,
            }
        }
        Ok(stats)
    }

    /// Run `op`, retrying transient failures per the retry policy.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            warn!(
                                operation,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "transient failure, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(operation, attempts = attempt, error = %e, "retries exhausted");
                            return Err(IndexerError::RetriesExhausted {
                                operation: operation.to_string(),
                                attempts: attempt,
                                last_error: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    debug!(operation, error = %e, "non-transient failure");
                    return Err(e);
                }
            }
        }
    }
}

fn log_json(log: &RawLog) -> Result<Value, IndexerError> {
    serde_json::to_value(log).map_err(|e| IndexerError::Other(format!("log serialization: {e}")))
}

/// The transaction JSON with the block time stored under `"timestamp"`.
fn with_timestamp(mut tx: Value, timestamp: u64) -> Result<Value, IndexerError> {
    match tx.as_object_mut() {
        Some(obj) => {
            obj.insert("timestamp".into(), json!(timestamp));
            Ok(tx)
        }
        None => Err(IndexerError::Rpc(format!("transaction is not an object: {tx}"))),
    }
}
