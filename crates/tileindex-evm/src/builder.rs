//! Fluent builder API for assembling a scan + replay pipeline.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use alloy_primitives::address;
//! use tileindex_evm::{HttpLedgerClient, IndexerBuilder};
//! use tileindex_storage::InMemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(HttpLedgerClient::new("http://localhost:8545", Duration::from_secs(30))?);
//! let pipeline = IndexerBuilder::new()
//!     .deployer(address!("00000000000000000000000000000000000000d0"))
//!     .start_block(2_154_000)
//!     .confirmation_depth(12)
//!     .batch_size(500)
//!     .build(client, Arc::new(InMemoryStorage::new()))?;
//!
//! pipeline.run_scan_pass().await?;
//! pipeline.run_replay_pass().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use alloy_primitives::Address;

use tileindex_core::checkpoint::CheckpointStore;
use tileindex_core::config::{DeadZone, IndexerConfig, RetrySettings};
use tileindex_core::error::IndexerError;
use tileindex_core::lease::PassOutcome;
use tileindex_core::replay::{ReplayEngine, ReplaySettings};
use tileindex_core::store::{RawEventStore, TileStore};
use tileindex_core::types::Ether;

use crate::abi::ContractAbis;
use crate::client::LedgerClient;
use crate::decoder::EvmTransactionDecoder;
use crate::retry::RetryPolicy;
use crate::scanner::{BlockScanner, ScanSettings};

/// Fluent builder for `IndexerConfig` and the `Pipeline` built from it.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Start from an existing configuration (e.g. loaded from TOML).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    /// Set the first block to scan.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set confirmation depth (blocks behind the tip before scanning).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Set the number of blocks per `eth_getLogs` window.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn dead_zone(mut self, zone: Option<DeadZone>) -> Self {
        self.config.dead_zone = zone;
        self
    }

    pub fn contracts(mut self, primary: Address, wrapper: Address) -> Self {
        self.config.contracts.primary = primary;
        self.config.contracts.wrapper = wrapper;
        self
    }

    pub fn deployer(mut self, deployer: Address) -> Self {
        self.config.contracts.deployer = deployer;
        self
    }

    /// Add a deployment transaction hash, replayed as a creation marker.
    pub fn creation_tx(mut self, hash: impl Into<String>) -> Self {
        self.config.contracts.creation_tx_hashes.push(hash.into());
        self
    }

    pub fn tiles(mut self, count: u32, initial_price: Ether) -> Self {
        self.config.tile_count = count;
        self.config.initial_price = initial_price;
        self
    }

    /// Set the number of raw events read per replay query.
    pub fn replay_batch_size(mut self, size: usize) -> Self {
        self.config.replay_batch_size = size;
        self
    }

    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the scheduler interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the configuration and wire a `Pipeline` over one storage
    /// backend that holds raw events, tiles and both cursors.
    pub fn build<S>(
        self,
        client: Arc<dyn LedgerClient>,
        storage: Arc<S>,
    ) -> Result<Pipeline, IndexerError>
    where
        S: RawEventStore + TileStore + CheckpointStore + 'static,
    {
        Pipeline::new(self.config, client, storage)
    }
}

/// The two entry points an external scheduler drives.
pub struct Pipeline {
    config: IndexerConfig,
    scanner: BlockScanner,
    replay: ReplayEngine,
}

impl Pipeline {
    pub fn new<S>(
        config: IndexerConfig,
        client: Arc<dyn LedgerClient>,
        storage: Arc<S>,
    ) -> Result<Self, IndexerError>
    where
        S: RawEventStore + TileStore + CheckpointStore + 'static,
    {
        config.validate()?;
        let abis = ContractAbis::load()?;

        let scanner = BlockScanner::new(
            client.clone(),
            storage.clone(),
            storage.clone(),
            ScanSettings::from_config(&config, abis.tracked_topics()),
            RetryPolicy::from(&config.retry),
        );

        let decoder = EvmTransactionDecoder::new(client, config.contracts.clone())?;
        let replay = ReplayEngine::new(
            Arc::new(decoder),
            storage.clone(),
            storage.clone(),
            storage,
            ReplaySettings::from(&config),
        );

        Ok(Self {
            config,
            scanner,
            replay,
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn scanner(&self) -> &BlockScanner {
        &self.scanner
    }

    pub fn replay(&self) -> &ReplayEngine {
        &self.replay
    }

    /// Scan new confirmed blocks into the raw event store.
    pub async fn run_scan_pass(&self) -> Result<PassOutcome, IndexerError> {
        self.scanner.run_pass().await
    }

    /// Replay stored raw events into tiles and history.
    pub async fn run_replay_pass(&self) -> Result<PassOutcome, IndexerError> {
        self.replay.run_pass().await
    }
}
