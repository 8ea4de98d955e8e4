//! Indexer configuration.

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::Ether;

/// The two tracked contracts and the facts replay needs about them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// The original tile contract.
    pub primary: Address,
    /// The ERC-721 wrapper contract that can hold tiles on behalf of users.
    pub wrapper: Address,
    /// Deployer of the primary contract; implicit owner of never-sold tiles.
    /// Deployment specific and required: the zero address is rejected.
    pub deployer: Address,
    /// Deployment transactions, replayed as `ContractCreation` markers.
    #[serde(default)]
    pub creation_tx_hashes: Vec<String>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            primary: address!("015a06a433353f8db634df4eddf0c109882a15ab"),
            wrapper: address!("050dc61dfb867e0fe3cf2948362b6c0f3faf790b"),
            deployer: Address::ZERO,
            creation_tx_hashes: vec![],
        }
    }
}

/// A fixed block range with no contract activity: `[start, resume_at)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadZone {
    pub start: u64,
    /// First block scanned again after the zone.
    pub resume_at: u64,
}

impl DeadZone {
    pub fn contains(&self, block: u64) -> bool {
        block >= self.start && block < self.resume_at
    }
}

/// Retry settings for transient ledger failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Consecutive failures tolerated before the pass gives up.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// JSON-RPC endpoint of the ledger.
    pub rpc_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    pub contracts: ContractsConfig,
    /// First block to scan.
    pub start_block: u64,
    /// Number of blocks behind the tip considered final.
    pub confirmation_depth: u64,
    /// Blocks per `eth_getLogs` window.
    pub batch_size: u64,
    pub dead_zone: Option<DeadZone>,
    /// Tiles are ids `0..tile_count`.
    pub tile_count: u32,
    pub initial_price: Ether,
    /// Raw events read per store query during replay.
    pub replay_batch_size: usize,
    /// Interval between scheduled passes in milliseconds.
    pub poll_interval_ms: u64,
    pub retry: RetrySettings,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".into(),
            request_timeout_ms: 30_000,
            contracts: ContractsConfig::default(),
            start_block: 2_154_000,
            confirmation_depth: 12,
            batch_size: 1000,
            dead_zone: Some(DeadZone {
                start: 3_000_000,
                resume_at: 12_700_000,
            }),
            tile_count: 3970,
            initial_price: Ether::from_ether(2),
            replay_batch_size: 500,
            poll_interval_ms: 60_000,
            retry: RetrySettings::default(),
        }
    }
}

impl IndexerConfig {
    /// Parse a TOML document; missing keys take their default value.
    pub fn from_toml_str(s: &str) -> Result<Self, IndexerError> {
        let config: Self = toml::from_str(s).map_err(|e| IndexerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be positive".into()));
        }
        if self.replay_batch_size == 0 {
            return Err(IndexerError::Config("replay_batch_size must be positive".into()));
        }
        if self.tile_count == 0 {
            return Err(IndexerError::Config("tile_count must be positive".into()));
        }
        if self.contracts.primary == self.contracts.wrapper {
            return Err(IndexerError::Config(
                "primary and wrapper contracts must differ".into(),
            ));
        }
        if self.contracts.deployer == Address::ZERO {
            return Err(IndexerError::Config(
                "contracts.deployer must be set to the primary contract's deployer".into(),
            ));
        }
        if let Some(zone) = self.dead_zone {
            if zone.resume_at <= zone.start {
                return Err(IndexerError::Config(format!(
                    "dead zone resume_at {} must be after start {}",
                    zone.resume_at, zone.start
                )));
            }
        }
        if self.retry.multiplier < 1.0 {
            return Err(IndexerError::Config("retry.multiplier must be >= 1".into()));
        }
        Ok(())
    }
}
