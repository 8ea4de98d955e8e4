//! Error types for the tileindex pipeline.

use thiserror::Error;

/// Errors that can occur while scanning, decoding or replaying.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Transport or node failure. The same unit of work can be retried.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A read-only contract call was executed by the node and failed
    /// (e.g. the token did not exist at the requested block).
    #[error("Contract call reverted: {0}")]
    CallReverted(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to decode transaction {tx_hash}: {reason}")]
    Decode { tx_hash: String, reason: String },

    #[error("Unknown action '{method}' in transaction {tx_hash}")]
    UnknownAction { tx_hash: String, method: String },

    #[error("Invariant violated for tile {tile_id} in transaction {tx_hash}: {reason}")]
    InvariantViolation {
        tile_id: u32,
        tx_hash: String,
        reason: String,
    },

    #[error(
        "Out-of-order event at sequence {sequence}: ({block_number}, {log_index}) \
         does not follow ({prev_block}, {prev_log_index})"
    )]
    OutOfOrder {
        sequence: u64,
        block_number: u64,
        log_index: u32,
        prev_block: u64,
        prev_log_index: u32,
    },

    #[error("Giving up on {operation} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if retrying the same unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` for errors that must stop the replay: continuing would
    /// silently corrupt ownership history.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. }
                | Self::UnknownAction { .. }
                | Self::InvariantViolation { .. }
                | Self::OutOfOrder { .. }
        )
    }
}
