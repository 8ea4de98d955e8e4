//! tileindex-core — foundation for the ledger scan + replay pipeline.
//!
//! # Architecture
//!
//! ```text
//! BlockScanner ──append──▶ RawEventStore ◀──read── ReplayEngine
//!      │                                              ├── TransactionDecoder
//!      └── CheckpointManager (scan)                   ├── TileStore (tiles + history)
//!                                                     └── CheckpointManager (replay)
//! ```
//!
//! The scanner lives in `tileindex-evm`; storage backends in
//! `tileindex-storage`.

pub mod checkpoint;
pub mod config;
pub mod decoded;
pub mod error;
pub mod lease;
pub mod replay;
pub mod store;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, CursorKind};
pub use config::{ContractsConfig, DeadZone, IndexerConfig, RetrySettings};
pub use decoded::{DecodedEvent, EventMeta, EventSource};
pub use error::IndexerError;
pub use lease::{LeaseGuard, PassLease, PassOutcome, PassStats};
pub use replay::{Applied, ReplayEngine, ReplaySettings, TransactionDecoder};
pub use store::{RawEventStore, TileStore};
pub use types::{Ether, HistoryEntry, HistoryKey, HistoryKind, NewRawEvent, RawEvent, Tile};
