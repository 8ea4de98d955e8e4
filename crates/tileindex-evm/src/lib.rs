//! tileindex-evm — ledger client, block scanner and transaction decoder.
//!
//! - [`client`]: `LedgerClient` trait and its JSON-RPC implementation
//! - [`scanner`]: windowed log scanning into the raw event store
//! - [`decoder`]: raw transaction → `DecodedEvent`, with historical
//!   seller resolution in [`resolver`]
//! - [`builder`]: fluent configuration and the scan + replay `Pipeline`

pub mod abi;
pub mod builder;
pub mod client;
pub mod decoder;
pub mod resolver;
pub mod retry;
pub mod scanner;

pub use builder::{IndexerBuilder, Pipeline};
pub use client::{HttpLedgerClient, LedgerClient, RawLog};
pub use decoder::{Action, EvmTransactionDecoder};
pub use resolver::OwnershipResolver;
pub use retry::RetryPolicy;
pub use scanner::{BlockScanner, ScanSettings};
