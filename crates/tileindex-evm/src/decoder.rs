//! Transaction decoder: one raw event in, one `DecodedEvent` out.
//!
//! The target contract selects the interface, the 4-byte selector selects
//! the function, and the function name must map onto the closed [`Action`]
//! set. Anything outside that set is rejected here with
//! `IndexerError::UnknownAction` instead of reaching the replay engine.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use tileindex_core::config::ContractsConfig;
use tileindex_core::decoded::{DecodedEvent, EventMeta, EventSource};
use tileindex_core::error::IndexerError;
use tileindex_core::replay::TransactionDecoder;
use tileindex_core::types::{address_hex, normalize_hash, Ether, RawEvent};

use crate::abi::{decode_params, function_for, ContractAbis};
use crate::client::{parse_hex_u64, LedgerClient};
use crate::resolver::OwnershipResolver;

/// Every contract method the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    BuyTile,
    SetTile,
    SetTileData,
    Wrap,
    Unwrap,
    TransferFrom,
    SafeTransferFrom,
    GetTile,
    Approve,
    SetApprovalForAll,
    TransferOwnership,
    RenounceOwnership,
    SetBaseUri,
    Withdraw,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuyTile => "buyTile",
            Self::SetTile => "setTile",
            Self::SetTileData => "setTileData",
            Self::Wrap => "wrap",
            Self::Unwrap => "unwrap",
            Self::TransferFrom => "transferFrom",
            Self::SafeTransferFrom => "safeTransferFrom",
            Self::GetTile => "getTile",
            Self::Approve => "approve",
            Self::SetApprovalForAll => "setApprovalForAll",
            Self::TransferOwnership => "transferOwnership",
            Self::RenounceOwnership => "renounceOwnership",
            Self::SetBaseUri => "setBaseURI",
            Self::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "buyTile" => Self::BuyTile,
            "setTile" => Self::SetTile,
            "setTileData" => Self::SetTileData,
            "wrap" => Self::Wrap,
            "unwrap" => Self::Unwrap,
            "transferFrom" => Self::TransferFrom,
            "safeTransferFrom" => Self::SafeTransferFrom,
            "getTile" => Self::GetTile,
            "approve" => Self::Approve,
            "setApprovalForAll" => Self::SetApprovalForAll,
            "transferOwnership" => Self::TransferOwnership,
            "renounceOwnership" => Self::RenounceOwnership,
            "setBaseURI" => Self::SetBaseUri,
            "withdraw" => Self::Withdraw,
            other => return Err(other.to_string()),
        })
    }
}

/// Decodes raw transactions against the primary and wrapper interfaces.
pub struct EvmTransactionDecoder {
    abis: ContractAbis,
    contracts: ContractsConfig,
    creation_hashes: HashSet<String>,
    resolver: OwnershipResolver,
}

impl EvmTransactionDecoder {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        contracts: ContractsConfig,
    ) -> Result<Self, IndexerError> {
        let abis = ContractAbis::load()?;
        let resolver = OwnershipResolver::new(client, &contracts, &abis)?;
        let creation_hashes = contracts
            .creation_tx_hashes
            .iter()
            .map(|h| normalize_hash(h))
            .collect();
        Ok(Self {
            abis,
            contracts,
            creation_hashes,
            resolver,
        })
    }

    fn interface_for(&self, to: Address) -> Option<&JsonAbi> {
        if to == self.contracts.primary {
            Some(&self.abis.primary)
        } else if to == self.contracts.wrapper {
            Some(&self.abis.wrapper)
        } else {
            None
        }
    }
}

#[async_trait]
impl TransactionDecoder for EvmTransactionDecoder {
    async fn decode(&self, raw: &RawEvent) -> Result<DecodedEvent, IndexerError> {
        let tx_hash = normalize_hash(&raw.tx_hash);
        let tx = &raw.transaction;
        let source = EventSource {
            tx_hash: tx_hash.clone(),
            block_number: raw.block_number,
            log_index: raw.log_index,
        };
        let fail = |reason: String| IndexerError::Decode {
            tx_hash: tx_hash.clone(),
            reason,
        };

        if self.creation_hashes.contains(&tx_hash) || tx.get("to").map_or(true, Value::is_null) {
            debug!(tx_hash = %tx_hash, "contract creation");
            return Ok(DecodedEvent::ContractCreation { source });
        }

        let to = address_field(tx, "to").map_err(&fail)?;
        let abi = self.interface_for(to).ok_or_else(|| {
            fail(format!("transaction targets unknown contract {}", address_hex(&to)))
        })?;

        let input = input_field(tx).map_err(&fail)?;
        let func = function_for(abi, &input).ok_or_else(|| IndexerError::UnknownAction {
            tx_hash: tx_hash.clone(),
            method: match input.get(..4) {
                Some(selector) => format!("0x{}", hex::encode(selector)),
                None => "<no selector>".into(),
            },
        })?;
        let action: Action = func.name.parse().map_err(|method| IndexerError::UnknownAction {
            tx_hash: tx_hash.clone(),
            method,
        })?;

        let args = decode_params(&func.inputs, &input[4..])
            .map_err(|e| fail(format!("{action} arguments: {e}")))?;
        let sender = address_field(tx, "from").map_err(&fail)?;
        let timestamp = timestamp_field(tx).map_err(&fail)?;
        let meta = |location: u32, from: Address| EventMeta {
            location,
            from,
            timestamp,
            tx_hash: tx_hash.clone(),
            block_number: raw.block_number,
            log_index: raw.log_index,
        };

        let event = match action {
            Action::BuyTile => {
                let location = location_arg(&args, 0).map_err(&fail)?;
                let price = Ether::from_wei(value_field(tx).map_err(&fail)?);
                let seller = self.resolver.seller(location, raw.block_number).await?;
                DecodedEvent::BuyTile {
                    meta: meta(location, sender),
                    seller,
                    price,
                }
            }
            Action::SetTile | Action::SetTileData => {
                let location = location_arg(&args, 0).map_err(&fail)?;
                let image = string_arg(&args, 1).map_err(&fail)?;
                let url = string_arg(&args, 2).map_err(&fail)?;
                let price = match action {
                    Action::SetTile => Some(Ether::from_wei(uint_arg(&args, 3).map_err(&fail)?)),
                    _ => None,
                };
                DecodedEvent::SetTile {
                    meta: meta(location, sender),
                    image: Some(image),
                    url: Some(url),
                    price,
                    owner: None,
                }
            }
            Action::Wrap => DecodedEvent::Wrap {
                meta: meta(location_arg(&args, 0).map_err(&fail)?, sender),
            },
            Action::Unwrap => DecodedEvent::Unwrap {
                meta: meta(location_arg(&args, 0).map_err(&fail)?, sender),
            },
            Action::TransferFrom | Action::SafeTransferFrom => {
                let previous = address_arg(&args, 0).map_err(&fail)?;
                let receiver = address_arg(&args, 1).map_err(&fail)?;
                let location = location_arg(&args, 2).map_err(&fail)?;
                DecodedEvent::Transfer {
                    meta: meta(location, receiver),
                    to: previous,
                }
            }
            Action::GetTile
            | Action::Approve
            | Action::SetApprovalForAll
            | Action::TransferOwnership
            | Action::RenounceOwnership
            | Action::SetBaseUri
            | Action::Withdraw => DecodedEvent::NotImportant {
                source,
                method: action.as_str().to_string(),
            },
        };

        debug!(tx_hash = %tx_hash, %action, kind = event.name(), "decoded");
        Ok(event)
    }
}

// ─── Transaction fields ───────────────────────────────────────────────────────

fn address_field(tx: &Value, key: &str) -> Result<Address, String> {
    let s = tx[key]
        .as_str()
        .ok_or_else(|| format!("transaction has no '{key}' address"))?;
    s.parse().map_err(|e| format!("bad '{key}' address '{s}': {e}"))
}

fn input_field(tx: &Value) -> Result<Vec<u8>, String> {
    let s = tx["input"]
        .as_str()
        .or_else(|| tx["data"].as_str())
        .ok_or("transaction has no input")?;
    hex::decode(s.trim_start_matches("0x")).map_err(|e| format!("bad input hex: {e}"))
}

fn value_field(tx: &Value) -> Result<U256, String> {
    let s = tx["value"].as_str().ok_or("transaction has no value")?;
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| format!("bad value '{s}': {e}"))
}

/// Block time recorded by the scanner, as seconds (number or hex quantity).
fn timestamp_field(tx: &Value) -> Result<DateTime<Utc>, String> {
    let secs = match &tx["timestamp"] {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_hex_u64(s),
        _ => None,
    }
    .ok_or("transaction has no timestamp")?;
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| format!("timestamp {secs} out of range"))
}

// ─── Call arguments ───────────────────────────────────────────────────────────

fn uint_arg(args: &[DynSolValue], i: usize) -> Result<U256, String> {
    match args.get(i) {
        Some(DynSolValue::Uint(v, _)) => Ok(*v),
        other => Err(format!("argument {i}: expected uint, got {other:?}")),
    }
}

fn location_arg(args: &[DynSolValue], i: usize) -> Result<u32, String> {
    let v = uint_arg(args, i)?;
    u32::try_from(v).map_err(|_| format!("argument {i}: location {v} out of range"))
}

fn string_arg(args: &[DynSolValue], i: usize) -> Result<String, String> {
    match args.get(i) {
        Some(DynSolValue::String(s)) => Ok(s.clone()),
        other => Err(format!("argument {i}: expected string, got {other:?}")),
    }
}

fn address_arg(args: &[DynSolValue], i: usize) -> Result<Address, String> {
    match args.get(i) {
        Some(DynSolValue::Address(a)) => Ok(*a),
        other => Err(format!("argument {i}: expected address, got {other:?}")),
    }
}
