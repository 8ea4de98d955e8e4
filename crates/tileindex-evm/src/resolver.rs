//! Historical seller resolution for purchases.
//!
//! A `buyTile` transaction names the buyer but not the seller. The seller is
//! whoever owned the tile one block before the purchase:
//!
//! 1. `tiles(location)` on the primary contract at `block - 1`; a zero owner
//!    means the tile was never sold and belongs to the deployer.
//! 2. If that owner is the wrapper contract, the real holder is
//!    `ownerOf(location)` on the wrapper at the same block. If that call
//!    reverts (the token was not minted yet) the wrapper address itself is
//!    the answer. Node errors are not a revert and propagate as retryable.

use std::sync::Arc;

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::Function;
use alloy_primitives::{Address, Bytes, U256};
use tracing::debug;

use tileindex_core::config::ContractsConfig;
use tileindex_core::error::IndexerError;
use tileindex_core::types::address_hex;

use crate::abi::{decode_params, function_named, ContractAbis};
use crate::client::LedgerClient;

pub struct OwnershipResolver {
    client: Arc<dyn LedgerClient>,
    primary: Address,
    wrapper: Address,
    deployer: Address,
    tiles_fn: Function,
    owner_of_fn: Function,
}

impl OwnershipResolver {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        contracts: &ContractsConfig,
        abis: &ContractAbis,
    ) -> Result<Self, IndexerError> {
        Ok(Self {
            client,
            primary: contracts.primary,
            wrapper: contracts.wrapper,
            deployer: contracts.deployer,
            tiles_fn: function_named(&abis.primary, "tiles")?.clone(),
            owner_of_fn: function_named(&abis.wrapper, "ownerOf")?.clone(),
        })
    }

    /// The owner of `location` as of the block before `block`.
    pub async fn seller(&self, location: u32, block: u64) -> Result<Address, IndexerError> {
        let at = block.saturating_sub(1);

        let mut owner = self.owner_call(self.primary, &self.tiles_fn, location, at).await?;
        if owner == Address::ZERO {
            owner = self.deployer;
        }
        if owner != self.wrapper {
            return Ok(owner);
        }

        match self.owner_call(self.wrapper, &self.owner_of_fn, location, at).await {
            Ok(holder) => Ok(holder),
            Err(IndexerError::CallReverted(reason)) => {
                debug!(
                    location,
                    block = at,
                    %reason,
                    "wrapper ownerOf reverted, seller is the wrapper"
                );
                Ok(self.wrapper)
            }
            Err(e) => Err(e),
        }
    }

    async fn owner_call(
        &self,
        contract: Address,
        func: &Function,
        location: u32,
        at: u64,
    ) -> Result<Address, IndexerError> {
        let data = encode_location_call(func, location);
        let output = self.client.call(contract, data, at).await?;

        // Empty return data means no code at `contract` yet, which is a failed call.
        let values = decode_params(&func.outputs, &output).map_err(|reason| {
            IndexerError::CallReverted(format!(
                "{} on {}: {reason}",
                func.name,
                address_hex(&contract)
            ))
        })?;

        match values.first() {
            Some(DynSolValue::Address(owner)) => Ok(*owner),
            other => Err(IndexerError::CallReverted(format!(
                "{} returned {other:?} instead of an address",
                func.name
            ))),
        }
    }
}

/// Calldata for a view function taking a single `uint256` location.
pub fn encode_location_call(func: &Function, location: u32) -> Bytes {
    let mut data = func.selector().to_vec();
    data.extend_from_slice(&U256::from(location).to_be_bytes::<32>());
    Bytes::from(data)
}
