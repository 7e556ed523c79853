// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Where transactions, deployed code and execution logs come from.
//!
//! [`TraceDataSource`] is the seam between the correlator and the node. The
//! JSON-RPC implementation, [`RpcDataSource`], issues
//! `eth_getTransactionByHash`, `eth_getCode` and `debug_traceTransaction`
//! through `alloy-provider` and can keep deployed code and execution logs in
//! the on-disk JSON cache.

use std::{borrow::Cow, fmt, future::Future};

use alloy_primitives::{Address, Bytes, TxHash};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionTrait;
use edb_trace_common::{types::StructLogTrace, Cache, CachePath, JsonCache, TraceCachePath};
use eyre::{eyre, Result};
use serde_json::json;
use tracing::{debug, info, trace};

use crate::EngineConfig;

/// The parts of a transaction the correlator needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Transaction hash
    pub hash: TxHash,
    /// Call target, `None` for a contract-creation transaction
    pub to: Option<Address>,
    /// Calldata, or the init code of a contract-creation transaction
    pub input: Bytes,
    /// Block the transaction was mined in; code is read as of this block.
    /// `None` for a pending transaction.
    pub block_number: Option<u64>,
}

impl TransactionInfo {
    /// Whether the transaction deploys a contract
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

/// Provides the chain data an extraction needs.
///
/// Calls are issued one at a time, in execution order.
pub trait TraceDataSource {
    /// Look up a transaction by hash; a missing transaction is an error
    fn transaction(&self, tx_hash: TxHash) -> impl Future<Output = Result<TransactionInfo>> + Send;

    /// Deployed code at an address as of `block` (latest when `None`).
    /// Empty for accounts without code.
    fn code_at(
        &self,
        address: Address,
        block: Option<u64>,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Step-by-step execution log of a transaction
    fn struct_logs(&self, tx_hash: TxHash) -> impl Future<Output = Result<StructLogTrace>> + Send;
}

/// [`TraceDataSource`] backed by a JSON-RPC node with `debug_traceTransaction` enabled
#[derive(Clone)]
pub struct RpcDataSource {
    provider: DynProvider,
    code_cache: Option<JsonCache<Bytes>>,
    trace_cache: Option<JsonCache<StructLogTrace>>,
}

impl fmt::Debug for RpcDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcDataSource")
            .field("code_cache", &self.code_cache)
            .field("trace_cache", &self.trace_cache)
            .finish_non_exhaustive()
    }
}

impl RpcDataSource {
    /// Connect to the node at `config.rpc_url` and open the caches for its chain
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let provider = ProviderBuilder::new().connect(&config.rpc_url).await?.erased();

        let (code_cache, trace_cache) = if config.disable_cache {
            (None, None)
        } else {
            let chain_id = provider.get_chain_id().await?;
            let cache_path = TraceCachePath::new(config.cache_dir.clone());
            info!(chain_id, root = ?cache_path.cache_root(), "using RPC response cache");
            (
                JsonCache::new(cache_path.code_cache_dir(chain_id), config.code_cache_ttl)?,
                JsonCache::new(cache_path.trace_cache_dir(chain_id), None)?,
            )
        };

        Ok(Self { provider, code_cache, trace_cache })
    }
}

/// Cache label of the code at `address` as of `block`
fn code_label(address: Address, block: Option<u64>) -> String {
    match block {
        Some(number) => format!("{address}_{number}"),
        None => address.to_string(),
    }
}

impl TraceDataSource for RpcDataSource {
    async fn transaction(&self, tx_hash: TxHash) -> Result<TransactionInfo> {
        let tx = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await?
            .ok_or_else(|| eyre!("transaction not found: {tx_hash}"))?;

        Ok(TransactionInfo {
            hash: tx_hash,
            to: tx.to(),
            input: tx.input().clone(),
            block_number: tx.block_number,
        })
    }

    async fn code_at(&self, address: Address, block: Option<u64>) -> Result<Bytes> {
        let label = code_label(address, block);
        if let Some(code) = self.code_cache.load_cache(label.as_str()) {
            trace!(%address, ?block, "deployed code served from cache");
            return Ok(code);
        }

        let request = self.provider.get_code_at(address);
        let code = match block {
            Some(number) => request.number(number).await?,
            None => request.await?,
        };
        debug!(%address, ?block, len = code.len(), "fetched deployed code");
        self.code_cache.save_cache(label, &code)?;
        Ok(code)
    }

    async fn struct_logs(&self, tx_hash: TxHash) -> Result<StructLogTrace> {
        let label = tx_hash.to_string();
        if let Some(trace) = self.trace_cache.load_cache(label.as_str()) {
            debug!(%tx_hash, "execution log served from cache");
            return Ok(trace);
        }

        // memory is needed to slice out init code of CREATE/CREATE2
        let options = json!({ "enableMemory": true, "disableStorage": true });
        let trace: StructLogTrace = self
            .provider
            .raw_request(Cow::Borrowed("debug_traceTransaction"), (tx_hash, options))
            .await?;
        info!(%tx_hash, steps = trace.struct_logs.len(), "retrieved execution log");

        self.trace_cache.save_cache(label, &trace)?;
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_label_pins_block() {
        let address = Address::repeat_byte(0xab);
        assert_eq!(code_label(address, None), address.to_string());
        assert_eq!(code_label(address, Some(17)), format!("{address}_17"));
        assert_ne!(code_label(address, Some(17)), code_label(address, Some(18)));
    }
}
