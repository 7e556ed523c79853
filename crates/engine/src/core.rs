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

//! Engine configuration and the extraction entry point.
//!
//! An [`Engine`] is built once per compiler output: it normalizes the
//! contracts into a fingerprint registry and gathers the sources. Each call to
//! [`Engine::extract_tx_info`] then runs the pipeline for one transaction:
//!
//! 1. fetch the transaction and identify the outermost frame's code
//! 2. retrieve the execution log
//! 3. correlate every step with the code executing it
//! 4. assemble the [`TraceInfo`] payload

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use alloy_primitives::{Address, TxHash};
use edb_trace_common::{types::TraceInfo, DEFAULT_CODE_CACHE_TTL};
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use crate::{
    assemble_trace_info, merge_sources, FingerprintRegistry, ImportResolver, MergedSources,
    SolcOutput, TraceCorrelator, TraceDataSource,
};

/// Configuration for the trace extraction engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// JSON-RPC endpoint of a node with the `debug` namespace enabled
    pub rpc_url: String,
    /// Root of the RPC response cache, `~/.edb-trace/cache` when unset
    pub cache_dir: Option<PathBuf>,
    /// Skip the RPC response cache entirely
    pub disable_cache: bool,
    /// How long cached deployed code stays valid, `None` for forever
    pub code_cache_ttl: Option<Duration>,
    /// Upper bound on the correlation walk; a partial trace is returned past it
    pub deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".into(),
            cache_dir: None,
            disable_cache: false,
            code_cache_ttl: Some(Duration::from_secs(DEFAULT_CODE_CACHE_TTL)),
            deadline: None,
        }
    }
}

impl EngineConfig {
    /// Set the JSON-RPC endpoint
    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = url.into();
        self
    }

    /// Set the cache root directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Enable or disable the RPC response cache
    pub fn with_cache_disabled(mut self, disabled: bool) -> Self {
        self.disable_cache = disabled;
        self
    }

    /// Set the TTL of cached deployed code
    pub fn with_code_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.code_cache_ttl = ttl;
        self
    }

    /// Bound the correlation walk
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Errors that fail a whole extraction.
///
/// Anything else (unmatched code, unfetchable callees, malformed source maps)
/// degrades the result instead.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The transaction could not be fetched
    #[error("failed to fetch transaction {tx_hash}: {error:#}")]
    Transaction {
        /// Requested transaction
        tx_hash: TxHash,
        /// Data source error
        error: eyre::Report,
    },
    /// The deployed code of the transaction's target could not be fetched
    #[error("failed to fetch code of transaction target {address}: {error:#}")]
    TargetCode {
        /// Transaction target
        address: Address,
        /// Data source error
        error: eyre::Report,
    },
    /// The execution log could not be retrieved
    #[error("failed to retrieve execution log of {tx_hash}: {error:#}")]
    ExecutionLog {
        /// Requested transaction
        tx_hash: TxHash,
        /// Data source error
        error: eyre::Report,
    },
}

/// The trace extraction engine
#[derive(Debug, Clone)]
pub struct Engine {
    registry: FingerprintRegistry,
    source_list: Vec<String>,
    sources: MergedSources,
    deadline: Option<Duration>,
}

impl Engine {
    /// Create an engine from a compiler output and already gathered sources
    pub fn new(config: &EngineConfig, solc: &SolcOutput, sources: MergedSources) -> Self {
        let registry = FingerprintRegistry::build(&solc.contracts);
        let source_list = solc.source_list(sources.sources.keys());
        info!(
            contracts = solc.contracts.len(),
            patterns = registry.len(),
            sources = sources.sources.len(),
            missing = sources.missing.len(),
            "engine ready"
        );
        Self { registry, source_list, sources, deadline: config.deadline }
    }

    /// Create an engine, completing `provided` sources through `resolver`
    pub fn from_solc_output(
        config: &EngineConfig,
        solc: &SolcOutput,
        provided: BTreeMap<String, String>,
        resolver: Option<&dyn ImportResolver>,
    ) -> Self {
        let sources = merge_sources(solc, provided, resolver);
        Self::new(config, solc, sources)
    }

    /// Source paths indexed by source-map file index
    pub fn source_list(&self) -> &[String] {
        &self.source_list
    }

    /// Sources included in every payload
    pub fn sources(&self) -> &MergedSources {
        &self.sources
    }

    /// Fingerprints used to identify code
    pub fn registry(&self) -> &FingerprintRegistry {
        &self.registry
    }

    /// Correlate one transaction's execution with its sources
    pub async fn extract_tx_info<S: TraceDataSource>(
        &self,
        source: &S,
        tx_hash: TxHash,
    ) -> Result<TraceInfo, ExtractError> {
        info!("Extracting trace information for transaction {tx_hash}");

        // Step 1: transaction and outermost frame
        let tx = source
            .transaction(tx_hash)
            .await
            .map_err(|error| ExtractError::Transaction { tx_hash, error })?;

        let mut correlator = TraceCorrelator::new(source, &self.registry, &self.source_list);
        correlator.enter_transaction(&tx).await.map_err(|error| ExtractError::TargetCode {
            address: tx.to.unwrap_or_default(),
            error,
        })?;

        // Step 2: execution log
        let mut outcome = source
            .struct_logs(tx_hash)
            .await
            .map_err(|error| ExtractError::ExecutionLog { tx_hash, error })?;
        let logs = std::mem::take(&mut outcome.struct_logs);

        // Step 3: correlation
        info!("Correlating {} execution steps", logs.len());
        let deadline = self.deadline.map(|limit| Instant::now() + limit);
        let walk = correlator.walk(logs, deadline).await;

        // Step 4: payload
        let info =
            assemble_trace_info(correlator.into_lookup(), &self.sources, &outcome, walk);
        info!(
            steps = info.trace.len(),
            matched_steps = info.matched_step_count(),
            contracts = info.contract_info_lookup.len(),
            unresolved = info.unresolved_code.len(),
            truncated = info.truncated,
            "Trace extraction finished"
        );
        Ok(info)
    }
}

/// One-shot extraction: build an engine with default settings and run it once
pub async fn extract_tx_info<S: TraceDataSource>(
    tx_hash: TxHash,
    source: &S,
    solc: &SolcOutput,
    sources: BTreeMap<String, String>,
    resolver: Option<&dyn ImportResolver>,
) -> Result<TraceInfo, ExtractError> {
    let engine = Engine::from_solc_output(&EngineConfig::default(), solc, sources, resolver);
    engine.extract_tx_info(source, tx_hash).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_builders() {
        let config = EngineConfig::default()
            .with_rpc_url("http://node:8545")
            .with_cache_dir("/tmp/edb-trace")
            .with_code_cache_ttl(None)
            .with_deadline(Duration::from_secs(30));

        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/edb-trace")));
        assert!(!config.disable_cache);
        assert_eq!(config.code_cache_ttl, None);
        assert_eq!(config.deadline, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.code_cache_ttl, Some(Duration::from_secs(DEFAULT_CODE_CACHE_TTL)));
        assert!(config.deadline.is_none());
        assert!(config.with_cache_disabled(true).disable_cache);
    }
}
