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

//! Compiler output ingestion.
//!
//! solc emits contract metadata in two shapes:
//!
//! - the flat legacy shape, where `contracts["File.sol:Name"]` carries the
//!   bytecode and source maps directly: `bin`, `bin-runtime`, `srcmap` and
//!   `srcmap-runtime` from `solc --combined-json`, or `bytecode`,
//!   `runtimeBytecode`, `srcmap` and `srcmapRuntime` from old solc-js;
//! - the nested standard-JSON shape, where `contracts[file][name].evm` carries
//!   `bytecode` and `deployedBytecode`, each with an `object` and a `sourceMap`.
//!
//! Both are normalized once into [`CompiledContractRecord`]s.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use foundry_compilers::artifacts::{Bytecode, BytecodeObject};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::utils::normalize_hex;

/// Errors raised while loading a compiler output file
#[derive(Debug, Error)]
pub enum SolcOutputError {
    /// The file could not be read
    #[error("failed to read compiler output {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// The document is not valid JSON
    #[error("compiler output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The document has no `contracts` object
    #[error("compiler output has no `contracts` object")]
    MissingContracts,
    /// A contract entry has neither the legacy nor the standard layout
    #[error("malformed contract entry `{name}`: {reason}")]
    MalformedContract {
        /// Key of the offending entry
        name: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Layout of a compiler output document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolcOutputShape {
    /// `solc --combined-json` / old solc-js output
    Legacy,
    /// Standard-JSON output
    Standard,
}

/// Bytecode and source maps of one compiled contract.
///
/// Bytecode strings are lowercase hex without `0x` and may contain link
/// placeholders. Empty strings mean the compiler emitted nothing for that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledContractRecord {
    /// Source file the contract was declared in (may be empty for legacy outputs)
    pub source: String,
    /// Contract name
    pub name: String,
    /// Creation (init) bytecode
    pub creation_bytecode: String,
    /// Deployed (runtime) bytecode
    pub deployed_bytecode: String,
    /// Source map of the creation bytecode
    pub creation_source_map: String,
    /// Source map of the deployed bytecode
    pub runtime_source_map: String,
}

impl CompiledContractRecord {
    /// `File.sol:Name`
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.source, self.name)
    }
}

/// Keys that only appear on a flat `contracts["File.sol:Name"]` entry
const LEGACY_KEYS: &[&str] =
    &["bin", "bin-runtime", "bytecode", "runtimeBytecode", "srcmap", "srcmap-runtime", "interface"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyContract {
    #[serde(default, alias = "bin")]
    bytecode: Option<String>,
    #[serde(default, alias = "bin-runtime")]
    runtime_bytecode: Option<String>,
    #[serde(default)]
    srcmap: Option<String>,
    #[serde(default, alias = "srcmap-runtime")]
    srcmap_runtime: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StandardEvm {
    #[serde(default)]
    bytecode: Option<Bytecode>,
    // `DeployedBytecode` flattens a `Bytecode`; the inner fields are all we need.
    #[serde(default)]
    deployed_bytecode: Option<Bytecode>,
}

/// Normalized compiler output
#[derive(Debug, Clone)]
pub struct SolcOutput {
    /// Layout the document was written in
    pub shape: SolcOutputShape,
    /// Every compiled contract, sorted by key
    pub contracts: Vec<CompiledContractRecord>,
    /// Explicit `sourceList` of a combined-json output
    source_list: Vec<String>,
    /// `sources[path].id` of a standard-JSON output
    source_ids: BTreeMap<u64, String>,
    /// Keys of `sources`
    source_names: Vec<String>,
}

impl SolcOutput {
    /// Load a compiler output file from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SolcOutputError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| SolcOutputError::Io { path: path.to_path_buf(), source })?;
        Self::from_json(&content)
    }

    /// Parse a compiler output document
    pub fn from_json(json: &str) -> Result<Self, SolcOutputError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Normalize an already parsed compiler output document
    pub fn from_value(value: Value) -> Result<Self, SolcOutputError> {
        let contracts = value
            .get("contracts")
            .and_then(Value::as_object)
            .ok_or(SolcOutputError::MissingContracts)?;

        let mut records = Vec::new();
        let mut legacy_entries = 0usize;
        for (key, entry) in contracts {
            if is_legacy_entry(entry) {
                legacy_entries += 1;
                records.push(legacy_record(key, entry)?);
            } else {
                let by_name = entry.as_object().ok_or_else(|| SolcOutputError::MalformedContract {
                    name: key.clone(),
                    reason: "expected an object of contracts".into(),
                })?;
                for (name, contract) in by_name {
                    records.push(standard_record(key, name, contract)?);
                }
            }
        }

        let shape = if legacy_entries > 0 && legacy_entries == contracts.len() {
            SolcOutputShape::Legacy
        } else {
            SolcOutputShape::Standard
        };

        let source_list = value
            .get("sourceList")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let empty = Map::new();
        let sources = value.get("sources").and_then(Value::as_object).unwrap_or(&empty);
        let source_names = sources.keys().cloned().collect();
        let source_ids = sources
            .iter()
            .filter_map(|(path, source)| {
                source.get("id").and_then(Value::as_u64).map(|id| (id, path.clone()))
            })
            .collect();

        debug!(?shape, contracts = records.len(), "normalized compiler output");
        Ok(Self { shape, contracts: records, source_list, source_ids, source_names })
    }

    /// Source paths indexed by the file index used in source maps.
    ///
    /// Resolution order: an explicit `sourceList`, then standard-JSON ids (gaps
    /// left empty), then the sorted keys of `sources`, then the given fallback
    /// (the keys of the merged source map).
    pub fn source_list<'a>(&self, fallback: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        if !self.source_list.is_empty() {
            return self.source_list.clone();
        }

        if let Some(max_id) = self.source_ids.keys().next_back() {
            let mut list = vec![String::new(); *max_id as usize + 1];
            for (id, path) in &self.source_ids {
                list[*id as usize] = path.clone();
            }
            return list;
        }

        if !self.source_names.is_empty() {
            return self.source_names.clone();
        }

        fallback.into_iter().cloned().collect()
    }

    /// Every source path the compiler output refers to
    pub fn referenced_sources(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .source_list
            .iter()
            .chain(self.source_ids.values())
            .chain(self.source_names.iter())
            .chain(self.contracts.iter().map(|c| &c.source))
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// A flat entry carries its artifacts as strings; a standard-JSON file entry
/// maps contract names to objects.
fn is_legacy_entry(entry: &Value) -> bool {
    LEGACY_KEYS.iter().any(|key| entry.get(key).is_some_and(Value::is_string))
}

fn legacy_record(key: &str, entry: &Value) -> Result<CompiledContractRecord, SolcOutputError> {
    let contract: LegacyContract = serde_json::from_value(entry.clone()).map_err(|err| {
        SolcOutputError::MalformedContract { name: key.to_string(), reason: err.to_string() }
    })?;

    // `File.sol:Name`, or `:Name` for outputs compiled from stdin
    let (source, name) = key.rsplit_once(':').unwrap_or(("", key));

    Ok(CompiledContractRecord {
        source: source.to_string(),
        name: name.to_string(),
        creation_bytecode: contract.bytecode.as_deref().map(normalize_hex).unwrap_or_default(),
        deployed_bytecode: contract
            .runtime_bytecode
            .as_deref()
            .map(normalize_hex)
            .unwrap_or_default(),
        creation_source_map: contract.srcmap.unwrap_or_default(),
        runtime_source_map: contract.srcmap_runtime.unwrap_or_default(),
    })
}

fn standard_record(
    source: &str,
    name: &str,
    contract: &Value,
) -> Result<CompiledContractRecord, SolcOutputError> {
    if !contract.is_object() {
        return Err(SolcOutputError::MalformedContract {
            name: format!("{source}:{name}"),
            reason: "expected a contract object".into(),
        });
    }

    let evm: StandardEvm = match contract.get("evm") {
        Some(evm) => serde_json::from_value(evm.clone()).map_err(|err| {
            SolcOutputError::MalformedContract {
                name: format!("{source}:{name}"),
                reason: err.to_string(),
            }
        })?,
        None => {
            warn!(source, name, "contract has no `evm` output, skipping its bytecode");
            StandardEvm::default()
        }
    };

    let (creation_bytecode, creation_source_map) = bytecode_parts(evm.bytecode.as_ref());
    let (deployed_bytecode, runtime_source_map) = bytecode_parts(evm.deployed_bytecode.as_ref());

    Ok(CompiledContractRecord {
        source: source.to_string(),
        name: name.to_string(),
        creation_bytecode,
        deployed_bytecode,
        creation_source_map,
        runtime_source_map,
    })
}

fn bytecode_parts(bytecode: Option<&Bytecode>) -> (String, String) {
    let Some(bytecode) = bytecode else {
        return (String::new(), String::new());
    };

    let object = match &bytecode.object {
        BytecodeObject::Bytecode(bytes) => hex::encode(bytes),
        BytecodeObject::Unlinked(unlinked) => normalize_hex(unlinked),
    };
    (object, bytecode.source_map.clone().unwrap_or_default())
}
