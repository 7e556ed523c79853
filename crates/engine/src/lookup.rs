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

use std::collections::{BTreeMap, BTreeSet};

use edb_trace_common::types::{code_hash, CodeHash, ContractInfo, DebugTable};
use tracing::debug;

use crate::{merge_contract_info, FingerprintRegistry};

/// Memoized code-hash -> debug table resolution.
///
/// Every code blob seen during a walk is matched against the registry once;
/// blobs that match nothing are remembered as [`ContractInfo::Unresolved`].
#[derive(Debug, Clone, Default)]
pub struct ContractInfoLookup {
    entries: BTreeMap<CodeHash, ContractInfo>,
}

impl ContractInfoLookup {
    /// Create an empty lookup
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for a code hash, `None` if that code was never seen
    pub fn get(&self, hash: &CodeHash) -> Option<&ContractInfo> {
        self.entries.get(hash)
    }

    /// Number of distinct code blobs seen
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no code has been seen yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identify `code`, building its debug table on first sight
    pub fn resolve(
        &mut self,
        code: &[u8],
        registry: &FingerprintRegistry,
        source_list: &[String],
    ) -> CodeHash {
        let hash = code_hash(code);
        if self.entries.contains_key(&hash) {
            return hash;
        }

        let code_hex = hex::encode(code);
        let info = match registry.find_match(&code_hex) {
            Some(entry) => {
                let fuzzy = entry.pattern.is_fuzzy();
                debug!(%hash, contract = %entry.contract, fuzzy, "matched code");
                let table = merge_contract_info(&code_hex, &entry.source_map, source_list);
                ContractInfo::Resolved(table)
            }
            None => {
                debug!(%hash, len = code.len(), "code matches no compiled contract");
                ContractInfo::Unresolved
            }
        };
        self.entries.insert(hash, info);
        hash
    }

    /// Split into the resolved tables and the set of unresolved hashes
    pub fn into_parts(self) -> (BTreeMap<CodeHash, DebugTable>, BTreeSet<CodeHash>) {
        let mut tables = BTreeMap::new();
        let mut unresolved = BTreeSet::new();
        for (hash, info) in self.entries {
            match info {
                ContractInfo::Resolved(table) => {
                    tables.insert(hash, table);
                }
                ContractInfo::Unresolved => {
                    unresolved.insert(hash);
                }
            }
        }
        (tables, unresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompiledContractRecord;

    fn registry() -> FingerprintRegistry {
        FingerprintRegistry::build(&[CompiledContractRecord {
            source: "A.sol".into(),
            name: "A".into(),
            deployed_bytecode: "6080604052".into(),
            runtime_source_map: "0:10:0:-".into(),
            ..Default::default()
        }])
    }

    #[test]
    fn test_resolve_matched_code() {
        let registry = registry();
        let sources = vec!["A.sol".to_string()];
        let mut lookup = ContractInfoLookup::new();

        let hash = lookup.resolve(&[0x60, 0x80, 0x60, 0x40, 0x52], &registry, &sources);
        let table = lookup.get(&hash).and_then(ContractInfo::table).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table[&4].source_file, "A.sol");
    }

    #[test]
    fn test_unmatched_code_is_remembered() {
        let registry = registry();
        let mut lookup = ContractInfoLookup::new();

        let hash = lookup.resolve(&[0x00], &registry, &[]);
        assert_eq!(lookup.get(&hash), Some(&ContractInfo::Unresolved));

        // resolved once only
        assert_eq!(lookup.resolve(&[0x00], &registry, &[]), hash);
        assert_eq!(lookup.len(), 1);

        let (tables, unresolved) = lookup.into_parts();
        assert!(tables.is_empty());
        assert!(unresolved.contains(&hash));
    }
}
