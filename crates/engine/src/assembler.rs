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

use edb_trace_common::types::{StructLogTrace, TraceInfo};

use crate::{ContractInfoLookup, CorrelatedWalk, MergedSources};

/// Combine the products of one extraction into the result payload.
///
/// `outcome` supplies gas, failure flag and return value; its struct logs are
/// not read (the annotated copies are in `walk`).
pub fn assemble_trace_info(
    lookup: ContractInfoLookup,
    sources: &MergedSources,
    outcome: &StructLogTrace,
    walk: CorrelatedWalk,
) -> TraceInfo {
    let (contract_info_lookup, unresolved_code) = lookup.into_parts();
    TraceInfo {
        contract_info_lookup,
        unresolved_code,
        sources: sources.sources.clone(),
        missing_sources: sources.missing.clone(),
        return_value: outcome.return_value.clone(),
        gas: outcome.gas,
        failed: outcome.failed,
        trace: walk.steps,
        truncated: walk.truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use edb_trace_common::types::{AnnotatedStep, StructLog};

    use crate::FingerprintRegistry;

    #[test]
    fn test_assemble_trace_info() {
        let mut lookup = ContractInfoLookup::new();
        let unknown = lookup.resolve(&[0xfe], &FingerprintRegistry::default(), &[]);

        let sources = MergedSources {
            sources: BTreeMap::from([("A.sol".to_string(), "contract A {}".to_string())]),
            missing: ["B.sol".to_string()].into(),
        };
        let outcome = StructLogTrace {
            gas: 21_000,
            failed: true,
            return_value: "08c379a0".into(),
            struct_logs: vec![StructLog::default()],
        };
        let walk = CorrelatedWalk {
            steps: vec![AnnotatedStep { info_hash: Some(unknown), step: StructLog::default() }],
            truncated: true,
        };

        let info = assemble_trace_info(lookup, &sources, &outcome, walk);
        assert!(info.contract_info_lookup.is_empty());
        assert!(info.unresolved_code.contains(&unknown));
        assert_eq!(info.sources.len(), 1);
        assert!(info.missing_sources.contains("B.sol"));
        assert_eq!(info.gas, 21_000);
        assert!(info.failed);
        assert_eq!(info.return_value, "08c379a0");
        assert_eq!(info.trace.len(), 1);
        assert!(info.truncated);
        assert_eq!(info.matched_step_count(), 0);
    }
}
