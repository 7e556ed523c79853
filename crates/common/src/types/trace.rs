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

use alloy_primitives::{Address, U256};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{CodeHash, DebugTable};

/// One step of a `debug_traceTransaction` struct log.
///
/// Stack words and memory are kept as the node returned them (hex strings):
/// depending on the client, stack words may or may not carry a `0x` prefix.
/// Fields not modelled here (`refund`, `returnData`, `memSize`, ...) are kept
/// in `extra` and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLog {
    /// Program counter
    pub pc: u64,
    /// Opcode mnemonic
    pub op: String,
    /// Remaining gas
    pub gas: u64,
    /// Cost of this opcode
    #[serde(default)]
    pub gas_cost: u64,
    /// Call depth as reported by the node
    pub depth: u64,
    /// Operand stack, top of stack last
    #[serde(default)]
    pub stack: Vec<String>,
    /// Memory image as 32-byte hex words
    #[serde(default)]
    pub memory: Vec<String>,
    /// Storage touched so far in this frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<BTreeMap<String, String>>,
    /// Error raised by this step, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Any other field the node returned
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StructLog {
    /// Read the stack word `index` slots below the top (0 is the top of the stack).
    pub fn stack_from_top(&self, index: usize) -> Option<U256> {
        let len = self.stack.len();
        if index >= len {
            return None;
        }
        parse_hex_word(&self.stack[len - 1 - index])
    }

    /// Interpret the stack word `index` slots below the top as an address (its low 20 bytes).
    pub fn address_from_top(&self, index: usize) -> Option<Address> {
        let word = self.stack_from_top(index)?;
        Some(Address::from_word(word.to_be_bytes::<32>().into()))
    }

    /// Memory concatenated into one hex string, without a `0x` prefix.
    pub fn flattened_memory(&self) -> String {
        self.memory.iter().map(|w| w.trim_start_matches("0x")).collect()
    }

    /// Slice `length` bytes at `offset` out of the memory image, as a hex string.
    ///
    /// Returns `None` if the range exceeds the memory snapshot.
    pub fn memory_slice_hex(&self, offset: usize, length: usize) -> Option<String> {
        let memory = self.flattened_memory();
        let start = offset.checked_mul(2)?;
        let end = offset.checked_add(length)?.checked_mul(2)?;
        memory.get(start..end).map(str::to_string)
    }
}

/// Parse a hex stack word, with or without `0x` prefix.
pub fn parse_hex_word(word: &str) -> Option<U256> {
    let digits = word.trim_start_matches("0x");
    if digits.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).ok()
}

/// Result of `debug_traceTransaction` with the default struct logger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLogTrace {
    /// Gas used by the transaction
    pub gas: u64,
    /// Whether the transaction failed
    #[serde(default)]
    pub failed: bool,
    /// Return data of the outermost frame, as hex
    #[serde(default)]
    pub return_value: String,
    /// Ordered execution log
    #[serde(default)]
    pub struct_logs: Vec<StructLog>,
}

/// An execution-log step annotated with the code that was executing it.
///
/// Serialized as the step's own object with an added `infoHash` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedStep {
    /// Identity of the code active at this step's depth, `None` if it could not be determined
    pub info_hash: Option<CodeHash>,
    /// The raw execution-log step
    #[serde(flatten)]
    pub step: StructLog,
}

impl<'de> Deserialize<'de> for AnnotatedStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // a flattened struct is buffered before its integer fields are read, which
        // `arbitrary_precision` numbers do not survive; split the object instead
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        let info_hash = match fields.remove("infoHash") {
            Some(hash) => serde_json::from_value(hash).map_err(D::Error::custom)?,
            None => None,
        };
        let step = serde_json::from_value(Value::Object(fields)).map_err(D::Error::custom)?;
        Ok(Self { info_hash, step })
    }
}

/// The complete result of correlating one transaction's execution with its sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceInfo {
    /// Debug tables of every matched code blob, by identity
    pub contract_info_lookup: BTreeMap<CodeHash, DebugTable>,
    /// Identities of code blobs that were seen but matched no compiled contract
    #[serde(default)]
    pub unresolved_code: BTreeSet<CodeHash>,
    /// Source file path -> contents
    pub sources: BTreeMap<String, String>,
    /// Source paths named by the compiler output whose contents could not be found
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub missing_sources: BTreeSet<String>,
    /// Return data of the transaction
    pub return_value: String,
    /// Gas used by the transaction
    pub gas: u64,
    /// Whether the transaction failed
    #[serde(default)]
    pub failed: bool,
    /// Annotated execution log
    pub trace: Vec<AnnotatedStep>,
    /// Set when the walk stopped early (deadline) and `trace` is only a prefix
    #[serde(default)]
    pub truncated: bool,
}

impl TraceInfo {
    /// Convert the payload to a JSON value for rendering
    pub fn to_json_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Debug table for the code executing at the given step, if it was matched
    pub fn table_for(&self, step: &AnnotatedStep) -> Option<&DebugTable> {
        step.info_hash.as_ref().and_then(|hash| self.contract_info_lookup.get(hash))
    }

    /// Number of steps that executed inside matched code
    pub fn matched_step_count(&self) -> usize {
        self.trace.iter().filter(|step| self.table_for(step).is_some()).count()
    }
}
