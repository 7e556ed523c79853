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

use std::{
    collections::BTreeMap,
    fmt,
    ops::{Deref, DerefMut},
};

use alloy_primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};

/// Content-hash identity of a bytecode blob.
pub type CodeHash = B256;

/// Compute the identity of a bytecode blob.
///
/// Two blobs share an identity iff their raw bytes are equal, regardless of how
/// they were obtained (`eth_getCode`, a memory slice, or transaction input).
pub fn code_hash(code: &[u8]) -> CodeHash {
    keccak256(code)
}

/// Call-boundary marker attached to every source-map record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JumpKind {
    /// The jump enters a function (`i`)
    #[serde(rename = "i")]
    Into,
    /// The jump returns from a function (`o`)
    #[serde(rename = "o")]
    Out,
    /// A regular jump, or no jump at all (`-`)
    #[default]
    #[serde(rename = "-")]
    Regular,
}

impl JumpKind {
    /// Parse the one-character marker used by the compiler.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "i" => Some(Self::Into),
            "o" => Some(Self::Out),
            "-" => Some(Self::Regular),
            _ => None,
        }
    }

    /// The marker as emitted by the compiler.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Into => "i",
            Self::Out => "o",
            Self::Regular => "-",
        }
    }
}

impl fmt::Display for JumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded instruction correlated with the source range that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInstruction {
    /// Program counter of the instruction
    pub pc: usize,
    /// Mnemonic, with the immediate rendered as hex for PUSH instructions (e.g. `PUSH1 0x80`)
    pub op: String,
    /// Byte offset of the source range, or -1 when the instruction has no source
    pub source_start: i64,
    /// Byte length of the source range, or -1 when the instruction has no source
    pub source_length: i64,
    /// Resolved source file path, empty when the instruction has no source
    pub source_file: String,
    /// Call-boundary marker
    pub jump: JumpKind,
}

impl DebugInstruction {
    /// An instruction that carries no source correlation.
    pub fn without_source(pc: usize, op: impl Into<String>) -> Self {
        Self {
            pc,
            op: op.into(),
            source_start: -1,
            source_length: -1,
            source_file: String::new(),
            jump: JumpKind::Regular,
        }
    }

    /// Whether this instruction maps back to a source file.
    pub fn has_source(&self) -> bool {
        !self.source_file.is_empty() && self.source_start >= 0
    }
}

/// Per-contract debug table: program counter -> instruction.
///
/// Program counters are sparse since PUSH instructions span several bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebugTable {
    inner: BTreeMap<usize, DebugInstruction>,
}

impl Deref for DebugTable {
    type Target = BTreeMap<usize, DebugInstruction>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for DebugTable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl DebugTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an instruction under its own program counter
    pub fn push(&mut self, instruction: DebugInstruction) {
        self.inner.insert(instruction.pc, instruction);
    }

    /// All distinct source files referenced by this table (empty paths excluded)
    pub fn referenced_files(&self) -> impl Iterator<Item = &str> {
        let mut files: Vec<&str> = self
            .inner
            .values()
            .map(|inst| inst.source_file.as_str())
            .filter(|f| !f.is_empty())
            .collect();
        files.sort_unstable();
        files.dedup();
        files.into_iter()
    }
}

impl FromIterator<DebugInstruction> for DebugTable {
    fn from_iter<I: IntoIterator<Item = DebugInstruction>>(iter: I) -> Self {
        let mut table = Self::new();
        for inst in iter {
            table.push(inst);
        }
        table
    }
}

impl<'a> IntoIterator for &'a DebugTable {
    type Item = (&'a usize, &'a DebugInstruction);
    type IntoIter = std::collections::btree_map::Iter<'a, usize, DebugInstruction>;
    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

/// Memoized resolution result for one bytecode blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractInfo {
    /// The blob matched a compiled contract; its debug table is attached
    Resolved(DebugTable),
    /// No fingerprint matched: external or library code outside the compiled project
    Unresolved,
}

impl ContractInfo {
    /// The debug table, if the blob was matched
    pub fn table(&self) -> Option<&DebugTable> {
        match self {
            Self::Resolved(table) => Some(table),
            Self::Unresolved => None,
        }
    }

    /// Whether a fingerprint matched
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}
