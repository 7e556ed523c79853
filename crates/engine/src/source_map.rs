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

//! Source-map decoding and the per-instruction merge.
//!
//! A solc source map holds one `s:l:f:j` record per instruction, separated by
//! `;`. Empty fields (and empty records) repeat the previous record's value.

use edb_trace_common::types::{DebugInstruction, DebugTable, JumpKind};
use tracing::{trace, warn};

use crate::utils::{decode_code_hex, disassemble};

/// One decoded source-map record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMapEntry {
    /// Byte offset into the source file, -1 for none
    pub offset: i64,
    /// Length of the source range, -1 for none
    pub length: i64,
    /// Index into the source list, -1 for none
    pub file_index: i64,
    /// Jump marker
    pub jump: JumpKind,
}

impl Default for SourceMapEntry {
    fn default() -> Self {
        Self { offset: -1, length: -1, file_index: -1, jump: JumpKind::Regular }
    }
}

impl SourceMapEntry {
    /// Apply one raw record on top of the previous entry
    fn carry(mut self, record: &str) -> Self {
        let mut fields = record.split(':');

        carry_number(&mut self.offset, fields.next(), "offset");
        carry_number(&mut self.length, fields.next(), "length");
        carry_number(&mut self.file_index, fields.next(), "file");
        if let Some(marker) = fields.next().filter(|m| !m.is_empty()) {
            match JumpKind::from_marker(marker) {
                Some(jump) => self.jump = jump,
                None => trace!(marker, "ignoring unknown jump marker"),
            }
        }
        // a fifth field (modifier depth) is not tracked

        self
    }

    /// Source path for this entry, empty when it has none or the index is out of range
    pub fn source_file<'a>(&self, source_list: &'a [String]) -> &'a str {
        usize::try_from(self.file_index)
            .ok()
            .and_then(|index| source_list.get(index))
            .map(String::as_str)
            .unwrap_or_default()
    }
}

fn carry_number(slot: &mut i64, field: Option<&str>, kind: &str) {
    let Some(field) = field.filter(|f| !f.is_empty()) else {
        return;
    };
    match field.parse() {
        Ok(value) => *slot = value,
        Err(_) => trace!(field, kind, "unparsable source map field, keeping previous value"),
    }
}

/// Iterator over the decoded records of a source map
#[derive(Debug, Clone)]
pub struct SourceMapDecoder<'a> {
    records: Option<std::str::Split<'a, char>>,
    current: SourceMapEntry,
}

impl<'a> SourceMapDecoder<'a> {
    /// Decode `source_map`; an empty map has no records
    pub fn new(source_map: &'a str) -> Self {
        let source_map = source_map.trim();
        let records = (!source_map.is_empty()).then(|| source_map.split(';'));
        Self { records, current: SourceMapEntry::default() }
    }
}

impl Iterator for SourceMapDecoder<'_> {
    type Item = SourceMapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.as_mut()?.next()?;
        self.current = self.current.carry(record);
        Some(self.current)
    }
}

/// Decode a whole source map
pub fn decode_source_map(source_map: &str) -> Vec<SourceMapEntry> {
    SourceMapDecoder::new(source_map).collect()
}

/// Fuse a bytecode blob with its source map into a per-pc debug table.
///
/// Instruction `i` pairs with record `i`; instructions past the last record
/// carry no source. Undecodable hex yields an empty table.
pub fn merge_contract_info(code_hex: &str, source_map: &str, source_list: &[String]) -> DebugTable {
    let code = match decode_code_hex(code_hex) {
        Ok(code) => code,
        Err(err) => {
            warn!("cannot decode bytecode for source correlation: {err}");
            return DebugTable::new();
        }
    };

    let disassembly = disassemble(&code);
    if disassembly.is_truncated() {
        warn!("bytecode ends inside a PUSH immediate, padding with zeros");
    }

    let mut records = SourceMapDecoder::new(source_map);
    let mut table = DebugTable::new();
    for inst in &disassembly.instructions {
        let mut debug = DebugInstruction::without_source(inst.pc, inst.mnemonic());
        if let Some(entry) = records.next() {
            debug.source_start = entry.offset;
            debug.source_length = entry.length;
            debug.source_file = entry.source_file(source_list).to_string();
            debug.jump = entry.jump;
        }
        table.push(debug);
    }

    table
}
