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

use edb_trace_engine::utils::{decode_code_hex, disassemble, format_instruction};
use eyre::Result;

/// Print one `pc: MNEMONIC` line per instruction
pub fn disasm(code: &str) -> Result<()> {
    let code = decode_code_hex(code)?;
    let disassembly = disassemble(&code);
    for inst in &disassembly.instructions {
        println!("{}", format_instruction(inst));
    }
    if disassembly.is_truncated() {
        tracing::warn!("bytecode ends inside a PUSH immediate");
    }
    Ok(())
}
