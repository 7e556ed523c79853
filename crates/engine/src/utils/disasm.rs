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

//! EVM bytecode disassembly
//!
//! Decodes a bytecode blob into its ordered instruction stream. `PUSHn`
//! instructions carry their immediate bytes; a `PUSHn` running past the end of
//! the blob is zero padded so that every byte of input yields an instruction.

use revm::bytecode::opcode::OpCode;

/// A single disassembled instruction with its associated data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassemblyInstruction {
    /// Program counter offset where this instruction starts
    pub pc: usize,
    /// Raw opcode byte
    pub byte: u8,
    /// For PUSHX instructions, this contains the immediate value bytes
    /// For other instructions, this is empty
    pub push_data: Vec<u8>,
    /// Set when the immediate bytes ran past the end of the bytecode
    pub truncated: bool,
}

impl DisassemblyInstruction {
    /// Create a new instruction without push data
    pub fn new(pc: usize, byte: u8) -> Self {
        Self { pc, byte, push_data: Vec::new(), truncated: false }
    }

    /// The opcode, if the byte is a defined instruction
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::new(self.byte)
    }

    /// Check if this instruction is a PUSH instruction (`PUSH1` through `PUSH32`)
    pub fn is_push(&self) -> bool {
        (0x60..=0x7f).contains(&self.byte)
    }

    /// Size of the immediate data, 0 for non-PUSH instructions
    pub fn push_size(&self) -> usize {
        if self.is_push() {
            (self.byte - 0x60 + 1) as usize
        } else {
            0
        }
    }

    /// Mnemonic with the immediate rendered as hex, e.g. `PUSH2 0x1234`
    pub fn mnemonic(&self) -> String {
        let name = match self.opcode() {
            Some(op) => op.as_str().to_string(),
            None => format!("'{:x}'(Unknown Opcode)", self.byte),
        };

        if self.is_push() && !self.push_data.is_empty() {
            format!("{name} 0x{}", hex::encode(&self.push_data))
        } else {
            name
        }
    }
}

/// Complete disassembly result for a piece of bytecode
#[derive(Debug, Clone, Default)]
pub struct DisassemblyResult {
    /// List of disassembled instructions in order
    pub instructions: Vec<DisassemblyInstruction>,
}

impl DisassemblyResult {
    /// Whether the last instruction's immediate ran past the end of the bytecode
    pub fn is_truncated(&self) -> bool {
        self.instructions.last().is_some_and(|inst| inst.truncated)
    }
}

/// Disassemble EVM bytecode into a structured representation
///
/// # Examples
/// ```rust
/// use edb_trace_engine::utils::disassemble;
///
/// let result = disassemble(&[0x60, 0x42, 0x80]); // PUSH1 0x42, DUP1
/// assert_eq!(result.instructions.len(), 2);
/// assert_eq!(result.instructions[0].mnemonic(), "PUSH1 0x42");
/// ```
pub fn disassemble(bytecode: &[u8]) -> DisassemblyResult {
    let mut instructions = Vec::new();
    let mut pc = 0;

    while pc < bytecode.len() {
        let byte = bytecode[pc];
        let mut inst = DisassemblyInstruction::new(pc, byte);

        let push_size = inst.push_size();
        if push_size > 0 {
            let data_start = pc + 1;
            let data_end = data_start + push_size;
            let available = &bytecode[data_start.min(bytecode.len())..data_end.min(bytecode.len())];

            inst.push_data = available.to_vec();
            if available.len() < push_size {
                inst.push_data.resize(push_size, 0);
                inst.truncated = true;
            }
            pc = data_end;
        } else {
            pc += 1;
        }

        instructions.push(inst);
    }

    DisassemblyResult { instructions }
}

/// Format an instruction as `pppp: MNEMONIC`, the pc in hex
pub fn format_instruction(instruction: &DisassemblyInstruction) -> String {
    format!("{:04x}: {}", instruction.pc, instruction.mnemonic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_simple() {
        let result = disassemble(&[0x80, 0x81, 0x82]); // DUP1, DUP2, DUP3

        assert_eq!(result.instructions.len(), 3);
        assert_eq!(result.instructions.iter().map(|i| i.pc).collect::<Vec<_>>(), vec![0, 1, 2]);
        for inst in &result.instructions {
            assert!(!inst.is_push());
            assert!(inst.push_data.is_empty());
        }
    }

    #[test]
    fn test_disassemble_push_instructions() {
        let result = disassemble(&[
            0x60, 0x42, // PUSH1 0x42
            0x61, 0x12, 0x34, // PUSH2 0x1234
            0x80, // DUP1
        ]);

        assert_eq!(result.instructions.len(), 3);
        assert_eq!(result.instructions[0].mnemonic(), "PUSH1 0x42");
        assert_eq!(result.instructions[1].pc, 2);
        assert_eq!(result.instructions[1].push_size(), 2);
        assert_eq!(result.instructions[1].mnemonic(), "PUSH2 0x1234");
        assert_eq!(result.instructions[2].pc, 5);
        assert_eq!(result.instructions[2].mnemonic(), "DUP1");
        assert!(!result.is_truncated());
    }

    #[test]
    fn test_truncated_push_instruction() {
        let result = disassemble(&[0x61, 0x12]); // PUSH2 but only 1 byte of data

        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.instructions[0].push_data, vec![0x12, 0x00]);
        assert!(result.is_truncated());
        assert_eq!(result.instructions[0].mnemonic(), "PUSH2 0x1200");
    }

    #[test]
    fn test_unknown_opcode() {
        let result = disassemble(&[0x0c]);
        assert_eq!(result.instructions[0].mnemonic(), "'c'(Unknown Opcode)");
    }

    #[test]
    fn test_format_instruction() {
        let mut push_inst = DisassemblyInstruction::new(10, 0x61);
        push_inst.push_data = vec![0x12, 0x34];
        assert_eq!(format_instruction(&push_inst), "000a: PUSH2 0x1234");

        let regular_inst = DisassemblyInstruction::new(5, 0x80);
        assert_eq!(format_instruction(&regular_inst), "0005: DUP1");
    }
}
