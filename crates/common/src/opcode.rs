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

use std::{collections::HashMap, sync::OnceLock};

use revm::bytecode::OpCode;

/// How an executed opcode affects the reconstructed call-frame stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTransition {
    /// A message call: the callee's deployed code starts executing one level deeper
    MessageCall,
    /// A contract creation: init code taken from memory starts executing one level deeper
    Create,
    /// Anything else: execution stays at (or has returned to) the step's own depth
    Continue,
}

/// Extended trait for classifying EVM opcodes during trace correlation
pub trait OpcodeTr {
    /// Check if this opcode is a message call (`CALL`, `CALLCODE`, `DELEGATECALL`, `STATICCALL`)
    ///
    /// # Example
    /// ```rust
    /// use revm::bytecode::OpCode;
    /// use edb_trace_common::OpcodeTr;
    ///
    /// assert!(OpCode::DELEGATECALL.is_message_call());
    /// assert!(!OpCode::CREATE.is_message_call());
    /// ```
    fn is_message_call(&self) -> bool;

    /// Check if this opcode creates a contract (`CREATE`, `CREATE2`)
    fn is_create(&self) -> bool;

    /// The call-frame transition this opcode causes
    fn frame_transition(&self) -> FrameTransition {
        if self.is_message_call() {
            FrameTransition::MessageCall
        } else if self.is_create() {
            FrameTransition::Create
        } else {
            FrameTransition::Continue
        }
    }
}

impl OpcodeTr for OpCode {
    fn is_message_call(&self) -> bool {
        matches!(*self, Self::CALL | Self::CALLCODE | Self::DELEGATECALL | Self::STATICCALL)
    }

    fn is_create(&self) -> bool {
        matches!(*self, Self::CREATE | Self::CREATE2)
    }
}

/// Classify an opcode mnemonic as reported in an execution log.
///
/// Unknown mnemonics are treated as [`FrameTransition::Continue`].
pub fn frame_transition_of(mnemonic: &str) -> FrameTransition {
    opcode_by_name(mnemonic).map(|op| op.frame_transition()).unwrap_or(FrameTransition::Continue)
}

/// Look up an opcode by its mnemonic.
pub fn opcode_by_name(mnemonic: &str) -> Option<OpCode> {
    static NAME_TO_OPCODE: OnceLock<HashMap<&'static str, OpCode>> = OnceLock::new();
    NAME_TO_OPCODE
        .get_or_init(|| {
            (0..=u8::MAX).filter_map(OpCode::new).map(|op| (op.as_str(), op)).collect()
        })
        .get(mnemonic)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_calls() {
        for op in [OpCode::CALL, OpCode::CALLCODE, OpCode::DELEGATECALL, OpCode::STATICCALL] {
            assert_eq!(op.frame_transition(), FrameTransition::MessageCall, "{op}");
        }
    }

    #[test]
    fn test_creates() {
        assert_eq!(OpCode::CREATE.frame_transition(), FrameTransition::Create);
        assert_eq!(OpCode::CREATE2.frame_transition(), FrameTransition::Create);
    }

    #[test]
    fn test_other_opcodes_continue() {
        for op in [OpCode::ADD, OpCode::RETURN, OpCode::REVERT, OpCode::SELFDESTRUCT, OpCode::STOP] {
            assert_eq!(op.frame_transition(), FrameTransition::Continue, "{op}");
        }
    }

    #[test]
    fn test_mnemonic_classification() {
        assert_eq!(frame_transition_of("STATICCALL"), FrameTransition::MessageCall);
        assert_eq!(frame_transition_of("CREATE2"), FrameTransition::Create);
        assert_eq!(frame_transition_of("MSTORE"), FrameTransition::Continue);
        assert_eq!(frame_transition_of("NOT_AN_OPCODE"), FrameTransition::Continue);
    }

    #[test]
    fn test_opcode_by_name() {
        assert_eq!(opcode_by_name("PUSH1"), Some(OpCode::PUSH1));
        assert_eq!(opcode_by_name("DELEGATECALL"), Some(OpCode::DELEGATECALL));
        assert_eq!(opcode_by_name("push1"), None);
    }
}
