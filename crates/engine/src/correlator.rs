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

//! Execution trace correlation.
//!
//! Walks a struct log in order and reconstructs, for every step, which code
//! blob is executing at the step's call depth. A message call or creation at
//! depth `d` decides the code of frame `d + 1`; any other opcode at depth `d`
//! means frames deeper than `d` have returned.

use alloy_primitives::Address;
use edb_trace_common::{
    frame_transition_of,
    types::{AnnotatedStep, CodeHash, StructLog},
    FrameTransition,
};
use eyre::Result;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::{
    utils::decode_code_hex, ContractInfoLookup, FingerprintRegistry, TraceDataSource,
    TransactionInfo,
};

/// Deepest call frame the EVM allows below the outermost one
pub const MAX_CALL_DEPTH: u64 = 1024;

/// Identities of the code executing at each call depth.
///
/// `None` marks a frame whose code could not be determined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallFrameStack {
    frames: Vec<Option<CodeHash>>,
}

impl CallFrameStack {
    /// Stack with only the outermost frame
    pub fn new(root: Option<CodeHash>) -> Self {
        Self { frames: vec![root] }
    }

    /// Set the identity of frame `depth`, discarding anything deeper
    pub fn set_at(&mut self, depth: usize, identity: Option<CodeHash>) {
        self.frames.resize(depth + 1, None);
        self.frames[depth] = identity;
    }

    /// Keep frames `0..=depth`; missing frames in between are unknown
    pub fn truncate(&mut self, depth: usize) {
        self.frames.resize(depth + 1, None);
    }

    /// Identity of frame `depth`
    pub fn get(&self, depth: usize) -> Option<CodeHash> {
        self.frames.get(depth).copied().flatten()
    }

    /// Number of tracked frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is tracked
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Annotated steps produced by a walk
#[derive(Debug, Clone, Default)]
pub struct CorrelatedWalk {
    /// Steps in execution order
    pub steps: Vec<AnnotatedStep>,
    /// Set when the deadline stopped the walk early
    pub truncated: bool,
}

/// Stateful walker over one transaction's execution log
#[derive(Debug)]
pub struct TraceCorrelator<'a, S> {
    source: &'a S,
    registry: &'a FingerprintRegistry,
    source_list: &'a [String],
    lookup: ContractInfoLookup,
    frames: CallFrameStack,
    base_depth: Option<u64>,
    block: Option<u64>,
}

impl<'a, S: TraceDataSource> TraceCorrelator<'a, S> {
    /// Create a correlator that fetches callee code from `source`
    pub fn new(
        source: &'a S,
        registry: &'a FingerprintRegistry,
        source_list: &'a [String],
    ) -> Self {
        Self {
            source,
            registry,
            source_list,
            lookup: ContractInfoLookup::new(),
            frames: CallFrameStack::default(),
            base_depth: None,
            block: None,
        }
    }

    /// Set up the outermost frame: the target's deployed code for a message
    /// call, the transaction input for a contract creation.
    ///
    /// Code is read as of the transaction's block from here on. Failing to
    /// fetch the target's code fails the extraction.
    pub async fn enter_transaction(&mut self, tx: &TransactionInfo) -> Result<CodeHash> {
        self.block = tx.block_number;
        let root = match tx.to {
            Some(target) => {
                let code = self.source.code_at(target, self.block).await?;
                self.lookup.resolve(&code, self.registry, self.source_list)
            }
            None => self.lookup.resolve(&tx.input, self.registry, self.source_list),
        };
        debug!(%root, create = tx.is_create(), "entered transaction");
        self.frames = CallFrameStack::new(Some(root));
        Ok(root)
    }

    /// Annotate one step with the identity active at its depth, then apply its transition
    pub async fn step(&mut self, log: StructLog) -> AnnotatedStep {
        // geth starts counting at 1, other clients at 0
        let base = *self.base_depth.get_or_insert(log.depth);
        let depth = log.depth.saturating_sub(base);
        if depth > MAX_CALL_DEPTH {
            warn!(pc = log.pc, depth = log.depth, "call depth beyond the EVM limit");
            return AnnotatedStep { info_hash: None, step: log };
        }
        let depth = depth as usize;
        let identity = self.frames.get(depth);

        match frame_transition_of(&log.op) {
            FrameTransition::MessageCall => {
                let callee = self.callee_identity(&log).await;
                self.frames.set_at(depth + 1, callee);
            }
            FrameTransition::Create => {
                let created = self.init_code_identity(&log);
                self.frames.set_at(depth + 1, created);
            }
            FrameTransition::Continue => self.frames.truncate(depth),
        }

        trace!(pc = log.pc, op = %log.op, depth, ?identity, "correlated step");
        AnnotatedStep { info_hash: identity, step: log }
    }

    /// Annotate every step, stopping at `deadline` if one is given
    pub async fn walk(
        &mut self,
        logs: Vec<StructLog>,
        deadline: Option<Instant>,
    ) -> CorrelatedWalk {
        let total = logs.len();
        let mut walk = CorrelatedWalk { steps: Vec::with_capacity(total), truncated: false };

        for log in logs {
            let step = match deadline {
                Some(deadline) if Instant::now() >= deadline => None,
                Some(deadline) => timeout_at(deadline, self.step(log)).await.ok(),
                None => Some(self.step(log).await),
            };
            let Some(step) = step else {
                let done = walk.steps.len();
                warn!(done, total, "deadline reached, returning a partial trace");
                walk.truncated = true;
                break;
            };
            walk.steps.push(step);
        }

        walk
    }

    /// Contract lookup built so far
    pub fn lookup(&self) -> &ContractInfoLookup {
        &self.lookup
    }

    /// Consume the correlator, keeping its lookup
    pub fn into_lookup(self) -> ContractInfoLookup {
        self.lookup
    }

    async fn callee_identity(&mut self, log: &StructLog) -> Option<CodeHash> {
        let Some(callee) = log.address_from_top(1) else {
            warn!(pc = log.pc, op = %log.op, "stack too short to read the callee");
            return None;
        };
        self.fetch_and_resolve(callee).await
    }

    async fn fetch_and_resolve(&mut self, address: Address) -> Option<CodeHash> {
        match self.source.code_at(address, self.block).await {
            Ok(code) => Some(self.lookup.resolve(&code, self.registry, self.source_list)),
            Err(err) => {
                warn!(%address, "cannot fetch callee code, frame left unresolved: {err:#}");
                None
            }
        }
    }

    fn init_code_identity(&mut self, log: &StructLog) -> Option<CodeHash> {
        let offset = log.stack_from_top(1).and_then(|w| usize::try_from(w).ok());
        let length = log.stack_from_top(2).and_then(|w| usize::try_from(w).ok());
        let (Some(offset), Some(length)) = (offset, length) else {
            warn!(pc = log.pc, op = %log.op, "cannot read init code location from the stack");
            return None;
        };

        let Some(init_code) = log.memory_slice_hex(offset, length) else {
            warn!(pc = log.pc, offset, length, "init code lies outside the memory snapshot");
            return None;
        };

        match decode_code_hex(&init_code) {
            Ok(code) => Some(self.lookup.resolve(&code, self.registry, self.source_list)),
            Err(err) => {
                warn!(pc = log.pc, "malformed memory snapshot: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use alloy_primitives::{Bytes, TxHash};
    use edb_trace_common::types::{code_hash, StructLogTrace};
    use eyre::eyre;

    use crate::CompiledContractRecord;

    #[derive(Default)]
    struct MockSource {
        codes: HashMap<Address, Bytes>,
        /// Only serve code read as of this block, when set
        block: Option<u64>,
    }

    impl TraceDataSource for MockSource {
        async fn transaction(&self, _tx_hash: TxHash) -> Result<TransactionInfo> {
            Err(eyre!("not used"))
        }

        async fn code_at(&self, address: Address, block: Option<u64>) -> Result<Bytes> {
            if self.block.is_some() && block != self.block {
                return Err(eyre!("code requested at block {block:?}"));
            }
            self.codes.get(&address).cloned().ok_or_else(|| eyre!("no code for {address}"))
        }

        async fn struct_logs(&self, _tx_hash: TxHash) -> Result<StructLogTrace> {
            Err(eyre!("not used"))
        }
    }

    fn word(address: Address) -> String {
        format!("0x{:0>64}", hex::encode(address))
    }

    fn call(depth: u64, callee: Address) -> StructLog {
        StructLog {
            op: "CALL".into(),
            depth,
            stack: vec!["0x0".into(), "0x0".into(), word(callee), "0xffff".into()],
            ..Default::default()
        }
    }

    fn create(depth: u64, init_code: &str) -> StructLog {
        let len = init_code.len() / 2;
        let words = len.div_ceil(32).max(1);
        let padded = format!("{init_code:0<width$}", width = words * 64);
        StructLog {
            op: "CREATE".into(),
            depth,
            // size, offset, value (top of stack last)
            stack: vec![format!("{len:#x}"), "0x0".into(), "0x0".into()],
            memory: padded
                .as_bytes()
                .chunks(64)
                .map(|word| String::from_utf8_lossy(word).into_owned())
                .collect(),
            ..Default::default()
        }
    }

    fn create2(depth: u64, init_code: &str) -> StructLog {
        let mut log = create(depth, init_code);
        log.op = "CREATE2".into();
        // salt, size, offset, value
        log.stack.insert(0, "0x5a17".into());
        log
    }

    fn plain(depth: u64, op: &str) -> StructLog {
        StructLog { op: op.into(), depth, ..Default::default() }
    }

    #[test]
    fn test_call_frame_stack() {
        let a = code_hash(b"a");
        let b = code_hash(b"b");

        let mut frames = CallFrameStack::new(Some(a));
        frames.set_at(1, Some(b));
        assert_eq!(frames.get(0), Some(a));
        assert_eq!(frames.get(1), Some(b));

        frames.truncate(0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames.get(1), None);

        // setting a deep frame leaves the ones in between unknown
        frames.set_at(3, Some(b));
        assert_eq!(frames.len(), 4);
        assert_eq!(frames.get(2), None);
        assert_eq!(frames.get(3), Some(b));
    }

    #[tokio::test]
    async fn test_call_stack_reconstruction() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        let code_a = Bytes::from_static(&[0x60, 0x01, 0x00]);
        let code_b = Bytes::from_static(&[0x60, 0x02, 0x00]);
        let init_c = "6003600055";

        let source = MockSource {
            codes: HashMap::from([(a, code_a.clone()), (b, code_b.clone())]),
            ..Default::default()
        };
        let registry = FingerprintRegistry::default();
        let mut correlator = TraceCorrelator::new(&source, &registry, &[]);
        let root = correlator
            .enter_transaction(&TransactionInfo { to: Some(b), ..Default::default() })
            .await
            .unwrap();

        // depths 0, 1, 1, 2, 1, 0
        let logs = vec![
            call(0, a),
            plain(1, "PUSH1"),
            call(1, b),
            create(2, init_c),
            plain(1, "ADD"),
            plain(0, "STOP"),
        ];
        let walk = correlator.walk(logs, None).await;
        let ids: Vec<_> = walk.steps.iter().map(|s| s.info_hash).collect();

        let hash_a = code_hash(&code_a);
        let hash_b = code_hash(&code_b);
        assert_eq!(root, hash_b);
        assert_eq!(
            ids,
            vec![
                Some(hash_b),
                Some(hash_a),
                Some(hash_a),
                Some(hash_b),
                // back at depth 1: the CALLed code, not the CREATEd one
                Some(hash_a),
                Some(hash_b),
            ]
        );
        assert!(!walk.truncated);

        // the created code was resolved too
        let init_hash = code_hash(&hex::decode(init_c).unwrap());
        assert!(correlator.lookup().get(&init_hash).is_some());
        assert_eq!(correlator.lookup().len(), 3);
    }

    #[tokio::test]
    async fn test_geth_depth_starts_at_one() {
        let a = Address::repeat_byte(0xaa);
        let source = MockSource {
            codes: HashMap::from([(a, Bytes::from_static(&[0x00]))]),
            ..Default::default()
        };
        let registry = FingerprintRegistry::default();
        let mut correlator = TraceCorrelator::new(&source, &registry, &[]);
        let root = correlator
            .enter_transaction(&TransactionInfo { to: Some(a), ..Default::default() })
            .await
            .unwrap();

        let walk = correlator.walk(vec![plain(1, "PUSH1"), plain(1, "STOP")], None).await;
        assert!(walk.steps.iter().all(|s| s.info_hash == Some(root)));
    }

    #[tokio::test]
    async fn test_unfetchable_callee_is_unresolved() {
        let a = Address::repeat_byte(0xaa);
        let unknown = Address::repeat_byte(0x99);
        let source = MockSource {
            codes: HashMap::from([(a, Bytes::from_static(&[0x00]))]),
            ..Default::default()
        };
        let registry = FingerprintRegistry::default();
        let mut correlator = TraceCorrelator::new(&source, &registry, &[]);
        let root = correlator
            .enter_transaction(&TransactionInfo { to: Some(a), ..Default::default() })
            .await
            .unwrap();

        let mut short_stack = plain(0, "STATICCALL");
        short_stack.stack = vec!["0x1".into()];

        let walk = correlator
            .walk(
                vec![
                    call(0, unknown),
                    plain(1, "STOP"),
                    short_stack,
                    plain(1, "STOP"),
                    plain(0, "STOP"),
                ],
                None,
            )
            .await;
        let ids: Vec<_> = walk.steps.iter().map(|s| s.info_hash).collect();
        assert_eq!(ids, vec![Some(root), None, Some(root), None, Some(root)]);
    }

    #[tokio::test]
    async fn test_creation_transaction_uses_input() {
        let init = Bytes::from_static(&[0x60, 0x80, 0x60, 0x40, 0x52]);
        let registry = FingerprintRegistry::build(&[CompiledContractRecord {
            source: "A.sol".into(),
            name: "A".into(),
            creation_bytecode: "6080604052".into(),
            creation_source_map: "0:1:0:-".into(),
            ..Default::default()
        }]);
        let list = vec!["A.sol".to_string()];
        let source = MockSource::default();
        let mut correlator = TraceCorrelator::new(&source, &registry, &list);

        let root = correlator
            .enter_transaction(&TransactionInfo { input: init.clone(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(root, code_hash(&init));
        assert!(correlator.lookup().get(&root).is_some_and(|info| info.is_resolved()));
    }

    #[tokio::test]
    async fn test_target_code_failure_is_an_error() {
        let source = MockSource::default();
        let registry = FingerprintRegistry::default();
        let mut correlator = TraceCorrelator::new(&source, &registry, &[]);
        let tx = TransactionInfo { to: Some(Address::repeat_byte(1)), ..Default::default() };
        assert!(correlator.enter_transaction(&tx).await.is_err());
    }

    #[tokio::test]
    async fn test_deadline_returns_prefix() {
        let a = Address::repeat_byte(0xaa);
        let source = MockSource {
            codes: HashMap::from([(a, Bytes::from_static(&[0x00]))]),
            ..Default::default()
        };
        let registry = FingerprintRegistry::default();
        let mut correlator = TraceCorrelator::new(&source, &registry, &[]);
        correlator
            .enter_transaction(&TransactionInfo { to: Some(a), ..Default::default() })
            .await
            .unwrap();

        let deadline = Instant::now() - std::time::Duration::from_millis(1);
        let walk = correlator.walk(vec![plain(0, "PUSH1"), plain(0, "STOP")], Some(deadline)).await;
        assert!(walk.truncated);
        assert!(walk.steps.is_empty());
    }

    #[tokio::test]
    async fn test_created_code_with_constructor_args_resolves() {
        let factory = Address::repeat_byte(0xfa);
        let init = "6080604052600a80600f6000396000f3";
        let arg = format!("{:0>64}", "2a");
        let registry = FingerprintRegistry::build(&[CompiledContractRecord {
            source: "Child.sol".into(),
            name: "Child".into(),
            creation_bytecode: init.into(),
            creation_source_map: "0:40:0:-;;;;;;;".into(),
            ..Default::default()
        }]);
        let list = vec!["Child.sol".to_string()];
        let source = MockSource {
            codes: HashMap::from([(factory, Bytes::from_static(&[0x00]))]),
            ..Default::default()
        };
        let mut correlator = TraceCorrelator::new(&source, &registry, &list);
        let root = correlator
            .enter_transaction(&TransactionInfo { to: Some(factory), ..Default::default() })
            .await
            .unwrap();

        let with_args = format!("{init}{arg}");
        let logs = vec![
            create(0, &with_args),
            plain(1, "PUSH1"),
            plain(1, "RETURN"),
            create2(0, &with_args),
            plain(1, "PUSH1"),
            plain(0, "STOP"),
        ];
        let walk = correlator.walk(logs, None).await;

        let child = code_hash(&hex::decode(&with_args).unwrap());
        let ids: Vec<_> = walk.steps.iter().map(|s| s.info_hash).collect();
        assert_eq!(
            ids,
            vec![Some(root), Some(child), Some(child), Some(root), Some(child), Some(root)]
        );

        let info = correlator.lookup().get(&child).unwrap();
        let table = info.table().unwrap();
        assert_eq!(table.get(&0).map(|inst| inst.source_file.as_str()), Some("Child.sol"));
        // the factory itself matches nothing
        assert!(!correlator.lookup().get(&root).unwrap().is_resolved());
    }

    #[tokio::test]
    async fn test_code_read_at_transaction_block() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        let source = MockSource {
            codes: HashMap::from([
                (a, Bytes::from_static(&[0x00])),
                (b, Bytes::from_static(&[0x01])),
            ]),
            block: Some(19_000_000),
        };
        let registry = FingerprintRegistry::default();
        let mut correlator = TraceCorrelator::new(&source, &registry, &[]);

        let latest = TransactionInfo { to: Some(a), ..Default::default() };
        assert!(correlator.enter_transaction(&latest).await.is_err());

        let mined =
            TransactionInfo { to: Some(a), block_number: Some(19_000_000), ..Default::default() };
        correlator.enter_transaction(&mined).await.unwrap();
        let walk = correlator.walk(vec![call(0, b), plain(1, "STOP")], None).await;
        assert_eq!(walk.steps[1].info_hash, Some(code_hash(&[0x01])));
    }

    #[tokio::test]
    async fn test_depth_beyond_limit_is_unresolved() {
        let a = Address::repeat_byte(0xaa);
        let source = MockSource {
            codes: HashMap::from([(a, Bytes::from_static(&[0x00]))]),
            ..Default::default()
        };
        let registry = FingerprintRegistry::default();
        let mut correlator = TraceCorrelator::new(&source, &registry, &[]);
        let root = correlator
            .enter_transaction(&TransactionInfo { to: Some(a), ..Default::default() })
            .await
            .unwrap();

        let walk = correlator
            .walk(vec![plain(0, "PUSH1"), plain(u64::MAX, "ADD"), plain(0, "STOP")], None)
            .await;
        let ids: Vec<_> = walk.steps.iter().map(|s| s.info_hash).collect();
        assert_eq!(ids, vec![Some(root), None, Some(root)]);
    }
}
