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

//! EDB Trace Engine - source-level correlation of transaction traces
//!
//! Given a compiler output and a transaction hash, the engine works out which
//! contract executed every step of the transaction's execution log and which
//! source range produced that step.
//!
//! # Pipeline
//!
//! - [`solc`] normalizes legacy and standard-JSON compiler outputs
//! - [`fingerprint`] turns compiled bytecode into link- and metadata-tolerant matchers
//! - [`source_map`] fuses bytecode with its source map into per-pc debug tables
//! - [`correlator`] tracks which code runs at every call depth
//! - [`core`] drives the whole extraction against a [`TraceDataSource`]

pub mod assembler;
pub use assembler::*;

pub mod core;
pub use core::*;

pub mod correlator;
pub use correlator::*;

pub mod fingerprint;
pub use fingerprint::*;

pub mod lookup;
pub use lookup::*;

pub mod provider;
pub use provider::*;

pub mod solc;
pub use solc::*;

pub mod source_map;
pub use source_map::*;

pub mod sources;
pub use sources::*;

pub mod utils;
