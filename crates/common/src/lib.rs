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

//! EDB Trace Common - Shared functionality for edb-trace components
//!
//! This crate provides the data model shared by the correlation engine and the
//! `edb-trace` binary, together with logging setup and on-disk caching of RPC
//! responses.

/// Common types used throughout edb-trace: debug tables, execution logs and the result payload
pub mod types;

/// Caching utilities for storing and retrieving RPC responses across runs
pub mod cache;
/// Logging setup and utilities for consistent logging across edb-trace components
pub mod logging;
/// Opcode classification used to detect call-frame transitions in execution logs
pub mod opcode;

pub use cache::*;
pub use logging::*;
pub use opcode::*;
