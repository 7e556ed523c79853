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

use alloy_primitives::Bytes;

/// Normalize a hex code string: surrounding whitespace and any `0x` prefix removed, lowercase.
pub fn normalize_hex(code: &str) -> String {
    let code = code.trim();
    let digits = code.strip_prefix("0x").or_else(|| code.strip_prefix("0X")).unwrap_or(code);
    digits.to_ascii_lowercase()
}

/// Decode a hex code string, with or without `0x` prefix.
pub fn decode_code_hex(code: &str) -> Result<Bytes, hex::FromHexError> {
    hex::decode(normalize_hex(code)).map(Bytes::from)
}
