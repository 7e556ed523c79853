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

//! Bytecode fingerprinting.
//!
//! A compiled contract's bytecode is not always byte-identical to what runs on
//! chain: library addresses are linked in place of 40-character placeholders,
//! and the trailing metadata hash changes with any whitespace edit of the
//! source. A [`FingerprintPattern`] tolerates the former always and the latter
//! in fuzzy mode.

use regex::Regex;
use tracing::{debug, warn};

use crate::{utils::normalize_hex, CompiledContractRecord};

/// Width of a link placeholder (and of the address that replaces it), in hex characters
pub const LINK_PLACEHOLDER_LEN: usize = 40;

/// CBOR metadata tags and the hex length of the hash that follows each of them
pub const METADATA_TAGS: &[(&str, usize)] = &[
    // {"bzzr0": <32 bytes>}
    ("a165627a7a72305820", 64),
    // {"bzzr1": <32 bytes>, ...}
    ("a265627a7a72315820", 64),
    // {"ipfs": <34 bytes>, ...}
    ("a264697066735822", 68),
];

/// Which bytecode of a contract a pattern was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// Init code; matched as a prefix since constructor arguments follow it
    Creation,
    /// Deployed code; must match the whole blob
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    AnyHex(usize),
}

/// A compiled matcher for one bytecode blob
#[derive(Debug, Clone)]
pub struct FingerprintPattern {
    kind: CodeKind,
    fuzzy: bool,
    regex: Regex,
}

impl FingerprintPattern {
    /// Build a pattern from compiler-emitted bytecode hex.
    ///
    /// Returns `None` for empty bytecode.
    pub fn new(bytecode: &str, kind: CodeKind, fuzzy: bool) -> Option<Self> {
        let bytecode = normalize_hex(bytecode);
        if bytecode.is_empty() {
            return None;
        }

        let mut segments = split_link_placeholders(&bytecode);
        if fuzzy {
            segments = widen_metadata(segments);
        }

        let mut pattern = String::from("^");
        for segment in &segments {
            match segment {
                Segment::Literal(literal) => pattern.push_str(&regex::escape(literal)),
                Segment::AnyHex(len) => pattern.push_str(&format!("[0-9a-f]{{{len}}}")),
            }
        }
        if kind == CodeKind::Runtime {
            pattern.push('$');
        }

        match Regex::new(&pattern) {
            Ok(regex) => Some(Self { kind, fuzzy, regex }),
            Err(err) => {
                warn!(?kind, fuzzy, "failed to compile bytecode pattern: {err}");
                None
            }
        }
    }

    /// Whether the pattern was built from creation or runtime bytecode
    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    /// Whether metadata hashes are wildcarded
    pub fn is_fuzzy(&self) -> bool {
        self.fuzzy
    }

    /// Match normalized (lowercase, unprefixed) code hex
    pub fn is_match(&self, code_hex: &str) -> bool {
        self.regex.is_match(code_hex)
    }
}

/// Replace each `_` and the 39 characters following it with a 40-hex wildcard
fn split_link_placeholders(bytecode: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = bytecode.chars();

    while let Some(c) = chars.next() {
        if c == '_' {
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            chars.by_ref().take(LINK_PLACEHOLDER_LEN - 1).for_each(drop);
            segments.push(Segment::AnyHex(LINK_PLACEHOLDER_LEN));
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Replace the hash following every known metadata tag with a same-length wildcard
fn widen_metadata(segments: Vec<Segment>) -> Vec<Segment> {
    let mut widened = Vec::with_capacity(segments.len());

    for segment in segments {
        let mut rest = match segment {
            Segment::Literal(literal) => literal,
            wildcard => {
                widened.push(wildcard);
                continue;
            }
        };

        while let Some((at, tag, hash_len)) = find_metadata_tag(&rest) {
            let hash_start = at + tag.len();
            let tail = rest.split_off(hash_start + hash_len);
            rest.truncate(hash_start);
            widened.push(Segment::Literal(rest));
            widened.push(Segment::AnyHex(hash_len));
            rest = tail;
        }
        if !rest.is_empty() {
            widened.push(Segment::Literal(rest));
        }
    }

    widened
}

/// Earliest metadata tag in `hex` that is followed by a full hash
fn find_metadata_tag(hex: &str) -> Option<(usize, &'static str, usize)> {
    METADATA_TAGS
        .iter()
        .filter_map(|(tag, hash_len)| {
            let mut from = 0;
            while let Some(pos) = hex[from..].find(tag) {
                let at = from + pos;
                // tags are only meaningful at byte boundaries
                if at % 2 == 0 && hex.len() >= at + tag.len() + hash_len {
                    return Some((at, *tag, *hash_len));
                }
                from = at + 1;
            }
            None
        })
        .min_by_key(|(at, _, _)| *at)
}

/// A fingerprint together with the source map that belongs to its bytecode
#[derive(Debug, Clone)]
pub struct FingerprintEntry {
    /// The matcher
    pub pattern: FingerprintPattern,
    /// Source map of the bytecode the matcher was built from
    pub source_map: String,
    /// `File.sol:Name` of the contract
    pub contract: String,
}

/// Ordered list of fingerprints: all exact patterns, then all fuzzy ones
#[derive(Debug, Clone, Default)]
pub struct FingerprintRegistry {
    entries: Vec<FingerprintEntry>,
}

impl FingerprintRegistry {
    /// Build the registry from every compiled contract
    pub fn build(records: &[CompiledContractRecord]) -> Self {
        let mut exact = Vec::new();
        let mut fuzzy = Vec::new();

        for record in records {
            let sides = [
                (CodeKind::Runtime, &record.deployed_bytecode, &record.runtime_source_map),
                (CodeKind::Creation, &record.creation_bytecode, &record.creation_source_map),
            ];
            for (kind, bytecode, source_map) in sides {
                if bytecode.is_empty() {
                    continue;
                }
                for (fuzzy_mode, list) in [(false, &mut exact), (true, &mut fuzzy)] {
                    if let Some(pattern) = FingerprintPattern::new(bytecode, kind, fuzzy_mode) {
                        list.push(FingerprintEntry {
                            pattern,
                            source_map: source_map.clone(),
                            contract: record.qualified_name(),
                        });
                    }
                }
            }
        }

        debug!(exact = exact.len(), fuzzy = fuzzy.len(), "built fingerprint registry");
        exact.append(&mut fuzzy);
        Self { entries: exact }
    }

    /// First entry whose pattern matches the given code hex
    pub fn find_match(&self, code_hex: &str) -> Option<&FingerprintEntry> {
        let code_hex = normalize_hex(code_hex);
        self.entries.iter().find(|entry| entry.pattern.is_match(&code_hex))
    }

    /// All entries in matching order
    pub fn entries(&self) -> &[FingerprintEntry] {
        &self.entries
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no patterns
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
