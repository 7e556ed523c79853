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

//! Source file collection.
//!
//! The caller supplies the contents of the sources it has; any other path the
//! compiler output refers to is looked up through an [`ImportResolver`].

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::PathBuf,
};

use eyre::{Result, WrapErr};
use tracing::{debug, warn};

use crate::SolcOutput;

/// Looks up the contents of a source file by the path the compiler used for it
pub trait ImportResolver {
    /// Return the contents of `path`
    fn find_import(&self, path: &str) -> Result<String>;
}

impl<F> ImportResolver for F
where
    F: Fn(&str) -> Result<String>,
{
    fn find_import(&self, path: &str) -> Result<String> {
        self(path)
    }
}

/// Resolves source paths relative to a directory on disk
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    /// Create a resolver rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImportResolver for DirectoryResolver {
    fn find_import(&self, path: &str) -> Result<String> {
        let full_path = self.root.join(path);
        fs::read_to_string(&full_path)
            .wrap_err_with(|| format!("failed to read {}", full_path.display()))
    }
}

/// Source contents gathered for one extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedSources {
    /// Path -> contents
    pub sources: BTreeMap<String, String>,
    /// Paths referenced by the compiler output whose contents could not be found
    pub missing: BTreeSet<String>,
}

/// Complete `provided` with every source the compiler output refers to.
///
/// Paths already present in `provided` are kept as given. A path that the
/// resolver cannot find (or every unknown path, without a resolver) is recorded
/// in [`MergedSources::missing`].
pub fn merge_sources(
    solc: &SolcOutput,
    provided: BTreeMap<String, String>,
    resolver: Option<&dyn ImportResolver>,
) -> MergedSources {
    let mut merged = MergedSources { sources: provided, missing: BTreeSet::new() };

    for path in solc.referenced_sources() {
        if merged.sources.contains_key(&path) {
            continue;
        }

        match resolver.map(|r| r.find_import(&path)) {
            Some(Ok(contents)) => {
                debug!(path, "resolved source through import resolver");
                merged.sources.insert(path, contents);
            }
            Some(Err(err)) => {
                warn!(path, "source not found: {err:#}");
                merged.missing.insert(path);
            }
            None => {
                warn!(path, "source not provided and no import resolver configured");
                merged.missing.insert(path);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn solc_with_sources() -> SolcOutput {
        SolcOutput::from_value(json!({
            "contracts": {},
            "sources": {
                "A.sol": { "id": 0 },
                "lib/B.sol": { "id": 1 },
                "C.sol": { "id": 2 }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_resolver_fills_missing_sources() {
        let solc = solc_with_sources();
        let provided = BTreeMap::from([("A.sol".to_string(), "contract A {}".to_string())]);
        let resolver = |path: &str| -> Result<String> {
            if path == "lib/B.sol" {
                Ok("library B {}".to_string())
            } else {
                eyre::bail!("no such file")
            }
        };

        let merged = merge_sources(&solc, provided, Some(&resolver));
        assert_eq!(merged.sources["A.sol"], "contract A {}");
        assert_eq!(merged.sources["lib/B.sol"], "library B {}");
        assert!(!merged.sources.contains_key("C.sol"));
        assert_eq!(merged.missing, BTreeSet::from(["C.sol".to_string()]));
    }

    #[test]
    fn test_without_resolver() {
        let merged = merge_sources(&solc_with_sources(), BTreeMap::new(), None);
        assert!(merged.sources.is_empty());
        assert_eq!(merged.missing.len(), 3);
    }

    #[test]
    fn test_directory_resolver() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/B.sol"), "library B {}").unwrap();

        let resolver = DirectoryResolver::new(dir.path());
        assert_eq!(resolver.find_import("lib/B.sol").unwrap(), "library B {}");
        assert!(resolver.find_import("missing.sol").is_err());
    }
}
