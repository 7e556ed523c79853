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

//! On-disk JSON cache for RPC responses.
//!
//! Execution logs of mined transactions never change, and deployed code rarely
//! does, so both are worth keeping between runs against the same node.

use std::{fs, marker::PhantomData, path::PathBuf, time::Duration};

use alloy_chains::Chain;
use eyre::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{trace, warn};

/// Default TTL for cached deployed code: one day.
pub const DEFAULT_CODE_CACHE_TTL: u64 = 86400;

/// Trait for cache paths.
pub trait CachePath {
    /// Returns the path to edb-trace's cache dir: `~/.edb-trace/cache` by default.
    fn cache_root(&self) -> Option<PathBuf>;

    /// Returns the path to the deployed-code cache dir for `chain_id`:
    /// `<cache_root>/code/<chain>`
    fn code_cache_dir(&self, chain_id: impl Into<Chain>) -> Option<PathBuf> {
        Some(self.cache_root()?.join("code").join(chain_id.into().to_string()))
    }

    /// Returns the path to the execution-log cache dir for `chain_id`:
    /// `<cache_root>/trace/<chain>`
    fn trace_cache_dir(&self, chain_id: impl Into<Chain>) -> Option<PathBuf> {
        Some(self.cache_root()?.join("trace").join(chain_id.into().to_string()))
    }
}

/// Cache path for edb-trace.
#[derive(Debug, Clone)]
pub struct TraceCachePath {
    root: Option<PathBuf>,
}

fn default_cache_root() -> Option<PathBuf> {
    dirs_next::home_dir().map(|p| p.join(".edb-trace").join("cache"))
}

impl TraceCachePath {
    /// New cache path, falling back to the default root.
    pub fn new(root: Option<impl Into<PathBuf>>) -> Self {
        Self { root: root.map(Into::into).or_else(default_cache_root) }
    }
}

impl CachePath for TraceCachePath {
    fn cache_root(&self) -> Option<PathBuf> {
        self.root.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheWrapper<T> {
    pub data: T,
    pub expires_at: u64,
}

impl<T> CacheWrapper<T> {
    pub fn new(data: T, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl
                .map(|ttl| ttl.as_secs().saturating_add(chrono::Utc::now().timestamp() as u64))
                .unwrap_or(u64::MAX),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < chrono::Utc::now().timestamp() as u64
    }
}

/// Trait for cache.
pub trait Cache {
    /// The type of the data to be cached.
    type Data: Serialize + DeserializeOwned;

    /// Loads the cache for the given label.
    fn load_cache(&self, label: impl Into<String>) -> Option<Self::Data>;

    /// Saves the cache for the given label.
    fn save_cache(&self, label: impl Into<String>, data: &Self::Data) -> Result<()>;
}

/// A cache that stores one JSON file per label.
///  - `cache_dir` is the directory where the cache files are stored.
///  - `cache_ttl` is the time-to-live of the cache files; `None` never expires.
#[derive(Debug, Clone)]
pub struct JsonCache<T> {
    cache_dir: PathBuf,
    cache_ttl: Option<Duration>,
    phantom: PhantomData<T>,
}

impl<T> JsonCache<T>
where
    T: Serialize + DeserializeOwned,
{
    /// New cache. Returns `None` when no directory is given.
    pub fn new(
        cache_dir: Option<impl Into<PathBuf>>,
        cache_ttl: Option<Duration>,
    ) -> Result<Option<Self>> {
        if let Some(cache_dir) = cache_dir {
            let cache_dir = cache_dir.into();
            fs::create_dir_all(&cache_dir)?;
            Ok(Some(Self { cache_dir, cache_ttl, phantom: PhantomData }))
        } else {
            Ok(None)
        }
    }
}

impl<T> Cache for JsonCache<T>
where
    T: Serialize + DeserializeOwned,
{
    type Data = T;

    fn load_cache(&self, label: impl Into<String>) -> Option<T> {
        let cache_file = self.cache_dir.join(format!("{}.json", label.into()));
        trace!("loading cache: {:?}", cache_file);
        if !cache_file.exists() {
            return None;
        }

        let content = fs::read_to_string(&cache_file).ok()?;
        let cache: CacheWrapper<_> = match serde_json::from_str(&content) {
            Ok(cache) => cache,
            Err(_) => {
                warn!("the cache file has been corrupted: {:?}", cache_file);
                let _ = fs::remove_file(&cache_file);
                return None;
            }
        };

        if cache.is_expired() {
            trace!("the cache file has expired: {:?}", cache_file);
            let _ = fs::remove_file(&cache_file);
            None
        } else {
            trace!("hit the cache: {:?}", cache_file);
            Some(cache.data)
        }
    }

    fn save_cache(&self, label: impl Into<String>, data: &T) -> Result<()> {
        let cache_file = self.cache_dir.join(format!("{}.json", label.into()));
        trace!("saving cache: {:?}", cache_file);

        let cache = CacheWrapper::new(data, self.cache_ttl);
        fs::write(&cache_file, serde_json::to_string(&cache)?)?;
        Ok(())
    }
}

impl<T> Cache for Option<JsonCache<T>>
where
    T: Serialize + DeserializeOwned,
{
    type Data = T;

    fn load_cache(&self, label: impl Into<String>) -> Option<T> {
        self.as_ref()?.load_cache(label)
    }

    fn save_cache(&self, label: impl Into<String>, data: &T) -> Result<()> {
        match self {
            Some(cache) => cache.save_cache(label, data),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        value: String,
        number: u32,
    }

    #[test]
    fn test_cache_path_directories() {
        let root = tempfile::tempdir().unwrap();
        let cache_path = TraceCachePath::new(Some(root.path()));
        assert_eq!(cache_path.cache_root().as_deref(), Some(root.path()));

        let code_dir = cache_path.code_cache_dir(Chain::mainnet()).unwrap();
        assert!(code_dir.starts_with(root.path().join("code")));
        assert!(code_dir.ends_with("mainnet"));

        let trace_dir = cache_path.trace_cache_dir(Chain::from_id(31337)).unwrap();
        assert!(trace_dir.starts_with(root.path().join("trace")));
    }

    #[test]
    fn test_cache_wrapper_ttl() {
        let forever = CacheWrapper::new(1u32, None);
        assert_eq!(forever.expires_at, u64::MAX);
        assert!(!forever.is_expired());

        let hour = CacheWrapper::new(1u32, Some(Duration::from_secs(3600)));
        assert!(!hour.is_expired());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonCache::<TestData>::new(Some(dir.path()), None).unwrap().unwrap();

        let data = TestData { value: "hello".to_string(), number: 123 };
        cache.save_cache("label", &data).unwrap();

        assert_eq!(cache.load_cache("label"), Some(data));
        assert_eq!(cache.load_cache("missing"), None);
    }

    #[test]
    fn test_expired_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonCache::<TestData>::new(Some(dir.path()), None).unwrap().unwrap();

        let stale = CacheWrapper { data: TestData { value: "x".into(), number: 1 }, expires_at: 0 };
        let file = dir.path().join("stale.json");
        fs::write(&file, serde_json::to_string(&stale).unwrap()).unwrap();

        assert!(cache.load_cache("stale").is_none());
        assert!(!file.exists());
    }

    #[test]
    fn test_corrupted_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonCache::<TestData>::new(Some(dir.path()), None).unwrap().unwrap();

        let file = dir.path().join("corrupted.json");
        fs::write(&file, "invalid json").unwrap();

        assert!(cache.load_cache("corrupted").is_none());
        assert!(!file.exists());
    }

    #[test]
    fn test_disabled_cache() {
        let cache = JsonCache::<TestData>::new(None::<&str>, None).unwrap();
        assert!(cache.is_none());

        let data = TestData { value: "none".to_string(), number: 789 };
        assert!(cache.save_cache("none", &data).is_ok());
        assert!(cache.load_cache("none").is_none());
    }
}
