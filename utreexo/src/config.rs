use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::UtreexoError;
use super::forest::Forest;
use super::pollard::Pollard;
use super::store::{CachedStore, FileStore, MemStore, Store};
use super::{Hash, NodeHasher};

/*
Example config file:

[forest]
store = "file"
path = "forest.dat"
cache_fraction = 0.25

[pollard]
full = false

*/

/// Configuration of the accumulator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dense forest options
    #[serde(default)]
    pub forest: ForestConfig,

    /// Sparse forest options
    #[serde(default)]
    pub pollard: PollardConfig,
}

/// Kind of backing store for the dense forest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Keep everything in RAM.
    Memory,
    /// Keep hashes in a file.
    File,
}

/// Dense forest configuration options
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Where the forest keeps its hashes.
    #[serde(default = "ForestConfig::default_store")]
    pub store: StoreKind,

    /// File for `store = "file"`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Rightmost fraction of every row kept in memory. 0 disables the cache.
    #[serde(default)]
    pub cache_fraction: f64,
}

/// Sparse forest configuration options
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PollardConfig {
    /// Keep every node and a position index instead of only remembered leaves.
    #[serde(default)]
    pub full: bool,
}

/// Store opened according to a `ForestConfig`.
#[derive(Debug)]
pub enum ConfiguredStore {
    /// In-memory store.
    Memory(CachedStore<MemStore>),
    /// File store behind a write-back cache.
    File(CachedStore<FileStore>),
}

impl Config {
    /// Parses and validates a TOML config.
    pub fn from_toml_str(s: &str) -> Result<Self, UtreexoError> {
        let config: Config =
            toml::from_str(s).map_err(|e| UtreexoError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the options are consistent.
    pub fn validate(&self) -> Result<(), UtreexoError> {
        let fraction = self.forest.cache_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(UtreexoError::InvalidConfig(format!(
                "forest.cache_fraction must be within [0, 1], got {}",
                fraction
            )));
        }
        if self.forest.store == StoreKind::File && self.forest.path.is_none() {
            return Err(UtreexoError::InvalidConfig(
                "forest.path is required when forest.store = \"file\"".into(),
            ));
        }
        Ok(())
    }

    /// Opens the backing store for a dense forest.
    pub fn open_store(&self) -> Result<ConfiguredStore, UtreexoError> {
        self.validate()?;
        let fraction = self.forest.cache_fraction;
        match (&self.forest.store, &self.forest.path) {
            (StoreKind::Memory, _) => Ok(ConfiguredStore::Memory(CachedStore::new(
                MemStore::new(),
                fraction,
            ))),
            (StoreKind::File, Some(path)) => Ok(ConfiguredStore::File(CachedStore::new(
                FileStore::open(path)?,
                fraction,
            ))),
            (StoreKind::File, None) => Err(UtreexoError::InvalidConfig(
                "forest.path is missing".into(),
            )),
        }
    }

    /// Creates an empty dense forest over the configured store.
    /// Use `Forest::restore` with `open_store` to reopen an existing one.
    pub fn open_forest<H: NodeHasher>(
        &self,
        hasher: H,
    ) -> Result<Forest<ConfiguredStore, H>, UtreexoError> {
        Forest::new(self.open_store()?, hasher)
    }

    /// Creates an empty pollard of the configured kind.
    pub fn open_pollard<H: NodeHasher>(&self, hasher: H) -> Pollard<H> {
        if self.pollard.full {
            Pollard::new_full(hasher)
        } else {
            Pollard::new(hasher)
        }
    }

    /// Returns a documentation for the config file.
    pub fn documentation() -> &'static str {
        r##"
    [forest]
    store = "memory"             # "memory" or "file"
    path = "forest.dat"          # file holding the forest when store = "file"
    cache_fraction = 0.0         # rightmost fraction of each row kept in memory, 0..1

    [pollard]
    full = false                 # keep every node and index leaves by hash
"##
    }
}

impl ForestConfig {
    /// Forests live in memory unless configured otherwise.
    pub fn default_store() -> StoreKind {
        StoreKind::Memory
    }
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            store: Self::default_store(),
            path: None,
            cache_fraction: 0.0,
        }
    }
}

impl Store for ConfiguredStore {
    fn read(&self, pos: u64) -> Result<Hash, UtreexoError> {
        match self {
            ConfiguredStore::Memory(s) => s.read(pos),
            ConfiguredStore::File(s) => s.read(pos),
        }
    }

    fn write(&mut self, pos: u64, hash: Hash) -> Result<(), UtreexoError> {
        match self {
            ConfiguredStore::Memory(s) => s.write(pos, hash),
            ConfiguredStore::File(s) => s.write(pos, hash),
        }
    }

    fn size(&self) -> u64 {
        match self {
            ConfiguredStore::Memory(s) => s.size(),
            ConfiguredStore::File(s) => s.size(),
        }
    }

    fn resize(&mut self, size: u64) -> Result<(), UtreexoError> {
        match self {
            ConfiguredStore::Memory(s) => s.resize(size),
            ConfiguredStore::File(s) => s.resize(size),
        }
    }

    fn close(&mut self) -> Result<(), UtreexoError> {
        match self {
            ConfiguredStore::Memory(s) => s.close(),
            ConfiguredStore::File(s) => s.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.forest.store, StoreKind::Memory);
        assert_eq!(config.forest.cache_fraction, 0.0);
        assert!(!config.pollard.full);
    }

    #[test]
    fn parses_file_store() {
        let config = Config::from_toml_str(
            r#"
            [forest]
            store = "file"
            path = "/tmp/forest.dat"
            cache_fraction = 0.5

            [pollard]
            full = true
            "#,
        )
        .unwrap();
        assert_eq!(config.forest.store, StoreKind::File);
        assert_eq!(config.forest.path, Some(PathBuf::from("/tmp/forest.dat")));
        assert!(config.pollard.full);
    }

    #[test]
    fn rejects_inconsistent_values() {
        let err = Config::from_toml_str("[forest]\ncache_fraction = 1.5\n").unwrap_err();
        assert!(matches!(err, UtreexoError::InvalidConfig(_)));
        let err = Config::from_toml_str("[forest]\nstore = \"file\"\n").unwrap_err();
        assert!(matches!(err, UtreexoError::InvalidConfig(_)));
        let err = Config::from_toml_str("[forest]\nstore = \"tape\"\n").unwrap_err();
        assert!(matches!(err, UtreexoError::InvalidConfig(_)));
    }

    #[test]
    fn documentation_parses() {
        let doc: String = Config::documentation()
            .lines()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(Config::from_toml_str(&doc).is_ok());
    }

    #[test]
    fn opens_configured_forests() {
        let config = Config::from_toml_str("[forest]\ncache_fraction = 0.5\n[pollard]\nfull = true\n")
            .unwrap();
        let mut forest = config.open_forest(crate::utreexo_hasher::<u64>()).unwrap();
        let leaf = crate::Leaf::new(crate::utreexo_hasher::<u64>().leaf(&1));
        forest.add(&[leaf]).unwrap();
        assert_eq!(forest.roots().unwrap(), vec![leaf.hash]);
        assert!(config.open_pollard(crate::utreexo_hasher::<u64>()).is_full());
    }
}
