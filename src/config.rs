//! Store configuration.
//!
//! Every tunable that the data structures consult lives here and is passed to
//! constructors explicitly. Nothing in the crate reads process-wide state.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Which access clock value objects carry in their 24-bit clock field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaxmemoryPolicy {
    /// Last access time at LRU clock resolution.
    #[default]
    Lru,
    /// Access minutes + logarithmic frequency counter.
    Lfu,
}

/// Configuration for collections and the keyspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Quicklist fill factor. Negative values pick a byte-size tier
    /// (-1 = 4KiB ... -5 = 64KiB), positive values cap entries per node.
    pub list_max_listpack_size: i32,
    /// Number of quicklist nodes at each end that stay uncompressed (0 = off).
    pub list_compress_depth: u32,
    pub hash_max_listpack_entries: usize,
    pub hash_max_listpack_value: usize,
    pub set_max_intset_entries: usize,
    pub zset_max_listpack_entries: usize,
    pub zset_max_listpack_value: usize,
    /// Seed for the keyed hash used by every hash table.
    pub hash_seed: u64,
    pub maxmemory_policy: MaxmemoryPolicy,
    pub lfu_log_factor: u32,
    /// LFU decay period in minutes.
    pub lfu_decay_time: u32,
    /// Share the small integer pool between string values.
    pub shared_integers: bool,
    /// Hand deleted large values to the background reclaimer.
    pub lazyfree_server_del: bool,
    pub databases: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            list_max_listpack_size: -2,
            list_compress_depth: 0,
            hash_max_listpack_entries: 128,
            hash_max_listpack_value: 64,
            set_max_intset_entries: 512,
            zset_max_listpack_entries: 128,
            zset_max_listpack_value: 64,
            hash_seed: 0,
            maxmemory_policy: MaxmemoryPolicy::Lru,
            lfu_log_factor: 10,
            lfu_decay_time: 1,
            shared_integers: true,
            lazyfree_server_del: false,
            databases: 16,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string and clamp it into range.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Clamp tunables into the ranges the structures support.
    ///
    /// Out-of-range list settings are clamped with a warning; settings that
    /// cannot be repaired are rejected.
    pub fn validate(&mut self) -> Result<()> {
        let fill = crate::quicklist::clamp_fill(self.list_max_listpack_size);
        if fill != self.list_max_listpack_size {
            warn!(
                requested = self.list_max_listpack_size,
                clamped = fill,
                "list-max-listpack-size out of range"
            );
            self.list_max_listpack_size = fill;
        }
        let depth = crate::quicklist::clamp_compress_depth(self.list_compress_depth);
        if depth != self.list_compress_depth {
            warn!(
                requested = self.list_compress_depth,
                clamped = depth,
                "list-compress-depth out of range"
            );
            self.list_compress_depth = depth;
        }
        if self.databases == 0 {
            return Err(Error::Config("databases must be at least 1".into()));
        }
        if self.lfu_decay_time == 0 {
            warn!("lfu-decay-time of 0 disables counter decay");
        }
        Ok(())
    }
}
