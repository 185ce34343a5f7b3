//! Process constants and the engine configuration.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Size at which the active memtable is frozen into the flush queue.
pub const LSM_PER_MEM_SIZE_LIMIT: usize = 1 << 22;
/// Total in-memory bytes across all tables that trigger a flush from put paths.
pub const LSM_TOL_MEM_SIZE_LIMIT: usize = 1 << 24;
/// L0 file-count trigger for compaction and the per-level size multiplier.
pub const LSM_SST_LEVEL_RATIO: usize = 4;
/// Target size of one data block inside an sstable.
pub const LSM_BLOCK_SIZE: usize = 4096;
/// Block cache capacity in blocks, shared by all sstables of one engine.
pub const LSM_BLOCK_CACHE_CAPACITY: usize = 1024;
/// The K of the cache's LRU-K eviction policy.
pub const LSM_BLOCK_CACHE_K: usize = 2;

// Key-encoding constants for the command layer. Nothing is escaped: a user
// key that collides with one of these prefixes will shadow encoded records.
pub const EXPIRE_PREFIX: &str = "EXPIRE_";
pub const FIELD_PREFIX: &str = "FIELD_";
pub const HASH_VALUE_PREFIX: &str = "HASH_";
pub const ZSET_PREFIX: &str = "ZSET_";
pub const ZSET_SCORE_INFIX: &str = "_SCORE_";
pub const ZSET_ELEM_INFIX: &str = "_ELEM_";
/// Scores are zero-padded to this width so that lexicographic order over
/// SCORE keys equals numeric order over non-negative scores.
pub const ZSET_SCORE_WIDTH: usize = 20;
pub const HASH_FIELD_SEPARATOR: char = ',';
pub const LIST_SEPARATOR: char = ',';

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub per_mem_size_limit: usize,
    pub total_mem_size_limit: usize,
    pub sst_level_ratio: usize,
    pub block_size: usize,
    pub block_cache_capacity: usize,
    pub block_cache_k: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            per_mem_size_limit: LSM_PER_MEM_SIZE_LIMIT,
            total_mem_size_limit: LSM_TOL_MEM_SIZE_LIMIT,
            sst_level_ratio: LSM_SST_LEVEL_RATIO,
            block_size: LSM_BLOCK_SIZE,
            block_cache_capacity: LSM_BLOCK_CACHE_CAPACITY,
            block_cache_k: LSM_BLOCK_CACHE_K,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}
