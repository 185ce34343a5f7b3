//! Shared block cache with LRU-K eviction, sharded to spread lock
//! contention.

use crate::sstable::block::Block;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

const NUM_SHARD_BITS: usize = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

/// Cache key: (sst id, block index within the table).
pub type BlockKey = (u64, usize);

pub struct BlockCache {
    shards: Vec<Mutex<CacheShard>>,
    shard_capacity: usize,
    k: usize,
}

struct CacheShard {
    entries: HashMap<BlockKey, CacheEntry>,
    tick: u64,
}

struct CacheEntry {
    block: Arc<Block>,
    /// Up to the most recent K access ticks, oldest first.
    history: VecDeque<u64>,
}

impl CacheEntry {
    fn touch(&mut self, tick: u64, k: usize) {
        if self.history.len() == k {
            self.history.pop_front();
        }
        self.history.push_back(tick);
    }
}

impl BlockCache {
    pub fn new(capacity: usize, k: usize) -> BlockCache {
        let shards = (0..NUM_SHARDS)
            .map(|_| {
                Mutex::new(CacheShard {
                    entries: HashMap::new(),
                    tick: 0,
                })
            })
            .collect();
        BlockCache {
            shards,
            shard_capacity: std::cmp::max(1, capacity / NUM_SHARDS),
            k: std::cmp::max(1, k),
        }
    }

    fn shard(&self, key: &BlockKey) -> &Mutex<CacheShard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (NUM_SHARDS - 1)]
    }

    pub fn get(&self, key: &BlockKey) -> Option<Arc<Block>> {
        let mut shard = self.shard(key).lock().unwrap();
        shard.tick += 1;
        let tick = shard.tick;
        let k = self.k;
        shard.entries.get_mut(key).map(|entry| {
            entry.touch(tick, k);
            entry.block.clone()
        })
    }

    pub fn insert(&self, key: BlockKey, block: Arc<Block>) {
        let mut shard = self.shard(&key).lock().unwrap();
        shard.tick += 1;
        let tick = shard.tick;
        let k = self.k;
        if let Some(entry) = shard.entries.get_mut(&key) {
            entry.block = block;
            entry.touch(tick, k);
            return;
        }
        if shard.entries.len() >= self.shard_capacity {
            shard.evict(k);
        }
        let mut history = VecDeque::with_capacity(k);
        history.push_back(tick);
        shard.entries.insert(key, CacheEntry { block, history });
    }
}

impl CacheShard {
    /// LRU-K victim: entries with fewer than K recorded accesses go first
    /// (earliest access first), then the smallest K-th most recent access.
    fn evict(&mut self, k: usize) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.history.len() >= k, *entry.history.front().unwrap_or(&0)))
            .map(|(key, _)| *key);
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}
