//! The in-memory write buffer: one active skip list plus a queue of frozen
//! ones awaiting flush.

use crate::cache::BlockCache;
use crate::collections::skiplist::SkipList;
use crate::iterator::{HeapIterator, SearchItem};
use crate::sstable::builder::SsTableBuilder;
use crate::sstable::SsTable;
use crate::Result;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Writes go to `current`; once it reaches the per-table limit it is frozen
/// into the queue (newest at the front) and a fresh table is installed.
/// Frozen tables are immutable until `flush_last` drains the oldest one.
///
/// Lock order: writers take `current` then `frozen`; `flush_last` never
/// holds one while acquiring the other.
pub struct MemTable {
    per_table_limit: usize,
    current: RwLock<SkipList>,
    frozen: RwLock<VecDeque<SkipList>>,
    frozen_bytes: AtomicUsize,
}

impl MemTable {
    pub fn new(per_table_limit: usize) -> MemTable {
        MemTable {
            per_table_limit,
            current: RwLock::new(SkipList::new()),
            frozen: RwLock::new(VecDeque::new()),
            frozen_bytes: AtomicUsize::new(0),
        }
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut current = self.current.write().unwrap();
        current.put(key, value);
        if current.size() >= self.per_table_limit {
            self.freeze(&mut current);
        }
    }

    pub fn put_batch(&self, kvs: Vec<(Vec<u8>, Vec<u8>)>) {
        let mut current = self.current.write().unwrap();
        for (key, value) in kvs {
            current.put(key, value);
            if current.size() >= self.per_table_limit {
                self.freeze(&mut current);
            }
        }
    }

    pub fn remove(&self, key: &[u8]) {
        self.put(key.to_vec(), Vec::new());
    }

    pub fn remove_batch(&self, keys: &[Vec<u8>]) {
        let mut current = self.current.write().unwrap();
        for key in keys {
            current.put(key.clone(), Vec::new());
            if current.size() >= self.per_table_limit {
                self.freeze(&mut current);
            }
        }
    }

    fn freeze(&self, current: &mut SkipList) {
        let full = std::mem::take(current);
        self.frozen_bytes.fetch_add(full.size(), Ordering::Release);
        self.frozen.write().unwrap().push_front(full);
    }

    /// First hit wins, newest table first; a tombstone is a hit.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        {
            let current = self.current.read().unwrap();
            if let Some(value) = current.get_clone(key) {
                return Some(value);
            }
        }
        let frozen = self.frozen.read().unwrap();
        for table in frozen.iter() {
            if let Some(value) = table.get_clone(key) {
                return Some(value);
            }
        }
        None
    }

    pub fn total_size(&self) -> usize {
        self.current.read().unwrap().size() + self.frozen_bytes.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.current.write().unwrap().clear();
        self.frozen.write().unwrap().clear();
        self.frozen_bytes.store(0, Ordering::Release);
    }

    /// Drain the oldest frozen table (or the current one when nothing is
    /// frozen) through `builder` into a new sstable. Returns `None` when the
    /// drained table was empty.
    pub fn flush_last(
        &self,
        mut builder: SsTableBuilder,
        path: impl AsRef<Path>,
        sst_id: u64,
        cache: Arc<BlockCache>,
    ) -> Result<Option<Arc<SsTable>>> {
        let oldest = self.frozen.write().unwrap().pop_back();
        let table = match oldest {
            Some(table) => {
                self.frozen_bytes.fetch_sub(table.size(), Ordering::Release);
                table
            }
            None => std::mem::take(&mut *self.current.write().unwrap()),
        };
        if table.is_empty() {
            return Ok(None);
        }
        for (key, value) in table.iter() {
            builder.add(key, value);
        }
        let sst = builder.build(sst_id, path, cache)?;
        Ok(Some(Arc::new(sst)))
    }

    /// Every record of every table, tagged so that newer tables win heap
    /// ties: the current table gets idx 0, frozen tables 1.. from newest to
    /// oldest.
    pub fn iter_items(&self) -> Vec<SearchItem> {
        let mut items = Vec::new();
        let current = self.current.read().unwrap();
        let frozen = self.frozen.read().unwrap();
        for (key, value) in current.iter() {
            items.push(SearchItem {
                key: key.to_vec(),
                value: value.to_vec(),
                idx: 0,
                level: 0,
            });
        }
        for (i, table) in frozen.iter().enumerate() {
            for (key, value) in table.iter() {
                items.push(SearchItem {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    idx: (i + 1) as i64,
                    level: 0,
                });
            }
        }
        items
    }

    /// Merged view over all tables in key order.
    pub fn iter(&self) -> HeapIterator {
        HeapIterator::new(self.iter_items())
    }

    /// Records matching a monotone predicate across all tables, `None` when
    /// nothing matches anywhere.
    pub fn scan_where(&self, pred: &dyn Fn(&[u8]) -> i32) -> Option<HeapIterator> {
        let mut items = Vec::new();
        let current = self.current.read().unwrap();
        let frozen = self.frozen.read().unwrap();
        if let Some(range) = current.range_where(pred) {
            for (key, value) in range {
                items.push(SearchItem {
                    key: key.to_vec(),
                    value: value.to_vec(),
                    idx: 0,
                    level: 0,
                });
            }
        }
        for (i, table) in frozen.iter().enumerate() {
            if let Some(range) = table.range_where(pred) {
                for (key, value) in range {
                    items.push(SearchItem {
                        key: key.to_vec(),
                        value: value.to_vec(),
                        idx: (i + 1) as i64,
                        level: 0,
                    });
                }
            }
        }
        if items.is_empty() {
            None
        } else {
            Some(HeapIterator::new(items))
        }
    }
}
