//! The LSM engine: memtable in front, leveled sstables behind, compaction
//! between adjacent levels.

use crate::cache::BlockCache;
use crate::config::Config;
use crate::iterator::{ConcatIterator, HeapIterator, KvIterator, SearchItem, TwoMergeIterator};
use crate::memory::MemTable;
use crate::sstable::builder::SsTableBuilder;
use crate::sstable::SsTable;
use crate::Result;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Index of on-disk tables.
///
/// L0 ids are ordered newest first (largest id first) because its tables may
/// overlap and reads must hit recent data earlier. Deeper levels hold
/// disjoint ranges and are ordered by ascending id, which equals ascending
/// first key.
struct TableIndex {
    levels: BTreeMap<usize, VecDeque<u64>>,
    ssts: HashMap<u64, Arc<SsTable>>,
    max_level: usize,
}

pub struct LsmEngine {
    data_dir: PathBuf,
    config: Config,
    memtable: MemTable,
    index: RwLock<TableIndex>,
    next_sst_id: AtomicU64,
    block_cache: Arc<BlockCache>,
}

fn parse_sst_file_name(name: &str) -> Option<(u64, usize)> {
    let rest = name.strip_prefix("sst_")?;
    let (id_str, level_str) = rest.split_once('.')?;
    if id_str.len() != 32 {
        return None;
    }
    let sst_id = id_str.parse::<u64>().ok()?;
    let level = level_str.parse::<usize>().ok()?;
    Some((sst_id, level))
}

impl LsmEngine {
    pub fn open(path: impl AsRef<Path>) -> Result<LsmEngine> {
        Self::open_with_config(path, Config::default())
    }

    /// Open the engine at `path`, cataloging every sstable already on disk.
    /// Files that do not follow the `sst_<id>.<level>` naming are ignored;
    /// matching files that cannot be opened fail the startup.
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<LsmEngine> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let block_cache = Arc::new(BlockCache::new(
            config.block_cache_capacity,
            config.block_cache_k,
        ));
        let mut index = TableIndex {
            levels: BTreeMap::new(),
            ssts: HashMap::new(),
            max_level: 0,
        };
        let mut max_id = 0u64;
        let mut loaded = 0usize;
        for dent in std::fs::read_dir(&data_dir)? {
            let dent = dent?;
            if !dent.file_type()?.is_file() {
                continue;
            }
            let file_name = dent.file_name();
            let name = file_name.to_str().unwrap_or("");
            let (sst_id, level) = match parse_sst_file_name(name) {
                Some(parsed) => parsed,
                None => {
                    debug!("ignoring unrelated file {:?}", dent.path());
                    continue;
                }
            };
            let sst = SsTable::open(sst_id, dent.path(), block_cache.clone())?;
            max_id = max_id.max(sst_id);
            index.max_level = index.max_level.max(level);
            index.levels.entry(level).or_default().push_back(sst_id);
            index.ssts.insert(sst_id, Arc::new(sst));
            loaded += 1;
        }
        for (level, ids) in index.levels.iter_mut() {
            let mut sorted: Vec<u64> = ids.iter().copied().collect();
            sorted.sort_unstable();
            if *level == 0 {
                sorted.reverse();
            }
            *ids = sorted.into();
        }
        info!(
            "opened {:?}: {} sstables, max level {}",
            data_dir, loaded, index.max_level
        );

        Ok(LsmEngine {
            memtable: MemTable::new(config.per_mem_size_limit),
            data_dir,
            index: RwLock::new(index),
            next_sst_id: AtomicU64::new(if loaded > 0 { max_id + 1 } else { 0 }),
            block_cache,
            config,
        })
    }

    fn sst_path(&self, sst_id: u64, level: usize) -> PathBuf {
        self.data_dir.join(format!("sst_{:032}.{}", sst_id, level))
    }

    /// Probe the memtable, then L0 newest to oldest, then each deeper level
    /// by binary search over its disjoint ranges. The first record found is
    /// authoritative; an empty value means the key was deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.memtable.get(key) {
            return Ok(if value.is_empty() { None } else { Some(value) });
        }

        let index = self.index.read().unwrap();
        if let Some(l0_ids) = index.levels.get(&0) {
            for sst_id in l0_ids {
                let sst = &index.ssts[sst_id];
                if let Some(iter) = sst.get(key)? {
                    let value = iter.value();
                    return Ok(if value.is_empty() {
                        None
                    } else {
                        Some(value.to_vec())
                    });
                }
            }
        }

        for level in 1..=index.max_level {
            let ids = match index.levels.get(&level) {
                Some(ids) if !ids.is_empty() => ids,
                _ => continue,
            };
            let mut left = 0usize;
            let mut right = ids.len();
            while left < right {
                let mid = left + (right - left) / 2;
                let sst = &index.ssts[&ids[mid]];
                if sst.first_key() <= key && key <= sst.last_key() {
                    if let Some(iter) = sst.get(key)? {
                        let value = iter.value();
                        return Ok(if value.is_empty() {
                            None
                        } else {
                            Some(value.to_vec())
                        });
                    }
                    // no other table in this level can cover the key
                    break;
                } else if sst.last_key() < key {
                    left = mid + 1;
                } else {
                    right = mid;
                }
            }
        }

        Ok(None)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.memtable.put(key.to_vec(), value.to_vec());
        if self.memtable.total_size() >= self.config.total_mem_size_limit {
            self.flush()?;
        }
        Ok(())
    }

    pub fn put_batch(&self, kvs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        self.memtable.put_batch(kvs);
        if self.memtable.total_size() >= self.config.total_mem_size_limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Deletion inserts a tombstone: a record with an empty value.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.memtable.remove(key);
        Ok(())
    }

    pub fn remove_batch(&self, keys: &[Vec<u8>]) -> Result<()> {
        self.memtable.remove_batch(keys);
        Ok(())
    }

    /// Write the oldest memtable out as a new L0 sstable. When L0 is already
    /// at the ratio, fold it into L1 first.
    pub fn flush(&self) -> Result<()> {
        if self.memtable.total_size() == 0 {
            return Ok(());
        }

        let mut index = self.index.write().unwrap();

        if index
            .levels
            .get(&0)
            .map_or(false, |ids| ids.len() >= self.config.sst_level_ratio)
        {
            self.full_compact(0, &mut index)?;
        }

        let sst_id = self.next_sst_id.fetch_add(1, Ordering::SeqCst);
        let builder = SsTableBuilder::new(self.config.block_size);
        let path = self.sst_path(sst_id, 0);
        if let Some(sst) = self
            .memtable
            .flush_last(builder, &path, sst_id, self.block_cache.clone())?
        {
            debug!("flushed memtable into sst {} at level 0", sst_id);
            index.ssts.insert(sst_id, sst);
            index.levels.entry(0).or_default().push_front(sst_id);
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        while self.memtable.total_size() > 0 {
            self.flush()?;
        }
        Ok(())
    }

    /// Merge every table of `src_level` and `src_level + 1` into a fresh set
    /// of tables at `src_level + 1`, recursing downward first when the target
    /// level is itself full. Tombstones are preserved.
    fn full_compact(&self, src_level: usize, index: &mut TableIndex) -> Result<()> {
        let dst_level = src_level + 1;
        if index
            .levels
            .get(&dst_level)
            .map_or(false, |ids| ids.len() >= self.config.sst_level_ratio)
        {
            self.full_compact(dst_level, index)?;
        }

        let src_ids: Vec<u64> = index
            .levels
            .get(&src_level)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        let dst_ids: Vec<u64> = index
            .levels
            .get(&dst_level)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        if src_ids.is_empty() && dst_ids.is_empty() {
            return Ok(());
        }

        let dst_tables: Vec<Arc<SsTable>> =
            dst_ids.iter().map(|id| index.ssts[id].clone()).collect();
        let mut merged = if src_level == 0 {
            // L0 ranges overlap: heap-merge them, newest id first on ties
            let mut items = Vec::new();
            for sst_id in &src_ids {
                let sst = index.ssts[sst_id].clone();
                let mut iter = sst.iter()?;
                while iter.is_valid() {
                    items.push(SearchItem {
                        key: iter.key().to_vec(),
                        value: iter.value().to_vec(),
                        idx: -(*sst_id as i64),
                        level: 0,
                    });
                    iter.next()?;
                }
            }
            TwoMergeIterator::new(
                Box::new(HeapIterator::new(items)),
                Box::new(ConcatIterator::new(dst_tables)?),
            )?
        } else {
            let src_tables: Vec<Arc<SsTable>> =
                src_ids.iter().map(|id| index.ssts[id].clone()).collect();
            TwoMergeIterator::new(
                Box::new(ConcatIterator::new(src_tables)?),
                Box::new(ConcatIterator::new(dst_tables)?),
            )?
        };

        let new_ssts = self.build_ssts(&mut merged, dst_level)?;

        for sst_id in src_ids.iter().chain(dst_ids.iter()) {
            if let Some(sst) = index.ssts.remove(sst_id) {
                sst.mark_deleted();
            }
        }
        index.levels.entry(src_level).or_default().clear();
        let mut new_ids: Vec<u64> = new_ssts.iter().map(|sst| sst.sst_id()).collect();
        new_ids.sort_unstable();
        for sst in new_ssts {
            index.ssts.insert(sst.sst_id(), sst);
        }
        let dst = index.levels.entry(dst_level).or_default();
        dst.clear();
        dst.extend(new_ids);
        index.max_level = index.max_level.max(dst_level);
        info!(
            "compacted level {} into level {} ({} tables)",
            src_level,
            dst_level,
            dst.len()
        );
        Ok(())
    }

    /// Stream `iter` into tables at `level`, cutting whenever the builder
    /// reaches the level's target size (`per_mem_limit * ratio^level`).
    fn build_ssts(
        &self,
        iter: &mut dyn KvIterator,
        level: usize,
    ) -> Result<Vec<Arc<SsTable>>> {
        let target_size = self.config.per_mem_size_limit
            * self.config.sst_level_ratio.pow(level as u32);
        let mut new_ssts = Vec::new();
        let mut builder = SsTableBuilder::new(self.config.block_size);
        while iter.is_valid() {
            builder.add(iter.key(), iter.value());
            iter.next()?;
            if builder.estimated_size() >= target_size {
                let full = std::mem::replace(&mut builder, SsTableBuilder::new(self.config.block_size));
                new_ssts.push(self.build_one(full, level)?);
            }
        }
        if !builder.is_empty() {
            new_ssts.push(self.build_one(builder, level)?);
        }
        Ok(new_ssts)
    }

    fn build_one(&self, builder: SsTableBuilder, level: usize) -> Result<Arc<SsTable>> {
        let sst_id = self.next_sst_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sst_path(sst_id, level);
        Ok(Arc::new(builder.build(sst_id, &path, self.block_cache.clone())?))
    }

    /// Merged view over the whole store: memtable side wins over sstables,
    /// newer sstables win over older ones. Tombstones surface as records
    /// with empty values.
    pub fn scan(&self) -> Result<TwoMergeIterator> {
        let mem_iter = self.memtable.iter();
        let mut items = Vec::new();
        {
            let index = self.index.read().unwrap();
            for (level, ids) in index.levels.iter() {
                for sst_id in ids {
                    let sst = index.ssts[sst_id].clone();
                    let mut iter = sst.iter()?;
                    while iter.is_valid() {
                        items.push(SearchItem {
                            key: iter.key().to_vec(),
                            value: iter.value().to_vec(),
                            idx: -(*sst_id as i64),
                            level: *level,
                        });
                        iter.next()?;
                    }
                }
            }
        }
        TwoMergeIterator::new(Box::new(mem_iter), Box::new(HeapIterator::new(items)))
    }

    /// Records matching a monotone predicate (negative below the segment,
    /// zero within, positive above), across the memtable and every level.
    /// Returns `None` when nothing matches anywhere.
    pub fn scan_where(&self, pred: &dyn Fn(&[u8]) -> i32) -> Result<Option<TwoMergeIterator>> {
        let mem_iter = self.memtable.scan_where(pred);
        let mut items = Vec::new();
        {
            let index = self.index.read().unwrap();
            for (level, ids) in index.levels.iter() {
                for sst_id in ids {
                    let sst = index.ssts[sst_id].clone();
                    let mut iter = sst.iter()?;
                    while iter.is_valid() {
                        match pred(iter.key()) {
                            n if n < 0 => iter.next()?,
                            0 => {
                                items.push(SearchItem {
                                    key: iter.key().to_vec(),
                                    value: iter.value().to_vec(),
                                    idx: -(*sst_id as i64),
                                    level: *level,
                                });
                                iter.next()?;
                            }
                            _ => break,
                        }
                    }
                }
            }
        }
        if mem_iter.is_none() && items.is_empty() {
            return Ok(None);
        }
        let mem: Box<dyn KvIterator> = match mem_iter {
            Some(iter) => Box::new(iter),
            None => Box::new(HeapIterator::empty()),
        };
        Ok(Some(TwoMergeIterator::new(
            mem,
            Box::new(HeapIterator::new(items)),
        )?))
    }

    /// Drop all state, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        self.memtable.clear();
        let mut index = self.index.write().unwrap();
        index.levels.clear();
        index.ssts.clear();
        index.max_level = 0;
        for dent in std::fs::read_dir(&self.data_dir)? {
            let dent = dent?;
            if dent.file_type()?.is_file() {
                std::fs::remove_file(dent.path())?;
            }
        }
        info!("cleared {:?}", self.data_dir);
        Ok(())
    }

    /// Number of sstables currently at `level`.
    pub fn sst_count(&self, level: usize) -> usize {
        self.index
            .read()
            .unwrap()
            .levels
            .get(&level)
            .map_or(0, |ids| ids.len())
    }

    pub fn max_level(&self) -> usize {
        self.index.read().unwrap().max_level
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            error!("flush on shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_sst_file_name, LsmEngine};
    use crate::config::Config;
    use crate::iterator::KvIterator;

    fn small_config() -> Config {
        Config {
            per_mem_size_limit: 4096,
            total_mem_size_limit: 16384,
            sst_level_ratio: 4,
            block_size: 1024,
            block_cache_capacity: 256,
            block_cache_k: 2,
        }
    }

    fn key(i: usize) -> Vec<u8> {
        format!("key{:05}", i).into_bytes()
    }

    fn value(i: usize) -> Vec<u8> {
        format!("value{:05}", i).into_bytes()
    }

    #[test]
    fn test_parse_sst_file_name() {
        assert_eq!(
            parse_sst_file_name("sst_00000000000000000000000000000042.3"),
            Some((42, 3))
        );
        assert_eq!(parse_sst_file_name("sst_42.3"), None);
        assert_eq!(parse_sst_file_name("notes.txt"), None);
        assert_eq!(parse_sst_file_name("sst_00000000000000000000000000000042"), None);
    }

    #[test]
    fn test_put_get_remove_in_memory() {
        let _ = env_logger::try_init();
        let dir = tempfile::TempDir::new().unwrap();
        let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();

        engine.put(b"hello", b"world").unwrap();
        assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));

        engine.remove(b"hello").unwrap();
        assert_eq!(engine.get(b"hello").unwrap(), None);
        assert_eq!(engine.get(b"absent").unwrap(), None);
    }

    #[test]
    fn test_flush_preserves_state() {
        let _ = env_logger::try_init();
        let dir = tempfile::TempDir::new().unwrap();
        let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();

        for i in 0..10_000 {
            engine.put(&key(i), &value(i)).unwrap();
        }
        engine.flush_all().unwrap();
        assert_eq!(engine.memtable.total_size(), 0);

        for i in (0..10_000).step_by(97) {
            assert_eq!(engine.get(&key(i)).unwrap(), Some(value(i)), "key {}", i);
        }

        let mut iter = engine.scan().unwrap();
        let mut count = 0usize;
        let mut prev: Option<Vec<u8>> = None;
        while iter.is_valid() {
            if let Some(p) = &prev {
                assert!(p.as_slice() < iter.key());
            }
            assert!(!iter.value().is_empty());
            prev = Some(iter.key().to_vec());
            count += 1;
            iter.next().unwrap();
        }
        assert_eq!(count, 10_000);
    }

    #[test]
    fn test_l0_masking() {
        let _ = env_logger::try_init();
        let dir = tempfile::TempDir::new().unwrap();
        let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();

        engine.put(b"k", b"a").unwrap();
        engine.flush().unwrap();
        engine.put(b"k", b"b").unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"b".to_vec()));

        engine.remove(b"k").unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_compaction_triggered_by_fifth_flush() {
        let _ = env_logger::try_init();
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = small_config();
        config.per_mem_size_limit = 1 << 16;
        config.total_mem_size_limit = 1 << 20;
        let engine = LsmEngine::open_with_config(dir.path(), config).unwrap();

        for round in 0..5 {
            for i in 0..1000 {
                engine
                    .put(&key(i), format!("round{}_{:05}", round, i).into_bytes().as_slice())
                    .unwrap();
            }
            engine.flush().unwrap();
        }

        assert!(engine.sst_count(0) <= 4);
        assert!(engine.sst_count(1) >= 1);
        assert_eq!(engine.max_level(), 1);
        for i in (0..1000).step_by(13) {
            assert_eq!(
                engine.get(&key(i)).unwrap(),
                Some(format!("round4_{:05}", i).into_bytes())
            );
        }
    }

    #[test]
    fn test_tombstones_survive_compaction() {
        let _ = env_logger::try_init();
        let dir = tempfile::TempDir::new().unwrap();
        let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();

        for i in 0..500 {
            engine.put(&key(i), &value(i)).unwrap();
        }
        engine.flush_all().unwrap();
        for i in 0..500 {
            if i % 2 == 0 {
                engine.remove(&key(i)).unwrap();
            }
        }
        // enough flushes to force L0 over the ratio and compact
        for _ in 0..6 {
            for i in 500..600 {
                engine.put(&key(i), &value(i)).unwrap();
            }
            engine.flush().unwrap();
        }

        for i in (0..500).step_by(7) {
            let expected = if i % 2 == 0 { None } else { Some(value(i)) };
            assert_eq!(engine.get(&key(i)).unwrap(), expected, "key {}", i);
        }
    }

    #[test]
    fn test_reopen_recovers_tables() {
        let _ = env_logger::try_init();
        let dir = tempfile::TempDir::new().unwrap();
        {
            let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();
            for i in 0..2000 {
                engine.put(&key(i), &value(i)).unwrap();
            }
            // dropping the engine flushes what is left
        }
        // an unrelated file must not confuse the startup scan
        std::fs::write(dir.path().join("notes.txt"), b"scratch").unwrap();

        let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();
        for i in (0..2000).step_by(31) {
            assert_eq!(engine.get(&key(i)).unwrap(), Some(value(i)));
        }

        // new ids must not collide with recovered ones
        engine.put(b"fresh", b"data").unwrap();
        engine.flush_all().unwrap();
        assert_eq!(engine.get(b"fresh").unwrap(), Some(b"data".to_vec()));
        for i in (0..2000).step_by(31) {
            assert_eq!(engine.get(&key(i)).unwrap(), Some(value(i)));
        }
    }

    #[test]
    fn test_clear() {
        let _ = env_logger::try_init();
        let dir = tempfile::TempDir::new().unwrap();
        let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();

        for i in 0..1000 {
            engine.put(&key(i), &value(i)).unwrap();
        }
        engine.flush_all().unwrap();
        engine.clear().unwrap();

        assert_eq!(engine.get(&key(1)).unwrap(), None);
        assert_eq!(engine.sst_count(0), 0);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_scan_where_spans_memtable_and_ssts() {
        let _ = env_logger::try_init();
        let dir = tempfile::TempDir::new().unwrap();
        let engine = LsmEngine::open_with_config(dir.path(), small_config()).unwrap();

        engine.put(b"scan_a", b"1").unwrap();
        engine.put(b"scan_b", b"2").unwrap();
        engine.flush_all().unwrap();
        engine.put(b"scan_b", b"2-updated").unwrap();
        engine.put(b"scan_c", b"3").unwrap();
        engine.put(b"other", b"x").unwrap();

        let prefix: &[u8] = b"scan_";
        let pred = move |key: &[u8]| -> i32 {
            let head = &key[..key.len().min(prefix.len())];
            match head.cmp(prefix) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Equal => {
                    if key.len() >= prefix.len() {
                        0
                    } else {
                        -1
                    }
                }
            }
        };
        let mut iter = engine.scan_where(&pred).unwrap().unwrap();
        let mut got = Vec::new();
        while iter.is_valid() {
            got.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next().unwrap();
        }
        assert_eq!(
            got,
            vec![
                (b"scan_a".to_vec(), b"1".to_vec()),
                (b"scan_b".to_vec(), b"2-updated".to_vec()),
                (b"scan_c".to_vec(), b"3".to_vec()),
            ]
        );

        let nothing = |_: &[u8]| -> i32 { 1 };
        assert!(engine.scan_where(&nothing).unwrap().is_none());
    }
}
