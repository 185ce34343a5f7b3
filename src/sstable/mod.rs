//! Immutable sorted string tables.
//!
//! File layout: `[data block ...][meta block][footer]`. The meta block lists
//! every data block's offset, byte length, first key and last key; the footer
//! records where the meta block lives.

pub mod block;
pub mod builder;
mod footer;
pub mod iter;

use crate::byteutils::u32_from_le_bytes;
use crate::cache::BlockCache;
use crate::error::LsmLiteError;
use crate::Result;
use block::Block;
use footer::Footer;
use iter::SstIterator;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct BlockMeta {
    pub offset: u32,
    pub length: u32,
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
}

impl BlockMeta {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&(self.first_key.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.first_key);
        out.extend_from_slice(&(self.last_key.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.last_key);
    }

    pub(crate) fn decode_list(buf: &[u8]) -> Result<Vec<BlockMeta>> {
        let mut pos = 0usize;
        let count = read_u32(buf, &mut pos)? as usize;
        let mut metas = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = read_u32(buf, &mut pos)?;
            let length = read_u32(buf, &mut pos)?;
            let first_key = read_bytes(buf, &mut pos)?;
            let last_key = read_bytes(buf, &mut pos)?;
            metas.push(BlockMeta {
                offset,
                length,
                first_key,
                last_key,
            });
        }
        Ok(metas)
    }
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > buf.len() {
        return Err(LsmLiteError::CorruptSst("truncated meta block".into()));
    }
    let value = u32_from_le_bytes(&buf[*pos..*pos + 4]);
    *pos += 4;
    Ok(value)
}

fn read_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = read_u32(buf, pos)? as usize;
    if *pos + len > buf.len() {
        return Err(LsmLiteError::CorruptSst("truncated meta block".into()));
    }
    let bytes = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(bytes)
}

/// Reader over one on-disk table. Shared through `Arc` so that iterators
/// stay valid after a compaction retires the table: `mark_deleted` defers
/// file removal to the drop of the last reference.
pub struct SsTable {
    sst_id: u64,
    path: PathBuf,
    file: Mutex<File>,
    metas: Vec<BlockMeta>,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    cache: Arc<BlockCache>,
    delete_on_drop: AtomicBool,
}

impl SsTable {
    pub fn open(sst_id: u64, path: impl AsRef<Path>, cache: Arc<BlockCache>) -> Result<SsTable> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let footer = Footer::load(&mut file)?;
        file.seek(SeekFrom::Start(footer.meta_offset as u64))?;
        let mut meta_buf = vec![0u8; footer.meta_length as usize];
        file.read_exact(&mut meta_buf)?;
        let metas = BlockMeta::decode_list(&meta_buf)?;
        if metas.is_empty() {
            return Err(LsmLiteError::CorruptSst(format!(
                "sstable {} has no blocks",
                sst_id
            )));
        }
        let first_key = metas[0].first_key.clone();
        let last_key = metas[metas.len() - 1].last_key.clone();
        Ok(SsTable {
            sst_id,
            path,
            file: Mutex::new(file),
            metas,
            first_key,
            last_key,
            cache,
            delete_on_drop: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn sst_id(&self) -> u64 {
        self.sst_id
    }

    #[inline]
    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }

    #[inline]
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.metas.len()
    }

    pub(crate) fn read_block(&self, block_idx: usize) -> Result<Arc<Block>> {
        let cache_key = (self.sst_id, block_idx);
        if let Some(block) = self.cache.get(&cache_key) {
            return Ok(block);
        }
        let meta = &self.metas[block_idx];
        let mut buf = vec![0u8; meta.length as usize];
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(meta.offset as u64))?;
            file.read_exact(&mut buf)?;
        }
        let block = Arc::new(Block::decode(buf)?);
        self.cache.insert(cache_key, block.clone());
        Ok(block)
    }

    /// Index of the last block whose first key is <= `key` (0 when `key`
    /// precedes the whole table).
    pub(crate) fn block_index_for(&self, key: &[u8]) -> usize {
        self.metas
            .partition_point(|meta| meta.first_key.as_slice() <= key)
            .saturating_sub(1)
    }

    /// Point lookup: an iterator positioned on `key`, or `None` when the
    /// table does not contain it.
    pub fn get(self: &Arc<Self>, key: &[u8]) -> Result<Option<SstIterator>> {
        if key < self.first_key.as_slice() || key > self.last_key.as_slice() {
            return Ok(None);
        }
        let iter = SstIterator::seek(Arc::clone(self), key)?;
        if iter.is_valid_on(key) {
            Ok(Some(iter))
        } else {
            Ok(None)
        }
    }

    /// Full-range iterator in ascending key order.
    pub fn iter(self: &Arc<Self>) -> Result<SstIterator> {
        SstIterator::new(Arc::clone(self))
    }

    /// Retire the table: the file is removed once the last reference drops.
    pub fn mark_deleted(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
    }
}

impl Drop for SsTable {
    fn drop(&mut self) {
        if self.delete_on_drop.load(Ordering::Acquire) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("failed to remove retired sstable {:?}: {}", self.path, e);
            }
        }
    }
}
