use crate::iterator::KvIterator;
use crate::sstable::block::Block;
use crate::sstable::SsTable;
use crate::Result;
use std::sync::Arc;

/// Cursor over one table, loading blocks on demand through the shared cache.
pub struct SstIterator {
    table: Arc<SsTable>,
    block: Option<Arc<Block>>,
    block_idx: usize,
    record_idx: usize,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl SstIterator {
    /// Positioned on the first record of the table.
    pub fn new(table: Arc<SsTable>) -> Result<SstIterator> {
        let mut iter = SstIterator {
            table,
            block: None,
            block_idx: 0,
            record_idx: 0,
            current: None,
        };
        iter.load_current()?;
        Ok(iter)
    }

    /// Positioned on the first record whose key is >= `key`.
    pub fn seek(table: Arc<SsTable>, key: &[u8]) -> Result<SstIterator> {
        let block_idx = table.block_index_for(key);
        let mut iter = SstIterator {
            table,
            block: None,
            block_idx,
            record_idx: 0,
            current: None,
        };
        let block = iter.table.read_block(block_idx)?;
        iter.record_idx = block.lower_bound(key);
        iter.block = Some(block);
        iter.load_current()?;
        Ok(iter)
    }

    pub(crate) fn is_valid_on(&self, key: &[u8]) -> bool {
        self.is_valid() && self.key() == key
    }

    fn load_current(&mut self) -> Result<()> {
        loop {
            if self.block_idx >= self.table.num_blocks() {
                self.current = None;
                return Ok(());
            }
            if self.block.is_none() {
                self.block = Some(self.table.read_block(self.block_idx)?);
            }
            let block = self.block.as_ref().unwrap();
            if self.record_idx < block.len() {
                let (key, value) = block.record_at(self.record_idx);
                self.current = Some((key.to_vec(), value.to_vec()));
                return Ok(());
            }
            self.block = None;
            self.block_idx += 1;
            self.record_idx = 0;
        }
    }
}

impl KvIterator for SstIterator {
    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().unwrap().0
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().unwrap().1
    }

    fn next(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.record_idx += 1;
        self.load_current()
    }
}
