use crate::cache::BlockCache;
use crate::error::LsmLiteError;
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::Footer;
use crate::sstable::{BlockMeta, SsTable};
use crate::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Streams key-value pairs, in strictly ascending key order, into the
/// on-disk table format. Blocks are cut at the configured target size.
pub struct SsTableBuilder {
    block_size: usize,
    block: BlockBuilder,
    block_first_key: Vec<u8>,
    last_key: Vec<u8>,
    metas: Vec<BlockMeta>,
    data: Vec<u8>,
}

impl SsTableBuilder {
    pub fn new(block_size: usize) -> SsTableBuilder {
        SsTableBuilder {
            block_size,
            block: BlockBuilder::new(),
            block_first_key: Vec::new(),
            last_key: Vec::new(),
            metas: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(
            self.last_key.as_slice() < key || (self.metas.is_empty() && self.block.is_empty()),
            "keys must be added in ascending order"
        );
        if self.block.is_empty() {
            self.block_first_key = key.to_vec();
        }
        self.block.add(key, value);
        self.last_key = key.to_vec();
        if self.block.size() >= self.block_size {
            self.finish_block();
        }
    }

    fn finish_block(&mut self) {
        if self.block.is_empty() {
            return;
        }
        let block = std::mem::take(&mut self.block);
        let bytes = block.finish();
        self.metas.push(BlockMeta {
            offset: self.data.len() as u32,
            length: bytes.len() as u32,
            first_key: std::mem::take(&mut self.block_first_key),
            last_key: self.last_key.clone(),
        });
        self.data.extend_from_slice(&bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty() && self.block.is_empty()
    }

    /// Bytes the table would occupy if built now, ignoring meta and footer.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.block.size()
    }

    /// Flush everything to `path` and reopen the file as a reader.
    pub fn build(
        mut self,
        sst_id: u64,
        path: impl AsRef<Path>,
        cache: Arc<BlockCache>,
    ) -> Result<SsTable> {
        self.finish_block();
        if self.metas.is_empty() {
            return Err(LsmLiteError::Custom("cannot build an empty sstable".into()));
        }

        let meta_offset = self.data.len() as u32;
        let mut meta_block = Vec::new();
        meta_block.extend_from_slice(&(self.metas.len() as u32).to_le_bytes());
        for meta in &self.metas {
            meta.encode(&mut meta_block);
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.write_all(&self.data)?;
        file.write_all(&meta_block)?;
        Footer::new(meta_offset, meta_block.len() as u32).write_to_file(&mut file)?;
        file.sync_all()?;

        SsTable::open(sst_id, path, cache)
    }
}

#[cfg(test)]
mod tests {
    use super::SsTableBuilder;
    use crate::cache::BlockCache;
    use std::sync::Arc;

    #[test]
    fn test_empty_builder_refuses_to_build() {
        let dir = tempfile::TempDir::new().unwrap();
        let builder = SsTableBuilder::new(4096);
        assert!(builder.is_empty());
        assert!(builder
            .build(0, dir.path().join("sst_0.0"), Arc::new(BlockCache::new(16, 2)))
            .is_err());
    }

    #[test]
    fn test_estimated_size_grows() {
        let mut builder = SsTableBuilder::new(64);
        assert_eq!(builder.estimated_size(), 0);
        builder.add(b"a", b"aaaaaaaaaaaaaaaa");
        let after_one = builder.estimated_size();
        assert!(after_one > 0);
        builder.add(b"b", b"bbbbbbbbbbbbbbbb");
        builder.add(b"c", b"cccccccccccccccc");
        assert!(builder.estimated_size() > after_one);
    }
}
