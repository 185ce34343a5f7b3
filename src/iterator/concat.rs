use crate::iterator::KvIterator;
use crate::sstable::iter::SstIterator;
use crate::sstable::SsTable;
use crate::Result;
use std::sync::Arc;

/// Chains tables whose key ranges are disjoint and ascending, as holds for
/// every level below L0.
pub struct ConcatIterator {
    tables: Vec<Arc<SsTable>>,
    current: Option<SstIterator>,
    next_table: usize,
}

impl ConcatIterator {
    pub fn new(tables: Vec<Arc<SsTable>>) -> Result<ConcatIterator> {
        #[cfg(debug_assertions)]
        for pair in tables.windows(2) {
            debug_assert!(pair[0].last_key() < pair[1].first_key());
        }
        let mut iter = ConcatIterator {
            tables,
            current: None,
            next_table: 0,
        };
        iter.advance_table()?;
        Ok(iter)
    }

    fn advance_table(&mut self) -> Result<()> {
        self.current = None;
        while self.next_table < self.tables.len() {
            let table_iter = self.tables[self.next_table].iter()?;
            self.next_table += 1;
            if table_iter.is_valid() {
                self.current = Some(table_iter);
                return Ok(());
            }
        }
        Ok(())
    }
}

impl KvIterator for ConcatIterator {
    fn is_valid(&self) -> bool {
        self.current.as_ref().map_or(false, |it| it.is_valid())
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().unwrap().value()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(current) = self.current.as_mut() {
            current.next()?;
            if !current.is_valid() {
                self.advance_table()?;
            }
        }
        Ok(())
    }
}
