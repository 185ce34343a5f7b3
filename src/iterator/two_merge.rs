use crate::iterator::KvIterator;
use crate::Result;

/// Composes two ordered iterators; on equal keys the `a` side (the newer
/// source) wins. Tombstones propagate: consumers must treat an empty value
/// as a deletion.
pub struct TwoMergeIterator {
    a: Box<dyn KvIterator>,
    b: Box<dyn KvIterator>,
}

impl TwoMergeIterator {
    pub fn new(a: Box<dyn KvIterator>, b: Box<dyn KvIterator>) -> Result<TwoMergeIterator> {
        let mut iter = TwoMergeIterator { a, b };
        iter.skip_b()?;
        Ok(iter)
    }

    fn skip_b(&mut self) -> Result<()> {
        if self.a.is_valid() && self.b.is_valid() && self.a.key() == self.b.key() {
            self.b.next()?;
        }
        Ok(())
    }

    fn use_a(&self) -> bool {
        if !self.a.is_valid() {
            return false;
        }
        if !self.b.is_valid() {
            return true;
        }
        self.a.key() < self.b.key()
    }
}

impl KvIterator for TwoMergeIterator {
    fn is_valid(&self) -> bool {
        self.a.is_valid() || self.b.is_valid()
    }

    fn key(&self) -> &[u8] {
        if self.use_a() {
            self.a.key()
        } else {
            self.b.key()
        }
    }

    fn value(&self) -> &[u8] {
        if self.use_a() {
            self.a.value()
        } else {
            self.b.value()
        }
    }

    fn next(&mut self) -> Result<()> {
        if self.use_a() {
            self.a.next()?;
        } else {
            self.b.next()?;
        }
        self.skip_b()
    }
}
