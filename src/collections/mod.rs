pub mod skiplist;

/// A key-value pair owned by a skip-list node.
#[derive(Debug, Default)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}
