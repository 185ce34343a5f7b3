use std::io;

#[derive(thiserror::Error, Debug)]
pub enum LsmLiteError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt sstable: {0}")]
    CorruptSst(String),

    #[error("{0}")]
    Custom(String),
}
