//! An embedded key-value storage engine built around a log-structured merge
//! tree, plus a command layer that projects strings, hashes, lists and sorted
//! sets onto the ordered key-value store.

#[macro_use]
extern crate log;

mod byteutils;
pub mod cache;
pub mod collections;
pub mod config;
pub mod db;
pub mod error;
pub mod iterator;
pub mod memory;
pub mod redis;
pub mod sstable;

pub type Result<T> = std::result::Result<T, error::LsmLiteError>;

pub use config::Config;
pub use db::LsmEngine;
pub use error::LsmLiteError;
pub use redis::RedisStore;
