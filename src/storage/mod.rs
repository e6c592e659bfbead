//! Async key/value persistence the token store is written against.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::errors::Result;

/// String-keyed, string-valued durable storage.
///
/// `multi_set` and `multi_remove` must be atomic with respect to concurrent
/// readers: a reader sees either none or all of a batch.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns one slot per requested key, in request order.
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>>;

    async fn multi_set(&self, entries: &[(&str, String)]) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn multi_remove(&self, keys: &[&str]) -> Result<()>;
}
