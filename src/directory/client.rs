//! Directory client trait

use crate::Result;
use async_trait::async_trait;

/// Raw key-value access to the cluster-wide directory.
///
/// This trait abstracts the strongly consistent metadata store the
/// middleware routes through, allowing different implementations (local
/// in-memory for dev/test, an external coordination service in prod).
/// `list` must return entries ordered by key so that lookups produce
/// deterministic results.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Read one entry
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// List all entries under a key prefix, ordered by key
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Write one entry (create or replace)
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete one entry; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}
