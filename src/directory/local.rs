//! Local in-memory directory client for development and testing

use super::DirectoryClient;
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory directory client.
///
/// Stores entries in a `BTreeMap` so prefix listings come back ordered by
/// key, matching the contract of the cluster-wide directory. Suitable for
/// development, testing, and single-node deployments.
#[derive(Debug, Default)]
pub struct LocalDirectoryClient {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl LocalDirectoryClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectoryClient for LocalDirectoryClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}
