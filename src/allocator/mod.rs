//! Fragment allocation policy
//!
//! The allocator decides which storage engine hosts each newly created
//! region of the key-space. It is a pluggable policy: downstream splitting
//! and execution only consume its output and must not assume a particular
//! strategy.

use crate::directory::{
    ColumnsInterval, FragmentDirectory, KeyInterval, StorageEngineDescriptor, StorageUnit,
};
use crate::storage::StorageManager;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Placement policy for new fragments and storage units.
#[async_trait]
pub trait FragmentAllocator: Send + Sync {
    /// Choose the storage units that will host a new fragment covering the
    /// given region. The baseline policy returns exactly one unit; the
    /// sequence type leaves room for policies that spread a region.
    async fn choose_storage_units(
        &self,
        path_range: &ColumnsInterval,
        key_range: &KeyInterval,
    ) -> Result<Vec<StorageUnit>>;

    /// Choose the engine that will host a new storage unit.
    async fn choose_engine(&self) -> Result<StorageEngineDescriptor>;
}

/// Round-robin placement over the engines that passed adapter
/// initialization. Unreachable engines never appear in the rotation.
pub struct RoundRobinAllocator {
    directory: Arc<FragmentDirectory>,
    storage: Arc<StorageManager>,
    cursor: AtomicUsize,
}

impl RoundRobinAllocator {
    pub fn new(directory: Arc<FragmentDirectory>, storage: Arc<StorageManager>) -> Self {
        Self {
            directory,
            storage,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FragmentAllocator for RoundRobinAllocator {
    async fn choose_storage_units(
        &self,
        path_range: &ColumnsInterval,
        key_range: &KeyInterval,
    ) -> Result<Vec<StorageUnit>> {
        let engine = self.choose_engine().await?;
        let unit = StorageUnit::fresh(&engine.id);
        debug!(
            unit = %unit.id,
            engine = %engine.id,
            ?path_range,
            ?key_range,
            "allocated storage unit for new fragment"
        );
        self.directory.register_unit(&unit).await?;
        Ok(vec![unit])
    }

    async fn choose_engine(&self) -> Result<StorageEngineDescriptor> {
        let live = self.storage.engine_ids();
        if live.is_empty() {
            warn!("no live storage engine available for allocation");
            return Err(Error::NoAvailableEngine);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % live.len();
        let engine_id = &live[index];
        self.directory
            .get_engine(engine_id)
            .await?
            .ok_or_else(|| Error::Directory(format!("engine {} has no descriptor", engine_id)))
    }
}
