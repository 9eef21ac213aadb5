//! Physical task execution
//!
//! A thin dispatch from storage unit to adapter. The executor never
//! retries: whether a failed fragment aborts the whole request or is
//! reported as a partial result is the caller's decision.

mod merge;

pub use merge::MergedRowStream;

use crate::error::TaskError;
use crate::plan::PhysicalTask;
use crate::storage::{StorageManager, TaskResult};
use std::sync::Arc;
use tracing::debug;

/// Dispatches tasks to the adapter owning their storage unit. Tasks for
/// independent fragments may run concurrently; fragments do not overlap,
/// so no cross-task coordination is needed.
pub struct PhysicalTaskExecutor {
    storage: Arc<StorageManager>,
}

impl PhysicalTaskExecutor {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self { storage }
    }

    /// Run one task to completion. Expected failures come back inside the
    /// result; this function never panics on backend trouble.
    pub async fn run(&self, task: &PhysicalTask) -> TaskResult {
        let engine_id = &task.storage_unit.engine_id;
        let Some(adapter) = self.storage.adapter(engine_id) else {
            return Err(TaskError::execute_failure(format!(
                "no live adapter for engine {} (unit {})",
                engine_id, task.storage_unit.id
            )));
        };
        debug!(
            unit = %task.storage_unit.id,
            engine = %engine_id,
            operator = task.operators.first().map(|op| op.name()).unwrap_or("none"),
            dummy = task.is_dummy,
            "dispatching physical task"
        );
        adapter.execute(task).await
    }

    /// Run every task, concurrently, preserving input order of results.
    pub async fn run_all(&self, tasks: &[PhysicalTask]) -> Vec<TaskResult> {
        futures::future::join_all(tasks.iter().map(|task| self.run(task))).await
    }
}
