//! Logical request pipeline
//!
//! The seam the request surface (SQL/REST, out of scope here) calls into:
//! generate physical tasks, dispatch them, and merge the per-fragment
//! results into one logical answer. One failed fragment aborts the whole
//! request by default; partial results are an explicit opt-in.

use crate::error::TaskError;
use crate::executor::{MergedRowStream, PhysicalTaskExecutor};
use crate::plan::{LogicalRequest, PhysicalTask, PlanGenerator};
use crate::storage::TaskOutput;
use crate::{Error, Result};
use tracing::{error, info};

/// One logical answer: a merged row stream for queries, an
/// acknowledgement for everything else.
pub enum LogicalResult {
    Rows(MergedRowStream),
    Ack,
}

impl std::fmt::Debug for LogicalResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalResult::Rows(_) => f.write_str("Rows(..)"),
            LogicalResult::Ack => f.write_str("Ack"),
        }
    }
}

/// Failure of one task, annotated with its routing scope for diagnostics
#[derive(Debug)]
pub struct TaskFailure {
    pub storage_unit: String,
    pub fragment: Option<String>,
    pub error: TaskError,
}

/// Outcome of a partial execution: the merged result plus every
/// per-fragment failure encountered.
pub struct PartialResult {
    pub result: LogicalResult,
    pub failures: Vec<TaskFailure>,
}

/// Generator and executor wired together.
pub struct RequestPipeline {
    generator: PlanGenerator,
    executor: PhysicalTaskExecutor,
}

impl RequestPipeline {
    pub fn new(generator: PlanGenerator, executor: PhysicalTaskExecutor) -> Self {
        Self { generator, executor }
    }

    /// Execute a logical request, aborting on the first failed fragment.
    pub async fn execute(&self, request: &LogicalRequest) -> Result<LogicalResult> {
        let tasks = self.generator.generate(request).await?;
        let results = self.executor.run_all(&tasks).await;

        let mut streams = Vec::new();
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(TaskOutput::Rows(stream)) => streams.push((task.is_dummy, stream)),
                Ok(TaskOutput::Ack) => {}
                Err(e) => {
                    error!(
                        unit = %task.storage_unit.id,
                        fragment = task.fragment.as_ref().map(|f| f.id.as_str()).unwrap_or("-"),
                        error = %e,
                        "fragment task failed; aborting request"
                    );
                    return Err(Error::Task(e));
                }
            }
        }
        Ok(Self::finish(request, streams))
    }

    /// Execute a logical request, reporting failed fragments instead of
    /// aborting. Partial application is possible for writes and deletes;
    /// the failures list says exactly where.
    pub async fn execute_partial(&self, request: &LogicalRequest) -> Result<PartialResult> {
        let tasks = self.generator.generate(request).await?;
        let results = self.executor.run_all(&tasks).await;

        let mut streams = Vec::new();
        let mut failures = Vec::new();
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(TaskOutput::Rows(stream)) => streams.push((task.is_dummy, stream)),
                Ok(TaskOutput::Ack) => {}
                Err(error) => failures.push(Self::annotate(task, error)),
            }
        }
        if !failures.is_empty() {
            info!(failed = failures.len(), "request completed with partial failures");
        }
        Ok(PartialResult { result: Self::finish(request, streams), failures })
    }

    fn annotate(task: &PhysicalTask, error: TaskError) -> TaskFailure {
        TaskFailure {
            storage_unit: task.storage_unit.id.clone(),
            fragment: task.fragment.as_ref().map(|f| f.id.clone()),
            error,
        }
    }

    fn finish(
        request: &LogicalRequest,
        streams: Vec<(bool, Box<dyn crate::storage::RowStream>)>,
    ) -> LogicalResult {
        match request {
            LogicalRequest::Query { .. } => LogicalResult::Rows(MergedRowStream::new(streams)),
            _ => LogicalResult::Ack,
        }
    }
}
