//! Storage adapter contract and adapter management
//!
//! Every backend implements `StorageAdapter`: a single `execute` entry
//! point for physical tasks, boundary discovery for pre-existing data,
//! schema introspection, and scoped teardown. Adapters never let raw
//! backend errors escape `execute`; failures come back inside the
//! `TaskResult`.

mod keyvalue;
pub mod schema;
mod timeseries;

pub use keyvalue::KeyValueAdapter;
pub use timeseries::TimeSeriesAdapter;

use crate::backend::EngineRegistry;
use crate::data::{DataKind, Value};
use crate::directory::{
    ColumnsInterval, EngineKind, Fragment, FragmentDirectory, KeyInterval,
    StorageEngineDescriptor, StorageUnit,
};
use crate::error::TaskError;
use crate::plan::PhysicalTask;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

/// One column of a result stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub path: String,
    pub kind: DataKind,
}

/// One logical row: a key plus one optional value per field
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: i64,
    pub values: Vec<Option<Value>>,
}

/// Lazy, finite, single-pass stream of rows ordered by key.
///
/// Ownership passes to the caller, which must drain it or drop it; a
/// stream is not restartable.
pub trait RowStream: Send {
    fn fields(&self) -> &[Field];
    fn next_row(&mut self) -> std::result::Result<Option<Row>, TaskError>;
}

/// Materialized row stream used by the reference adapters
pub struct VecRowStream {
    fields: Vec<Field>,
    rows: std::vec::IntoIter<Row>,
}

impl VecRowStream {
    pub fn new(fields: Vec<Field>, rows: Vec<Row>) -> Self {
        Self { fields, rows: rows.into_iter() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Build from per-field columns of (key, value) pairs, merging on key.
    pub fn from_columns(columns: Vec<(Field, Vec<(i64, Value)>)>) -> Self {
        let mut fields = Vec::with_capacity(columns.len());
        let mut by_key: BTreeMap<i64, Vec<Option<Value>>> = BTreeMap::new();
        let width = columns.len();
        for (idx, (field, points)) in columns.into_iter().enumerate() {
            fields.push(field);
            for (key, value) in points {
                by_key.entry(key).or_insert_with(|| vec![None; width])[idx] = Some(value);
            }
        }
        let rows = by_key
            .into_iter()
            .map(|(key, values)| Row { key, values })
            .collect();
        Self::new(fields, rows)
    }
}

impl RowStream for VecRowStream {
    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn next_row(&mut self) -> std::result::Result<Option<Row>, TaskError> {
        Ok(self.rows.next())
    }
}

/// Successful task output: a row stream for reads, an acknowledgement for
/// writes and deletes
pub enum TaskOutput {
    Rows(Box<dyn RowStream>),
    Ack,
}

/// Outcome of one physical task
pub type TaskResult = std::result::Result<TaskOutput, TaskError>;

/// Schema of one stored column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub path: String,
    pub kind: DataKind,
    pub tags: BTreeMap<String, String>,
}

/// Contract every backend adapter satisfies.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn descriptor(&self) -> &StorageEngineDescriptor;

    /// Execute one physical task. Tasks whose operator list is not exactly
    /// one of project/insert/delete are rejected as non-executable.
    async fn execute(&self, task: &PhysicalTask) -> TaskResult;

    /// Tightest enclosing (path, key) interval of pre-existing data,
    /// open-ended where the backend cannot bound a side. With a prefix the
    /// path interval is the prefix subtree regardless of observed data.
    async fn get_boundary(
        &self,
        prefix: Option<&str>,
    ) -> Result<(ColumnsInterval, KeyInterval)>;

    /// Schema introspection over owned data
    async fn list_columns(&self) -> Result<Vec<ColumnSchema>>;

    /// Scoped teardown of held connections. Idempotent; in-flight calls
    /// must not depend on it.
    async fn release(&self) -> Result<()>;
}

/// The set of live adapters, keyed by engine id.
///
/// Construction failures are fatal per engine: the engine is reported and
/// excluded, never retried inline, and therefore never sees allocations.
pub struct StorageManager {
    registry: Arc<EngineRegistry>,
    directory: Arc<FragmentDirectory>,
    adapters: DashMap<String, Arc<dyn StorageAdapter>>,
}

impl StorageManager {
    pub fn new(registry: Arc<EngineRegistry>, directory: Arc<FragmentDirectory>) -> Self {
        Self {
            registry,
            directory,
            adapters: DashMap::new(),
        }
    }

    /// Construct and register the adapter for one engine. When the engine
    /// carries pre-existing data, its boundary seeds a dummy fragment.
    pub async fn register_engine(&self, descriptor: StorageEngineDescriptor) -> Result<()> {
        let adapter: Arc<dyn StorageAdapter> = match descriptor.kind {
            EngineKind::TimeSeries => {
                Arc::new(TimeSeriesAdapter::connect(descriptor.clone(), &self.registry)?)
            }
            EngineKind::KeyValue => {
                Arc::new(KeyValueAdapter::connect(descriptor.clone(), &self.registry)?)
            }
        };
        self.directory.register_engine(&descriptor).await?;

        if descriptor.has_data {
            let prefix = descriptor.params.get("data_prefix").map(String::as_str);
            match adapter.get_boundary(prefix).await {
                Ok((path_range, key_range)) => {
                    let unit = StorageUnit::new(format!("dummy:{}", descriptor.id), &descriptor.id);
                    self.directory.register_unit(&unit).await?;
                    let fragment = Fragment::new(path_range, key_range, unit, true);
                    self.directory.register(&fragment).await?;
                    info!(engine = %descriptor.id, "seeded dummy fragment from boundary discovery");
                }
                Err(e) => {
                    error!(engine = %descriptor.id, error = %e, "boundary discovery failed");
                    return Err(e);
                }
            }
        }

        info!(engine = %descriptor.id, kind = descriptor.kind.as_str(), "storage engine registered");
        self.adapters.insert(descriptor.id.clone(), adapter);
        Ok(())
    }

    /// The adapter owning an engine, if it initialized successfully
    pub fn adapter(&self, engine_id: &str) -> Option<Arc<dyn StorageAdapter>> {
        self.adapters.get(engine_id).map(|entry| entry.value().clone())
    }

    /// Ids of live engines, sorted for deterministic allocation order
    pub fn engine_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Release every adapter; errors are reported but do not stop teardown
    pub async fn release_all(&self) {
        for entry in self.adapters.iter() {
            if let Err(e) = entry.value().release().await {
                error!(engine = %entry.key(), error = %e, "adapter release failed");
            }
        }
    }
}

/// Reject any task that does not carry exactly one operator.
pub(crate) fn single_operator(task: &PhysicalTask) -> std::result::Result<&crate::plan::Operator, TaskError> {
    task.single_operator().ok_or_else(|| {
        TaskError::non_executable(format!(
            "expected exactly one operator, got {}",
            task.operators.len()
        ))
    })
}
