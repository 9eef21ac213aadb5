//! Logical requests and physical tasks
//!
//! A logical request covers the whole key-space; the plan generator turns
//! it into physical tasks, each scoped to one fragment and one storage
//! unit. Tasks carry exactly one data operator in the baseline design,
//! which keeps adapters stateless across calls.

mod generator;
mod splitter;

pub use generator::PlanGenerator;
pub use splitter::{patterns_for_fragment, slice_batch};

use crate::data::{DataBatch, DataKind};
use crate::directory::{Fragment, KeyInterval, StorageUnit};

/// One logical operation against the whole key-space
#[derive(Debug, Clone)]
pub enum LogicalRequest {
    /// Create a named namespace on some engine
    CreateNamespace { name: String },
    /// Drop a namespace and its backing container
    DropNamespace { name: String },
    /// Declare columns (schema only, no data)
    AddColumns { columns: Vec<(String, DataKind)> },
    /// Remove columns everywhere, all keys
    DeleteColumns { paths: Vec<String> },
    /// Write a batch of data points
    Insert { batch: DataBatch },
    /// Read matching points over a key range
    Query { patterns: Vec<String>, key_range: KeyInterval },
    /// Delete matching points over explicit key ranges; an empty range
    /// list means all keys for the matching paths
    Delete { patterns: Vec<String>, key_ranges: Vec<KeyInterval> },
}

/// Read operator: project the given patterns out of one fragment
#[derive(Debug, Clone)]
pub struct Project {
    pub patterns: Vec<String>,
}

/// Write operator: insert the (already sliced) batch
#[derive(Debug, Clone)]
pub struct Insert {
    pub batch: DataBatch,
}

/// Delete operator. Both lists empty means "drop the whole container";
/// patterns with no ranges means "these paths, all keys".
#[derive(Debug, Clone)]
pub struct Delete {
    pub patterns: Vec<String>,
    pub key_ranges: Vec<KeyInterval>,
}

/// The operator alphabet adapters understand
#[derive(Debug, Clone)]
pub enum Operator {
    Project(Project),
    Insert(Insert),
    Delete(Delete),
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Project(_) => "project",
            Operator::Insert(_) => "insert",
            Operator::Delete(_) => "delete",
        }
    }
}

/// One operator bound to one fragment and storage unit; the unit of
/// dispatch to a storage adapter.
#[derive(Debug, Clone)]
pub struct PhysicalTask {
    pub operators: Vec<Operator>,
    /// Routing record this task is scoped to; `None` for unit-level tasks
    /// (namespace create/drop) that involve no fragment
    pub fragment: Option<Fragment>,
    pub storage_unit: StorageUnit,
    /// Key scope for reads: the requested range intersected with the
    /// fragment's range (or the full requested range for dummy reads)
    pub key_range: KeyInterval,
    pub is_dummy: bool,
}

impl PhysicalTask {
    pub fn new(
        operator: Operator,
        fragment: Option<Fragment>,
        storage_unit: StorageUnit,
        key_range: KeyInterval,
        is_dummy: bool,
    ) -> Self {
        Self {
            operators: vec![operator],
            fragment,
            storage_unit,
            key_range,
            is_dummy,
        }
    }

    /// The task's single operator, if it is well-formed
    pub fn single_operator(&self) -> Option<&Operator> {
        match self.operators.as_slice() {
            [op] => Some(op),
            _ => None,
        }
    }
}
