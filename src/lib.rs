//! # polystore
//!
//! A distributed time-series data middleware that presents one logical
//! key-space (hierarchical path names × time keys) while physically
//! spreading data across heterogeneous storage engines.
//!
//! ## Key ideas
//!
//! - **Fragments**: non-overlapping (path-range × key-range) ownership
//!   records map every owned region to exactly one storage unit
//! - **Plan splitting**: each logical request decomposes into per-fragment
//!   physical tasks carrying exactly one operator
//! - **Adapter contract**: every backend satisfies the same small surface
//!   (execute, boundary discovery, schema introspection, release), with a
//!   reversible schema transform between generic paths and its native
//!   addressing
//! - **Dummy fragments**: pre-existing backend data is discovered at
//!   registration and surfaced read-only, at lower precedence than data
//!   the middleware wrote itself
//!
//! ## Architecture
//!
//! - **Fragment Directory**: authoritative routing state in a strongly
//!   consistent key-value directory
//! - **Allocator**: pluggable placement policy for new regions
//! - **Plan Generator**: logical request → per-fragment physical tasks
//! - **Executor**: unit → adapter dispatch, no automatic retries
//! - **Adapters**: time-series-style and key-value-style reference
//!   implementations over embedded engines

pub mod allocator;
pub mod backend;
pub mod config;
pub mod data;
pub mod directory;
pub mod executor;
pub mod pipeline;
pub mod plan;
pub mod storage;
pub mod telemetry;

mod error;

pub use error::{Error, Result, TaskError};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::allocator::{FragmentAllocator, RoundRobinAllocator};
    pub use crate::config::{Cluster, ComponentFactory, EngineSpec};
    pub use crate::data::{DataBatch, DataKind, RowBatchBuilder, Value};
    pub use crate::directory::{
        ColumnsInterval, EngineKind, Fragment, FragmentDirectory, KeyInterval,
        StorageEngineDescriptor, StorageUnit,
    };
    pub use crate::executor::{MergedRowStream, PhysicalTaskExecutor};
    pub use crate::pipeline::{LogicalResult, RequestPipeline};
    pub use crate::plan::{LogicalRequest, PhysicalTask, PlanGenerator};
    pub use crate::storage::{StorageAdapter, StorageManager, TaskOutput, TaskResult};
    pub use crate::{Error, Result, TaskError};
}
