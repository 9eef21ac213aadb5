//! Backend engines and endpoint resolution
//!
//! Adapters talk to backends through handles resolved from an endpoint
//! string. The `memory://` scheme resolves against an in-process registry
//! of embedded engines, which keeps development and testing free of
//! external services while preserving the production call shapes
//! (connect, ping, native reads/writes, release).

mod kvstore;
mod tsdb;

pub use kvstore::KvEngine;
pub use tsdb::{DeletePredicate, FluxFilter, SeriesKey, TsEngine, TsPoint, TsSeriesData};

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Backend-native failure, converted by adapters into task errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    BucketNotFound(String),
    WrongType { key: String, expected: &'static str },
    Unavailable(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::BucketNotFound(name) => write!(f, "bucket {} not found", name),
            EngineError::WrongType { key, expected } => {
                write!(f, "key {} holds a value of the wrong type (expected {})", key, expected)
            }
            EngineError::Unavailable(msg) => write!(f, "backend unavailable: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// A live connection to one backend engine.
#[derive(Clone)]
pub enum EngineHandle {
    TimeSeries(Arc<TsEngine>),
    KeyValue(Arc<KvEngine>),
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineHandle::TimeSeries(_) => f.write_str("EngineHandle::TimeSeries(..)"),
            EngineHandle::KeyValue(_) => f.write_str("EngineHandle::KeyValue(..)"),
        }
    }
}

/// In-process registry of embedded engines, keyed by endpoint.
///
/// A descriptor whose endpoint is not registered here behaves like an
/// unreachable host: `connect` fails and the engine must be treated as
/// unavailable.
#[derive(Default)]
pub struct EngineRegistry {
    engines: DashMap<String, EngineHandle>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision an embedded time-series engine at `endpoint`
    pub fn add_timeseries(&self, endpoint: impl Into<String>) -> Arc<TsEngine> {
        let endpoint = endpoint.into();
        let engine = Arc::new(TsEngine::new(&endpoint));
        self.engines
            .insert(endpoint, EngineHandle::TimeSeries(engine.clone()));
        engine
    }

    /// Provision an embedded key-value engine at `endpoint`
    pub fn add_keyvalue(&self, endpoint: impl Into<String>) -> Arc<KvEngine> {
        let endpoint = endpoint.into();
        let engine = Arc::new(KvEngine::new(&endpoint));
        self.engines
            .insert(endpoint, EngineHandle::KeyValue(engine.clone()));
        engine
    }

    /// Resolve an endpoint into a live handle, verifying reachability.
    pub fn connect(&self, endpoint: &str) -> Result<EngineHandle, EngineError> {
        if let Some(handle) = self.engines.get(endpoint) {
            return Ok(handle.clone());
        }
        Err(EngineError::Unavailable(format!(
            "no engine listening at {}",
            endpoint
        )))
    }
}
