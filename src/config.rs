//! Component factory for environment-based configuration
//!
//! Creates the directory client, engine registry and wired pipeline from
//! environment variables, enabling easy switching between development and
//! production configurations.

use crate::allocator::RoundRobinAllocator;
use crate::backend::EngineRegistry;
use crate::directory::{
    EngineKind, FragmentDirectory, LocalDirectoryClient, StorageEngineDescriptor,
};
use crate::executor::PhysicalTaskExecutor;
use crate::pipeline::RequestPipeline;
use crate::plan::PlanGenerator;
use crate::storage::StorageManager;
use crate::{Error, Result};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

/// One engine entry parsed from configuration.
///
/// Rendered as comma-separated `key=value` fields:
/// `id=ts0,kind=timeseries,endpoint=memory://ts0,history=true,org=primary`.
/// Unknown keys become backend-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    pub descriptor: StorageEngineDescriptor,
}

impl FromStr for EngineSpec {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let mut id = None;
        let mut kind = None;
        let mut endpoint = None;
        let mut has_data = false;
        let mut params = std::collections::BTreeMap::new();

        for field in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let (key, val) = field.split_once('=').ok_or_else(|| {
                Error::Config(format!("engine field '{}' is not key=value", field))
            })?;
            match key {
                "id" => id = Some(val.to_string()),
                "kind" => {
                    kind = Some(val.parse::<EngineKind>().map_err(Error::Config)?);
                }
                "endpoint" => endpoint = Some(val.to_string()),
                "history" => {
                    has_data = val
                        .parse::<bool>()
                        .map_err(|_| Error::Config(format!("history must be a bool, got '{}'", val)))?;
                }
                other => {
                    params.insert(other.to_string(), val.to_string());
                }
            }
        }

        let endpoint =
            endpoint.ok_or_else(|| Error::Config("engine spec missing endpoint".to_string()))?;
        let kind = kind.ok_or_else(|| Error::Config("engine spec missing kind".to_string()))?;
        let id = id.unwrap_or_else(|| {
            endpoint
                .rsplit('/')
                .next()
                .unwrap_or(endpoint.as_str())
                .to_string()
        });

        let mut descriptor = StorageEngineDescriptor::new(id, kind, endpoint);
        descriptor.params = params;
        descriptor.has_data = has_data;
        Ok(EngineSpec { descriptor })
    }
}

/// Everything a request surface needs, wired together.
pub struct Cluster {
    pub directory: Arc<FragmentDirectory>,
    pub registry: Arc<EngineRegistry>,
    pub storage: Arc<StorageManager>,
    pub pipeline: RequestPipeline,
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the directory client from environment.
    ///
    /// - `POLYSTORE_DIRECTORY`: "local" (default)
    pub fn create_directory() -> Result<Arc<FragmentDirectory>> {
        let backend =
            std::env::var("POLYSTORE_DIRECTORY").unwrap_or_else(|_| "local".to_string());
        match backend.as_str() {
            "local" => {
                info!("Using in-memory directory client (development mode)");
                Ok(Arc::new(FragmentDirectory::new(Arc::new(
                    LocalDirectoryClient::new(),
                ))))
            }
            other => Err(Error::Config(format!(
                "Unknown POLYSTORE_DIRECTORY: {}. Use 'local'",
                other
            ))),
        }
    }

    /// Engine specs from environment.
    ///
    /// - `POLYSTORE_ENGINES`: `;`-separated engine entries. Defaults to one
    ///   embedded engine of each kind (development mode).
    pub fn engine_specs_from_env() -> Result<Vec<EngineSpec>> {
        let raw = std::env::var("POLYSTORE_ENGINES").unwrap_or_else(|_| {
            "id=ts0,kind=timeseries,endpoint=memory://ts0;\
             id=kv0,kind=keyvalue,endpoint=memory://kv0"
                .to_string()
        });
        raw.split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(EngineSpec::from_str)
            .collect()
    }

    /// Provision embedded engines for every `memory://` endpoint; other
    /// schemes stay unresolved and fail the adapter connectivity check.
    pub fn create_registry(specs: &[EngineSpec]) -> Arc<EngineRegistry> {
        let registry = Arc::new(EngineRegistry::new());
        for spec in specs {
            let endpoint = &spec.descriptor.endpoint;
            if !endpoint.starts_with("memory://") {
                continue;
            }
            match spec.descriptor.kind {
                EngineKind::TimeSeries => {
                    registry.add_timeseries(endpoint.clone());
                }
                EngineKind::KeyValue => {
                    registry.add_keyvalue(endpoint.clone());
                }
            }
        }
        registry
    }

    /// Assemble a full cluster from the given specs. Engines failing
    /// initialization are excluded and reported; at least one must come up.
    pub async fn create_cluster(specs: Vec<EngineSpec>) -> Result<Cluster> {
        let registry = Self::create_registry(&specs);
        Self::create_cluster_with_registry(specs, registry).await
    }

    /// Same as `create_cluster` with a caller-provided registry, for
    /// setups where backends already exist (e.g. engines holding history
    /// data before the middleware attaches).
    pub async fn create_cluster_with_registry(
        specs: Vec<EngineSpec>,
        registry: Arc<EngineRegistry>,
    ) -> Result<Cluster> {
        let directory = Self::create_directory()?;
        let storage = Arc::new(StorageManager::new(registry.clone(), directory.clone()));

        let mut live = 0usize;
        for spec in specs {
            let engine_id = spec.descriptor.id.clone();
            match storage.register_engine(spec.descriptor).await {
                Ok(()) => live += 1,
                Err(e) => {
                    error!(engine = %engine_id, error = %e, "engine excluded from cluster");
                }
            }
        }
        if live == 0 {
            return Err(Error::StorageInitialization(
                "no storage engine initialized".to_string(),
            ));
        }

        let allocator = Arc::new(RoundRobinAllocator::new(directory.clone(), storage.clone()));
        let generator = PlanGenerator::new(directory.clone(), allocator);
        let executor = PhysicalTaskExecutor::new(storage.clone());
        let pipeline = RequestPipeline::new(generator, executor);

        Ok(Cluster { directory, registry, storage, pipeline })
    }

    /// Cluster from environment variables.
    pub async fn create_cluster_from_env() -> Result<Cluster> {
        Self::create_cluster(Self::engine_specs_from_env()?).await
    }
}
