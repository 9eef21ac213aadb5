//! Plan generation: one logical request in, per-fragment physical tasks out

use super::splitter::{patterns_for_fragment, slice_batch};
use super::{Delete, Insert, LogicalRequest, Operator, PhysicalTask, Project};
use crate::allocator::FragmentAllocator;
use crate::data::{DataBatch, DataKind};
use crate::directory::{ColumnsInterval, Fragment, FragmentDirectory, KeyInterval, StorageUnit};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Translates logical requests into ordered sequences of physical tasks
/// by consulting the fragment directory and, for writes into uncovered
/// regions, the allocator.
pub struct PlanGenerator {
    directory: Arc<FragmentDirectory>,
    allocator: Arc<dyn FragmentAllocator>,
}

impl PlanGenerator {
    pub fn new(directory: Arc<FragmentDirectory>, allocator: Arc<dyn FragmentAllocator>) -> Self {
        Self { directory, allocator }
    }

    pub async fn generate(&self, request: &LogicalRequest) -> Result<Vec<PhysicalTask>> {
        match request {
            LogicalRequest::CreateNamespace { name } => self.plan_create_namespace(name).await,
            LogicalRequest::DropNamespace { name } => self.plan_drop_namespace(name).await,
            LogicalRequest::AddColumns { columns } => self.plan_add_columns(columns).await,
            LogicalRequest::DeleteColumns { paths } => self.plan_delete(paths, &[]).await,
            LogicalRequest::Insert { batch } => self.plan_insert(batch).await,
            LogicalRequest::Query { patterns, key_range } => {
                self.plan_query(patterns, key_range).await
            }
            LogicalRequest::Delete { patterns, key_ranges } => {
                self.plan_delete(patterns, key_ranges).await
            }
        }
    }

    /// Namespace creation involves no fragments: the allocator picks an
    /// engine and a single unit-level task targets it directly.
    async fn plan_create_namespace(&self, name: &str) -> Result<Vec<PhysicalTask>> {
        let engine = self.allocator.choose_engine().await?;
        let unit = StorageUnit::new(name, &engine.id);
        self.directory.register_unit(&unit).await?;
        info!(namespace = %name, engine = %engine.id, "planning namespace creation");
        let batch = DataBatch::schema_only(Vec::new())?;
        Ok(vec![PhysicalTask::new(
            Operator::Insert(Insert { batch }),
            None,
            unit,
            KeyInterval::unbounded(),
            false,
        )])
    }

    /// Namespace drop targets the engine recorded at creation and lowers
    /// onto the whole-container delete shape.
    async fn plan_drop_namespace(&self, name: &str) -> Result<Vec<PhysicalTask>> {
        let unit = self
            .directory
            .get_unit(name)
            .await?
            .ok_or_else(|| Error::UnknownNamespace(name.to_string()))?;
        self.directory.remove_unit(name).await?;
        Ok(vec![PhysicalTask::new(
            Operator::Delete(Delete { patterns: Vec::new(), key_ranges: Vec::new() }),
            None,
            unit,
            KeyInterval::unbounded(),
            false,
        )])
    }

    /// Create owned fragments for any of the given paths that no owned
    /// fragment covers yet. New fragments span the full key axis, so later
    /// out-of-order keys for the same paths route to the same owner.
    async fn ensure_coverage(&self, paths: &[String]) -> Result<()> {
        let mut covered: Vec<ColumnsInterval> = self
            .directory
            .list_fragments()
            .await?
            .into_iter()
            .filter(|f| !f.is_dummy)
            .map(|f| f.path_range)
            .collect();

        for path in paths {
            if covered.iter().any(|range| range.contains(path)) {
                continue;
            }
            let candidate = ColumnsInterval::prefix(path);
            for gap in candidate.subtract_all(&covered) {
                let units = self
                    .allocator
                    .choose_storage_units(&gap, &KeyInterval::unbounded())
                    .await?;
                let Some(unit) = units.into_iter().next() else {
                    return Err(Error::NoAvailableEngine);
                };
                let fragment = Fragment::new(gap.clone(), KeyInterval::unbounded(), unit, false);
                self.directory.register(&fragment).await?;
                debug!(?gap, fragment = %fragment.id, "created fragment for new path range");
                covered.push(gap);
            }
        }
        Ok(())
    }

    /// Insert: cover, look up, slice. A cell outside every fragment after
    /// coverage is a routing bug and aborts the request rather than being
    /// dropped.
    async fn plan_insert(&self, batch: &DataBatch) -> Result<Vec<PhysicalTask>> {
        let Some(key_range) = batch.key_range() else {
            return Ok(Vec::new());
        };
        self.ensure_coverage(batch.paths()).await?;

        let hits = self.directory.lookup(batch.paths(), &key_range).await?;
        let mut tasks = Vec::new();
        let mut routed_cells = 0;
        for (fragment, _) in hits.iter().filter(|(f, _)| !f.is_dummy) {
            let Some(sliced) = slice_batch(batch, fragment) else {
                continue;
            };
            routed_cells += sliced.cell_count();
            let scoped = fragment
                .key_range
                .intersect(&key_range)
                .unwrap_or(fragment.key_range);
            tasks.push(PhysicalTask::new(
                Operator::Insert(Insert { batch: sliced }),
                Some(fragment.clone()),
                fragment.storage_unit.clone(),
                scoped,
                false,
            ));
        }

        if routed_cells != batch.cell_count() {
            return Err(Error::Internal(format!(
                "insert slicing routed {} of {} cells",
                routed_cells,
                batch.cell_count()
            )));
        }
        Ok(tasks)
    }

    /// Schema-only column declaration: fragments are created for new
    /// paths, then each receives the columns inside its path range.
    async fn plan_add_columns(&self, columns: &[(String, DataKind)]) -> Result<Vec<PhysicalTask>> {
        let paths: Vec<String> = columns.iter().map(|(path, _)| path.clone()).collect();
        self.ensure_coverage(&paths).await?;

        let hits = self
            .directory
            .lookup(&paths, &KeyInterval::unbounded())
            .await?;
        let mut tasks = Vec::new();
        for (fragment, _) in hits.iter().filter(|(f, _)| !f.is_dummy) {
            let fragment_columns: Vec<(String, DataKind)> = columns
                .iter()
                .filter(|(path, _)| fragment.path_range.contains(path))
                .cloned()
                .collect();
            if fragment_columns.is_empty() {
                continue;
            }
            let batch = DataBatch::schema_only(fragment_columns)?;
            tasks.push(PhysicalTask::new(
                Operator::Insert(Insert { batch }),
                Some(fragment.clone()),
                fragment.storage_unit.clone(),
                fragment.key_range,
                false,
            ));
        }
        Ok(tasks)
    }

    /// Query: owned and dummy fragments produce separate tasks, since
    /// dummy data is read through the history path.
    async fn plan_query(
        &self,
        patterns: &[String],
        key_range: &KeyInterval,
    ) -> Result<Vec<PhysicalTask>> {
        let hits = self.directory.lookup(patterns, key_range).await?;
        let mut tasks = Vec::new();
        for (fragment, _) in hits {
            let fragment_patterns = patterns_for_fragment(&fragment, patterns);
            if fragment_patterns.is_empty() {
                continue;
            }
            let scoped = if fragment.is_dummy {
                *key_range
            } else {
                fragment
                    .key_range
                    .intersect(key_range)
                    .unwrap_or(*key_range)
            };
            let is_dummy = fragment.is_dummy;
            let unit = fragment.storage_unit.clone();
            tasks.push(PhysicalTask::new(
                Operator::Project(Project { patterns: fragment_patterns }),
                Some(fragment),
                unit,
                scoped,
                is_dummy,
            ));
        }
        Ok(tasks)
    }

    /// Delete: tasks carry only the intersection of the requested ranges
    /// with each fragment, so no adapter deletes outside the caller's
    /// request. Dummy fragments are read-only and never receive deletes.
    async fn plan_delete(
        &self,
        patterns: &[String],
        key_ranges: &[KeyInterval],
    ) -> Result<Vec<PhysicalTask>> {
        let enclosing = key_ranges
            .iter()
            .copied()
            .reduce(|a, b| a.hull(&b))
            .unwrap_or_else(KeyInterval::unbounded);

        let hits = self.directory.lookup(patterns, &enclosing).await?;
        let mut tasks = Vec::new();
        for (fragment, _) in hits.into_iter().filter(|(f, _)| !f.is_dummy) {
            let fragment_patterns = patterns_for_fragment(&fragment, patterns);
            if fragment_patterns.is_empty() {
                continue;
            }
            let scoped_ranges: Vec<KeyInterval> = if key_ranges.is_empty() {
                // All keys for these paths. Only shortcut to the rangeless
                // shape when the fragment spans the whole axis; a bounded
                // fragment may share its unit with neighbors.
                if fragment.key_range.is_unbounded() {
                    Vec::new()
                } else {
                    vec![fragment.key_range]
                }
            } else {
                key_ranges
                    .iter()
                    .filter_map(|range| range.intersect(&fragment.key_range))
                    .collect()
            };
            if !key_ranges.is_empty() && scoped_ranges.is_empty() {
                continue;
            }
            let unit = fragment.storage_unit.clone();
            let scope = fragment.key_range;
            tasks.push(PhysicalTask::new(
                Operator::Delete(Delete { patterns: fragment_patterns, key_ranges: scoped_ranges }),
                Some(fragment),
                unit,
                scope,
                false,
            ));
        }
        Ok(tasks)
    }
}
