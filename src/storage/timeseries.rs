//! Time-series-style reference adapter
//!
//! Translates generic operators into the native model of the embedded
//! time-series engine: buckets per storage unit, series addressed by
//! (measurement, tags, field), range queries with filter expressions.
//! Wildcard path levels become native regex filters; inserts batch all
//! points of one task into one native write; containers are created
//! lazily on first write.

use super::schema::SeriesSchema;
use super::{single_operator, ColumnSchema, Field, StorageAdapter, TaskOutput, TaskResult, VecRowStream};
use crate::backend::{EngineHandle, EngineRegistry, FluxFilter, TsEngine, TsPoint};
use crate::backend::{DeletePredicate, SeriesKey};
use crate::directory::{next_string, ColumnsInterval, EngineKind, KeyInterval, StorageEngineDescriptor, MAX_KEY};
use crate::error::TaskError;
use crate::plan::{Delete, Insert, Operator, PhysicalTask, Project};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Wildcard pattern to anchored native regex: `*` spans levels, every
/// other character is literal.
fn wildcard_regex(pattern: &str) -> Regex {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    Regex::new(&format!("^{}$", escaped)).expect("escaped pattern is a valid regex")
}

/// RFC3339 rendering of a key for native range expressions; keys are
/// treated as epoch milliseconds the way the backend stores time.
fn render_key(key: i64) -> String {
    let clamped = key.clamp(0, i32::MAX as i64 * 1000);
    match Utc.timestamp_millis_opt(clamped).single() {
        Some(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => clamped.to_string(),
    }
}

/// Filter for one dotted pattern (tags already split off the pattern).
fn pattern_filter(dotted: &str, tags: &std::collections::BTreeMap<String, String>) -> FluxFilter {
    if dotted == "*" {
        return FluxFilter::True;
    }
    let schema = SeriesSchema::parse(dotted);
    let mut parts = Vec::new();
    if schema.measurement.contains('*') {
        parts.push(FluxFilter::MeasurementRegex(wildcard_regex(&schema.measurement)));
    } else {
        parts.push(FluxFilter::MeasurementEq(schema.measurement.clone()));
    }
    if schema.field.contains('*') {
        parts.push(FluxFilter::FieldRegex(wildcard_regex(&schema.field)));
    } else {
        parts.push(FluxFilter::FieldEq(schema.field.clone()));
    }
    for (key, value) in tags {
        if value.contains('*') {
            parts.push(FluxFilter::TagRegex(key.clone(), wildcard_regex(value)));
        } else {
            parts.push(FluxFilter::TagEq(key.clone(), value.clone()));
        }
    }
    FluxFilter::And(parts)
}

/// OR-combined filter for a set of project patterns
fn patterns_filter(patterns: &[String]) -> FluxFilter {
    if patterns.iter().any(|p| p == "*") {
        return FluxFilter::True;
    }
    let parts: Vec<FluxFilter> = patterns
        .iter()
        .map(|pattern| {
            let (dotted, tags) = super::schema::split_tags(pattern);
            pattern_filter(&dotted, &tags)
        })
        .collect();
    FluxFilter::Or(parts)
}

/// Adapter for engines of kind `timeseries`.
pub struct TimeSeriesAdapter {
    descriptor: StorageEngineDescriptor,
    engine: Arc<TsEngine>,
    /// Buckets known to exist, for create-if-absent on the write path
    buckets: DashMap<String, ()>,
    released: AtomicBool,
}

impl std::fmt::Debug for TimeSeriesAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesAdapter")
            .field("descriptor", &self.descriptor)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl TimeSeriesAdapter {
    /// Construct from a descriptor, verifying kind and connectivity.
    /// Failure here is fatal for the engine; it is not retried.
    pub fn connect(
        descriptor: StorageEngineDescriptor,
        registry: &EngineRegistry,
    ) -> Result<Self> {
        if descriptor.kind != EngineKind::TimeSeries {
            return Err(Error::StorageInitialization(format!(
                "unexpected engine kind {} for time-series adapter",
                descriptor.kind.as_str()
            )));
        }
        let handle = registry.connect(&descriptor.endpoint).map_err(|e| {
            Error::StorageInitialization(format!(
                "cannot connect to {}: {}",
                descriptor.endpoint, e
            ))
        })?;
        let EngineHandle::TimeSeries(engine) = handle else {
            return Err(Error::StorageInitialization(format!(
                "endpoint {} does not speak the time-series protocol",
                descriptor.endpoint
            )));
        };
        Ok(Self {
            descriptor,
            engine,
            buckets: DashMap::new(),
            released: AtomicBool::new(false),
        })
    }

    /// Create-if-absent for the target bucket. The map entry serializes
    /// concurrent callers for the same storage unit without a global lock.
    fn ensure_bucket(&self, unit: &str) {
        if self.buckets.contains_key(unit) {
            return;
        }
        self.buckets.entry(unit.to_string()).or_insert_with(|| {
            if !self.engine.bucket_exists(unit) {
                self.engine.create_bucket(unit);
                debug!(bucket = %unit, "created bucket");
            }
        });
    }

    fn project(&self, unit: &str, key_range: &KeyInterval, project: &Project) -> TaskResult {
        if !self.engine.bucket_exists(unit) {
            warn!(bucket = %unit, "bucket does not exist; returning empty result");
            return Ok(TaskOutput::Rows(Box::new(VecRowStream::empty())));
        }
        let filter = patterns_filter(&project.patterns);
        debug!(
            "executing native query: from(bucket:\"{}\") |> range(start: {}, stop: {}) |> filter(fn: (r) => {})",
            unit,
            render_key(key_range.start),
            render_key(key_range.end),
            filter
        );
        let series = self
            .engine
            .query(unit, key_range.start, key_range.end, &filter)
            .map_err(|e| TaskError::backend("time-series query failed", e))?;
        let columns = series
            .into_iter()
            .map(|data| {
                let path = SeriesSchema {
                    measurement: data.series.measurement,
                    field: data.series.field,
                    tags: data.series.tags,
                }
                .path();
                (Field { path, kind: data.kind }, data.points)
            })
            .collect();
        Ok(TaskOutput::Rows(Box::new(VecRowStream::from_columns(columns))))
    }

    /// History read for pre-existing data: the first path level selects
    /// the native bucket, the remainder filters inside it. Patterns
    /// landing in the same bucket are OR-combined into one query.
    fn history_project(&self, key_range: &KeyInterval, project: &Project) -> TaskResult {
        let mut bucket_filters: Vec<(String, Vec<FluxFilter>)> = Vec::new();
        for pattern in &project.patterns {
            let (dotted, tags) = super::schema::split_tags(pattern);
            let (head, rest) = match dotted.split_once('.') {
                Some((head, rest)) => (head.to_string(), rest.to_string()),
                None => (dotted.clone(), "*".to_string()),
            };
            let buckets: Vec<String> = if head.contains('*') {
                let re = wildcard_regex(&head);
                self.engine
                    .list_buckets()
                    .into_iter()
                    .filter(|b| re.is_match(b))
                    .collect()
            } else {
                vec![head]
            };
            let filter = pattern_filter(&rest, &tags);
            for bucket in buckets {
                match bucket_filters.iter_mut().find(|(b, _)| *b == bucket) {
                    Some((_, filters)) => filters.push(filter.clone()),
                    None => bucket_filters.push((bucket, vec![filter.clone()])),
                }
            }
        }

        let mut columns = Vec::new();
        for (bucket, filters) in bucket_filters {
            if !self.engine.bucket_exists(&bucket) {
                continue;
            }
            let filter = FluxFilter::Or(filters);
            let series = self
                .engine
                .query(&bucket, key_range.start, key_range.end, &filter)
                .map_err(|e| TaskError::backend("history query failed", e))?;
            for data in series {
                let series_path = SeriesSchema {
                    measurement: data.series.measurement,
                    field: data.series.field,
                    tags: data.series.tags,
                }
                .path();
                let path = format!("{}.{}", bucket, series_path);
                columns.push((Field { path, kind: data.kind }, data.points));
            }
        }
        columns.sort_by(|a, b| a.0.path.cmp(&b.0.path));
        Ok(TaskOutput::Rows(Box::new(VecRowStream::from_columns(columns))))
    }

    fn insert(&self, unit: &str, insert: &Insert) -> TaskResult {
        self.ensure_bucket(unit);
        let batch = &insert.batch;
        let schemas: Vec<SeriesSchema> =
            batch.paths().iter().map(|p| SeriesSchema::parse(p)).collect();
        let keys = batch.keys();
        let mut points = Vec::with_capacity(batch.cell_count());
        for cell in batch.cells() {
            let schema = &schemas[cell.path_idx];
            points.push(TsPoint {
                series: SeriesKey {
                    measurement: schema.measurement.clone(),
                    field: schema.field.clone(),
                    tags: schema.tags.clone(),
                },
                key: keys[cell.key_idx],
                value: cell.value.clone(),
            });
        }
        let count = points.len();
        self.engine
            .write_points(unit, points)
            .map_err(|e| TaskError::backend("batch point write failed", e))?;
        debug!(bucket = %unit, points = count, "wrote point batch");
        Ok(TaskOutput::Ack)
    }

    fn delete(&self, unit: &str, delete: &Delete) -> TaskResult {
        if delete.patterns.is_empty() && delete.key_ranges.is_empty() {
            // Whole-container drop.
            self.buckets.remove(unit);
            self.engine.drop_bucket(unit);
            debug!(bucket = %unit, "dropped bucket");
            return Ok(TaskOutput::Ack);
        }
        if !self.engine.bucket_exists(unit) {
            return Ok(TaskOutput::Ack);
        }
        let ranges: Vec<KeyInterval> = if delete.key_ranges.is_empty() {
            vec![KeyInterval::new(0, MAX_KEY)]
        } else {
            delete.key_ranges.clone()
        };
        for pattern in &delete.patterns {
            let (dotted, tags) = super::schema::split_tags(pattern);
            let predicate = DeletePredicate { filter: pattern_filter(&dotted, &tags) };
            for range in &ranges {
                self.engine
                    .delete(unit, range.start, range.end, &predicate)
                    .map_err(|e| TaskError::backend("predicate delete failed", e))?;
            }
        }
        Ok(TaskOutput::Ack)
    }
}

#[async_trait]
impl StorageAdapter for TimeSeriesAdapter {
    fn descriptor(&self) -> &StorageEngineDescriptor {
        &self.descriptor
    }

    async fn execute(&self, task: &PhysicalTask) -> TaskResult {
        let operator = single_operator(task)?;
        let unit = task.storage_unit.id.as_str();
        match operator {
            Operator::Project(project) => {
                if task.is_dummy {
                    self.history_project(&task.key_range, project)
                } else {
                    self.project(unit, &task.key_range, project)
                }
            }
            Operator::Insert(insert) => self.insert(unit, insert),
            Operator::Delete(delete) => self.delete(unit, delete),
        }
    }

    async fn get_boundary(
        &self,
        prefix: Option<&str>,
    ) -> Result<(ColumnsInterval, KeyInterval)> {
        let mut buckets = self.engine.list_buckets();
        buckets.sort();
        if buckets.is_empty() {
            return Err(Error::Task(TaskError::execute_failure(
                "no pre-existing data",
            )));
        }
        let path_range = match prefix {
            Some(prefix) => ColumnsInterval::prefix(prefix),
            None => ColumnsInterval::new(
                Some(buckets[0].clone()),
                Some(next_string(&buckets[buckets.len() - 1])),
            ),
        };
        let mut min_key = i64::MAX;
        let mut max_key = 0;
        for bucket in &buckets {
            if let Some((first, last)) = self.engine.key_extent(bucket) {
                min_key = min_key.min(first);
                max_key = max_key.max(last);
            }
        }
        if min_key == i64::MAX {
            min_key = 0;
        }
        if max_key == 0 {
            max_key = MAX_KEY - 1;
        }
        Ok((path_range, KeyInterval::new(min_key, max_key.saturating_add(1))))
    }

    async fn list_columns(&self) -> Result<Vec<ColumnSchema>> {
        let mut columns = Vec::new();
        for bucket in self.engine.list_buckets() {
            for (series, kind) in self.engine.list_series(&bucket) {
                let tags = series.tags.clone();
                let path = SeriesSchema {
                    measurement: series.measurement,
                    field: series.field,
                    tags: series.tags,
                }
                .path();
                columns.push(ColumnSchema { path, kind, tags });
            }
        }
        columns.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(columns)
    }

    async fn release(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.buckets.clear();
            debug!(engine = %self.descriptor.id, "time-series adapter released");
        }
        Ok(())
    }
}
