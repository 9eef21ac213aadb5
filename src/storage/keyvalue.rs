//! Key-value-style reference adapter
//!
//! Each path is stored as a pair of native structures: a sorted key
//! index (`keys:{unit}:{path}`) for time ordering and a hash
//! (`values:{unit}:{path}`) for values, plus a shared type registry
//! (`data:type`). Range queries scan the index and then look up hash
//! fields; wildcard discovery enumerates native keys by prefix pattern
//! and filters by an explicit tag predicate, since the backend has no
//! native tag or range filter language.

use super::schema::split_tags;
use super::{single_operator, ColumnSchema, Field, StorageAdapter, TaskOutput, TaskResult, VecRowStream};
use crate::backend::{EngineHandle, EngineRegistry, KvEngine};
use crate::data::{DataKind, Value};
use crate::directory::{
    is_pattern, next_string, pattern_matches, ColumnsInterval, EngineKind, KeyInterval,
    StorageEngineDescriptor, MAX_KEY,
};
use crate::error::TaskError;
use crate::plan::{Delete, Insert, Operator, PhysicalTask, Project};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const KEY_DATA_TYPE: &str = "data:type";

fn values_key(unit: &str, path: &str) -> String {
    format!("values:{}:{}", unit, path)
}

fn keys_key(unit: &str, path: &str) -> String {
    format!("keys:{}:{}", unit, path)
}

/// Adapter for engines of kind `keyvalue`.
pub struct KeyValueAdapter {
    descriptor: StorageEngineDescriptor,
    engine: Arc<KvEngine>,
    released: AtomicBool,
}

impl KeyValueAdapter {
    /// Construct from a descriptor, verifying kind and connectivity.
    /// Failure here is fatal for the engine; it is not retried.
    pub fn connect(
        descriptor: StorageEngineDescriptor,
        registry: &EngineRegistry,
    ) -> Result<Self> {
        if descriptor.kind != EngineKind::KeyValue {
            return Err(Error::StorageInitialization(format!(
                "unexpected engine kind {} for key-value adapter",
                descriptor.kind.as_str()
            )));
        }
        let handle = registry.connect(&descriptor.endpoint).map_err(|e| {
            Error::StorageInitialization(format!(
                "cannot connect to {}: {}",
                descriptor.endpoint, e
            ))
        })?;
        let EngineHandle::KeyValue(engine) = handle else {
            return Err(Error::StorageInitialization(format!(
                "endpoint {} does not speak the key-value protocol",
                descriptor.endpoint
            )));
        };
        Ok(Self {
            descriptor,
            engine,
            released: AtomicBool::new(false),
        })
    }

    /// Expand patterns into the stored paths they address: enumerate the
    /// sorted-index keys by prefix pattern, then filter with exact
    /// wildcard matching and the tag predicate.
    fn determine_paths(&self, unit: &str, patterns: &[String]) -> Vec<String> {
        let mut paths = BTreeSet::new();
        let prefix_len = keys_key(unit, "").len();
        for pattern in patterns {
            let (dotted, tag_filter) = split_tags(pattern);
            // Trailing glob covers any tag block appended to the name.
            let glob = format!("{}*", keys_key(unit, &dotted));
            for native_key in self.engine.keys(&glob) {
                let full = &native_key[prefix_len..];
                let (name, tags) = split_tags(full);
                let name_matches = if is_pattern(&dotted) {
                    pattern_matches(&dotted, &name)
                } else {
                    name == dotted
                };
                if !name_matches {
                    continue;
                }
                if !tag_filter.iter().all(|(k, v)| tags.get(k) == Some(v)) {
                    continue;
                }
                paths.insert(full.to_string());
            }
        }
        paths.into_iter().collect()
    }

    fn decode_value(&self, raw: &str) -> std::result::Result<Value, TaskError> {
        serde_json::from_str(raw)
            .map_err(|e| TaskError::backend("stored value is not decodable", e))
    }

    fn project(&self, unit: &str, key_range: &KeyInterval, project: &Project) -> TaskResult {
        let paths = self.determine_paths(unit, &project.patterns);
        let mut columns = Vec::new();
        for path in paths {
            let Some(kind_str) = self.engine.hget(KEY_DATA_TYPE, &path) else {
                continue;
            };
            let kind: DataKind = kind_str
                .parse()
                .map_err(|e: String| TaskError::backend("corrupt type registry", e))?;
            let members = self.engine.zrange_by_score(
                &keys_key(unit, &path),
                key_range.start,
                key_range.end.saturating_sub(1),
            );
            let hash = self.engine.hgetall(&values_key(unit, &path));
            let mut points = Vec::with_capacity(members.len());
            for member in members {
                let key: i64 = member
                    .parse()
                    .map_err(|e| TaskError::backend("corrupt index member", e))?;
                if let Some(raw) = hash.get(&member) {
                    points.push((key, self.decode_value(raw)?));
                }
            }
            columns.push((Field { path, kind }, points));
        }
        Ok(TaskOutput::Rows(Box::new(VecRowStream::from_columns(columns))))
    }

    /// History read over pre-existing native structures. Strings surface
    /// as one value, sorted sets as their members in order, hashes as a
    /// `.key`/`.value` column pair.
    fn history_project(&self, key_range: &KeyInterval, project: &Project) -> TaskResult {
        let mut native_keys = BTreeSet::new();
        for pattern in &project.patterns {
            if pattern.contains('*') {
                native_keys.extend(self.engine.keys(pattern));
            } else {
                native_keys.insert(pattern.clone());
            }
        }

        let mut columns: Vec<(Field, Vec<(i64, Value)>)> = Vec::new();
        let binary = |s: &str| Value::Binary(Bytes::copy_from_slice(s.as_bytes()));
        for native_key in native_keys {
            match self.engine.type_of(&native_key) {
                "string" => {
                    if let Some(value) = self.engine.get(&native_key) {
                        columns.push((
                            Field { path: native_key.clone(), kind: DataKind::Binary },
                            vec![(0, binary(&value))],
                        ));
                    }
                }
                "zset" => {
                    let members =
                        self.engine.zrange_by_score(&native_key, i64::MIN, i64::MAX);
                    let points = members
                        .into_iter()
                        .enumerate()
                        .map(|(i, m)| (i as i64, binary(&m)))
                        .collect();
                    columns.push((
                        Field { path: native_key.clone(), kind: DataKind::Binary },
                        points,
                    ));
                }
                "hash" => {
                    let hash = self.engine.hgetall(&native_key);
                    let keys = hash
                        .keys()
                        .enumerate()
                        .map(|(i, k)| (i as i64, binary(k)))
                        .collect();
                    let values = hash
                        .values()
                        .enumerate()
                        .map(|(i, v)| (i as i64, binary(v)))
                        .collect();
                    columns.push((
                        Field { path: format!("{}.key", native_key), kind: DataKind::Binary },
                        keys,
                    ));
                    columns.push((
                        Field { path: format!("{}.value", native_key), kind: DataKind::Binary },
                        values,
                    ));
                }
                "none" => warn!(key = %native_key, "key does not exist"),
                other => warn!(key = %native_key, r#type = other, "unknown key type"),
            }
        }
        for (_, points) in columns.iter_mut() {
            points.retain(|(key, _)| key_range.contains(*key));
        }
        Ok(TaskOutput::Rows(Box::new(VecRowStream::from_columns(columns))))
    }

    fn insert(&self, unit: &str, insert: &Insert) -> TaskResult {
        let batch = &insert.batch;
        let keys = batch.keys();
        let kinds = batch.kinds();
        let paths = batch.paths();

        // Register declared types even for schema-only batches.
        let type_entries: Vec<(String, String)> = paths
            .iter()
            .zip(kinds)
            .map(|(path, kind)| (path.clone(), kind.as_str().to_string()))
            .collect();
        if !type_entries.is_empty() {
            self.engine
                .hset(KEY_DATA_TYPE, &type_entries)
                .map_err(|e| TaskError::backend("type registry write failed", e))?;
        }

        let mut values: Vec<Vec<(String, String)>> = vec![Vec::new(); paths.len()];
        let mut scores: Vec<Vec<(String, i64)>> = vec![Vec::new(); paths.len()];
        for cell in batch.cells() {
            let key = keys[cell.key_idx];
            let raw = serde_json::to_string(cell.value)
                .map_err(|e| TaskError::backend("value encoding failed", e))?;
            values[cell.path_idx].push((key.to_string(), raw));
            scores[cell.path_idx].push((key.to_string(), key));
        }

        for (idx, path) in paths.iter().enumerate() {
            if values[idx].is_empty() {
                continue;
            }
            self.engine
                .hset(&values_key(unit, path), &values[idx])
                .map_err(|e| TaskError::backend("hash write failed", e))?;
            self.engine
                .zadd(&keys_key(unit, path), &scores[idx])
                .map_err(|e| TaskError::backend("index write failed", e))?;
        }
        debug!(unit = %unit, paths = paths.len(), "wrote key-value batch");
        Ok(TaskOutput::Ack)
    }

    fn delete(&self, unit: &str, delete: &Delete) -> TaskResult {
        if delete.patterns.is_empty() && delete.key_ranges.is_empty() {
            // Whole-unit drop: every structure belonging to the unit goes.
            let mut doomed = self.engine.keys(&format!("values:{}:*", unit));
            doomed.extend(self.engine.keys(&format!("keys:{}:*", unit)));
            let prefix_len = keys_key(unit, "").len();
            let paths: Vec<String> = self
                .engine
                .keys(&format!("keys:{}:*", unit))
                .into_iter()
                .map(|k| k[prefix_len..].to_string())
                .collect();
            self.engine.del(&doomed);
            if !paths.is_empty() {
                self.engine.hdel(KEY_DATA_TYPE, &paths);
            }
            debug!(unit = %unit, "dropped storage unit");
            return Ok(TaskOutput::Ack);
        }

        let paths = self.determine_paths(unit, &delete.patterns);
        if paths.is_empty() {
            return Ok(TaskOutput::Ack);
        }

        if delete.key_ranges.is_empty() {
            // All keys for the matching paths: drop both structures.
            let mut doomed = Vec::with_capacity(paths.len() * 2);
            for path in &paths {
                doomed.push(values_key(unit, path));
                doomed.push(keys_key(unit, path));
            }
            self.engine.del(&doomed);
            self.engine.hdel(KEY_DATA_TYPE, &paths);
        } else {
            // Range delete: index range-scan, then remove hash fields and
            // index entries for exactly those members.
            for path in &paths {
                for range in &delete.key_ranges {
                    let max = range.end.saturating_sub(1);
                    let members =
                        self.engine.zrange_by_score(&keys_key(unit, path), range.start, max);
                    if !members.is_empty() {
                        self.engine.hdel(&values_key(unit, path), &members);
                        self.engine.zremrange_by_score(&keys_key(unit, path), range.start, max);
                    }
                }
            }
        }
        Ok(TaskOutput::Ack)
    }
}

#[async_trait]
impl StorageAdapter for KeyValueAdapter {
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
        let mut native_keys = self.engine.keys("*");
        native_keys.sort();

        let path_range = match prefix {
            Some(prefix) => ColumnsInterval::prefix(prefix),
            None => match (native_keys.first(), native_keys.last()) {
                (Some(first), Some(last)) => {
                    ColumnsInterval::new(Some(first.clone()), Some(next_string(last)))
                }
                _ => ColumnsInterval::unbounded(),
            },
        };

        // The backend cannot bound time; estimate from structure sizes and
        // fall back to the open-end sentinel.
        let mut max_key: i64 = i64::MIN;
        for key in &native_keys {
            let len = match self.engine.type_of(key) {
                "string" => 1,
                "zset" => self.engine.zcard(key) as i64,
                "hash" => self.engine.hlen(key) as i64,
                "none" => {
                    warn!(key = %key, "key vanished during boundary scan");
                    continue;
                }
                other => {
                    warn!(key = %key, r#type = other, "unknown key type");
                    continue;
                }
            };
            max_key = max_key.max(len);
        }
        if max_key == i64::MIN {
            max_key = MAX_KEY - 1;
        }
        Ok((path_range, KeyInterval::new(0, max_key.saturating_add(1))))
    }

    async fn list_columns(&self) -> Result<Vec<ColumnSchema>> {
        let registry = self.engine.hgetall(KEY_DATA_TYPE);
        let mut columns = Vec::with_capacity(registry.len());
        for (full, kind_str) in registry {
            let kind: DataKind = kind_str
                .parse()
                .map_err(Error::Serialization)?;
            let (name, tags) = split_tags(&full);
            columns.push(ColumnSchema { path: name, kind, tags });
        }
        Ok(columns)
    }

    async fn release(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!(engine = %self.descriptor.id, "key-value adapter released");
        }
        Ok(())
    }
}
