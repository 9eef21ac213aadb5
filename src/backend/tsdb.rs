//! Embedded time-series engine
//!
//! Data model mirrors a production time-series store: named buckets hold
//! series addressed by (measurement, tags, field), each series an ordered
//! run of (key, value) points. Queries take a range plus a native filter
//! expression; the adapter is responsible for translating generic
//! operators into these shapes.

use super::EngineError;
use crate::data::{DataKind, Value};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

/// Address of one series inside a bucket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeriesKey {
    pub measurement: String,
    pub field: String,
    pub tags: BTreeMap<String, String>,
}

/// One point to write
#[derive(Debug, Clone)]
pub struct TsPoint {
    pub series: SeriesKey,
    pub key: i64,
    pub value: Value,
}

/// Query result for one series: points sorted by key
#[derive(Debug, Clone)]
pub struct TsSeriesData {
    pub series: SeriesKey,
    pub kind: DataKind,
    pub points: Vec<(i64, Value)>,
}

/// Native filter expression over series addresses.
///
/// The engine's query language: adapters build these from generic project
/// patterns, turning wildcard levels into regular expressions.
#[derive(Debug, Clone)]
pub enum FluxFilter {
    True,
    MeasurementEq(String),
    MeasurementRegex(Regex),
    FieldEq(String),
    FieldRegex(Regex),
    TagEq(String, String),
    TagRegex(String, Regex),
    And(Vec<FluxFilter>),
    Or(Vec<FluxFilter>),
}

impl FluxFilter {
    pub fn matches(&self, series: &SeriesKey) -> bool {
        match self {
            FluxFilter::True => true,
            FluxFilter::MeasurementEq(m) => series.measurement == *m,
            FluxFilter::MeasurementRegex(re) => re.is_match(&series.measurement),
            FluxFilter::FieldEq(field) => series.field == *field,
            FluxFilter::FieldRegex(re) => re.is_match(&series.field),
            FluxFilter::TagEq(key, value) => {
                series.tags.get(key).is_some_and(|v| v == value)
            }
            FluxFilter::TagRegex(key, re) => {
                series.tags.get(key).is_some_and(|v| re.is_match(v))
            }
            FluxFilter::And(parts) => parts.iter().all(|p| p.matches(series)),
            FluxFilter::Or(parts) => parts.iter().any(|p| p.matches(series)),
        }
    }
}

impl fmt::Display for FluxFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FluxFilter::True => write!(f, "()"),
            FluxFilter::MeasurementEq(m) => write!(f, "r._measurement == \"{}\"", m),
            FluxFilter::MeasurementRegex(re) => write!(f, "r._measurement =~ /{}/", re),
            FluxFilter::FieldEq(field) => write!(f, "r._field == \"{}\"", field),
            FluxFilter::FieldRegex(re) => write!(f, "r._field =~ /{}/", re),
            FluxFilter::TagEq(key, value) => write!(f, "r.{} == \"{}\"", key, value),
            FluxFilter::TagRegex(key, re) => write!(f, "r.{} =~ /{}/", key, re),
            FluxFilter::And(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", rendered.join(" and "))
            }
            FluxFilter::Or(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", rendered.join(" or "))
            }
        }
    }
}

/// Predicate for range deletes, matching the backend's delete syntax:
/// exact measurement and field, optional exact tag.
#[derive(Debug, Clone)]
pub struct DeletePredicate {
    pub filter: FluxFilter,
}

struct Series {
    kind: DataKind,
    points: BTreeMap<i64, Value>,
}

#[derive(Default)]
struct Bucket {
    series: BTreeMap<SeriesKey, Series>,
}

/// One embedded engine instance, shared behind an `Arc` by all adapters
/// connected to its endpoint.
pub struct TsEngine {
    endpoint: String,
    buckets: RwLock<BTreeMap<String, Bucket>>,
}

impl TsEngine {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            buckets: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns true when the bucket was created, false when it existed
    pub fn create_bucket(&self, name: &str) -> bool {
        let mut buckets = self.buckets.write();
        if buckets.contains_key(name) {
            return false;
        }
        buckets.insert(name.to_string(), Bucket::default());
        true
    }

    pub fn bucket_exists(&self, name: &str) -> bool {
        self.buckets.read().contains_key(name)
    }

    pub fn drop_bucket(&self, name: &str) -> bool {
        self.buckets.write().remove(name).is_some()
    }

    pub fn list_buckets(&self) -> Vec<String> {
        self.buckets.read().keys().cloned().collect()
    }

    /// Batched point write into an existing bucket
    pub fn write_points(&self, bucket: &str, points: Vec<TsPoint>) -> Result<(), EngineError> {
        let mut buckets = self.buckets.write();
        let bucket = buckets
            .get_mut(bucket)
            .ok_or_else(|| EngineError::BucketNotFound(bucket.to_string()))?;
        for point in points {
            let kind = point.value.kind();
            let series = bucket
                .series
                .entry(point.series)
                .or_insert_with(|| Series { kind, points: BTreeMap::new() });
            series.points.insert(point.key, point.value);
        }
        Ok(())
    }

    /// Range query: all series matching the filter, with points inside
    /// `[start, end)`, series ordered by address and points by key.
    pub fn query(
        &self,
        bucket: &str,
        start: i64,
        end: i64,
        filter: &FluxFilter,
    ) -> Result<Vec<TsSeriesData>, EngineError> {
        let buckets = self.buckets.read();
        let bucket = buckets
            .get(bucket)
            .ok_or_else(|| EngineError::BucketNotFound(bucket.to_string()))?;
        let mut results = Vec::new();
        for (key, series) in &bucket.series {
            if !filter.matches(key) {
                continue;
            }
            let points: Vec<(i64, Value)> = series
                .points
                .range(start..end)
                .map(|(k, v)| (*k, v.clone()))
                .collect();
            if !points.is_empty() {
                results.push(TsSeriesData {
                    series: key.clone(),
                    kind: series.kind,
                    points,
                });
            }
        }
        Ok(results)
    }

    /// Per-point predicate delete over `[start, end)`. Deleting from a
    /// missing bucket is a no-op, matching the backend's semantics.
    pub fn delete(
        &self,
        bucket: &str,
        start: i64,
        end: i64,
        predicate: &DeletePredicate,
    ) -> Result<(), EngineError> {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(bucket) else {
            return Ok(());
        };
        for (key, series) in bucket.series.iter_mut() {
            if predicate.filter.matches(key) {
                series.points.retain(|k, _| *k < start || *k >= end);
            }
        }
        bucket.series.retain(|_, series| !series.points.is_empty());
        Ok(())
    }

    /// First and last point keys across every series in the bucket
    pub fn key_extent(&self, bucket: &str) -> Option<(i64, i64)> {
        let buckets = self.buckets.read();
        let bucket = buckets.get(bucket)?;
        let mut extent: Option<(i64, i64)> = None;
        for series in bucket.series.values() {
            let (Some((first, _)), Some((last, _))) =
                (series.points.first_key_value(), series.points.last_key_value())
            else {
                continue;
            };
            extent = Some(match extent {
                None => (*first, *last),
                Some((min, max)) => (min.min(*first), max.max(*last)),
            });
        }
        extent
    }

    /// Catalog of series in a bucket
    pub fn list_series(&self, bucket: &str) -> Vec<(SeriesKey, DataKind)> {
        let buckets = self.buckets.read();
        match buckets.get(bucket) {
            Some(bucket) => bucket
                .series
                .iter()
                .map(|(key, series)| (key.clone(), series.kind))
                .collect(),
            None => Vec::new(),
        }
    }
}
