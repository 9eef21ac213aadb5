//! Fragment directory for polystore
//!
//! The directory owns the authoritative mapping of the logical key-space
//! (hierarchical path names × time keys) onto storage units. Allocation,
//! plan splitting and task execution all consume the records defined here.

mod client;
mod fragments;
mod local;

pub use client::DirectoryClient;
pub use fragments::FragmentDirectory;
pub use local::LocalDirectoryClient;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Separator between levels of a hierarchical path
pub const PATH_SEPARATOR: char = '.';

/// Wildcard level in a path pattern
pub const WILDCARD: &str = "*";

/// Lexicographic successor used to build half-open upper bounds for paths.
///
/// `~` (0x7E) sorts above every character legal in a path segment, so
/// `[s, next_string(s))` covers `s` and every descendant of `s`.
pub fn next_string(s: &str) -> String {
    format!("{}~", s)
}

/// Whether a path contains a wildcard level
pub fn is_pattern(path: &str) -> bool {
    path.contains(WILDCARD)
}

/// The non-wildcard prefix of a pattern: all levels before the first
/// wildcard. `None` when the pattern starts with a wildcard.
pub fn pattern_prefix(pattern: &str) -> Option<String> {
    if !is_pattern(pattern) {
        return Some(pattern.to_string());
    }
    let mut prefix = String::new();
    for part in pattern.split(PATH_SEPARATOR) {
        if part.contains(WILDCARD) {
            break;
        }
        if !prefix.is_empty() {
            prefix.push(PATH_SEPARATOR);
        }
        prefix.push_str(part);
    }
    if prefix.is_empty() {
        None
    } else {
        Some(prefix)
    }
}

/// The path interval a pattern can possibly touch.
///
/// A concrete path maps to the degenerate interval containing only itself;
/// a pattern maps to the subtree of its non-wildcard prefix; a pattern with
/// a leading wildcard maps to the unbounded interval.
pub fn pattern_interval(pattern: &str) -> ColumnsInterval {
    if !is_pattern(pattern) {
        return ColumnsInterval::point(pattern);
    }
    match pattern_prefix(pattern) {
        Some(prefix) => ColumnsInterval::prefix(&prefix),
        None => ColumnsInterval::unbounded(),
    }
}

/// Wildcard-aware path matching: `*` matches any single level, except in
/// the trailing position where it matches any non-empty suffix of levels.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    fn rec(pattern: &[&str], path: &[&str]) -> bool {
        match pattern.split_first() {
            None => path.is_empty(),
            Some((&"*", rest)) if rest.is_empty() => !path.is_empty(),
            Some((&"*", rest)) => match path.split_first() {
                Some((_, path_rest)) => rec(rest, path_rest),
                None => false,
            },
            Some((seg, rest)) => match path.split_first() {
                Some((head, path_rest)) => seg == head && rec(rest, path_rest),
                None => false,
            },
        }
    }
    let pattern: Vec<&str> = pattern.split(PATH_SEPARATOR).collect();
    let path: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    rec(&pattern, &path)
}

fn cmp_start(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

fn cmp_end(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

// An end bound compared against a start bound: None end is +inf, None start
// is -inf.
fn cmp_end_start(end: Option<&str>, start: Option<&str>) -> Ordering {
    match (end, start) {
        (None, _) => Ordering::Greater,
        (_, None) => Ordering::Greater,
        (Some(e), Some(s)) => e.cmp(s),
    }
}

/// Half-open interval over path strings, lexicographically ordered.
///
/// `None` bounds are unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnsInterval {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl ColumnsInterval {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self { start: None, end: None }
    }

    /// The subtree rooted at `prefix`: `[prefix, next_string(prefix))`
    pub fn prefix(prefix: &str) -> Self {
        Self {
            start: Some(prefix.to_string()),
            end: Some(next_string(prefix)),
        }
    }

    /// The degenerate interval containing exactly `path`
    pub fn point(path: &str) -> Self {
        Self {
            start: Some(path.to_string()),
            end: Some(format!("{}\u{0}", path)),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, path: &str) -> bool {
        let after_start = match &self.start {
            None => true,
            Some(s) => path >= s.as_str(),
        };
        let before_end = match &self.end {
            None => true,
            Some(e) => path < e.as_str(),
        };
        after_start && before_end
    }

    pub fn intersects(&self, other: &ColumnsInterval) -> bool {
        cmp_end_start(self.end.as_deref(), other.start.as_deref()) == Ordering::Greater
            && cmp_end_start(other.end.as_deref(), self.start.as_deref()) == Ordering::Greater
    }

    pub fn intersect(&self, other: &ColumnsInterval) -> Option<ColumnsInterval> {
        if !self.intersects(other) {
            return None;
        }
        let start = match cmp_start(self.start.as_deref(), other.start.as_deref()) {
            Ordering::Less => other.start.clone(),
            _ => self.start.clone(),
        };
        let end = match cmp_end(self.end.as_deref(), other.end.as_deref()) {
            Ordering::Greater => other.end.clone(),
            _ => self.end.clone(),
        };
        Some(ColumnsInterval::new(start, end))
    }

    /// Smallest interval enclosing both
    pub fn hull(&self, other: &ColumnsInterval) -> ColumnsInterval {
        let start = match cmp_start(self.start.as_deref(), other.start.as_deref()) {
            Ordering::Greater => other.start.clone(),
            _ => self.start.clone(),
        };
        let end = match cmp_end(self.end.as_deref(), other.end.as_deref()) {
            Ordering::Less => other.end.clone(),
            _ => self.end.clone(),
        };
        ColumnsInterval::new(start, end)
    }

    /// The parts of `self` not covered by any interval in `covered`.
    pub fn subtract_all(&self, covered: &[ColumnsInterval]) -> Vec<ColumnsInterval> {
        let mut overlapping: Vec<&ColumnsInterval> =
            covered.iter().filter(|c| self.intersects(c)).collect();
        overlapping.sort_by(|a, b| cmp_start(a.start.as_deref(), b.start.as_deref()));

        let mut gaps = Vec::new();
        // Cursor over the start bound of the next potential gap. `Some(None)`
        // would be ambiguous, so track "consumed to +inf" separately.
        let mut cursor: Option<String> = self.start.clone();
        let mut cursor_open = self.start.is_none();
        let mut exhausted = false;

        for c in overlapping {
            let gap_start_before = match (&cursor, &c.start) {
                _ if exhausted => false,
                (_, None) => false,
                (None, Some(_)) if cursor_open => true,
                (Some(cur), Some(s)) => cur < s,
                (None, Some(_)) => false,
            };
            if gap_start_before {
                gaps.push(ColumnsInterval::new(
                    if cursor_open { None } else { cursor.clone() },
                    c.start.clone(),
                ));
            }
            // Advance the cursor past this covered interval.
            match &c.end {
                None => {
                    exhausted = true;
                }
                Some(e) => {
                    let advance = match (&cursor, cursor_open) {
                        (_, true) => true,
                        (Some(cur), false) => cur < e,
                        (None, false) => true,
                    };
                    if advance {
                        cursor = Some(e.clone());
                        cursor_open = false;
                    }
                }
            }
        }

        if !exhausted {
            let tail_nonempty = match (&cursor, &self.end) {
                (_, None) => true,
                (None, Some(_)) => cursor_open,
                (Some(cur), Some(e)) => cur < e,
            };
            if tail_nonempty {
                gaps.push(ColumnsInterval::new(
                    if cursor_open { None } else { cursor.clone() },
                    self.end.clone(),
                ));
            }
        }
        gaps
    }
}

impl PartialOrd for ColumnsInterval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ColumnsInterval {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_start(self.start.as_deref(), other.start.as_deref())
            .then_with(|| cmp_end(self.end.as_deref(), other.end.as_deref()))
    }
}

/// Sentinel end for a key interval that cannot be bounded
pub const MAX_KEY: i64 = i64::MAX;

/// Half-open interval over the time/key axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyInterval {
    pub start: i64,
    pub end: i64,
}

impl KeyInterval {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The full key axis, open-ended at the top
    pub fn unbounded() -> Self {
        Self { start: 0, end: MAX_KEY }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start <= 0 && self.end == MAX_KEY
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, key: i64) -> bool {
        key >= self.start && key < self.end
    }

    pub fn intersects(&self, other: &KeyInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &KeyInterval) -> Option<KeyInterval> {
        if !self.intersects(other) {
            return None;
        }
        Some(KeyInterval::new(
            self.start.max(other.start),
            self.end.min(other.end),
        ))
    }

    pub fn hull(&self, other: &KeyInterval) -> KeyInterval {
        KeyInterval::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Backend engine kinds known to the middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    TimeSeries,
    KeyValue,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeSeries => "timeseries",
            Self::KeyValue => "keyvalue",
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "timeseries" | "tsdb" => Ok(Self::TimeSeries),
            "keyvalue" | "kv" => Ok(Self::KeyValue),
            other => Err(format!(
                "unknown engine kind '{}'; expected one of timeseries, keyvalue",
                other
            )),
        }
    }
}

/// Identity of a backend storage engine. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEngineDescriptor {
    pub id: String,
    pub kind: EngineKind,
    pub endpoint: String,
    /// Backend-specific parameters (credentials, organization, ...)
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Whether the backend holds pre-existing data that must be surfaced
    /// through dummy fragments
    #[serde(default)]
    pub has_data: bool,
}

impl StorageEngineDescriptor {
    pub fn new(id: impl Into<String>, kind: EngineKind, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
            has_data: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self) -> Self {
        self.has_data = true;
        self
    }
}

/// A named physical partition inside one backend engine; the unit of
/// creation/deletion on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub id: String,
    pub engine_id: String,
}

impl StorageUnit {
    pub fn new(id: impl Into<String>, engine_id: impl Into<String>) -> Self {
        Self { id: id.into(), engine_id: engine_id.into() }
    }

    /// A freshly named unit on the given engine
    pub fn fresh(engine_id: impl Into<String>) -> Self {
        Self {
            id: format!("unit-{}", uuid::Uuid::new_v4().simple()),
            engine_id: engine_id.into(),
        }
    }
}

/// The core routing record: one (path-range × key-range) region owned by
/// one storage unit. Never mutated in place; range changes are modeled as
/// delete-old/insert-new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub path_range: ColumnsInterval,
    pub key_range: KeyInterval,
    pub storage_unit: StorageUnit,
    pub is_dummy: bool,
}

impl Fragment {
    pub fn new(
        path_range: ColumnsInterval,
        key_range: KeyInterval,
        storage_unit: StorageUnit,
        is_dummy: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path_range,
            key_range,
            storage_unit,
            is_dummy,
        }
    }

    /// Whether this fragment owns the given point of the key-space
    pub fn covers(&self, path: &str, key: i64) -> bool {
        self.path_range.contains(path) && self.key_range.contains(key)
    }

    /// Whether the rectangles of two fragments intersect
    pub fn overlaps(&self, other: &Fragment) -> bool {
        self.path_range.intersects(&other.path_range) && self.key_range.intersects(&other.key_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_string_ordering() {
        let s = "root.a";
        let n1 = next_string(s);
        let n2 = next_string(&n1);
        assert!(s < n1.as_str());
        assert!(n1 < n2);
        // The successor bounds the whole subtree.
        assert!("root.a.deeply.nested" < n1.as_str());
    }

    #[test]
    fn test_pattern_prefix() {
        assert_eq!(pattern_prefix("root.a.b"), Some("root.a.b".to_string()));
        assert_eq!(pattern_prefix("root.a.*"), Some("root.a".to_string()));
        assert_eq!(pattern_prefix("root.*.b"), Some("root".to_string()));
        assert_eq!(pattern_prefix("*"), None);
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("root.a.b", "root.a.b"));
        assert!(!pattern_matches("root.a.b", "root.a.c"));
        assert!(pattern_matches("root.a.*", "root.a.b"));
        assert!(pattern_matches("root.a.*", "root.a.b.c"));
        assert!(!pattern_matches("root.a.*", "root.a"));
        assert!(pattern_matches("root.*.c", "root.b.c"));
        assert!(!pattern_matches("root.*.c", "root.b.d"));
        assert!(!pattern_matches("root.*.c", "root.b.x.c"));
        assert!(pattern_matches("*", "anything.at.all"));
    }

    #[test]
    fn test_columns_interval_contains() {
        let iv = ColumnsInterval::new(Some("root.a".into()), Some("root.c".into()));
        assert!(iv.contains("root.a"));
        assert!(iv.contains("root.b.z"));
        assert!(!iv.contains("root.c"));
        assert!(!iv.contains("root"));

        let unbounded = ColumnsInterval::unbounded();
        assert!(unbounded.contains("anything"));
    }

    #[test]
    fn test_columns_interval_point() {
        let iv = ColumnsInterval::point("root.a");
        assert!(iv.contains("root.a"));
        assert!(!iv.contains("root.a.b"));
        assert!(!iv.contains("root.b"));
    }

    #[test]
    fn test_columns_interval_intersect() {
        let a = ColumnsInterval::new(Some("a".into()), Some("m".into()));
        let b = ColumnsInterval::new(Some("f".into()), Some("z".into()));
        let i = a.intersect(&b).unwrap();
        assert_eq!(i, ColumnsInterval::new(Some("f".into()), Some("m".into())));

        let c = ColumnsInterval::new(Some("m".into()), Some("z".into()));
        assert!(a.intersect(&c).is_none());

        let open = ColumnsInterval::unbounded();
        assert_eq!(a.intersect(&open).unwrap(), a);
    }

    #[test]
    fn test_columns_interval_subtract() {
        let whole = ColumnsInterval::prefix("root");
        let covered = vec![ColumnsInterval::new(
            Some("root.b".into()),
            Some("root.d".into()),
        )];
        let gaps = whole.subtract_all(&covered);
        assert_eq!(gaps.len(), 2);
        assert_eq!(
            gaps[0],
            ColumnsInterval::new(Some("root".into()), Some("root.b".into()))
        );
        assert_eq!(
            gaps[1],
            ColumnsInterval::new(Some("root.d".into()), Some(next_string("root")))
        );

        assert!(whole.subtract_all(&[whole.clone()]).is_empty());
        assert_eq!(whole.subtract_all(&[]), vec![whole.clone()]);
    }

    #[test]
    fn test_key_interval() {
        let iv = KeyInterval::new(100, 200);
        assert!(iv.contains(100));
        assert!(iv.contains(199));
        assert!(!iv.contains(200));
        assert!(iv.intersects(&KeyInterval::new(150, 300)));
        assert!(!iv.intersects(&KeyInterval::new(200, 300)));
        assert_eq!(
            iv.intersect(&KeyInterval::new(150, 300)),
            Some(KeyInterval::new(150, 200))
        );
        assert!(KeyInterval::unbounded().contains(i64::MAX - 1));
    }

    #[test]
    fn test_fragment_overlap() {
        let unit = StorageUnit::new("u1", "e1");
        let a = Fragment::new(
            ColumnsInterval::prefix("root.a"),
            KeyInterval::unbounded(),
            unit.clone(),
            false,
        );
        let b = Fragment::new(
            ColumnsInterval::prefix("root.b"),
            KeyInterval::unbounded(),
            unit.clone(),
            false,
        );
        assert!(!a.overlaps(&b));
        let c = Fragment::new(
            ColumnsInterval::prefix("root"),
            KeyInterval::unbounded(),
            unit,
            false,
        );
        assert!(a.overlaps(&c));
        assert!(a.covers("root.a.x", 5));
        assert!(!a.covers("root.b", 5));
    }

    #[test]
    fn test_engine_kind_round_trip() {
        assert_eq!("timeseries".parse::<EngineKind>(), Ok(EngineKind::TimeSeries));
        assert_eq!("kv".parse::<EngineKind>(), Ok(EngineKind::KeyValue));
        assert!("mystery".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::TimeSeries.as_str(), "timeseries");
    }
}
