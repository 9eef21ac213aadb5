//! Fragment directory: authoritative routing state
//!
//! Backed by a `DirectoryClient`; every record is one JSON entry so that
//! any strongly consistent key-value directory can host the state.

use super::{
    pattern_interval, ColumnsInterval, DirectoryClient, Fragment, KeyInterval,
    StorageEngineDescriptor, StorageUnit,
};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

const FRAGMENT_PREFIX: &str = "fragments/";
const ENGINE_PREFIX: &str = "engines/";
const UNIT_PREFIX: &str = "units/";

/// Lookup, registration and removal of fragments, storage units and engine
/// descriptors. Constructed once at process start and threaded explicitly
/// through the allocator and plan generator.
pub struct FragmentDirectory {
    client: Arc<dyn DirectoryClient>,
}

impl FragmentDirectory {
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self { client }
    }

    // ── Engine descriptors ───────────────────────────────────────────

    pub async fn register_engine(&self, descriptor: &StorageEngineDescriptor) -> Result<()> {
        let key = format!("{}{}", ENGINE_PREFIX, descriptor.id);
        self.client.put(&key, serde_json::to_vec(descriptor)?).await
    }

    pub async fn get_engine(&self, engine_id: &str) -> Result<Option<StorageEngineDescriptor>> {
        let key = format!("{}{}", ENGINE_PREFIX, engine_id);
        match self.client.get(&key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn list_engines(&self) -> Result<Vec<StorageEngineDescriptor>> {
        let entries = self.client.list(ENGINE_PREFIX).await?;
        entries
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(Error::from))
            .collect()
    }

    // ── Storage units ────────────────────────────────────────────────

    pub async fn register_unit(&self, unit: &StorageUnit) -> Result<()> {
        let key = format!("{}{}", UNIT_PREFIX, unit.id);
        self.client.put(&key, serde_json::to_vec(unit)?).await
    }

    pub async fn get_unit(&self, unit_id: &str) -> Result<Option<StorageUnit>> {
        let key = format!("{}{}", UNIT_PREFIX, unit_id);
        match self.client.get(&key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn remove_unit(&self, unit_id: &str) -> Result<()> {
        let key = format!("{}{}", UNIT_PREFIX, unit_id);
        self.client.delete(&key).await
    }

    // ── Fragments ────────────────────────────────────────────────────

    /// Register a fragment. Owned fragments must not overlap an existing
    /// owned fragment; dummy fragments may overlap anything.
    pub async fn register(&self, fragment: &Fragment) -> Result<()> {
        if !fragment.is_dummy {
            for existing in self.list_fragments().await? {
                if !existing.is_dummy && existing.overlaps(fragment) {
                    return Err(Error::Conflict(format!(
                        "fragment {:?}×{:?} overlaps owned fragment {}",
                        fragment.path_range, fragment.key_range, existing.id
                    )));
                }
            }
        }
        debug!(
            fragment = %fragment.id,
            unit = %fragment.storage_unit.id,
            dummy = fragment.is_dummy,
            "registering fragment"
        );
        let key = format!("{}{}", FRAGMENT_PREFIX, fragment.id);
        self.client.put(&key, serde_json::to_vec(fragment)?).await
    }

    pub async fn remove(&self, fragment: &Fragment) -> Result<()> {
        let key = format!("{}{}", FRAGMENT_PREFIX, fragment.id);
        self.client.delete(&key).await
    }

    pub async fn list_fragments(&self) -> Result<Vec<Fragment>> {
        let entries = self.client.list(FRAGMENT_PREFIX).await?;
        entries
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(Error::from))
            .collect()
    }

    /// All fragments whose region intersects the given path patterns and
    /// key range, each paired with the sub-interval of its path range that
    /// the patterns actually touch.
    ///
    /// Results are ordered by path start, then key start, so downstream
    /// splitting is deterministic. Wildcard patterns are expanded by range
    /// intersection against fragment boundaries, not by string matching.
    pub async fn lookup(
        &self,
        patterns: &[String],
        key_range: &KeyInterval,
    ) -> Result<Vec<(Fragment, ColumnsInterval)>> {
        let search: Vec<ColumnsInterval> = patterns.iter().map(|p| pattern_interval(p)).collect();
        let mut matches: Vec<(Fragment, ColumnsInterval)> = Vec::new();

        for fragment in self.list_fragments().await? {
            if !fragment.key_range.intersects(key_range) {
                continue;
            }
            let mut touched: Option<ColumnsInterval> = None;
            for interval in &search {
                if let Some(intersection) = fragment.path_range.intersect(interval) {
                    touched = Some(match touched {
                        Some(existing) => existing.hull(&intersection),
                        None => intersection,
                    });
                }
            }
            if let Some(sub_range) = touched {
                matches.push((fragment, sub_range));
            }
        }

        matches.sort_by(|(a, _), (b, _)| {
            a.path_range
                .cmp(&b.path_range)
                .then(a.key_range.cmp(&b.key_range))
                .then_with(|| a.is_dummy.cmp(&b.is_dummy))
        });
        Ok(matches)
    }

    /// The tightest interval pair covering every owned (non-dummy)
    /// fragment, or `None` when nothing is owned yet.
    pub async fn boundary(&self) -> Result<Option<(ColumnsInterval, KeyInterval)>> {
        let mut bounds: Option<(ColumnsInterval, KeyInterval)> = None;
        for fragment in self.list_fragments().await? {
            if fragment.is_dummy {
                continue;
            }
            bounds = Some(match bounds {
                None => (fragment.path_range.clone(), fragment.key_range),
                Some((paths, keys)) => (
                    paths.hull(&fragment.path_range),
                    keys.hull(&fragment.key_range),
                ),
            });
        }
        Ok(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::LocalDirectoryClient;

    fn directory() -> FragmentDirectory {
        FragmentDirectory::new(Arc::new(LocalDirectoryClient::new()))
    }

    fn owned(prefix: &str, keys: KeyInterval) -> Fragment {
        Fragment::new(
            ColumnsInterval::prefix(prefix),
            keys,
            StorageUnit::new(format!("unit-{}", prefix), "engine-0"),
            false,
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup_exact_path() {
        let dir = directory();
        dir.register(&owned("root.a", KeyInterval::unbounded()))
            .await
            .unwrap();
        dir.register(&owned("root.b", KeyInterval::unbounded()))
            .await
            .unwrap();

        let hits = dir
            .lookup(&["root.a.x".to_string()], &KeyInterval::new(0, 100))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.storage_unit.id, "unit-root.a");
    }

    #[tokio::test]
    async fn test_lookup_wildcard_expands_by_range() {
        let dir = directory();
        dir.register(&owned("root.a", KeyInterval::unbounded()))
            .await
            .unwrap();
        dir.register(&owned("root.b", KeyInterval::unbounded()))
            .await
            .unwrap();
        dir.register(&owned("other", KeyInterval::unbounded()))
            .await
            .unwrap();

        let hits = dir
            .lookup(&["root.*".to_string()], &KeyInterval::new(0, 100))
            .await
            .unwrap();
        let units: Vec<&str> = hits.iter().map(|(f, _)| f.storage_unit.id.as_str()).collect();
        assert_eq!(units, vec!["unit-root.a", "unit-root.b"]);
    }

    #[tokio::test]
    async fn test_lookup_ordering_is_path_then_key() {
        let dir = directory();
        dir.register(&owned("root.b", KeyInterval::unbounded()))
            .await
            .unwrap();
        dir.register(&owned("root.a", KeyInterval::new(100, 200)))
            .await
            .unwrap();
        dir.register(&owned("root.a", KeyInterval::new(0, 100)))
            .await
            .unwrap();

        let hits = dir
            .lookup(&["root.*".to_string()], &KeyInterval::new(0, 1000))
            .await
            .unwrap();
        let order: Vec<(Option<&str>, i64)> = hits
            .iter()
            .map(|(f, _)| (f.path_range.start.as_deref(), f.key_range.start))
            .collect();
        assert_eq!(
            order,
            vec![
                (Some("root.a"), 0),
                (Some("root.a"), 100),
                (Some("root.b"), 0)
            ]
        );
    }

    #[tokio::test]
    async fn test_lookup_respects_key_range() {
        let dir = directory();
        dir.register(&owned("root.a", KeyInterval::new(0, 100)))
            .await
            .unwrap();

        let hits = dir
            .lookup(&["root.a".to_string()], &KeyInterval::new(100, 200))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_owned_overlap_rejected() {
        let dir = directory();
        dir.register(&owned("root.a", KeyInterval::unbounded()))
            .await
            .unwrap();
        let overlapping = owned("root", KeyInterval::unbounded());
        assert!(matches!(
            dir.register(&overlapping).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_dummy_may_overlap_owned() {
        let dir = directory();
        dir.register(&owned("root.a", KeyInterval::unbounded()))
            .await
            .unwrap();
        let dummy = Fragment::new(
            ColumnsInterval::unbounded(),
            KeyInterval::unbounded(),
            StorageUnit::new("dummy:engine-1", "engine-1"),
            true,
        );
        dir.register(&dummy).await.unwrap();

        let hits = dir
            .lookup(&["root.a".to_string()], &KeyInterval::new(0, 10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_boundary_covers_owned_only() {
        let dir = directory();
        assert!(dir.boundary().await.unwrap().is_none());

        dir.register(&owned("root.a", KeyInterval::new(0, 100)))
            .await
            .unwrap();
        dir.register(&owned("root.c", KeyInterval::new(50, 300)))
            .await
            .unwrap();
        let dummy = Fragment::new(
            ColumnsInterval::prefix("zzz"),
            KeyInterval::unbounded(),
            StorageUnit::new("dummy:engine-1", "engine-1"),
            true,
        );
        dir.register(&dummy).await.unwrap();

        let (paths, keys) = dir.boundary().await.unwrap().unwrap();
        assert_eq!(paths.start.as_deref(), Some("root.a"));
        assert_eq!(paths.end.as_deref(), Some(super::super::next_string("root.c").as_str()));
        assert_eq!(keys, KeyInterval::new(0, 300));
    }

    #[tokio::test]
    async fn test_remove_fragment() {
        let dir = directory();
        let fragment = owned("root.a", KeyInterval::unbounded());
        dir.register(&fragment).await.unwrap();
        dir.remove(&fragment).await.unwrap();
        assert!(dir.list_fragments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_engine_and_unit_records() {
        let dir = directory();
        let descriptor = StorageEngineDescriptor::new(
            "engine-0",
            crate::directory::EngineKind::TimeSeries,
            "memory://ts0",
        );
        dir.register_engine(&descriptor).await.unwrap();
        assert_eq!(dir.get_engine("engine-0").await.unwrap(), Some(descriptor));
        assert_eq!(dir.list_engines().await.unwrap().len(), 1);

        let unit = StorageUnit::new("ns", "engine-0");
        dir.register_unit(&unit).await.unwrap();
        assert_eq!(dir.get_unit("ns").await.unwrap(), Some(unit));
        dir.remove_unit("ns").await.unwrap();
        assert_eq!(dir.get_unit("ns").await.unwrap(), None);
    }
}
