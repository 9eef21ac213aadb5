//! Tests for the fragment directory: partition invariant, boundary
//! discovery, successor ordering, and wildcard lookup expansion.

use polystore::directory::{
    next_string, ColumnsInterval, Fragment, FragmentDirectory, KeyInterval, LocalDirectoryClient,
    StorageUnit,
};
use polystore::prelude::*;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn directory() -> Arc<FragmentDirectory> {
    Arc::new(FragmentDirectory::new(Arc::new(LocalDirectoryClient::new())))
}

fn owned(prefix: &str, keys: KeyInterval) -> Fragment {
    Fragment::new(
        ColumnsInterval::prefix(prefix),
        keys,
        StorageUnit::new(format!("unit-{}", prefix), "engine-0"),
        false,
    )
}

// =========================================================================
// Successor function
// =========================================================================

#[test]
fn test_next_string_is_strictly_increasing() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let len = rng.gen_range(1..12);
        let s: String = (0..len)
            .map(|_| {
                let options = b"abcxyz019.";
                options[rng.gen_range(0..options.len())] as char
            })
            .collect();
        let n1 = next_string(&s);
        let n2 = next_string(&n1);
        assert!(s < n1, "{} should sort before its successor {}", s, n1);
        assert!(n1 < n2, "{} should sort before {}", n1, n2);
    }
}

#[test]
fn test_next_string_bounds_subtree() {
    let upper = next_string("root.a");
    for descendant in ["root.a", "root.a.b", "root.a.zz.deep"] {
        assert!(descendant < upper.as_str());
    }
    assert!("root.b" > upper.as_str());
}

// =========================================================================
// Partition invariant
// =========================================================================

/// Random fragment sets built the way the allocator builds them (gaps of
/// a candidate subtree minus existing coverage) stay pairwise disjoint.
#[tokio::test]
async fn test_random_fragment_sets_are_pairwise_disjoint() {
    let mut rng = StdRng::seed_from_u64(42);
    for round in 0..20 {
        let dir = directory();
        let mut covered: Vec<ColumnsInterval> = Vec::new();

        for i in 0..rng.gen_range(2..12) {
            let depth = rng.gen_range(1..4);
            let path: String = (0..depth)
                .map(|_| format!("s{}", rng.gen_range(0..6)))
                .collect::<Vec<_>>()
                .join(".");
            if covered.iter().any(|r| r.contains(&path)) {
                continue;
            }
            let candidate = ColumnsInterval::prefix(&path);
            for gap in candidate.subtract_all(&covered) {
                let fragment = Fragment::new(
                    gap.clone(),
                    KeyInterval::unbounded(),
                    StorageUnit::new(format!("u{}-{}", round, i), "engine-0"),
                    false,
                );
                dir.register(&fragment)
                    .await
                    .expect("allocator-shaped fragments must never conflict");
                covered.push(gap);
            }
        }

        let fragments = dir.list_fragments().await.unwrap();
        for a in &fragments {
            for b in &fragments {
                if a.id != b.id {
                    assert!(
                        !a.overlaps(b),
                        "fragments {:?} and {:?} overlap",
                        a.path_range,
                        b.path_range
                    );
                }
            }
        }
    }
}

#[tokio::test]
async fn test_overlapping_owned_registration_is_rejected() {
    let dir = directory();
    dir.register(&owned("root.a", KeyInterval::unbounded()))
        .await
        .unwrap();
    let result = dir.register(&owned("root", KeyInterval::unbounded())).await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

// =========================================================================
// Lookup
// =========================================================================

#[tokio::test]
async fn test_wildcard_lookup_returns_minimal_set() {
    let dir = directory();
    dir.register(&owned("root.a", KeyInterval::unbounded()))
        .await
        .unwrap();
    dir.register(&owned("root.b", KeyInterval::unbounded()))
        .await
        .unwrap();
    dir.register(&owned("telemetry", KeyInterval::unbounded()))
        .await
        .unwrap();

    let hits = dir
        .lookup(&["root.*".to_string()], &KeyInterval::new(0, 100))
        .await
        .unwrap();
    let units: Vec<&str> = hits.iter().map(|(f, _)| f.storage_unit.id.as_str()).collect();
    assert_eq!(units, vec!["unit-root.a", "unit-root.b"]);

    // The matched sub-range is the intersection, not the whole fragment.
    for (fragment, sub_range) in &hits {
        let intersection = fragment
            .path_range
            .intersect(&ColumnsInterval::prefix("root"))
            .unwrap();
        assert_eq!(*sub_range, intersection);
    }
}

#[tokio::test]
async fn test_lookup_multiple_patterns_dedupes_fragments() {
    let dir = directory();
    dir.register(&owned("root", KeyInterval::unbounded()))
        .await
        .unwrap();

    let hits = dir
        .lookup(
            &["root.a".to_string(), "root.b".to_string()],
            &KeyInterval::new(0, 100),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1, "one fragment hit by two patterns appears once");
}

#[tokio::test]
async fn test_lookup_is_ordered_by_path_then_key() {
    let dir = directory();
    dir.register(&owned("b", KeyInterval::unbounded())).await.unwrap();
    dir.register(&owned("a", KeyInterval::new(500, 900))).await.unwrap();
    dir.register(&owned("a", KeyInterval::new(0, 500))).await.unwrap();

    let hits = dir
        .lookup(&["*".to_string()], &KeyInterval::new(0, 1000))
        .await
        .unwrap();
    let order: Vec<(Option<&str>, i64)> = hits
        .iter()
        .map(|(f, _)| (f.path_range.start.as_deref(), f.key_range.start))
        .collect();
    assert_eq!(order, vec![(Some("a"), 0), (Some("a"), 500), (Some("b"), 0)]);
}

// =========================================================================
// Boundary
// =========================================================================

#[tokio::test]
async fn test_boundary_is_tightest_owned_hull() {
    let dir = directory();
    assert!(dir.boundary().await.unwrap().is_none());

    dir.register(&owned("m.cpu", KeyInterval::new(100, 200)))
        .await
        .unwrap();
    dir.register(&owned("m.mem", KeyInterval::new(150, 400)))
        .await
        .unwrap();

    let (paths, keys) = dir.boundary().await.unwrap().unwrap();
    assert_eq!(paths.start.as_deref(), Some("m.cpu"));
    assert_eq!(paths.end.as_deref(), Some(next_string("m.mem").as_str()));
    assert_eq!(keys, KeyInterval::new(100, 400));
}
