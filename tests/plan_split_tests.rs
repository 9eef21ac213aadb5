//! Tests for plan splitting: batch slicing completeness and the shape of
//! generated physical tasks.

use polystore::data::{ColumnBatchBuilder, DataBatch, DataKind, RowBatchBuilder, Value};
use polystore::directory::{ColumnsInterval, Fragment, KeyInterval, StorageUnit};
use polystore::plan::{slice_batch, Operator};
use polystore::prelude::*;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn fragment(range: ColumnsInterval, keys: KeyInterval) -> Fragment {
    Fragment::new(range, keys, StorageUnit::new("u", "e"), false)
}

fn random_row_batch(rng: &mut StdRng) -> DataBatch {
    let path_count = rng.gen_range(1..5);
    let columns: Vec<(String, DataKind)> = (0..path_count)
        .map(|i| (format!("root.s{}.f", i), DataKind::Double))
        .collect();
    let mut builder = RowBatchBuilder::new(columns);
    let mut key = 0i64;
    for _ in 0..rng.gen_range(1..8) {
        key += rng.gen_range(1..50);
        let values: Vec<Option<Value>> = (0..path_count)
            .map(|_| rng.gen_bool(0.7).then(|| Value::Double(rng.gen())))
            .collect();
        builder = builder.row(key, values);
    }
    builder.build().unwrap()
}

/// A fragment grid covering the batch's whole extent: one path stripe per
/// path, each split at a random key boundary.
fn covering_grid(batch: &DataBatch, rng: &mut StdRng) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    for path in batch.paths() {
        let range = ColumnsInterval::prefix(path);
        if rng.gen_bool(0.5) {
            let split = rng.gen_range(1..500);
            fragments.push(fragment(range.clone(), KeyInterval::new(0, split)));
            fragments.push(fragment(range, KeyInterval::new(split, i64::MAX)));
        } else {
            fragments.push(fragment(range, KeyInterval::unbounded()));
        }
    }
    fragments
}

// =========================================================================
// Slice completeness
// =========================================================================

#[test]
fn test_slices_reconstruct_original_batch() {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..50 {
        let batch = random_row_batch(&mut rng);
        let grid = covering_grid(&batch, &mut rng);

        let mut sliced_cells: Vec<(String, i64, Value)> = Vec::new();
        for frag in &grid {
            if let Some(slice) = slice_batch(&batch, frag) {
                let keys = slice.keys().to_vec();
                let paths = slice.paths().to_vec();
                for cell in slice.cells() {
                    sliced_cells.push((
                        paths[cell.path_idx].clone(),
                        keys[cell.key_idx],
                        cell.value.clone(),
                    ));
                }
            }
        }

        let mut original_cells: Vec<(String, i64, Value)> = batch
            .cells()
            .map(|cell| {
                (
                    batch.paths()[cell.path_idx].clone(),
                    batch.keys()[cell.key_idx],
                    cell.value.clone(),
                )
            })
            .collect();

        let sort = |cells: &mut Vec<(String, i64, Value)>| {
            cells.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)))
        };
        sort(&mut sliced_cells);
        sort(&mut original_cells);
        assert_eq!(
            sliced_cells, original_cells,
            "union of per-fragment slices must reproduce the batch exactly"
        );
    }
}

#[test]
fn test_column_batch_slices_like_row_batch() {
    let row = RowBatchBuilder::new(vec![
        ("root.a".to_string(), DataKind::Long),
        ("root.b".to_string(), DataKind::Long),
    ])
    .row(10, vec![Some(Value::Long(1)), Some(Value::Long(2))])
    .row(20, vec![Some(Value::Long(3)), None])
    .build()
    .unwrap();
    let column = ColumnBatchBuilder::new(vec![10, 20])
        .column("root.a", DataKind::Long, vec![Some(Value::Long(1)), Some(Value::Long(3))])
        .column("root.b", DataKind::Long, vec![Some(Value::Long(2)), None])
        .build()
        .unwrap();

    let frag = fragment(ColumnsInterval::prefix("root.a"), KeyInterval::new(0, 15));
    let from_rows = slice_batch(&row, &frag).unwrap();
    let from_columns = slice_batch(&column, &frag).unwrap();

    assert_eq!(from_rows.paths(), from_columns.paths());
    assert_eq!(from_rows.keys(), from_columns.keys());
    assert_eq!(from_rows.cell_count(), from_columns.cell_count());
}

// =========================================================================
// Generated task shapes (full pipeline wiring)
// =========================================================================

fn specs() -> Vec<EngineSpec> {
    vec![
        "id=ts0,kind=timeseries,endpoint=memory://ts0".parse().unwrap(),
        "id=kv0,kind=keyvalue,endpoint=memory://kv0".parse().unwrap(),
    ]
}

#[tokio::test]
async fn test_insert_tasks_one_per_touched_fragment() {
    let cluster = ComponentFactory::create_cluster(specs()).await.unwrap();
    let batch = RowBatchBuilder::new(vec![
        ("root.a.b".to_string(), DataKind::Double),
        ("root.a.c".to_string(), DataKind::Double),
    ])
    .row(100, vec![Some(Value::Double(1.0)), Some(Value::Double(2.0))])
    .build()
    .unwrap();

    cluster
        .pipeline
        .execute(&LogicalRequest::Insert { batch })
        .await
        .unwrap();

    let fragments = cluster.directory.list_fragments().await.unwrap();
    assert_eq!(fragments.len(), 2, "one fragment per new path subtree");

    // Round-robin allocation spreads the two fragments over both engines.
    let mut engines: Vec<&str> = fragments
        .iter()
        .map(|f| f.storage_unit.engine_id.as_str())
        .collect();
    engines.sort();
    engines.dedup();
    assert_eq!(engines.len(), 2);
}

#[tokio::test]
async fn test_query_separates_owned_and_dummy_tasks() {
    let registry = ComponentFactory::create_registry(&specs());
    let ts = registry.connect("memory://ts0").unwrap();
    if let polystore::backend::EngineHandle::TimeSeries(engine) = ts {
        engine.create_bucket("legacy");
        engine
            .write_points(
                "legacy",
                vec![polystore::backend::TsPoint {
                    series: polystore::backend::SeriesKey {
                        measurement: "m".to_string(),
                        field: "f".to_string(),
                        tags: Default::default(),
                    },
                    key: 50,
                    value: Value::Double(9.0),
                }],
            )
            .unwrap();
    }

    let mut specs = specs();
    specs[0] = "id=ts0,kind=timeseries,endpoint=memory://ts0,history=true"
        .parse()
        .unwrap();
    let cluster = ComponentFactory::create_cluster_with_registry(specs, registry)
        .await
        .unwrap();

    // Owned data alongside the discovered history.
    let batch = RowBatchBuilder::new(vec![("legacy.m.g".to_string(), DataKind::Double)])
        .row(60, vec![Some(Value::Double(1.0))])
        .build()
        .unwrap();
    cluster
        .pipeline
        .execute(&LogicalRequest::Insert { batch })
        .await
        .unwrap();

    let generator = PlanGenerator::new(
        cluster.directory.clone(),
        std::sync::Arc::new(RoundRobinAllocator::new(
            cluster.directory.clone(),
            cluster.storage.clone(),
        )),
    );
    let tasks = generator
        .generate(&LogicalRequest::Query {
            patterns: vec!["legacy.*".to_string()],
            key_range: KeyInterval::new(0, 100),
        })
        .await
        .unwrap();

    let dummy_tasks: Vec<_> = tasks.iter().filter(|t| t.is_dummy).collect();
    let owned_tasks: Vec<_> = tasks.iter().filter(|t| !t.is_dummy).collect();
    assert_eq!(dummy_tasks.len(), 1, "history read goes through its own task");
    assert_eq!(owned_tasks.len(), 1);
    for task in &tasks {
        assert!(matches!(task.single_operator(), Some(Operator::Project(_))));
    }
}

#[tokio::test]
async fn test_empty_insert_generates_no_tasks() {
    let cluster = ComponentFactory::create_cluster(specs()).await.unwrap();
    let batch = DataBatch::schema_only(Vec::new()).unwrap();
    let result = cluster
        .pipeline
        .execute(&LogicalRequest::Insert { batch })
        .await
        .unwrap();
    assert!(matches!(result, LogicalResult::Ack));
}
