//! Decomposition helpers: restricting batches and pattern lists to one
//! fragment's region of the key-space.

use crate::data::DataBatch;
use crate::directory::{pattern_interval, Fragment};

/// The subset of patterns that can touch the fragment's path range.
pub fn patterns_for_fragment(fragment: &Fragment, patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .filter(|pattern| fragment.path_range.intersects(&pattern_interval(pattern)))
        .cloned()
        .collect()
}

/// Restrict a batch to the rows/columns owned by the fragment. Returns
/// `None` when the fragment receives no cells from this batch.
pub fn slice_batch(batch: &DataBatch, fragment: &Fragment) -> Option<DataBatch> {
    let path_idxs: Vec<usize> = batch
        .paths()
        .iter()
        .enumerate()
        .filter(|(_, path)| fragment.path_range.contains(path))
        .map(|(i, _)| i)
        .collect();
    if path_idxs.is_empty() {
        return None;
    }
    let sliced = batch.slice(&path_idxs, &fragment.key_range)?;
    if sliced.cell_count() == 0 && batch.cell_count() > 0 {
        return None;
    }
    Some(sliced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataKind, RowBatchBuilder, Value};
    use crate::directory::{ColumnsInterval, KeyInterval, StorageUnit};

    fn fragment(prefix: &str, keys: KeyInterval) -> Fragment {
        Fragment::new(
            ColumnsInterval::prefix(prefix),
            keys,
            StorageUnit::new("u", "e"),
            false,
        )
    }

    fn batch() -> DataBatch {
        RowBatchBuilder::new(vec![
            ("root.a.b".to_string(), DataKind::Double),
            ("root.b.c".to_string(), DataKind::Double),
        ])
        .row(100, vec![Some(Value::Double(1.0)), Some(Value::Double(10.0))])
        .row(200, vec![Some(Value::Double(2.0)), None])
        .build()
        .unwrap()
    }

    #[test]
    fn test_patterns_for_fragment() {
        let fragment = fragment("root.a", KeyInterval::unbounded());
        let patterns = vec![
            "root.a.*".to_string(),
            "root.b.c".to_string(),
            "root.*".to_string(),
        ];
        assert_eq!(
            patterns_for_fragment(&fragment, &patterns),
            vec!["root.a.*".to_string(), "root.*".to_string()]
        );
    }

    #[test]
    fn test_slice_batch_by_path() {
        let batch = batch();
        let sliced = slice_batch(&batch, &fragment("root.a", KeyInterval::unbounded())).unwrap();
        assert_eq!(sliced.paths(), &["root.a.b".to_string()]);
        assert_eq!(sliced.cell_count(), 2);
    }

    #[test]
    fn test_slice_batch_by_key() {
        let batch = batch();
        let sliced = slice_batch(&batch, &fragment("root", KeyInterval::new(150, 250))).unwrap();
        assert_eq!(sliced.keys(), &[200]);
        assert_eq!(sliced.cell_count(), 1);
    }

    #[test]
    fn test_slice_batch_outside_is_none() {
        let batch = batch();
        assert!(slice_batch(&batch, &fragment("other", KeyInterval::unbounded())).is_none());
        assert!(slice_batch(&batch, &fragment("root", KeyInterval::new(0, 50))).is_none());
    }

    #[test]
    fn test_slices_reconstruct_batch() {
        let batch = batch();
        let fragments = [
            fragment("root.a", KeyInterval::new(0, 150)),
            fragment("root.a", KeyInterval::new(150, i64::MAX)),
            fragment("root.b", KeyInterval::unbounded()),
        ];
        let total: usize = fragments
            .iter()
            .filter_map(|f| slice_batch(&batch, f))
            .map(|s| s.cell_count())
            .sum();
        assert_eq!(total, batch.cell_count());
    }
}
