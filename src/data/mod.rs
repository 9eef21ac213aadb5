//! Columnar data batches exchanged with storage adapters
//!
//! A batch is a sparse (path × key) matrix carried in one of two
//! orientations: row-oriented (one presence bitmap per time key, over
//! paths) or column-oriented (one presence bitmap per path, over time
//! keys). The two are transpositions of the same matrix; adapters accept
//! either and iterate per-cell without rebuilding the whole batch.

use crate::directory::KeyInterval;
use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Value type tag for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    Binary,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Binary => "binary",
        }
    }
}

impl std::str::FromStr for DataKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "boolean" => Ok(Self::Boolean),
            "integer" => Ok(Self::Integer),
            "long" => Ok(Self::Long),
            "float" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown data kind '{}'", other)),
        }
    }
}

/// A single typed cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Binary(Bytes),
}

impl Value {
    pub fn kind(&self) -> DataKind {
        match self {
            Value::Boolean(_) => DataKind::Boolean,
            Value::Integer(_) => DataKind::Integer,
            Value::Long(_) => DataKind::Long,
            Value::Float(_) => DataKind::Float,
            Value::Double(_) => DataKind::Double,
            Value::Binary(_) => DataKind::Binary,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }
}

/// Packed presence bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    len: usize,
    bits: Vec<u8>,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self { len, bits: vec![0; len.div_ceil(8)] }
    }

    pub fn from_flags(flags: &[bool]) -> Self {
        let mut bitmap = Self::new(flags.len());
        for (i, set) in flags.iter().enumerate() {
            if *set {
                bitmap.set(i);
            }
        }
        bitmap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn set(&mut self, index: usize) {
        assert!(index < self.len, "bitmap index out of range");
        self.bits[index / 8] |= 1 << (index % 8);
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// One present cell of a batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell<'a> {
    pub path_idx: usize,
    pub key_idx: usize,
    pub value: &'a Value,
}

/// Row-oriented batch: keys are the outer axis
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    paths: Vec<String>,
    kinds: Vec<DataKind>,
    keys: Vec<i64>,
    /// One bitmap per key, over paths
    bitmaps: Vec<Bitmap>,
    /// Present values per key, compacted in path order
    values: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn new(
        paths: Vec<String>,
        kinds: Vec<DataKind>,
        keys: Vec<i64>,
        bitmaps: Vec<Bitmap>,
        values: Vec<Vec<Value>>,
    ) -> Result<Self> {
        if paths.len() != kinds.len() {
            return Err(Error::InvalidData("path/kind count mismatch".into()));
        }
        if keys.len() != bitmaps.len() || keys.len() != values.len() {
            return Err(Error::InvalidData("key/row count mismatch".into()));
        }
        if !paths.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidData("paths must be sorted and unique".into()));
        }
        if !keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidData("keys must be sorted and unique".into()));
        }
        for (i, bitmap) in bitmaps.iter().enumerate() {
            if bitmap.len() != paths.len() {
                return Err(Error::InvalidData("bitmap width mismatch".into()));
            }
            if bitmap.count() != values[i].len() {
                return Err(Error::InvalidData("bitmap/value count mismatch".into()));
            }
        }
        Ok(Self { paths, kinds, keys, bitmaps, values })
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell<'_>> {
        self.keys.iter().enumerate().flat_map(move |(key_idx, _)| {
            let bitmap = &self.bitmaps[key_idx];
            let row = &self.values[key_idx];
            let mut compact = 0usize;
            (0..self.paths.len()).filter_map(move |path_idx| {
                if bitmap.get(path_idx) {
                    let value = &row[compact];
                    compact += 1;
                    Some(Cell { path_idx, key_idx, value })
                } else {
                    None
                }
            })
        })
    }
}

/// Column-oriented batch: paths are the outer axis
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBatch {
    paths: Vec<String>,
    kinds: Vec<DataKind>,
    keys: Vec<i64>,
    /// One bitmap per path, over keys
    bitmaps: Vec<Bitmap>,
    /// Present values per path, compacted in key order
    values: Vec<Vec<Value>>,
}

impl ColumnBatch {
    pub fn new(
        paths: Vec<String>,
        kinds: Vec<DataKind>,
        keys: Vec<i64>,
        bitmaps: Vec<Bitmap>,
        values: Vec<Vec<Value>>,
    ) -> Result<Self> {
        if paths.len() != kinds.len() {
            return Err(Error::InvalidData("path/kind count mismatch".into()));
        }
        if paths.len() != bitmaps.len() || paths.len() != values.len() {
            return Err(Error::InvalidData("path/column count mismatch".into()));
        }
        if !paths.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidData("paths must be sorted and unique".into()));
        }
        if !keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidData("keys must be sorted and unique".into()));
        }
        for (i, bitmap) in bitmaps.iter().enumerate() {
            if bitmap.len() != keys.len() {
                return Err(Error::InvalidData("bitmap width mismatch".into()));
            }
            if bitmap.count() != values[i].len() {
                return Err(Error::InvalidData("bitmap/value count mismatch".into()));
            }
        }
        Ok(Self { paths, kinds, keys, bitmaps, values })
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell<'_>> {
        self.paths.iter().enumerate().flat_map(move |(path_idx, _)| {
            let bitmap = &self.bitmaps[path_idx];
            let column = &self.values[path_idx];
            let mut compact = 0usize;
            (0..self.keys.len()).filter_map(move |key_idx| {
                if bitmap.get(key_idx) {
                    let value = &column[compact];
                    compact += 1;
                    Some(Cell { path_idx, key_idx, value })
                } else {
                    None
                }
            })
        })
    }
}

/// A batch in either orientation
#[derive(Debug, Clone, PartialEq)]
pub enum DataBatch {
    Rows(RowBatch),
    Columns(ColumnBatch),
}

impl DataBatch {
    /// A batch declaring paths and types but carrying no cells; used for
    /// schema-only operations.
    pub fn schema_only(mut columns: Vec<(String, DataKind)>) -> Result<Self> {
        columns.sort_by(|a, b| a.0.cmp(&b.0));
        columns.dedup_by(|a, b| a.0 == b.0);
        let (paths, kinds): (Vec<_>, Vec<_>) = columns.into_iter().unzip();
        let batch = RowBatch::new(paths, kinds, Vec::new(), Vec::new(), Vec::new())?;
        Ok(DataBatch::Rows(batch))
    }

    pub fn paths(&self) -> &[String] {
        match self {
            DataBatch::Rows(b) => &b.paths,
            DataBatch::Columns(b) => &b.paths,
        }
    }

    pub fn kinds(&self) -> &[DataKind] {
        match self {
            DataBatch::Rows(b) => &b.kinds,
            DataBatch::Columns(b) => &b.kinds,
        }
    }

    pub fn keys(&self) -> &[i64] {
        match self {
            DataBatch::Rows(b) => &b.keys,
            DataBatch::Columns(b) => &b.keys,
        }
    }

    pub fn path_count(&self) -> usize {
        self.paths().len()
    }

    pub fn key_count(&self) -> usize {
        self.keys().len()
    }

    /// Iterate every present cell, in row order for row batches and in
    /// column order for column batches.
    pub fn cells(&self) -> Box<dyn Iterator<Item = Cell<'_>> + '_> {
        match self {
            DataBatch::Rows(b) => Box::new(b.cells()),
            DataBatch::Columns(b) => Box::new(b.cells()),
        }
    }

    /// Total number of present cells
    pub fn cell_count(&self) -> usize {
        match self {
            DataBatch::Rows(b) => b.bitmaps.iter().map(Bitmap::count).sum(),
            DataBatch::Columns(b) => b.bitmaps.iter().map(Bitmap::count).sum(),
        }
    }

    /// The half-open key interval spanned by this batch, if it has keys
    pub fn key_range(&self) -> Option<KeyInterval> {
        let keys = self.keys();
        match (keys.first(), keys.last()) {
            (Some(first), Some(last)) => Some(KeyInterval::new(*first, last + 1)),
            _ => None,
        }
    }

    /// Restrict the batch to a subset of path indices and a key interval,
    /// preserving orientation. Returns `None` when nothing survives and the
    /// batch carried data.
    pub fn slice(&self, path_idxs: &[usize], key_range: &KeyInterval) -> Option<DataBatch> {
        let keep_path: Vec<bool> = {
            let mut keep = vec![false; self.path_count()];
            for &i in path_idxs {
                keep[i] = true;
            }
            keep
        };
        let mut path_map = vec![usize::MAX; self.path_count()];
        let mut new_paths = Vec::new();
        let mut new_kinds = Vec::new();
        for (i, keep) in keep_path.iter().enumerate() {
            if *keep {
                path_map[i] = new_paths.len();
                new_paths.push(self.paths()[i].clone());
                new_kinds.push(self.kinds()[i]);
            }
        }

        let mut key_map = vec![usize::MAX; self.key_count()];
        let mut new_keys = Vec::new();
        for (i, key) in self.keys().iter().enumerate() {
            if key_range.contains(*key) {
                key_map[i] = new_keys.len();
                new_keys.push(*key);
            }
        }

        match self {
            DataBatch::Rows(_) => {
                let mut bitmaps: Vec<Bitmap> =
                    new_keys.iter().map(|_| Bitmap::new(new_paths.len())).collect();
                let mut values: Vec<Vec<Value>> = vec![Vec::new(); new_keys.len()];
                for cell in self.cells() {
                    let (p, k) = (path_map[cell.path_idx], key_map[cell.key_idx]);
                    if p != usize::MAX && k != usize::MAX {
                        bitmaps[k].set(p);
                        values[k].push(cell.value.clone());
                    }
                }
                let total: usize = bitmaps.iter().map(Bitmap::count).sum();
                if total == 0 && self.cell_count() > 0 {
                    return None;
                }
                Some(DataBatch::Rows(
                    RowBatch::new(new_paths, new_kinds, new_keys, bitmaps, values)
                        .expect("slice preserves batch invariants"),
                ))
            }
            DataBatch::Columns(_) => {
                let mut bitmaps: Vec<Bitmap> =
                    new_paths.iter().map(|_| Bitmap::new(new_keys.len())).collect();
                let mut values: Vec<Vec<Value>> = vec![Vec::new(); new_paths.len()];
                for cell in self.cells() {
                    let (p, k) = (path_map[cell.path_idx], key_map[cell.key_idx]);
                    if p != usize::MAX && k != usize::MAX {
                        bitmaps[p].set(k);
                        values[p].push(cell.value.clone());
                    }
                }
                let total: usize = bitmaps.iter().map(Bitmap::count).sum();
                if total == 0 && self.cell_count() > 0 {
                    return None;
                }
                Some(DataBatch::Columns(
                    ColumnBatch::new(new_paths, new_kinds, new_keys, bitmaps, values)
                        .expect("slice preserves batch invariants"),
                ))
            }
        }
    }
}

/// Builder for row-oriented batches from dense per-row values
pub struct RowBatchBuilder {
    paths: Vec<String>,
    kinds: Vec<DataKind>,
    rows: Vec<(i64, Vec<Option<Value>>)>,
}

impl RowBatchBuilder {
    /// Columns must be pre-sorted by path.
    pub fn new(columns: Vec<(String, DataKind)>) -> Self {
        let (paths, kinds) = columns.into_iter().unzip();
        Self { paths, kinds, rows: Vec::new() }
    }

    pub fn row(mut self, key: i64, values: Vec<Option<Value>>) -> Self {
        self.rows.push((key, values));
        self
    }

    pub fn build(mut self) -> Result<DataBatch> {
        self.rows.sort_by_key(|(key, _)| *key);
        let mut keys = Vec::with_capacity(self.rows.len());
        let mut bitmaps = Vec::with_capacity(self.rows.len());
        let mut values = Vec::with_capacity(self.rows.len());
        for (key, row) in self.rows {
            if row.len() != self.paths.len() {
                return Err(Error::InvalidData(format!(
                    "row at key {} has {} values for {} paths",
                    key,
                    row.len(),
                    self.paths.len()
                )));
            }
            let flags: Vec<bool> = row.iter().map(Option::is_some).collect();
            keys.push(key);
            bitmaps.push(Bitmap::from_flags(&flags));
            values.push(row.into_iter().flatten().collect());
        }
        Ok(DataBatch::Rows(RowBatch::new(
            self.paths, self.kinds, keys, bitmaps, values,
        )?))
    }
}

/// Builder for column-oriented batches from dense per-column values
pub struct ColumnBatchBuilder {
    keys: Vec<i64>,
    columns: Vec<(String, DataKind, Vec<Option<Value>>)>,
}

impl ColumnBatchBuilder {
    pub fn new(keys: Vec<i64>) -> Self {
        Self { keys, columns: Vec::new() }
    }

    pub fn column(mut self, path: impl Into<String>, kind: DataKind, values: Vec<Option<Value>>) -> Self {
        self.columns.push((path.into(), kind, values));
        self
    }

    pub fn build(mut self) -> Result<DataBatch> {
        self.columns.sort_by(|a, b| a.0.cmp(&b.0));
        let mut paths = Vec::with_capacity(self.columns.len());
        let mut kinds = Vec::with_capacity(self.columns.len());
        let mut bitmaps = Vec::with_capacity(self.columns.len());
        let mut values = Vec::with_capacity(self.columns.len());
        for (path, kind, column) in self.columns {
            if column.len() != self.keys.len() {
                return Err(Error::InvalidData(format!(
                    "column {} has {} values for {} keys",
                    path,
                    column.len(),
                    self.keys.len()
                )));
            }
            let flags: Vec<bool> = column.iter().map(Option::is_some).collect();
            paths.push(path);
            kinds.push(kind);
            bitmaps.push(Bitmap::from_flags(&flags));
            values.push(column.into_iter().flatten().collect());
        }
        Ok(DataBatch::Columns(ColumnBatch::new(
            paths, kinds, self.keys, bitmaps, values,
        )?))
    }
}
