//! Merging per-fragment row streams into one logical stream
//!
//! Streams arrive sorted by key; the merge is a lazy k-way union over
//! keys with a column union over fields. Where an owned fragment and a
//! dummy fragment both carry a value for the same (field, key), the owned
//! value wins; dummy data only fills cells no owned fragment covers.

use crate::error::TaskError;
use crate::storage::{Field, Row, RowStream};
use tracing::warn;

struct StreamState {
    stream: Box<dyn RowStream>,
    /// Mapping from this stream's field positions to merged positions
    mapping: Vec<usize>,
    pending: Option<Row>,
}

/// Single-pass merged stream over per-fragment results.
pub struct MergedRowStream {
    fields: Vec<Field>,
    /// Owned streams first, then dummy, so precedence falls out of order
    streams: Vec<StreamState>,
    primed: bool,
}

impl MergedRowStream {
    /// `inputs` pairs each stream with its dummy flag.
    pub fn new(inputs: Vec<(bool, Box<dyn RowStream>)>) -> Self {
        let mut fields: Vec<Field> = Vec::new();
        let mut ordered: Vec<(bool, Box<dyn RowStream>)> = inputs;
        // Owned streams take precedence; process them first.
        ordered.sort_by_key(|(is_dummy, _)| *is_dummy);

        let mut streams = Vec::with_capacity(ordered.len());
        for (_, stream) in ordered {
            let mut mapping = Vec::with_capacity(stream.fields().len());
            for field in stream.fields() {
                match fields.iter().position(|f| f.path == field.path) {
                    Some(idx) => {
                        if fields[idx].kind != field.kind {
                            warn!(
                                path = %field.path,
                                "conflicting value kinds across fragments; keeping the owned kind"
                            );
                        }
                        mapping.push(idx);
                    }
                    None => {
                        mapping.push(fields.len());
                        fields.push(field.clone());
                    }
                }
            }
            streams.push(StreamState { stream, mapping, pending: None });
        }
        Self { fields, streams, primed: false }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn prime(&mut self) -> Result<(), TaskError> {
        for state in &mut self.streams {
            state.pending = state.stream.next_row()?;
        }
        self.primed = true;
        Ok(())
    }

    /// Next merged row, or `None` when every input is drained.
    pub fn next_row(&mut self) -> Result<Option<Row>, TaskError> {
        if !self.primed {
            self.prime()?;
        }
        let Some(key) = self
            .streams
            .iter()
            .filter_map(|s| s.pending.as_ref().map(|row| row.key))
            .min()
        else {
            return Ok(None);
        };

        let mut values: Vec<Option<crate::data::Value>> = vec![None; self.fields.len()];
        for state in &mut self.streams {
            let row = match state.pending.take() {
                Some(row) if row.key == key => row,
                other => {
                    state.pending = other;
                    continue;
                }
            };
            for (pos, value) in row.values.into_iter().enumerate() {
                let merged_pos = state.mapping[pos];
                if let Some(value) = value {
                    // First writer wins: owned streams come first.
                    if values[merged_pos].is_none() {
                        values[merged_pos] = Some(value);
                    }
                }
            }
            state.pending = state.stream.next_row()?;
        }
        Ok(Some(Row { key, values }))
    }

    /// Drain the stream into memory; test and small-result convenience.
    pub fn collect_rows(&mut self) -> Result<Vec<Row>, TaskError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl RowStream for MergedRowStream {
    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn next_row(&mut self) -> Result<Option<Row>, TaskError> {
        MergedRowStream::next_row(self)
    }
}
