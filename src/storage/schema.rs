//! Reversible schema transform between generic dotted paths and
//! backend-native addressing.
//!
//! A full path has the shape `a.b.c{tag1=v1,tag2=v2}`. The transform to
//! and from native addressing must be a bijection on the characters the
//! backend allows, so `decode(encode(p)) == p` for every legal path.

use crate::directory::PATH_SEPARATOR;
use std::collections::BTreeMap;

/// Split `name{k=v,...}` into the dotted name and its tag map. A path
/// without a tag block maps to an empty tag map.
pub fn split_tags(full: &str) -> (String, BTreeMap<String, String>) {
    let Some(open) = full.find('{') else {
        return (full.to_string(), BTreeMap::new());
    };
    let name = full[..open].to_string();
    let inner = full[open + 1..].trim_end_matches('}');
    let mut tags = BTreeMap::new();
    for pair in inner.split(',') {
        if let Some((key, value)) = pair.split_once('=') {
            tags.insert(key.to_string(), value.to_string());
        }
    }
    (name, tags)
}

/// Inverse of `split_tags`: tags render in sorted key order, which makes
/// the rendering canonical.
pub fn join_tags(name: &str, tags: &BTreeMap<String, String>) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}{{{}}}", name, rendered.join(","))
}

/// Native address of one series: the first path level is the measurement,
/// the remaining levels the field, tags carried alongside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSchema {
    pub measurement: String,
    pub field: String,
    pub tags: BTreeMap<String, String>,
}

impl SeriesSchema {
    /// Decompose a full path (pattern or concrete) into native addressing.
    /// A single-level path gets an empty field.
    pub fn parse(full: &str) -> Self {
        let (name, tags) = split_tags(full);
        match name.split_once(PATH_SEPARATOR) {
            Some((measurement, field)) => Self {
                measurement: measurement.to_string(),
                field: field.to_string(),
                tags,
            },
            None => Self {
                measurement: name,
                field: String::new(),
                tags,
            },
        }
    }

    /// Recompose the generic path. Round-trips with `parse`.
    pub fn path(&self) -> String {
        let name = if self.field.is_empty() {
            self.measurement.clone()
        } else {
            format!("{}{}{}", self.measurement, PATH_SEPARATOR, self.field)
        };
        join_tags(&name, &self.tags)
    }
}
