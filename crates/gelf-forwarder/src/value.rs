// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire-format independent representation of a decoded log record.
//!
//! Every input decodes its native payload (protobuf event, JSON document) into a [`Value`] tree,
//! which is the only thing the [`crate::flatten`] module knows how to read.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use std::fmt;

/// A decoded value of any supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Map(Map),
    Array(Vec<Value>),
}

impl Value {
    /// Short name of the value kind, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
        }
    }

    /// Renders a scalar as text. Returns `None` for maps and arrays.
    ///
    /// Bytes are decoded as UTF-8 (lossy), floats use the shortest representation that
    /// round-trips, timestamps use RFC 3339 with as many fractional digits as needed.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => Some("null".to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Map(_) | Value::Array(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => write!(f, "<{}>", self.kind()),
        }
    }
}

/// String-keyed map that keeps insertion order.
///
/// Traversal order matters to the flattener: when two keys sanitize to the same extra field,
/// the one visited last wins. Inserting an existing key replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map {
    entries: IndexMap<String, Value>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Removes `key`, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for Map {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_map_keeps_insertion_order() {
        let map: Map = [("b", Value::Int(1)), ("a", Value::Int(2)), ("c", Value::Int(3))]
            .into_iter()
            .collect();
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_map_insert_replaces_in_place() {
        let mut map = Map::new();
        map.insert("a", Value::Int(1));
        map.insert("b", Value::Int(2));
        map.insert("a", Value::Int(3));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(&Value::Int(3)));
        assert_eq!(map.iter().next().map(|(k, _)| k), Some("a"));
    }

    #[test]
    fn test_map_remove_keeps_order() {
        let mut map: Map = [("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))]
            .into_iter()
            .collect();
        assert_eq!(map.remove("a"), Some(Value::Int(1)));
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_map_insert_scales_linearly() {
        let start = std::time::Instant::now();
        let mut map = Map::with_capacity(200_000);
        for i in 0..200_000 {
            map.insert(format!("key{i}"), Value::Int(i));
        }
        assert_eq!(map.len(), 200_000);
        assert_eq!(map.get("key199999"), Some(&Value::Int(199_999)));
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_map_remove() {
        let mut map: Map = [("a", Value::Null)].into_iter().collect();
        assert_eq!(map.remove("a"), Some(Value::Null));
        assert_eq!(map.remove("a"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(Value::Null.to_text().as_deref(), Some("null"));
        assert_eq!(Value::Bool(true).to_text().as_deref(), Some("true"));
        assert_eq!(Value::Int(-42).to_text().as_deref(), Some("-42"));
        assert_eq!(Value::Float(1.5).to_text().as_deref(), Some("1.5"));
        assert_eq!(
            Value::Bytes(b"raw".to_vec()).to_text().as_deref(),
            Some("raw")
        );
        assert_eq!(Value::Map(Map::new()).to_text(), None);
        assert_eq!(Value::Array(vec![]).to_text(), None);
    }

    #[test]
    fn test_timestamp_text() {
        let ts = Utc
            .timestamp_opt(1_600_000_000, 123_000_000)
            .single()
            .unwrap();
        assert_eq!(
            Value::Timestamp(ts).to_text().as_deref(),
            Some("2020-09-13T12:26:40.123Z")
        );
    }
}
