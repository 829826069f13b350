// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON payloads: a stream of concatenated JSON texts, each an object or an array of objects.

use crate::value::{Map, Value as Record};
use serde_json::Value;
use tracing::warn;

/// Splits a body into records, one per object found at the top level or inside a top-level
/// array. Other values are skipped. Any syntax error fails the whole body.
pub fn records(body: &[u8]) -> Result<Vec<Record>, serde_json::Error> {
    let mut records = Vec::new();
    for value in serde_json::Deserializer::from_slice(body).into_iter::<Value>() {
        match value? {
            object @ Value::Object(_) => records.push(object.into()),
            Value::Array(items) => {
                for item in items {
                    if item.is_object() {
                        records.push(item.into());
                    } else {
                        warn!("Expected object inside array, got {}", json_kind(&item));
                    }
                }
            }
            other => warn!("Ignoring {}, not an array or object", json_kind(&other)),
        }
    }
    Ok(records)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Record::Null,
            Value::Bool(b) => Record::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Record::Int(i),
                None => Record::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Record::String(s),
            Value::Array(items) => Record::Array(items.into_iter().map(Record::from).collect()),
            Value::Object(object) => {
                let mut map = Map::with_capacity(object.len());
                for (key, value) in object {
                    map.insert(key, value.into());
                }
                Record::Map(map)
            }
        }
    }
}
