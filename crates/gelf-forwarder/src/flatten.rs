// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a decoded record into a [`Message`].
//!
//! The record must be a map. The configured message and host keys are required and removed, the
//! timestamp key is optional and always removed, and everything left is flattened into extras:
//! nested map keys are joined with `_`, array elements get their index appended, and every
//! resulting name is sanitized and prefixed with `_`. When two source keys end up with the same
//! extras name, the one visited last wins.

use crate::errors::FlattenError;
use crate::message::{epoch_seconds, ExtraValue, Message};
use crate::value::{Map, Value};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

#[allow(clippy::expect_used)]
fn non_word_characters() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^0-9A-Za-z_]").expect("failed creating regex"))
}

/// Names of the keys holding the required message fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub message_key: String,
    pub host_key: String,
    pub timestamp_key: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            message_key: "message".to_string(),
            host_key: "host".to_string(),
            timestamp_key: "timestamp".to_string(),
        }
    }
}

/// Which value kinds are accepted under the timestamp key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Only [`Value::Timestamp`]. Used for binary events, which carry typed timestamps.
    Strict,
    /// Also RFC 3339 strings and bare numbers of epoch seconds. Used for JSON.
    Lenient,
}

#[derive(Debug, Clone)]
pub struct Flattener {
    mapping: FieldMapping,
    policy: TimestampPolicy,
}

impl Flattener {
    pub fn new(mapping: FieldMapping, policy: TimestampPolicy) -> Self {
        Self { mapping, policy }
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    pub fn flatten(&self, record: Value) -> Result<Message, FlattenError> {
        let mut fields = match record {
            Value::Map(fields) => fields,
            other => return Err(FlattenError::NotAMap(other.kind())),
        };

        let short_message = required(&mut fields, &self.mapping.message_key)?;
        let host = required(&mut fields, &self.mapping.host_key)?;
        let mut message = Message::new(short_message, host);

        if let Some(ts) = fields.remove(&self.mapping.timestamp_key) {
            match self.timestamp(&ts) {
                Some(seconds) => message.timestamp = seconds,
                None => warn!(
                    "Unable to parse '{}' of kind {} as a timestamp, using current time",
                    self.mapping.timestamp_key,
                    ts.kind()
                ),
            }
        }

        for (key, value) in fields {
            flatten_value(key, value, &mut message.extra);
        }

        Ok(message)
    }

    fn timestamp(&self, value: &Value) -> Option<f64> {
        match (value, self.policy) {
            (Value::Timestamp(ts), _) => Some(epoch_seconds(ts)),
            (Value::String(s), TimestampPolicy::Lenient) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| epoch_seconds(&ts.with_timezone(&Utc))),
            (Value::Int(i), TimestampPolicy::Lenient) => Some(*i as f64),
            (Value::Float(f), TimestampPolicy::Lenient) if f.is_finite() => Some(*f),
            _ => None,
        }
    }
}

/// Sanitized extras name for a flattened key path.
pub fn field_name(path: &str) -> String {
    format!("_{}", non_word_characters().replace_all(path, "_"))
}

fn required(fields: &mut Map, key: &str) -> Result<String, FlattenError> {
    let text = match fields.remove(key) {
        None | Some(Value::Null) | Some(Value::Map(_)) | Some(Value::Array(_)) => None,
        Some(value) => value.to_text(),
    };
    match text {
        None => Err(FlattenError::MissingField {
            field: key.to_string(),
        }),
        Some(text) if text.trim().is_empty() => Err(FlattenError::BlankField {
            field: key.to_string(),
        }),
        Some(text) => Ok(text),
    }
}

fn flatten_value(path: String, value: Value, extra: &mut BTreeMap<String, ExtraValue>) {
    match value {
        Value::Map(map) => {
            for (key, child) in map {
                flatten_value(format!("{path}_{key}"), child, extra);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.into_iter().enumerate() {
                flatten_value(format!("{path}_{index}"), child, extra);
            }
        }
        Value::Int(i) => {
            extra.insert(field_name(&path), ExtraValue::Int(i));
        }
        Value::Float(f) => {
            extra.insert(field_name(&path), ExtraValue::Float(f));
        }
        scalar => {
            let text = scalar.to_text().unwrap_or_default();
            extra.insert(field_name(&path), ExtraValue::String(text));
        }
    }
}
