// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonical log message moved through the pipeline, encoded as GELF 1.1 JSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const GELF_VERSION: &str = "1.1";

/// Scalar stored under an extras key. Numbers stay numbers, everything else is text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtraValue {
    String(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for ExtraValue {
    fn from(s: &str) -> Self {
        ExtraValue::String(s.to_string())
    }
}

impl From<i64> for ExtraValue {
    fn from(i: i64) -> Self {
        ExtraValue::Int(i)
    }
}

impl From<f64> for ExtraValue {
    fn from(f: f64) -> Self {
        ExtraValue::Float(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub version: &'static str,
    pub host: String,
    pub short_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_message: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    /// Underscore prefixed additional fields, serialized at the top level.
    #[serde(flatten)]
    pub extra: BTreeMap<String, ExtraValue>,
}

impl Message {
    /// Builds a message stamped with the current time.
    pub fn new(short_message: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            version: GELF_VERSION,
            host: host.into(),
            short_message: short_message.into(),
            full_message: None,
            timestamp: epoch_seconds(&Utc::now()),
            level: None,
            facility: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

pub fn epoch_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}
