// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Vector's event protobuf schema, limited to what the inputs read, and its conversion into
//! [`crate::value::Value`].
//!
//! Metric fields beyond name and timestamp are not modelled; prost skips them on decode.

use crate::errors::{DecodeError, FlattenError};
use crate::value::{Map, Value as Record};
use chrono::DateTime;
use prost::Message as _;
use std::collections::BTreeMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct EventWrapper {
    #[prost(oneof = "event_wrapper::Event", tags = "1, 2")]
    pub event: Option<event_wrapper::Event>,
}

pub mod event_wrapper {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        Log(super::Log),
        #[prost(message, tag = "2")]
        Metric(super::Metric),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Log {
    #[prost(btree_map = "string, message", tag = "1")]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Metric {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub timestamp: Option<prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Value {
    #[prost(oneof = "value::Kind", tags = "1, 2, 4, 5, 6, 7, 8, 9")]
    pub kind: Option<value::Kind>,
}

pub mod value {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(bytes, tag = "1")]
        RawBytes(Vec<u8>),
        #[prost(message, tag = "2")]
        Timestamp(prost_types::Timestamp),
        #[prost(int64, tag = "4")]
        Integer(i64),
        #[prost(double, tag = "5")]
        Float(f64),
        #[prost(bool, tag = "6")]
        Boolean(bool),
        #[prost(message, tag = "7")]
        Map(super::ValueMap),
        #[prost(message, tag = "8")]
        Array(super::ValueArray),
        #[prost(enumeration = "super::ValueNull", tag = "9")]
        Null(i32),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ValueMap {
    #[prost(btree_map = "string, message", tag = "1")]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ValueArray {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ValueNull {
    NullValue = 0,
}

/// Decodes one raw frame body.
pub fn decode(frame: &[u8]) -> Result<EventWrapper, DecodeError> {
    Ok(EventWrapper::decode(frame)?)
}

impl EventWrapper {
    /// The log fields as a record. Metrics and empty wrappers are rejected.
    pub fn into_record(self) -> Result<Record, FlattenError> {
        match self.event {
            Some(event_wrapper::Event::Log(log)) => Ok(fields_to_record(log.fields)),
            Some(event_wrapper::Event::Metric(_)) => Err(FlattenError::UnsupportedEvent("metric")),
            None => Err(FlattenError::UnsupportedEvent("empty")),
        }
    }

    pub fn log(fields: BTreeMap<String, Value>) -> Self {
        Self {
            event: Some(event_wrapper::Event::Log(Log { fields })),
        }
    }
}

fn fields_to_record(fields: BTreeMap<String, Value>) -> Record {
    let mut map = Map::with_capacity(fields.len());
    for (key, value) in fields {
        map.insert(key, value.into());
    }
    Record::Map(map)
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        match value.kind {
            Some(value::Kind::RawBytes(bytes)) => Record::Bytes(bytes),
            Some(value::Kind::Timestamp(ts)) => u32::try_from(ts.nanos)
                .ok()
                .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
                .map_or(Record::Null, Record::Timestamp),
            Some(value::Kind::Integer(i)) => Record::Int(i),
            Some(value::Kind::Float(f)) => Record::Float(f),
            Some(value::Kind::Boolean(b)) => Record::Bool(b),
            Some(value::Kind::Map(map)) => fields_to_record(map.fields),
            Some(value::Kind::Array(array)) => {
                Record::Array(array.items.into_iter().map(Record::from).collect())
            }
            Some(value::Kind::Null(_)) | None => Record::Null,
        }
    }
}

impl From<value::Kind> for Value {
    fn from(kind: value::Kind) -> Self {
        Value { kind: Some(kind) }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        value::Kind::RawBytes(s.as_bytes().to_vec()).into()
    }
}
