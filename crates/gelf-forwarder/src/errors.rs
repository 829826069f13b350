// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Record-level validation failures. The record is skipped, its siblings are not.
#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("required field '{field}' is blank")]
    BlankField { field: String },

    #[error("record is a {0}, expected a map")]
    NotAMap(&'static str),

    #[error("unsupported event kind: {0}")]
    UnsupportedEvent(&'static str),
}

/// Malformed binary record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid event encoding: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("tls is enabled but no {0} is configured")]
    Missing(&'static str),

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid client CA: {0}")]
    ClientCa(String),

    #[error("tls configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A single failed write to the downstream endpoint.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("message needs {0} chunks, at most 128 are allowed")]
    TooManyChunks(usize),
}

/// Final outcome of a delivery attempt that did not succeed. The message is lost.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u64, last: WriteError },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("drain deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u64 },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("delivery channel is closed")]
    Closed,

    #[error("delivery channel is full")]
    Full,
}

/// Faults surfaced to the orchestrator. Any of them shuts the process down.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("failed to accept connection: {0}")]
    Accept(io::Error),

    #[error("server error: {0}")]
    Serve(String),

    #[error("downstream writer error: {0}")]
    Writer(#[from] WriteError),

    #[error("{0} was not started")]
    NotStarted(&'static str),
}
