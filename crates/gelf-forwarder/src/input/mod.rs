// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ComponentError;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;

pub mod event;
pub mod http;
pub mod json;
pub mod vector;
pub mod vector_v2;

pub use http::{HttpInput, HttpInputOptions};
pub use vector::{VectorInput, VectorInputOptions};
pub use vector_v2::{VectorV2Input, VectorV2InputOptions};

pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener, ComponentError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ComponentError::Bind { addr, source })
}

/// Accept errors caused by a single misbehaving peer. The listener itself is fine.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}
