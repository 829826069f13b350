// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Directory of live raw-framed connections.
//!
//! Sockets are owned by their reader tasks; the registry holds a close handle for each one.
//! Closing a connection cancels its handle, which makes the pending read in the reader task
//! return and the task drop the socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    connections: HashMap<u64, CancellationToken>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Inner>>,
}

/// Registration handed to a reader task.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub closed: CancellationToken,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a poisoned registry still has consistent bookkeeping
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tracks a new connection. Ids increase monotonically and are never reused.
    ///
    /// After [`close_all`](Self::close_all) the returned handle is already closed.
    pub fn register(&self) -> Connection {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let closed = CancellationToken::new();
        if inner.closed {
            closed.cancel();
        } else {
            inner.connections.insert(id, closed.clone());
        }
        Connection { id, closed }
    }

    /// Closes and forgets one connection. Unknown ids are ignored.
    pub fn close(&self, id: u64) {
        let token = self.lock().connections.remove(&id);
        if let Some(token) = token {
            token.cancel();
            debug!("Closed connection {id}");
        }
    }

    /// Closes every tracked connection. Safe to call more than once.
    pub fn close_all(&self) {
        let drained: Vec<(u64, CancellationToken)> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.connections.drain().collect()
        };
        for (id, token) in drained {
            token.cancel();
            debug!("Closed connection {id}");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
