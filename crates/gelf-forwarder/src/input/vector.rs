// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Vector v1 sink protocol: a TCP stream of `[u32 big-endian length][EventWrapper]` frames.
//!
//! Each connection is read sequentially by its own task. Transport faults (short reads, oversized
//! length prefixes) drop the connection; undecodable or invalid events only drop that frame.

use crate::channel::MessageSender;
use crate::errors::ComponentError;
use crate::flatten::{FieldMapping, Flattener, TimestampPolicy};
use crate::input::{bind, event, is_transient};
use crate::lifecycle::Component;
use crate::registry::{Connection, ConnectionRegistry};
use crate::tls::{self, TlsOptions};
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorInputOptions {
    pub address: SocketAddr,
    pub fields: FieldMapping,
    /// Largest accepted frame body. Bigger length prefixes close the connection.
    pub max_message_size: u32,
    pub tls: TlsOptions,
}

impl Default for VectorInputOptions {
    fn default() -> Self {
        Self {
            address: (Ipv4Addr::UNSPECIFIED, 9000).into(),
            fields: FieldMapping::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tls: TlsOptions::default(),
        }
    }
}

pub struct VectorInput {
    options: VectorInputOptions,
    listener: Option<TcpListener>,
    acceptor: Option<TlsAcceptor>,
    registry: ConnectionRegistry,
    reader: FrameReader,
    span: Span,
}

/// Per-connection state shared by every reader task.
#[derive(Clone)]
struct FrameReader {
    flattener: Arc<Flattener>,
    tx: MessageSender,
    registry: ConnectionRegistry,
    max_message_size: u32,
}

impl VectorInput {
    pub fn new(options: VectorInputOptions, tx: MessageSender) -> Self {
        let registry = ConnectionRegistry::new();
        let reader = FrameReader {
            flattener: Arc::new(Flattener::new(
                options.fields.clone(),
                TimestampPolicy::Strict,
            )),
            tx,
            registry: registry.clone(),
            max_message_size: options.max_message_size,
        };
        Self {
            options,
            listener: None,
            acceptor: None,
            registry,
            reader,
            span: info_span!("vector_input", component = "vector-input"),
        }
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    async fn accept_loop(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ComponentError> {
        let mut connections = JoinSet::new();

        let result = loop {
            let (socket, peer) = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) if is_transient(&e) => {
                        warn!("Temporary error while accepting: {e}");
                        continue;
                    }
                    Err(e) => {
                        error!("Error while accepting: {e}");
                        break Err(ComponentError::Accept(e));
                    }
                },
                finished = async {
                    match connections.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Connection reader panicked: {e:?}");
                        }
                    }
                    continue;
                }
            };

            let connection = self.registry.register();
            info!("Accepted connection #{} from {peer}", connection.id);
            let reader = self.reader.clone();
            let acceptor = self.acceptor.clone();
            connections.spawn(
                async move { reader.serve(socket, acceptor, connection).await }
                    .instrument(Span::current()),
            );
        };

        info!("Closing connections");
        drop(listener);
        self.registry.close_all();
        while connections.join_next().await.is_some() {}
        result
    }
}

impl FrameReader {
    async fn serve(self, socket: TcpStream, acceptor: Option<TlsAcceptor>, connection: Connection) {
        match acceptor {
            None => self.read_frames(socket, &connection).await,
            Some(acceptor) => {
                let handshake = tokio::select! {
                    () = connection.closed.cancelled() => None,
                    stream = acceptor.accept(socket) => Some(stream),
                };
                match handshake {
                    Some(Ok(stream)) => self.read_frames(stream, &connection).await,
                    Some(Err(e)) => warn!("TLS handshake failed on connection #{}: {e}", connection.id),
                    None => {}
                }
            }
        }
        self.registry.close(connection.id);
    }

    async fn read_frames<S>(&self, mut stream: S, connection: &Connection)
    where
        S: AsyncRead + Unpin,
    {
        let id = connection.id;
        let mut prefix = [0u8; 4];
        loop {
            let read = tokio::select! {
                () = connection.closed.cancelled() => return,
                read = stream.read_exact(&mut prefix) => read,
            };
            match read {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("Connection #{id} closed by peer");
                    return;
                }
                Err(e) => {
                    error!("Unable to read message length, dropping connection #{id}: {e}");
                    return;
                }
            }

            let length = u32::from_be_bytes(prefix);
            if length > self.max_message_size {
                error!(
                    "Message length {length} exceeds maximum of {}, dropping connection #{id}",
                    self.max_message_size
                );
                return;
            }

            let mut frame = vec![0u8; length as usize];
            let read = tokio::select! {
                () = connection.closed.cancelled() => return,
                read = stream.read_exact(&mut frame) => read,
            };
            if let Err(e) = read {
                error!("Unable to read message, dropping connection #{id}: {e}");
                return;
            }

            let wrapper = match event::decode(&frame) {
                Ok(wrapper) => wrapper,
                Err(e) => {
                    error!("Unable to decode message, ignoring: {e}");
                    continue;
                }
            };
            let message = match wrapper
                .into_record()
                .and_then(|record| self.flattener.flatten(record))
            {
                Ok(message) => message,
                Err(e) => {
                    warn!("Unable to convert message to GELF, ignoring: {e}");
                    continue;
                }
            };

            if self.tx.send(message).await.is_err() {
                debug!("Delivery channel closed, dropping connection #{id}");
                return;
            }
        }
    }
}

#[async_trait]
impl Component for VectorInput {
    fn name(&self) -> &'static str {
        "vector-input"
    }

    async fn start(&mut self) -> Result<(), ComponentError> {
        self.acceptor = tls::acceptor(&self.options.tls)?;
        self.listener = Some(bind(self.options.address).await?);
        Ok(())
    }

    async fn listen(mut self: Box<Self>, shutdown: CancellationToken) -> Result<(), ComponentError> {
        let listener = self
            .listener
            .take()
            .ok_or(ComponentError::NotStarted("vector-input"))?;
        let span = self.span.clone();
        async move {
            if let Ok(addr) = listener.local_addr() {
                info!("Listening on {addr}");
            }
            self.accept_loop(listener, shutdown).await
        }
        .instrument(span)
        .await
    }
}
