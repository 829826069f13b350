// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! GELF transports.
//!
//! UDP payloads are optionally gzip compressed and split into chunks when they do not fit in a
//! single datagram. TCP payloads are plain JSON terminated by a null byte; the connection is
//! opened on first use and reopened on the next write after a failure.

use crate::errors::WriteError;
use crate::message::Message;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt;
use std::io::{self, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::debug;

/// Largest datagram sent in one piece; bigger payloads are chunked.
pub const CHUNK_SIZE: usize = 1420;
const CHUNK_HEADER_LEN: usize = 12;
const CHUNK_DATA_LEN: usize = CHUNK_SIZE - CHUNK_HEADER_LEN;
const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
pub const MAX_CHUNKS: usize = 128;

/// Writes one message to the downstream endpoint.
#[async_trait]
pub trait GelfWriter: Send + Sync {
    async fn write(&mut self, message: &Message) -> Result<(), WriteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GelfProtocol {
    #[default]
    Udp,
    Tcp,
}

impl FromStr for GelfProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(GelfProtocol::Udp),
            "tcp" => Ok(GelfProtocol::Tcp),
            other => Err(format!("unsupported GELF protocol '{other}'")),
        }
    }
}

impl fmt::Display for GelfProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GelfProtocol::Udp => f.write_str("udp"),
            GelfProtocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// Creates the writer for `address`. Hostnames are resolved here.
pub async fn connect(
    protocol: GelfProtocol,
    address: &str,
    compression: bool,
) -> Result<Box<dyn GelfWriter>, WriteError> {
    let target = resolve(address).await?;
    Ok(match protocol {
        GelfProtocol::Udp => Box::new(UdpWriter::connect(target, compression).await?),
        GelfProtocol::Tcp => Box::new(TcpWriter::new(target)),
    })
}

async fn resolve(address: &str) -> Result<SocketAddr, WriteError> {
    lookup_host(address).await?.next().ok_or_else(|| {
        WriteError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("could not resolve {address}"),
        ))
    })
}

#[derive(Debug)]
pub struct UdpWriter {
    socket: UdpSocket,
    compression: bool,
}

impl UdpWriter {
    pub async fn connect(target: SocketAddr, compression: bool) -> Result<Self, WriteError> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        Ok(Self {
            socket,
            compression,
        })
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, WriteError> {
        let json = message.to_json()?;
        if !self.compression {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }
}

#[async_trait]
impl GelfWriter for UdpWriter {
    async fn write(&mut self, message: &Message) -> Result<(), WriteError> {
        let payload = self.encode(message)?;
        if payload.len() <= CHUNK_SIZE {
            self.socket.send(&payload).await?;
            return Ok(());
        }
        let chunks = chunk(&payload, fastrand::u64(..).to_be_bytes())?;
        debug!("Sending message in {} chunks", chunks.len());
        for datagram in chunks {
            self.socket.send(&datagram).await?;
        }
        Ok(())
    }
}

/// Splits an oversized payload into GELF chunks sharing `id`.
pub fn chunk(payload: &[u8], id: [u8; 8]) -> Result<Vec<Vec<u8>>, WriteError> {
    let count = payload.len().div_ceil(CHUNK_DATA_LEN);
    if count > MAX_CHUNKS {
        return Err(WriteError::TooManyChunks(count));
    }
    Ok(payload
        .chunks(CHUNK_DATA_LEN)
        .enumerate()
        .map(|(sequence, data)| {
            let mut datagram = Vec::with_capacity(CHUNK_HEADER_LEN + data.len());
            datagram.extend_from_slice(&CHUNK_MAGIC);
            datagram.extend_from_slice(&id);
            // both fit in a byte, count is at most MAX_CHUNKS
            datagram.push(sequence as u8);
            datagram.push(count as u8);
            datagram.extend_from_slice(data);
            datagram
        })
        .collect())
}

#[derive(Debug)]
pub struct TcpWriter {
    target: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpWriter {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            stream: None,
        }
    }

    /// The stream is only kept once the whole frame is out. A failed or cancelled write drops
    /// the connection so a partial frame is never followed by another one.
    async fn try_write(&mut self, frame: &[u8]) -> Result<(), WriteError> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                debug!("Connecting to {}", self.target);
                TcpStream::connect(self.target).await?
            }
        };
        stream.write_all(frame).await?;
        stream.flush().await?;
        self.stream = Some(stream);
        Ok(())
    }
}

#[async_trait]
impl GelfWriter for TcpWriter {
    async fn write(&mut self, message: &Message) -> Result<(), WriteError> {
        let mut frame = message.to_json()?;
        frame.push(0);
        self.try_write(&frame).await
    }
}
