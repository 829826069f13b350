// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock Graylog endpoints collecting decoded GELF messages

use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub struct MockGelfServer {
    pub addr: SocketAddr,
    messages: mpsc::UnboundedReceiver<Value>,
}

impl MockGelfServer {
    /// UDP endpoint accepting plain or gzip-compressed, unchunked datagrams.
    pub async fn udp() -> Self {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, messages) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65_536];
            while let Ok(n) = socket.recv(&mut buf).await {
                let datagram = &buf[..n];
                let json = if datagram.starts_with(&[0x1f, 0x8b]) {
                    let mut decoded = Vec::new();
                    GzDecoder::new(datagram).read_to_end(&mut decoded).unwrap();
                    decoded
                } else {
                    datagram.to_vec()
                };
                if tx.send(serde_json::from_slice(&json).unwrap()).is_err() {
                    break;
                }
            }
        });
        Self { addr, messages }
    }

    /// TCP endpoint reading null-delimited JSON.
    pub async fn tcp() -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, messages) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket);
                    let mut buf = Vec::new();
                    while let Ok(n) = reader.read_until(0, &mut buf).await {
                        if n == 0 {
                            break;
                        }
                        if buf.last() == Some(&0) {
                            buf.pop();
                        }
                        if tx.send(serde_json::from_slice(&buf).unwrap()).is_err() {
                            break;
                        }
                        buf.clear();
                    }
                });
            }
        });
        Self { addr, messages }
    }

    pub async fn next(&mut self) -> Value {
        timeout(Duration::from_secs(5), self.messages.recv())
            .await
            .expect("timed out waiting for a GELF message")
            .expect("mock server stopped")
    }

    pub async fn assert_silent(&mut self, wait: Duration) {
        if let Ok(Some(message)) = timeout(wait, self.messages.recv()).await {
            panic!("unexpected GELF message: {message}");
        }
    }
}
