// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use gelf_forwarder::input::event::{EventWrapper, Value};
use http_body_util::Full;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use prost::Message as _;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Reserves a loopback port for components that bind their own listener.
pub async fn free_port() -> SocketAddr {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap()
}

/// Waits until something accepts connections on `addr`.
pub async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing listening on {addr}");
}

/// Send an HTTP request over TCP and return the response
pub async fn send_http_request(
    addr: SocketAddr,
    method: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error>> {
    let stream = timeout(Duration::from_secs(2), TcpStream::connect(addr)).await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri("/")
        .method(method)
        .header("Content-Type", "application/json")
        .header("Content-Length", body.len().to_string());
    for (name, value) in headers {
        request_builder = request_builder.header(*name, *value);
    }
    let request = request_builder.body(Full::new(Bytes::from(body)))?;
    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;
    Ok(response)
}

/// Encodes one length-prefixed Vector frame.
pub fn frame(event: &EventWrapper) -> Vec<u8> {
    let body = event.encode_to_vec();
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Log event with a message and host plus arbitrary extra string fields.
pub fn log_event(message: &str, host: &str, extra: &[(&str, &str)]) -> EventWrapper {
    let mut fields: Vec<(String, Value)> = vec![
        ("message".to_string(), message.into()),
        ("host".to_string(), host.into()),
    ];
    fields.extend(extra.iter().map(|(k, v)| (k.to_string(), (*v).into())));
    EventWrapper::log(fields.into_iter().collect())
}

pub async fn send_frames(addr: SocketAddr, frames: &[Vec<u8>]) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    for frame in frames {
        stream.write_all(frame).await.unwrap();
    }
    stream.flush().await.unwrap();
    stream
}
