// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP/1.1 JSON input. Bodies may be gzip or deflate encoded and hold any number of
//! concatenated JSON objects or arrays of objects.

use crate::channel::MessageSender;
use crate::errors::ComponentError;
use crate::flatten::{FieldMapping, Flattener, TimestampPolicy};
use crate::input::{bind, is_transient, json};
use crate::lifecycle::Component;
use crate::message::Message;
use crate::registry::{Connection, ConnectionRegistry};
use crate::tls::{self, TlsOptions};
use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

const AUTH_CHALLENGE: &str = r#"Basic realm="gelf-forwarder""#;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpInputOptions {
    pub address: SocketAddr,
    pub fields: FieldMapping,
    /// Basic credentials are required when the user is non-empty.
    pub basic_user: String,
    pub basic_password: String,
    /// Answer 429 instead of waiting when a request does not fit in the delivery channel.
    pub backpressure: bool,
    /// Cap on both the received and the decompressed body.
    pub max_body_size: usize,
    pub tls: TlsOptions,
}

impl Default for HttpInputOptions {
    fn default() -> Self {
        Self {
            address: (Ipv4Addr::UNSPECIFIED, 9000).into(),
            fields: FieldMapping::default(),
            basic_user: String::new(),
            basic_password: String::new(),
            backpressure: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            tls: TlsOptions::default(),
        }
    }
}

type HttpResponse = Response<Full<Bytes>>;

struct RequestHandler {
    flattener: Flattener,
    tx: MessageSender,
    credentials: Option<(String, String)>,
    backpressure: bool,
    max_body_size: usize,
}

#[derive(Debug)]
enum BodyError {
    TooLarge,
    Invalid(String),
}

impl RequestHandler {
    async fn handle(&self, req: Request<Incoming>) -> HttpResponse {
        if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
            return respond(StatusCode::OK);
        }

        if !self.authorized(req.headers()) {
            warn!("Rejecting request with missing or invalid credentials");
            let mut response = respond(StatusCode::UNAUTHORIZED);
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(AUTH_CHALLENGE),
            );
            return response;
        }

        let body = match self.read_body(req).await {
            Ok(body) => body,
            Err(BodyError::TooLarge) => {
                warn!("Request body exceeds {} bytes", self.max_body_size);
                return respond(StatusCode::PAYLOAD_TOO_LARGE);
            }
            Err(BodyError::Invalid(e)) => {
                warn!("Unable to read request body: {e}");
                return respond(StatusCode::BAD_REQUEST);
            }
        };

        let records = match json::records(&body) {
            Ok(records) => records,
            Err(e) => {
                warn!("Unable to parse request body as JSON: {e}");
                return respond(StatusCode::BAD_REQUEST);
            }
        };

        let messages: Vec<Message> = records
            .into_iter()
            .filter_map(|record| match self.flattener.flatten(record) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Unable to convert message to GELF, ignoring: {e}");
                    None
                }
            })
            .collect();
        if messages.is_empty() {
            debug!("Request contained no valid messages");
            return respond(StatusCode::OK);
        }

        if self.backpressure && self.tx.would_overflow(messages.len()) {
            warn!(
                "Rejecting request with {} messages, {} already queued",
                messages.len(),
                self.tx.len()
            );
            return respond(StatusCode::TOO_MANY_REQUESTS);
        }

        let count = messages.len();
        for message in messages {
            if self.tx.send(message).await.is_err() {
                error!("Delivery channel closed, rejecting request");
                return respond(StatusCode::SERVICE_UNAVAILABLE);
            }
        }
        trace!("Enqueued {count} messages");
        respond(StatusCode::OK)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some((user, password)) = &self.credentials else {
            return true;
        };
        let Some((given_user, given_password)) = basic_credentials(headers) else {
            return false;
        };
        let matches = given_user.as_bytes().ct_eq(user.as_bytes())
            & given_password.as_bytes().ct_eq(password.as_bytes());
        matches.into()
    }

    async fn read_body(&self, req: Request<Incoming>) -> Result<Vec<u8>, BodyError> {
        let encoding = req
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_ascii_lowercase());

        let raw = Limited::new(req.into_body(), self.max_body_size)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    BodyError::TooLarge
                } else {
                    BodyError::Invalid(e.to_string())
                }
            })?
            .to_bytes();

        let encoding = match encoding.as_deref() {
            Some("gzip") => ContentEncoding::Gzip,
            Some("deflate") => ContentEncoding::Deflate,
            _ => return Ok(raw.to_vec()),
        };
        decompress(raw, encoding, self.max_body_size).await
    }
}

#[derive(Debug, Clone, Copy)]
enum ContentEncoding {
    Gzip,
    Deflate,
}

/// Inflates on the blocking pool, stopping one byte past `limit`.
async fn decompress(
    raw: Bytes,
    encoding: ContentEncoding,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    tokio::task::spawn_blocking(move || match encoding {
        ContentEncoding::Gzip => read_limited(GzDecoder::new(raw.as_ref()), limit),
        ContentEncoding::Deflate => read_limited(ZlibDecoder::new(raw.as_ref()), limit),
    })
    .await
    .map_err(|e| BodyError::Invalid(e.to_string()))?
}

fn read_limited<R: Read>(decoder: R, limit: usize) -> Result<Vec<u8>, BodyError> {
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut body = Vec::new();
    decoder
        .take(cap)
        .read_to_end(&mut body)
        .map_err(|e| BodyError::Invalid(e.to_string()))?;
    if body.len() > limit {
        return Err(BodyError::TooLarge);
    }
    Ok(body)
}

fn respond(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Decodes `Authorization: Basic <base64(user:password)>`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

pub struct HttpInput {
    options: HttpInputOptions,
    listener: Option<TcpListener>,
    acceptor: Option<TlsAcceptor>,
    registry: ConnectionRegistry,
    handler: Arc<RequestHandler>,
    span: Span,
}

impl HttpInput {
    pub fn new(options: HttpInputOptions, tx: MessageSender) -> Self {
        let credentials = (!options.basic_user.is_empty())
            .then(|| (options.basic_user.clone(), options.basic_password.clone()));
        let handler = RequestHandler {
            flattener: Flattener::new(options.fields.clone(), TimestampPolicy::Lenient),
            tx,
            credentials,
            backpressure: options.backpressure,
            max_body_size: options.max_body_size,
        };
        Self {
            options,
            listener: None,
            acceptor: None,
            registry: ConnectionRegistry::new(),
            handler: Arc::new(handler),
            span: info_span!("http_input", component = "http-input"),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    async fn serve_tcp(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ComponentError> {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = JoinSet::new();

        let result = loop {
            let (socket, peer) = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) if is_transient(&e) => continue,
                    Err(e) => {
                        error!("Server error: {e}");
                        break Err(ComponentError::Accept(e));
                    }
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {e:?}");
                        continue;
                    }
                    Ok(()) | Err(_) => continue,
                },
            };

            let connection = self.registry.register();
            debug!("Accepted connection #{} from {peer}", connection.id);
            let server = server.clone();
            let handler = Arc::clone(&self.handler);
            let acceptor = self.acceptor.clone();
            let registry = self.registry.clone();
            joinset.spawn(
                async move {
                    let id = connection.id;
                    serve_socket(server, socket, acceptor, handler, connection).await;
                    registry.close(id);
                }
                .instrument(Span::current()),
            );
        };

        info!("Closing connections");
        drop(listener);
        self.registry.close_all();
        while joinset.join_next().await.is_some() {}
        result
    }
}

async fn serve_socket(
    server: hyper::server::conn::http1::Builder,
    socket: TcpStream,
    acceptor: Option<TlsAcceptor>,
    handler: Arc<RequestHandler>,
    connection: Connection,
) {
    let Some(acceptor) = acceptor else {
        serve_connection(server, socket, handler, &connection).await;
        return;
    };
    let handshake = tokio::select! {
        () = connection.closed.cancelled() => return,
        stream = acceptor.accept(socket) => stream,
    };
    match handshake {
        Ok(stream) => serve_connection(server, stream, handler, &connection).await,
        Err(e) => warn!("TLS handshake failed on connection #{}: {e}", connection.id),
    }
}

async fn serve_connection<S>(
    server: hyper::server::conn::http1::Builder,
    stream: S,
    handler: Arc<RequestHandler>,
    connection: &Connection,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = Span::current();
    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(handler.handle(req).await) }.instrument(span.clone())
    });
    let conn = server.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let finished = tokio::select! {
        result = conn.as_mut() => Some(result),
        () = connection.closed.cancelled() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        if !e.is_incomplete_message() {
            error!("Connection error: {e}");
        }
    }
}

#[async_trait]
impl Component for HttpInput {
    fn name(&self) -> &'static str {
        "http-input"
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
            .ok_or(ComponentError::NotStarted("http-input"))?;
        let span = self.span.clone();
        async move {
            if let Ok(addr) = listener.local_addr() {
                info!("Listening on {addr}");
            }
            self.serve_tcp(listener, shutdown).await
        }
        .instrument(span)
        .await
    }
}
