// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Vector v2 sink protocol: the `vector.Vector` gRPC service.
//!
//! The service is routed by hand on top of `tonic::server::Grpc` with prost messages, so no
//! protobuf compiler is needed at build time. Unknown methods answer `UNIMPLEMENTED`.

use crate::channel::MessageSender;
use crate::errors::ComponentError;
use crate::flatten::{FieldMapping, Flattener, TimestampPolicy};
use crate::input::bind;
use crate::input::event::EventWrapper;
use crate::lifecycle::Component;
use crate::message::Message;
use async_trait::async_trait;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Context, Poll, Service, StdError};
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::{Code, Request, Response, Status};
use tracing::{info, info_span, trace, warn, Instrument, Span};

pub const PUSH_EVENTS_PATH: &str = "/vector.Vector/PushEvents";
pub const HEALTH_CHECK_PATH: &str = "/vector.Vector/HealthCheck";

#[derive(Clone, PartialEq, prost::Message)]
pub struct PushEventsRequest {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<EventWrapper>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PushEventsResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheckRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HealthCheckResponse {
    #[prost(enumeration = "ServingStatus", tag = "1")]
    pub status: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ServingStatus {
    Serving = 0,
    NotServing = 1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorV2InputOptions {
    pub address: SocketAddr,
    pub fields: FieldMapping,
    /// Fail a batch with `RESOURCE_EXHAUSTED` instead of waiting when it does not fit in the
    /// delivery channel.
    pub backpressure: bool,
}

impl Default for VectorV2InputOptions {
    fn default() -> Self {
        Self {
            address: (Ipv4Addr::UNSPECIFIED, 9000).into(),
            fields: FieldMapping::default(),
            backpressure: false,
        }
    }
}

struct EventHandler {
    flattener: Flattener,
    tx: MessageSender,
    backpressure: bool,
    span: Span,
}

impl EventHandler {
    async fn push_events(&self, events: Vec<EventWrapper>) -> Result<PushEventsResponse, Status> {
        let received = events.len();
        let messages: Vec<Message> = events
            .into_iter()
            .filter_map(|wrapper| {
                match wrapper
                    .into_record()
                    .and_then(|record| self.flattener.flatten(record))
                {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!("Unable to convert message to GELF, ignoring: {e}");
                        None
                    }
                }
            })
            .collect();

        if self.backpressure && self.tx.would_overflow(messages.len()) {
            warn!(
                "Rejecting batch of {} messages, {} already queued",
                messages.len(),
                self.tx.len()
            );
            return Err(Status::resource_exhausted("delivery channel is full"));
        }

        let accepted = messages.len();
        for message in messages {
            if self.tx.send(message).await.is_err() {
                return Err(Status::unavailable("shutting down"));
            }
        }
        trace!("Accepted {accepted} of {received} events");
        Ok(PushEventsResponse {})
    }
}

/// `vector.Vector` service router.
#[derive(Clone)]
pub struct VectorService {
    handler: Arc<EventHandler>,
}

impl NamedService for VectorService {
    const NAME: &'static str = "vector.Vector";
}

struct PushEvents(Arc<EventHandler>);

impl UnaryService<PushEventsRequest> for PushEvents {
    type Response = PushEventsResponse;
    type Future = BoxFuture<Response<Self::Response>, Status>;

    fn call(&mut self, request: Request<PushEventsRequest>) -> Self::Future {
        let handler = Arc::clone(&self.0);
        let span = handler.span.clone();
        Box::pin(
            async move {
                handler
                    .push_events(request.into_inner().events)
                    .await
                    .map(Response::new)
            }
            .instrument(span),
        )
    }
}

struct HealthCheck;

impl UnaryService<HealthCheckRequest> for HealthCheck {
    type Response = HealthCheckResponse;
    type Future = BoxFuture<Response<Self::Response>, Status>;

    fn call(&mut self, _request: Request<HealthCheckRequest>) -> Self::Future {
        Box::pin(async {
            Ok(Response::new(HealthCheckResponse {
                status: ServingStatus::Serving as i32,
            }))
        })
    }
}

impl<B> Service<http::Request<B>> for VectorService
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        match req.uri().path() {
            PUSH_EVENTS_PATH => {
                let handler = Arc::clone(&self.handler);
                Box::pin(async move {
                    let mut grpc = Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.unary(PushEvents(handler), req).await)
                })
            }
            HEALTH_CHECK_PATH => Box::pin(async move {
                let mut grpc = Grpc::new(tonic::codec::ProstCodec::default());
                Ok(grpc.unary(HealthCheck, req).await)
            }),
            _ => Box::pin(async move {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert(
                    Status::GRPC_STATUS,
                    http::HeaderValue::from(Code::Unimplemented as i32),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    tonic::metadata::GRPC_CONTENT_TYPE,
                );
                Ok(response)
            }),
        }
    }
}

pub struct VectorV2Input {
    options: VectorV2InputOptions,
    listener: Option<TcpListener>,
    service: VectorService,
    span: Span,
}

impl VectorV2Input {
    pub fn new(options: VectorV2InputOptions, tx: MessageSender) -> Self {
        let span = info_span!("vector_v2_input", component = "vector-v2-input");
        let handler = EventHandler {
            flattener: Flattener::new(options.fields.clone(), TimestampPolicy::Strict),
            tx,
            backpressure: options.backpressure,
            span: span.clone(),
        };
        Self {
            options,
            listener: None,
            service: VectorService {
                handler: Arc::new(handler),
            },
            span,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

#[async_trait]
impl Component for VectorV2Input {
    fn name(&self) -> &'static str {
        "vector-v2-input"
    }

    async fn start(&mut self) -> Result<(), ComponentError> {
        self.listener = Some(bind(self.options.address).await?);
        Ok(())
    }

    async fn listen(mut self: Box<Self>, shutdown: CancellationToken) -> Result<(), ComponentError> {
        let listener = self
            .listener
            .take()
            .ok_or(ComponentError::NotStarted("vector-v2-input"))?;
        let span = self.span.clone();
        async move {
            if let Ok(addr) = listener.local_addr() {
                info!("Listening on {addr}");
            }
            let signal = async {
                shutdown.cancelled().await;
                info!("Gracefully stopping gRPC server");
            };
            tonic::transport::Server::builder()
                .add_service(self.service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
                .await
                .map_err(|e| ComponentError::Serve(e.to_string()))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::delivery_channel;
    use crate::input::event::value;
    use std::time::Duration;
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::transport::{Channel, Endpoint};

    fn event(message: &str, host: Option<&str>) -> EventWrapper {
        let mut fields: Vec<(String, crate::input::event::Value)> =
            vec![("message".to_string(), message.into())];
        if let Some(host) = host {
            fields.push(("host".to_string(), host.into()));
        }
        EventWrapper::log(fields.into_iter().collect())
    }

    async fn client(addr: SocketAddr) -> tonic::client::Grpc<Channel> {
        let channel = Endpoint::from_shared(format!("http://{addr}"))
            .unwrap()
            .connect()
            .await
            .unwrap();
        tonic::client::Grpc::new(channel)
    }

    async fn push(
        client: &mut tonic::client::Grpc<Channel>,
        events: Vec<EventWrapper>,
    ) -> Result<Response<PushEventsResponse>, Status> {
        client.ready().await.unwrap();
        client
            .unary(
                Request::new(PushEventsRequest { events }),
                PathAndQuery::from_static(PUSH_EVENTS_PATH),
                tonic::codec::ProstCodec::default(),
            )
            .await
    }

    async fn started(
        backpressure: bool,
        capacity: usize,
    ) -> (
        SocketAddr,
        crate::channel::MessageReceiver,
        CancellationToken,
        tokio::task::JoinHandle<Result<(), ComponentError>>,
    ) {
        let (tx, rx) = delivery_channel(capacity);
        let mut input = Box::new(VectorV2Input::new(
            VectorV2InputOptions {
                address: (Ipv4Addr::LOCALHOST, 0).into(),
                backpressure,
                ..Default::default()
            },
            tx,
        ));
        input.start().await.unwrap();
        let addr = input.local_addr().unwrap();
        let token = CancellationToken::new();
        let task = tokio::spawn(input.listen(token.clone()));
        (addr, rx, token, task)
    }

    #[tokio::test]
    async fn test_push_events_skips_invalid_records() {
        let (addr, mut rx, token, task) = started(false, 10).await;
        let mut client = client(addr).await;

        let mut timestamped = event("third", Some("c"));
        if let Some(crate::input::event::event_wrapper::Event::Log(log)) = timestamped.event.as_mut()
        {
            log.fields.insert(
                "timestamp".to_string(),
                value::Kind::Timestamp(prost_types::Timestamp {
                    seconds: 100,
                    nanos: 0,
                })
                .into(),
            );
        }
        push(
            &mut client,
            vec![event("first", Some("a")), event("no host", None), timestamped],
        )
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().short_message, "first");
        let third = rx.recv().await.unwrap();
        assert_eq!(third.short_message, "third");
        assert_eq!(third.timestamp, 100.0);
        assert!(rx.try_recv().is_none());

        drop(client);
        token.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_backpressure_rejects_whole_batch() {
        let (addr, rx, token, task) = started(true, 2).await;
        let mut client = client(addr).await;

        let status = push(
            &mut client,
            vec![
                event("a", Some("h")),
                event("b", Some("h")),
                event("c", Some("h")),
            ],
        )
        .await
        .unwrap_err();

        assert_eq!(status.code(), Code::ResourceExhausted);
        assert_eq!(rx.len(), 0);

        drop(client);
        token.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_health_check() {
        let (addr, _rx, token, task) = started(false, 1).await;
        let mut client = client(addr).await;

        client.ready().await.unwrap();
        let response: Response<HealthCheckResponse> = client
            .unary(
                Request::new(HealthCheckRequest {}),
                PathAndQuery::from_static(HEALTH_CHECK_PATH),
                tonic::codec::ProstCodec::default(),
            )
            .await
            .unwrap();
        assert_eq!(response.into_inner().status, ServingStatus::Serving as i32);

        drop(client);
        token.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_method_is_unimplemented() {
        let (addr, _rx, token, task) = started(false, 1).await;
        let mut client = client(addr).await;

        client.ready().await.unwrap();
        let status = client
            .unary::<HealthCheckRequest, HealthCheckResponse, _>(
                Request::new(HealthCheckRequest {}),
                PathAndQuery::from_static("/vector.Vector/Nope"),
                tonic::codec::ProstCodec::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);

        drop(client);
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
