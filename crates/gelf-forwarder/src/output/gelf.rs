// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single consumer of the delivery channel.
//!
//! While running, every message is written with retries and the retry loop is abandoned as soon
//! as shutdown begins. On shutdown the output drains whatever is already queued, this time bounded
//! by a wall-clock deadline instead, and reports everything still queued when the deadline passes
//! as forcibly dropped.

use crate::channel::MessageReceiver;
use crate::errors::{ComponentError, SendError};
use crate::lifecycle::Component;
use crate::message::Message;
use crate::output::backoff::BackoffPolicy;
use crate::output::writer::{self, GelfProtocol, GelfWriter};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

#[derive(Debug, Clone, PartialEq)]
pub struct GelfOutputOptions {
    pub protocol: GelfProtocol,
    pub address: String,
    /// Gzip payloads, UDP only.
    pub compression: bool,
    /// Retries after the first failed write. Negative means retry until shutdown.
    pub max_retries: i64,
    pub graceful_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for GelfOutputOptions {
    fn default() -> Self {
        Self {
            protocol: GelfProtocol::Udp,
            address: "127.0.0.1:12201".to_string(),
            compression: true,
            max_retries: 3,
            graceful_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl GelfOutputOptions {
    /// Total write attempts per message, `None` when unlimited.
    pub fn max_attempts(&self) -> Option<u64> {
        u64::try_from(self.max_retries)
            .ok()
            .map(|retries| retries.saturating_add(1))
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    forced: AtomicU64,
}

/// Delivery counters shared with whoever holds a clone.
#[derive(Debug, Clone, Default)]
pub struct DeliveryStats {
    counters: Arc<Counters>,
}

impl DeliveryStats {
    /// Messages written downstream.
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Messages given up on after retries, cancellation or the drain deadline.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Messages still queued when the drain deadline passed.
    pub fn forced(&self) -> u64 {
        self.counters.forced.load(Ordering::Relaxed)
    }
}

/// What bounds a delivery attempt.
enum Deadline<'a> {
    Cancel(&'a CancellationToken),
    At(Instant),
}

impl Deadline<'_> {
    async fn reached(&self) {
        match self {
            Deadline::Cancel(token) => token.cancelled().await,
            Deadline::At(instant) => sleep_until(*instant).await,
        }
    }

    fn exceeded(&self, attempts: u64) -> SendError {
        match self {
            Deadline::Cancel(_) => SendError::Cancelled { attempts },
            Deadline::At(_) => SendError::DeadlineExceeded { attempts },
        }
    }
}

pub struct GelfOutput {
    options: GelfOutputOptions,
    rx: MessageReceiver,
    writer: Option<Box<dyn GelfWriter>>,
    stats: DeliveryStats,
    span: Span,
}

impl GelfOutput {
    pub fn new(options: GelfOutputOptions, rx: MessageReceiver) -> Self {
        Self {
            options,
            rx,
            writer: None,
            stats: DeliveryStats::default(),
            span: info_span!("gelf_output", component = "gelf-output"),
        }
    }

    /// Uses `writer` instead of connecting to the configured address on start.
    pub fn with_writer(mut self, writer: Box<dyn GelfWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.clone()
    }

    async fn run(
        mut self,
        mut writer: Box<dyn GelfWriter>,
        shutdown: CancellationToken,
    ) -> Result<(), ComponentError> {
        info!(
            "Sending to {} over {}",
            self.options.address, self.options.protocol
        );
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = self.rx.recv() => match received {
                    Some(message) => {
                        self.deliver(writer.as_mut(), message, &Deadline::Cancel(&shutdown))
                            .await;
                    }
                    None => {
                        info!("Every producer is gone, stopping");
                        return Ok(());
                    }
                },
            }
        }
        self.drain(writer.as_mut()).await;
        Ok(())
    }

    async fn drain(&mut self, writer: &mut dyn GelfWriter) {
        info!(
            "Graceful shutdown initiated, forcing shutdown after {:?}",
            self.options.graceful_timeout
        );
        let until = Instant::now() + self.options.graceful_timeout;
        loop {
            if Instant::now() >= until {
                let remaining = self.rx.len();
                if remaining > 0 {
                    warn!("Forcing shutdown with {remaining} messages unsent");
                    self.stats
                        .counters
                        .forced
                        .fetch_add(remaining as u64, Ordering::Relaxed);
                }
                return;
            }
            let Some(message) = self.rx.try_recv() else {
                debug!("Delivery channel drained");
                return;
            };
            self.deliver(writer, message, &Deadline::At(until)).await;
        }
    }

    async fn deliver(
        &self,
        writer: &mut dyn GelfWriter,
        message: Message,
        deadline: &Deadline<'_>,
    ) {
        match self.send(writer, &message, deadline).await {
            Ok(()) => {
                self.stats.counters.delivered.fetch_add(1, Ordering::Relaxed);
                trace!("Delivered message from {}", message.host);
            }
            Err(e) => {
                self.stats.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!("Dropping message: {e}");
            }
        }
    }

    async fn send(
        &self,
        writer: &mut dyn GelfWriter,
        message: &Message,
        deadline: &Deadline<'_>,
    ) -> Result<(), SendError> {
        let max_attempts = self.options.max_attempts();
        let mut backoff = self.options.backoff.schedule();
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                () = deadline.reached() => return Err(deadline.exceeded(attempts)),
                outcome = writer.write(message) => outcome,
            };
            let last = match outcome {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            warn!("Error while writing GELF message (attempt {attempts}): {last}");
            if max_attempts.is_some_and(|max| attempts >= max) {
                return Err(SendError::RetriesExhausted { attempts, last });
            }
            let delay = backoff.next_delay();
            tokio::select! {
                biased;
                () = deadline.reached() => return Err(deadline.exceeded(attempts)),
                () = sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl Component for GelfOutput {
    fn name(&self) -> &'static str {
        "gelf-output"
    }

    async fn start(&mut self) -> Result<(), ComponentError> {
        if self.writer.is_none() {
            let writer = writer::connect(
                self.options.protocol,
                &self.options.address,
                self.options.compression,
            )
            .instrument(self.span.clone())
            .await?;
            self.writer = Some(writer);
        }
        Ok(())
    }

    async fn listen(mut self: Box<Self>, shutdown: CancellationToken) -> Result<(), ComponentError> {
        let writer = self
            .writer
            .take()
            .ok_or(ComponentError::NotStarted("gelf-output"))?;
        let span = self.span.clone();
        (*self).run(writer, shutdown).instrument(span).await
    }
}
