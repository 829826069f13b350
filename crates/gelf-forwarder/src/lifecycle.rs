// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Starting, running and stopping the pipeline components.
//!
//! Every component is started first (binding listeners, loading TLS material, creating writers);
//! a failure there aborts before anything is served. Then each component's serve loop runs on its
//! own task until the shared shutdown token is cancelled, which happens exactly once: when the
//! external trigger fires or when the first component fails.

use crate::errors::ComponentError;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[async_trait]
pub trait Component: Send {
    fn name(&self) -> &'static str;

    /// Acquires resources. Errors here are startup faults.
    async fn start(&mut self) -> Result<(), ComponentError>;

    /// Serves until `shutdown` is cancelled. Returning an error stops every other component.
    async fn listen(self: Box<Self>, shutdown: CancellationToken) -> Result<(), ComponentError>;
}

#[derive(Default)]
pub struct Orchestrator {
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts every component, serves until `trigger` completes or a component fails, then
    /// waits for all of them to stop. Returns the first component failure, if any.
    pub async fn run<F>(self, trigger: F) -> Result<(), ComponentError>
    where
        F: Future<Output = ()> + Send,
    {
        let Orchestrator {
            mut components,
            shutdown,
        } = self;

        for component in components.iter_mut() {
            if let Err(e) = component.start().await {
                error!("Could not start {}: {e}", component.name());
                return Err(e);
            }
            debug!("Started {}", component.name());
        }

        let (err_tx, mut err_rx) = mpsc::channel::<ComponentError>(components.len().max(1));
        let mut tasks = JoinSet::new();
        for component in components {
            let name = component.name();
            let token = shutdown.clone();
            let err_tx = err_tx.clone();
            tasks.spawn(async move {
                match component.listen(token).await {
                    Ok(()) => debug!("{name} stopped"),
                    Err(e) => {
                        error!("{name} failed: {e}");
                        let _ = err_tx.send(e).await;
                    }
                }
            });
        }
        drop(err_tx);

        info!("All components ready and listening");

        let failure = tokio::select! {
            failure = err_rx.recv() => {
                if failure.is_some() {
                    error!("One of the components failed, stopping");
                } else {
                    info!("All components stopped on their own");
                }
                failure
            }
            () = trigger => {
                info!("Received shutdown signal, stopping");
                None
            }
        };
        shutdown.cancel();

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Component task panicked or was aborted: {e}");
            }
        }
        while let Ok(late) = err_rx.try_recv() {
            debug!("Additional failure during shutdown: {late}");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
