// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use gelf_forwarder::{
    channel::delivery_channel,
    input::{HttpInput, VectorInput, VectorV2Input},
    lifecycle::Orchestrator,
    output::GelfOutput,
};

use config::{Args, InputConfig};

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = format!("h2=off,hyper=off,tonic=off,rustls=off,{}", args.log_level);
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    let config = args.into_config().context("invalid configuration")?;

    let (tx, rx) = delivery_channel(config.channel_capacity);
    let mut orchestrator = Orchestrator::new();
    match config.input {
        InputConfig::Vector(options) => {
            info!("Starting Vector input on {}", options.address);
            orchestrator.register(Box::new(VectorInput::new(options, tx)));
        }
        InputConfig::VectorV2(options) => {
            info!("Starting Vector v2 input on {}", options.address);
            orchestrator.register(Box::new(VectorV2Input::new(options, tx)));
        }
        InputConfig::Http(options) => {
            info!("Starting HTTP input on {}", options.address);
            orchestrator.register(Box::new(HttpInput::new(options, tx)));
        }
    }
    info!(
        "Forwarding to {} over {}",
        config.output.address, config.output.protocol
    );
    let output = GelfOutput::new(config.output, rx);
    let stats = output.stats();
    orchestrator.register(Box::new(output));

    let result = orchestrator.run(shutdown_signal()).await;
    info!(
        "Delivered {} messages, dropped {}, {} unsent at shutdown",
        stats.delivered(),
        stats.dropped(),
        stats.forced()
    );
    result.context("forwarder stopped with an error")
}

/// Resolves on Ctrl+C, SIGTERM or SIGQUIT.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                return wait_for_ctrl_c().await;
            }
        };
        let mut quit = match signal(SignalKind::quit()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to listen for SIGQUIT: {e}");
                return wait_for_ctrl_c().await;
            }
        };
        tokio::select! {
            () = wait_for_ctrl_c() => {}
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = quit.recv() => info!("Received SIGQUIT"),
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
