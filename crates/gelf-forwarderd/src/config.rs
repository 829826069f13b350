// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use clap::{ArgAction, Parser, ValueEnum};
use gelf_forwarder::flatten::FieldMapping;
use gelf_forwarder::input::{HttpInputOptions, VectorInputOptions, VectorV2InputOptions};
use gelf_forwarder::output::{GelfOutputOptions, GelfProtocol};
use gelf_forwarder::tls::TlsOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("channel buffer size must be at least 1")]
    ChannelCapacity,
    #[error("{listener} TLS is enabled but no {missing} was given")]
    TlsMaterial {
        listener: &'static str,
        missing: &'static str,
    },
    #[error("vector max message size must be at least 1")]
    MaxMessageSize,
    #[error("gelf max retries must be -1 or greater, got {0}")]
    MaxRetries(i64),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputType {
    /// Vector v1 length-prefixed protobuf frames
    Vector,
    /// Vector v2 gRPC sink
    #[value(name = "vectorv2")]
    VectorV2,
    /// JSON over HTTP
    Http,
}

/// Forwards logs received from Vector or over HTTP to a Graylog GELF endpoint.
#[derive(Parser, Debug)]
#[command(name = "gelf-forwarderd")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Which input to run
    #[arg(long, value_enum, default_value = "http", env = "INPUT_TYPE")]
    pub input_type: InputType,

    /// Seconds allowed for draining queued messages on shutdown
    #[arg(long, default_value_t = 10, env = "GRACEFUL_TIMEOUT")]
    pub graceful_timeout: u64,

    /// Messages buffered between the input and the GELF output
    #[arg(long, default_value_t = 100, env = "CHANNEL_BUFFER_SIZE")]
    pub channel_buffer_size: usize,

    /// Log level or tracing filter directive
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    #[arg(long, default_value = "0.0.0.0:9000", env = "VECTOR_ADDRESS")]
    pub vector_address: SocketAddr,

    #[arg(long, default_value = "timestamp", env = "VECTOR_TIMESTAMP_FIELD")]
    pub vector_timestamp_field: String,

    #[arg(long, default_value = "message", env = "VECTOR_MESSAGE_FIELD")]
    pub vector_message_field: String,

    #[arg(long, default_value = "host", env = "VECTOR_HOST_FIELD")]
    pub vector_host_field: String,

    /// Largest accepted Vector v1 frame, in bytes
    #[arg(long, default_value_t = 1024 * 1024, env = "VECTOR_MAX_MESSAGE_SIZE")]
    pub vector_max_message_size: u32,

    /// Fail gRPC pushes with RESOURCE_EXHAUSTED instead of waiting for buffer space
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false,
        default_missing_value = "true", env = "VECTOR_BACKPRESSURE")]
    pub vector_backpressure: bool,

    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false,
        default_missing_value = "true", env = "VECTOR_TLS_ENABLED")]
    pub vector_tls_enabled: bool,

    #[arg(long, env = "VECTOR_TLS_CERT")]
    pub vector_tls_cert: Option<PathBuf>,

    #[arg(long, env = "VECTOR_TLS_KEY")]
    pub vector_tls_key: Option<PathBuf>,

    /// Require client certificates signed by this CA bundle
    #[arg(long, env = "VECTOR_TLS_CLIENT_CA")]
    pub vector_tls_client_ca: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:9000", env = "HTTP_ADDRESS")]
    pub http_address: SocketAddr,

    #[arg(long, default_value = "timestamp", env = "HTTP_TIMESTAMP_FIELD")]
    pub http_timestamp_field: String,

    #[arg(long, default_value = "message", env = "HTTP_MESSAGE_FIELD")]
    pub http_message_field: String,

    #[arg(long, default_value = "host", env = "HTTP_HOST_FIELD")]
    pub http_host_field: String,

    /// Basic auth user, authentication is disabled when empty
    #[arg(long, default_value = "", env = "HTTP_BASIC_USER")]
    pub http_basic_user: String,

    #[arg(long, default_value = "", env = "HTTP_BASIC_PASSWORD", hide_env_values = true)]
    pub http_basic_password: String,

    /// Answer 429 instead of waiting for buffer space
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false,
        default_missing_value = "true", env = "HTTP_BACKPRESSURE")]
    pub http_backpressure: bool,

    /// Largest accepted request body, before and after decompression
    #[arg(long, default_value_t = 10 * 1024 * 1024, env = "HTTP_MAX_BODY_SIZE")]
    pub http_max_body_size: usize,

    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false,
        default_missing_value = "true", env = "HTTP_TLS_ENABLED")]
    pub http_tls_enabled: bool,

    #[arg(long, env = "HTTP_TLS_CERT")]
    pub http_tls_cert: Option<PathBuf>,

    #[arg(long, env = "HTTP_TLS_KEY")]
    pub http_tls_key: Option<PathBuf>,

    #[arg(long, env = "HTTP_TLS_CLIENT_CA")]
    pub http_tls_client_ca: Option<PathBuf>,

    /// Graylog GELF endpoint
    #[arg(long, default_value = "127.0.0.1:12201", env = "GELF_ADDRESS")]
    pub gelf_address: String,

    #[arg(long, default_value = "udp", env = "GELF_PROTO")]
    pub gelf_proto: GelfProtocol,

    /// Retries per message, -1 retries until shutdown
    #[arg(long, default_value_t = 3, allow_negative_numbers = true, env = "GELF_MAX_RETRIES")]
    pub gelf_max_retries: i64,

    /// Gzip UDP payloads
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true,
        default_missing_value = "true", env = "GELF_COMPRESSION")]
    pub gelf_compression: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputConfig {
    Vector(VectorInputOptions),
    VectorV2(VectorV2InputOptions),
    Http(HttpInputOptions),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub input: InputConfig,
    pub channel_capacity: usize,
    pub output: GelfOutputOptions,
}

impl Args {
    /// Validates the arguments and builds the options of the selected input and the output.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        if self.channel_buffer_size == 0 {
            return Err(ConfigError::ChannelCapacity);
        }
        if self.gelf_max_retries < -1 {
            return Err(ConfigError::MaxRetries(self.gelf_max_retries));
        }

        let input = match self.input_type {
            InputType::Vector => {
                if self.vector_max_message_size == 0 {
                    return Err(ConfigError::MaxMessageSize);
                }
                let tls = tls_options(
                    "vector",
                    self.vector_tls_enabled,
                    self.vector_tls_cert,
                    self.vector_tls_key,
                    self.vector_tls_client_ca,
                )?;
                InputConfig::Vector(VectorInputOptions {
                    address: self.vector_address,
                    fields: FieldMapping {
                        message_key: self.vector_message_field,
                        host_key: self.vector_host_field,
                        timestamp_key: self.vector_timestamp_field,
                    },
                    max_message_size: self.vector_max_message_size,
                    tls,
                })
            }
            InputType::VectorV2 => InputConfig::VectorV2(VectorV2InputOptions {
                address: self.vector_address,
                fields: FieldMapping {
                    message_key: self.vector_message_field,
                    host_key: self.vector_host_field,
                    timestamp_key: self.vector_timestamp_field,
                },
                backpressure: self.vector_backpressure,
            }),
            InputType::Http => {
                let tls = tls_options(
                    "http",
                    self.http_tls_enabled,
                    self.http_tls_cert,
                    self.http_tls_key,
                    self.http_tls_client_ca,
                )?;
                InputConfig::Http(HttpInputOptions {
                    address: self.http_address,
                    fields: FieldMapping {
                        message_key: self.http_message_field,
                        host_key: self.http_host_field,
                        timestamp_key: self.http_timestamp_field,
                    },
                    basic_user: self.http_basic_user,
                    basic_password: self.http_basic_password,
                    backpressure: self.http_backpressure,
                    max_body_size: self.http_max_body_size,
                    tls,
                })
            }
        };

        Ok(Config {
            input,
            channel_capacity: self.channel_buffer_size,
            output: GelfOutputOptions {
                protocol: self.gelf_proto,
                address: self.gelf_address,
                compression: self.gelf_compression,
                max_retries: self.gelf_max_retries,
                graceful_timeout: Duration::from_secs(self.graceful_timeout),
                ..Default::default()
            },
        })
    }
}

fn tls_options(
    listener: &'static str,
    enabled: bool,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    client_ca_path: Option<PathBuf>,
) -> Result<TlsOptions, ConfigError> {
    if enabled {
        if cert_path.is_none() {
            return Err(ConfigError::TlsMaterial {
                listener,
                missing: "certificate",
            });
        }
        if key_path.is_none() {
            return Err(ConfigError::TlsMaterial {
                listener,
                missing: "private key",
            });
        }
    }
    Ok(TlsOptions {
        enabled,
        cert_path,
        key_path,
        client_ca_path,
    })
}
