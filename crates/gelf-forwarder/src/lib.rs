// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log forwarding pipeline: Vector (raw framed and gRPC) and HTTP/JSON inputs are normalized into
//! GELF messages and shipped to a Graylog endpoint through a bounded delivery channel.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod channel;
pub mod errors;
pub mod flatten;
pub mod input;
pub mod lifecycle;
pub mod message;
pub mod output;
pub mod registry;
pub mod tls;
pub mod value;
