// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod backoff;
pub mod gelf;
pub mod writer;

pub use gelf::{DeliveryStats, GelfOutput, GelfOutputOptions};
pub use writer::{GelfProtocol, GelfWriter};
