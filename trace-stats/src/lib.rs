// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Aggregation of trace spans into fixed-interval, time-bucketed stats.
//!
//! Incoming traces are pre-processed into weighted spans (top-level marking,
//! measured flags, sampling weight) and per-subtree sublayer values, then fed
//! to the [`concentrator::Concentrator`] which maintains a ring of open time
//! buckets and emits them once they are old enough to no longer accept data.

pub mod concentrator;
pub mod sublayer;
pub mod tagset;
pub mod weight;

pub use concentrator::{Concentrator, Input};
pub use weight::MalformedTraceError;
