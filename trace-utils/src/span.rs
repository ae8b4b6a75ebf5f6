// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of work in a distributed trace.
///
/// `start` and `duration` are nanoseconds since the Unix epoch and a
/// nanosecond span length respectively. A non-zero `error` marks the span as
/// erroneous. Free-form string attributes live in `meta`, numeric attributes
/// in `metrics`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub service: String,
    pub name: String,
    pub resource: String,
    pub r#type: String,
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
    pub start: i64,
    pub duration: i64,
    pub error: i32,
    pub meta: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
}

impl Span {
    /// End time of the span in nanoseconds since the Unix epoch.
    pub fn end(&self) -> i64 {
        self.start + self.duration
    }
}

/// An ordered sequence of spans forming a single trace tree.
pub type Trace = Vec<Span>;
