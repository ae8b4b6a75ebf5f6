// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of a trace into weighted spans carrying the top-level and
//! measured flags plus the sampling weight derived from the trace root.

use thiserror::Error;
use trace_utils::trace_utils::{has_top_level, is_measured};
use trace_utils::Span;

/// Root span metric holding the client-side sampling rate.
const SAMPLE_RATE_METRIC_KEY: &str = "_sample_rate";

/// Errors raised while pre-processing a trace for stats computation.
#[derive(Debug, Error, PartialEq)]
pub enum MalformedTraceError {
    #[error("malformed trace: trace is empty")]
    EmptyTrace,
    #[error("malformed trace: root span {0} is not part of the trace")]
    MissingRoot(u64),
}

/// A span enriched with the attributes driving stats computation.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedSpan {
    pub span: Span,
    /// De-biasing factor for client-side sampled traces, `1/samplingRate`.
    pub weight: f64,
    /// True if the span is the entry point of its service within the trace.
    pub top_level: bool,
    /// True if the span is explicitly flagged for metric collection.
    pub measured: bool,
}

/// A trace of weighted spans, in the order of the source trace.
pub type WeightedTrace = Vec<WeightedSpan>;

/// Return the weight of a trace given its root span: `1/rate` for a sampling
/// rate in `(0, 1]`, `1.0` when the rate is absent or invalid.
fn weight(root: &Span) -> f64 {
    match root.metrics.get(SAMPLE_RATE_METRIC_KEY) {
        Some(&rate) if rate > 0.0 && rate <= 1.0 => 1.0 / rate,
        _ => 1.0,
    }
}

/// Build the weighted trace for `trace`, deriving the weight from `root`.
///
/// Top-level flags must have been computed beforehand (see
/// `trace_utils::trace_utils::compute_top_level`); the builder trusts the
/// markers already attached to the spans.
pub fn build_weighted_trace(
    trace: &[Span],
    root: &Span,
) -> Result<WeightedTrace, MalformedTraceError> {
    if trace.is_empty() {
        return Err(MalformedTraceError::EmptyTrace);
    }
    if !trace.iter().any(|s| s.span_id == root.span_id) {
        return Err(MalformedTraceError::MissingRoot(root.span_id));
    }
    let weight = weight(root);
    Ok(trace
        .iter()
        .map(|span| WeightedSpan {
            weight,
            top_level: has_top_level(span),
            measured: is_measured(span),
            span: span.clone(),
        })
        .collect())
}
