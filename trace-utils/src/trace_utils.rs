// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace-shape analysis helpers: top-level marking, measured detection, root
//! discovery and parent/child indexing.

use crate::span::Span;
use std::collections::HashMap;

/// Span metric set on spans that are the entry point of their service.
const TOP_LEVEL_KEY: &str = "_top_level";
/// Span meta key marking a span for metric collection even when not top-level.
const MEASURED_KEY: &str = "_dd.measured";

fn set_top_level_span(span: &mut Span, is_top_level: bool) {
    if is_top_level {
        span.metrics.insert(TOP_LEVEL_KEY.to_string(), 1.0);
    } else {
        span.metrics.remove(TOP_LEVEL_KEY);
    }
}

/// Updates all the spans' top-level attribute.
///
/// A span is considered top-level if:
///   - it's a root span
///   - OR its parent is unknown (other part of the code, distributed trace)
///   - OR its parent belongs to another service (in that case it's a "local
///     root" being the highest ancestor of other spans belonging to this
///     service and attached to it).
pub fn compute_top_level(trace: &mut [Span]) {
    let mut span_id_to_service: HashMap<u64, String> = HashMap::new();
    for span in trace.iter() {
        span_id_to_service.insert(span.span_id, span.service.clone());
    }
    for span in trace.iter_mut() {
        if span.parent_id == 0 {
            set_top_level_span(span, true);
            continue;
        }
        match span_id_to_service.get(&span.parent_id) {
            Some(parent_service) => {
                if !parent_service.eq(&span.service) {
                    // parent is not in the same service
                    set_top_level_span(span, true)
                }
            }
            None => {
                // span has no parent in the trace
                set_top_level_span(span, true)
            }
        }
    }
}

/// Return true if the span has a top level key set.
pub fn has_top_level(span: &Span) -> bool {
    span.metrics.get(TOP_LEVEL_KEY).is_some_and(|v| *v == 1.0)
}

/// Returns true if a span should be measured (i.e., it should get trace
/// metrics calculated even when it is not top-level).
pub fn is_measured(span: &Span) -> bool {
    span.meta.get(MEASURED_KEY).is_some_and(|v| v == "1")
}

/// Return the root of the trace: the span with `parent_id == 0`, or failing
/// that the span whose parent is not part of the trace. Returns `None` for an
/// empty trace.
///
/// Clients commonly report the root last, so the scan runs from the end.
pub fn get_root(trace: &[Span]) -> Option<&Span> {
    let mut parent_id_to_child: HashMap<u64, &Span> = HashMap::new();
    for span in trace.iter().rev() {
        if span.parent_id == 0 {
            return Some(span);
        }
        parent_id_to_child.insert(span.parent_id, span);
    }
    for span in trace.iter() {
        parent_id_to_child.remove(&span.span_id);
    }
    // A well-formed trace leaves exactly one orphan here.
    parent_id_to_child
        .into_values()
        .next()
        .or_else(|| trace.last())
}

/// Index the trace by parent: parent `span_id` -> indices of its children.
pub fn children_map(trace: &[Span]) -> HashMap<u64, Vec<usize>> {
    let mut children: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, span) in trace.iter().enumerate() {
        if span.parent_id == 0 {
            continue;
        }
        children.entry(span.parent_id).or_default().push(i);
    }
    children
}
