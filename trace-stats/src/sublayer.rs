// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sublayer computation: for each top-level subtree of a trace, the duration
//! attributable to each descendant service and span type, plus the number of
//! spans in the subtree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tagset::Tag;
use trace_utils::trace_utils::{children_map, has_top_level};
use trace_utils::Span;

/// Measure name for per-service sublayer durations.
pub const SUBLAYER_DURATION_BY_SERVICE: &str = "_sublayers.duration.by_service";
/// Measure name for per-type sublayer durations.
pub const SUBLAYER_DURATION_BY_TYPE: &str = "_sublayers.duration.by_type";
/// Measure name for the subtree span count.
pub const SUBLAYER_SPAN_COUNT: &str = "_sublayers.span_count";

const SUBLAYER_SERVICE_TAG: &str = "sublayer_service";
const SUBLAYER_TYPE_TAG: &str = "sublayer_type";

/// One sublayer metric value for a top-level subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SublayerValue {
    pub metric: String,
    pub tag: Tag,
    pub value: f64,
}

/// A top-level span together with all the spans of its subtree, itself
/// included.
#[derive(Debug)]
pub struct Subtrace<'a> {
    pub root: &'a Span,
    pub spans: Vec<&'a Span>,
}

/// Extract the subtraces rooted in a top-level span, walking down from the
/// trace root. Every span belongs to the subtrace of each of its top-level
/// ancestors, itself included when it is top-level.
///
/// Top-level spans without children are skipped: their sublayer values would
/// reduce to their own duration, which the plain counts already carry.
pub fn extract_top_level_subtraces<'a>(trace: &'a [Span], root: &'a Span) -> Vec<Subtrace<'a>> {
    let Some(root_idx) = trace.iter().position(|s| std::ptr::eq(s, root)) else {
        return Vec::new();
    };
    let children = children_map(trace);
    let mut visited = vec![false; trace.len()];
    let mut subtrace_spans: HashMap<usize, Vec<&'a Span>> = HashMap::new();
    let mut stack: Vec<(usize, Vec<usize>)> = vec![(root_idx, Vec::new())];

    while let Some((idx, mut ancestors)) = stack.pop() {
        if visited[idx] {
            continue;
        }
        visited[idx] = true;
        let span = &trace[idx];
        let span_children = children.get(&span.span_id);
        if has_top_level(span) && span_children.is_some_and(|c| !c.is_empty()) {
            ancestors.push(idx);
        }
        for &ancestor in &ancestors {
            subtrace_spans.entry(ancestor).or_default().push(span);
        }
        if let Some(span_children) = span_children {
            for &child in span_children {
                if !visited[child] {
                    stack.push((child, ancestors.clone()));
                }
            }
        }
    }

    subtrace_spans
        .into_iter()
        .map(|(idx, spans)| Subtrace {
            root: &trace[idx],
            spans,
        })
        .collect()
}

/// Compute the sublayer values of a subtree: raw-nanosecond durations summed
/// per service and per non-empty span type, plus the span count.
///
/// Values are sorted by metric then tag so the output is deterministic; the
/// span count comes last with the empty tag.
pub fn compute_sublayers(spans: &[&Span]) -> Vec<SublayerValue> {
    let mut duration_by_service: HashMap<&str, f64> = HashMap::new();
    let mut duration_by_type: HashMap<&str, f64> = HashMap::new();
    for span in spans {
        *duration_by_service
            .entry(span.service.as_str())
            .or_default() += span.duration as f64;
        if !span.r#type.is_empty() {
            *duration_by_type.entry(span.r#type.as_str()).or_default() += span.duration as f64;
        }
    }

    let mut values: Vec<SublayerValue> = duration_by_service
        .into_iter()
        .map(|(service, value)| SublayerValue {
            metric: SUBLAYER_DURATION_BY_SERVICE.to_string(),
            tag: Tag::new(SUBLAYER_SERVICE_TAG, service),
            value,
        })
        .chain(
            duration_by_type
                .into_iter()
                .map(|(span_type, value)| SublayerValue {
                    metric: SUBLAYER_DURATION_BY_TYPE.to_string(),
                    tag: Tag::new(SUBLAYER_TYPE_TAG, span_type),
                    value,
                }),
        )
        .collect();
    values.sort_by(|a, b| (&a.metric, &a.tag).cmp(&(&b.metric, &b.tag)));
    values.push(SublayerValue {
        metric: SUBLAYER_SPAN_COUNT.to_string(),
        tag: Tag::default(),
        value: spans.len() as f64,
    });
    values
}
