// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Aggregation of weighted spans into per-key counts within a time bucket.
//! The aggregation key is the canonical `"<name>|<measure>|<tags>"`
//! fingerprint; one [`Count`] accumulates all contributions sharing a key.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::sublayer::SublayerValue;
use crate::tagset::{Tag, TagSet};
use crate::weight::WeightedSpan;

/// Measure name for weighted span counts.
pub const HITS: &str = "hits";
/// Measure name for weighted erroneous span counts.
pub const ERRORS: &str = "errors";
/// Measure name for weighted duration sums.
pub const DURATION: &str = "duration";

/// Assemble the canonical aggregation key for one measure.
fn grain_key(name: &str, measure: &str, aggr: &str) -> String {
    format!("{name}|{measure}|{aggr}")
}

/// One aggregated value within a bucket.
///
/// `value` is a float so that weighted duration sums may exceed the 63-bit
/// integer range (long traces scaled by large weights). `top_level` is the
/// weighted number of top-level spans that contributed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Count {
    pub key: String,
    /// Operation name of the contributing spans.
    pub name: String,
    pub measure: String,
    pub tag_set: TagSet,
    pub top_level: f64,
    pub value: f64,
}

impl Count {
    fn new(key: String, name: &str, measure: &str, tag_set: TagSet) -> Count {
        Count {
            key,
            name: name.to_string(),
            measure: measure.to_string(),
            tag_set,
            top_level: 0.0,
            value: 0.0,
        }
    }
}

/// One fixed-width time window's aggregated counts.
///
/// `start` is aligned on `duration`; `counts` maps the canonical aggregation
/// key to its accumulated count. Once emitted by the concentrator a bucket is
/// never mutated again.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: i64,
    pub duration: i64,
    pub counts: HashMap<String, Count>,
}

impl Bucket {
    pub(super) fn new(start: i64, duration: i64) -> Bucket {
        Bucket {
            start,
            duration,
            counts: HashMap::new(),
        }
    }

    /// Aggregate one eligible weighted span into this bucket.
    ///
    /// Hits and errors grow by the span weight (errors only for erroneous
    /// spans, though the errors count is materialized at zero either way),
    /// duration by `duration * weight`. Sublayer values are recorded for
    /// top-level spans when provided.
    pub(super) fn handle_span(
        &mut self,
        span: &WeightedSpan,
        env: &str,
        aggregation_tags: &[String],
        sublayers: Option<&[SublayerValue]>,
    ) {
        let tags = base_tag_set(span, env, aggregation_tags);
        let aggr = tags.key();

        self.add(span, HITS, &tags, &aggr, span.weight);
        let errors = if span.span.error != 0 { span.weight } else { 0.0 };
        self.add(span, ERRORS, &tags, &aggr, errors);
        self.add(
            span,
            DURATION,
            &tags,
            &aggr,
            span.span.duration as f64 * span.weight,
        );

        if span.top_level {
            if let Some(values) = sublayers {
                for value in values {
                    self.add_sublayer(span, &tags, &aggr, value);
                }
            }
        }
    }

    fn add(&mut self, span: &WeightedSpan, measure: &str, tags: &TagSet, aggr: &str, delta: f64) {
        let key = grain_key(&span.span.name, measure, aggr);
        self.accumulate(key, span, measure, tags.clone(), delta);
    }

    fn add_sublayer(
        &mut self,
        span: &WeightedSpan,
        tags: &TagSet,
        aggr: &str,
        value: &SublayerValue,
    ) {
        // The sublayer tag is appended after the base tags; for span_count it
        // is the empty tag, yielding the key's trailing ",:".
        let mut tag_set = tags.clone();
        tag_set.push(value.tag.clone());
        let aggr = format!("{aggr},{}", value.tag);
        let key = grain_key(&span.span.name, &value.metric, &aggr);
        self.accumulate(key, span, &value.metric, tag_set, value.value * span.weight);
    }

    fn accumulate(
        &mut self,
        key: String,
        span: &WeightedSpan,
        measure: &str,
        tag_set: TagSet,
        delta: f64,
    ) {
        let count = self
            .counts
            .entry(key)
            .or_insert_with_key(|key| Count::new(key.clone(), &span.span.name, measure, tag_set));
        count.value += delta;
        if span.top_level {
            count.top_level += span.weight;
        }
    }
}

/// Build the base tag set of a span: `env`, `resource` and `service`, plus
/// any configured aggregation tag present in the span meta.
fn base_tag_set(span: &WeightedSpan, env: &str, aggregation_tags: &[String]) -> TagSet {
    let mut tags = vec![
        Tag::new("env", env),
        Tag::new("resource", &span.span.resource),
        Tag::new("service", &span.span.service),
    ];
    for name in aggregation_tags {
        if let Some(value) = span.span.meta.get(name) {
            tags.push(Tag::new(name, value));
        }
    }
    TagSet::new(tags)
}
