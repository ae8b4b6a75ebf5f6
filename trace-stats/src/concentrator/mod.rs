// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! This module implements the Concentrator used to aggregate traces into
//! time-bucketed stats.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{self, SystemTime};

use anyhow::{anyhow, Result};
use log::{debug, error};
use tokio::sync::mpsc;

use crate::sublayer::{self, SublayerValue};
use crate::weight::{self, MalformedTraceError, WeightedTrace};
use trace_utils::trace_utils::{compute_top_level, get_root};
use trace_utils::Trace;

pub use aggregation::{Bucket, Count, DURATION, ERRORS, HITS};

mod aggregation;

/// Return the nanoseconds between t and the Unix epoch.
/// If t is before the Unix epoch, return 0.
fn system_time_to_unix_ns(t: SystemTime) -> i64 {
    t.duration_since(time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as i64)
}

/// Align a timestamp on the start of a bucket. Both operands are
/// non-negative nanoseconds.
#[inline]
fn align_ts(ts: i64, bucket_size: i64) -> i64 {
    ts - (ts % bucket_size)
}

/// A pre-processed trace ready for stats computation.
#[derive(Clone, Debug, Default)]
pub struct Input {
    /// Environment tagged on every count of the trace.
    pub env: String,
    /// The weighted spans of the trace, in source order.
    pub trace: WeightedTrace,
    /// Sublayer values keyed by the `span_id` of their top-level subtree
    /// root. Only entries for top-level spans are honored.
    pub sublayers: HashMap<u64, Vec<SublayerValue>>,
}

impl Input {
    /// Run the full pre-pass over a raw trace: top-level marking, root
    /// discovery, sublayer computation and weighting.
    pub fn from_trace(mut trace: Trace, env: impl Into<String>) -> Result<Input, MalformedTraceError> {
        compute_top_level(&mut trace);
        let root = get_root(&trace).ok_or(MalformedTraceError::EmptyTrace)?;
        let mut sublayers = HashMap::new();
        for subtrace in sublayer::extract_top_level_subtraces(&trace, root) {
            sublayers.insert(
                subtrace.root.span_id,
                sublayer::compute_sublayers(&subtrace.spans),
            );
        }
        let weighted = weight::build_weighted_trace(&trace, root)?;
        Ok(Input {
            env: env.into(),
            trace: weighted,
            sublayers,
        })
    }
}

/// State guarded by the concentrator mutex: the open buckets and the floor
/// below which spans are merged into the oldest bucket.
#[derive(Debug, Default)]
struct ConcentratorState {
    buckets: HashMap<i64, Bucket>,
    /// Timestamp of the oldest time bucket for which we allow data.
    /// Any ingested span older than it gets counted in this bucket.
    oldest_timestamp: i64,
}

/// The concentrator aggregates the eligible spans of incoming traces into
/// fixed-width time buckets keyed by the spans' aligned end time.
///
/// # Eligibility
/// A span contributes counts only if it is top-level or measured. Sublayer
/// counts are recorded for top-level spans with sublayer values attached to
/// the input.
///
/// # Flushing
/// [`Concentrator::flush_at`] emits and removes every bucket old enough that
/// no in-order span can still land in it, keeping the `buffer_len` most
/// recent buckets open to tolerate late arrivals. Spans older than the
/// oldest open bucket are merged into it rather than dropped, so totals are
/// preserved across the agent's startup.
#[derive(Debug)]
pub struct Concentrator {
    /// Size of the time buckets used for aggregation, in nanoseconds.
    bucket_size: i64,
    /// Number of buckets kept open past their natural end. Always 2: the
    /// current bucket and the previous one.
    buffer_len: usize,
    /// Extra tag names whose span-meta values join every aggregation key.
    aggregation_tags: Vec<String>,
    state: Mutex<ConcentratorState>,
    /// Sink for emitted bucket lists.
    out: mpsc::Sender<Vec<Bucket>>,
}

impl Concentrator {
    /// Return a new concentrator aggregating on `bucket_size` wide buckets
    /// and publishing flushed buckets to `out`. Buckets older than the
    /// construction time are never created.
    pub fn new(
        aggregation_tags: Vec<String>,
        bucket_size: i64,
        out: mpsc::Sender<Vec<Bucket>>,
    ) -> Result<Concentrator> {
        if bucket_size <= 0 {
            return Err(anyhow!("bucket size must be positive, got {bucket_size}"));
        }
        let now = system_time_to_unix_ns(SystemTime::now());
        Ok(Concentrator {
            bucket_size,
            buffer_len: 2,
            aggregation_tags,
            state: Mutex::new(ConcentratorState {
                buckets: HashMap::new(),
                oldest_timestamp: align_ts(now, bucket_size),
            }),
            out,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ConcentratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Aggregate the eligible spans of `input` into their time buckets.
    ///
    /// The whole trace is added under one lock acquisition so that bucket
    /// assignment is atomic with respect to [`Concentrator::flush_at`].
    pub fn add(&self, input: &Input) -> Result<()> {
        if input.trace.is_empty() {
            return Err(anyhow!("malformed input: empty trace"));
        }
        if input.env.is_empty() {
            return Err(anyhow!("malformed input: missing env"));
        }
        let mut state = self.lock_state();
        for span in &input.trace {
            if !(span.top_level || span.measured) {
                continue;
            }
            let mut bucket_timestamp = align_ts(span.span.end(), self.bucket_size);
            // Late spans are counted in the oldest allowed bucket instead of
            // re-opening an already flushed window.
            if bucket_timestamp < state.oldest_timestamp {
                bucket_timestamp = state.oldest_timestamp;
            }
            let sublayers = if span.top_level {
                input.sublayers.get(&span.span.span_id).map(Vec::as_slice)
            } else {
                None
            };
            state
                .buckets
                .entry(bucket_timestamp)
                .or_insert_with(|| Bucket::new(bucket_timestamp, self.bucket_size))
                .handle_span(span, &input.env, &self.aggregation_tags, sublayers);
        }
        Ok(())
    }

    /// Emit and remove every bucket whose window closed `buffer_len` buckets
    /// before `now`. With `force`, emit everything regardless of age
    /// (typically on shutdown).
    ///
    /// Also advances the oldest-allowed timestamp; it never moves backwards,
    /// so a flushed bucket's window cannot be re-opened.
    pub fn flush_at(&self, now: i64, force: bool) -> Vec<Bucket> {
        let aligned_now = align_ts(now, self.bucket_size);
        let threshold = aligned_now - self.buffer_len as i64 * self.bucket_size;
        let mut state = self.lock_state();

        let ready: Vec<i64> = state
            .buckets
            .keys()
            .filter(|&&ts| force || ts <= threshold)
            .copied()
            .collect();
        let mut flushed = Vec::with_capacity(ready.len());
        for ts in ready {
            if let Some(bucket) = state.buckets.remove(&ts) {
                flushed.push(bucket);
            }
        }

        let floor = if force {
            aligned_now
        } else {
            aligned_now - (self.buffer_len as i64 - 1) * self.bucket_size
        };
        state.oldest_timestamp = state.oldest_timestamp.max(floor);

        flushed
    }

    /// Flush at the current time and publish the emitted buckets on the
    /// output channel. Publishing happens outside the critical section and
    /// blocks the flush driver if the channel is full.
    pub fn flush(&self) {
        let buckets = self.flush_at(system_time_to_unix_ns(SystemTime::now()), false);
        if buckets.is_empty() {
            return;
        }
        debug!("flushing {} stats bucket(s)", buckets.len());
        if let Err(err) = self.out.blocking_send(buckets) {
            error!("failed to publish stats buckets: {err}");
        }
    }
}
