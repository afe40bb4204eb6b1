//! Trigger-bounded event windowing across decoded batches.
//!
//! The windower keeps a running pixel buffer and trigger buffer. Each batch
//! appends to both; once enough triggers are held, pixels arriving before
//! the final (open) trigger are bucketed against the earlier triggers and
//! emitted as time-of-flight events. The open trigger and any later pixels
//! are carried into the next batch.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use crate::error::{Error, Result};
use crate::timing::COARSE_TICK_S;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tpxflow_core::{DecodedBatch, Event, EventBatch, PixelBatch};

/// Windowing parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Accepted time-of-flight range in seconds, inclusive on both ends.
    pub event_window: (f64, f64),
    /// Triggers required in the buffer before anything is emitted.
    pub min_triggers: usize,
    /// Wall-clock start of the acquisition in nanoseconds.
    pub start_time_ns: u64,
    /// Upper bound on pixels carried between batches; the earliest-arrived
    /// are dropped beyond it.
    pub max_pending_pixels: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            event_window: (0.0, 1e4),
            min_triggers: 4,
            start_time_ns: 0,
            max_pending_pixels: 1 << 22,
        }
    }
}

impl WindowConfig {
    /// Sets the accepted time-of-flight range.
    #[must_use]
    pub fn with_event_window(mut self, min: f64, max: f64) -> Self {
        self.event_window = (min, max);
        self
    }

    /// Sets the trigger count required before emitting.
    #[must_use]
    pub fn with_min_triggers(mut self, min_triggers: usize) -> Self {
        self.min_triggers = min_triggers.max(2);
        self
    }

    /// Sets the wall-clock start time used for trigger stamps.
    #[must_use]
    pub fn with_start_time_ns(mut self, start_time_ns: u64) -> Self {
        self.start_time_ns = start_time_ns;
        self
    }

    /// Sets the bound on pixels carried between batches.
    #[must_use]
    pub fn with_max_pending_pixels(mut self, max_pending_pixels: usize) -> Self {
        self.max_pending_pixels = max_pending_pixels;
        self
    }

    /// Checks the window bounds, trigger minimum and pending bound.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an inverted window, a minimum below 2 or
    /// a zero pending bound.
    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.event_window;
        if min.is_nan() || max.is_nan() || min > max {
            return Err(Error::Config(format!(
                "event window [{min}, {max}] is empty"
            )));
        }
        if self.min_triggers < 2 {
            return Err(Error::Config(format!(
                "min_triggers must be at least 2, got {}",
                self.min_triggers
            )));
        }
        if self.max_pending_pixels == 0 {
            return Err(Error::Config("max_pending_pixels must be non-zero".into()));
        }
        Ok(())
    }

    #[inline]
    fn accepts(&self, tof: f64) -> bool {
        tof >= self.event_window.0 && tof <= self.event_window.1
    }

    fn wall_clock_ns(&self, trigger_s: f64) -> u64 {
        self.start_time_ns + (trigger_s * 1e9).round() as u64
    }
}

/// Running counters kept by an [`EventWindower`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    /// Batches pushed.
    pub batches: u64,
    /// Events emitted.
    pub events: u64,
    /// Ready pixels dropped for falling outside the event window.
    pub out_of_window: u64,
    /// Pixels dropped for arriving before the first held trigger.
    pub before_first_trigger: u64,
    /// Pixels dropped because the pending buffer reached its bound.
    pub overflowed: u64,
    /// Ready pixels lost to trigger ordering faults.
    pub faulted_pixels: u64,
    /// Pixels currently carried to the next batch.
    pub retained: u64,
    /// Bucket assignments abandoned because the triggers were out of order.
    pub ordering_faults: u64,
}

/// Buckets decoded pixels into trigger intervals.
///
/// One instance owns the cross-batch buffers of one stream; it must not be
/// shared between workers.
#[derive(Debug, Default)]
pub struct EventWindower {
    config: WindowConfig,
    pixels: PixelBatch,
    triggers: Vec<f64>,
    next_trigger_id: u64,
    stats: WindowStats,
}

impl EventWindower {
    /// Creates a windower with empty buffers.
    #[must_use]
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Replaces the wall-clock start time, e.g. once a replay header is read.
    pub fn set_start_time_ns(&mut self, start_time_ns: u64) {
        self.config.start_time_ns = start_time_ns;
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> WindowStats {
        self.stats
    }

    /// Trigger id the next bucket will receive.
    #[must_use]
    pub fn next_trigger_id(&self) -> u64 {
        self.next_trigger_id
    }

    /// Pixels waiting for a later trigger.
    #[must_use]
    pub fn pending_pixels(&self) -> &PixelBatch {
        &self.pixels
    }

    /// Triggers held for the next batch.
    #[must_use]
    pub fn pending_triggers(&self) -> &[f64] {
        &self.triggers
    }

    /// Appends a decoded batch and emits every event that is complete.
    ///
    /// Returns `None` when nothing qualifies yet.
    pub fn push(&mut self, batch: &DecodedBatch) -> Option<EventBatch> {
        self.stats.batches += 1;
        self.pixels.append(&batch.pixels);
        self.triggers.extend_from_slice(&batch.triggers);
        trim_triggers(&mut self.triggers);
        if let Some(&first) = self.triggers.first() {
            let dropped = self.pixels.discard_before(first);
            self.stats.before_first_trigger += dropped as u64;
        }

        let events = self.emit(self.config.min_triggers);
        self.enforce_pending_bound();
        self.stats.retained = self.pixels.len() as u64;
        events
    }

    fn enforce_pending_bound(&mut self) {
        let excess = self
            .pixels
            .len()
            .saturating_sub(self.config.max_pending_pixels);
        if excess == 0 {
            return;
        }
        let dropped = self.pixels.discard_oldest(excess);
        self.stats.overflowed += dropped as u64;
        warn!(
            "pending pixel buffer full ({} held, {} triggers), dropped {dropped} oldest",
            self.pixels.len(),
            self.triggers.len()
        );
    }

    /// Flushes the open interval at shutdown.
    ///
    /// A synthetic trigger is placed just after the latest buffered pixel (or
    /// held trigger) so the final interval goes through the regular bucketing
    /// path. Buffers are empty afterwards.
    pub fn drain(&mut self) -> Option<EventBatch> {
        let last_trigger = self.triggers.last().copied();
        let events = match (self.pixels.max_toa(), last_trigger) {
            (Some(latest), Some(last)) => {
                self.triggers.push(latest.max(last) + COARSE_TICK_S);
                trim_triggers(&mut self.triggers);
                self.emit(2)
            }
            _ => None,
        };

        let leftover = self.pixels.len() as u64;
        if leftover > 0 {
            debug!("dropping {leftover} pixels with no trigger at drain");
            self.stats.before_first_trigger += leftover;
        }
        self.pixels.clear();
        self.triggers.clear();
        self.stats.retained = 0;
        events
    }

    fn emit(&mut self, min_triggers: usize) -> Option<EventBatch> {
        if self.triggers.len() < min_triggers.max(2) {
            return None;
        }

        let open = self.triggers.len() - 1;
        let closing = self.triggers[open];
        let first = self.triggers[0];

        let dropped = self.pixels.discard_before(first);
        self.stats.before_first_trigger += dropped as u64;
        // Pixels left behind are at or after the open trigger, which stays held.
        let ready = self.pixels.split_before(closing);

        let result = assign(
            &self.config,
            self.next_trigger_id,
            &ready,
            &self.triggers[..open],
        );
        self.triggers.drain(..open);

        match result {
            Ok((events, out_of_window)) => {
                self.next_trigger_id += open as u64;
                self.stats.out_of_window += out_of_window;
                self.stats.events += events.len() as u64;
                debug!(
                    "windowed {} ready pixels into {} events over {open} triggers",
                    ready.len(),
                    events.len()
                );
                if events.is_empty() {
                    None
                } else {
                    Some(events)
                }
            }
            Err(err) => {
                error!("{err}; flushed trigger buffer, skipping batch");
                self.stats.ordering_faults += 1;
                self.stats.faulted_pixels += ready.len() as u64;
                None
            }
        }
    }
}

/// Assigns ready pixels to the greatest start at or before their arrival.
///
/// Returns the events and the number of pixels outside the event window.
fn assign(
    config: &WindowConfig,
    base: u64,
    ready: &PixelBatch,
    starts: &[f64],
) -> Result<(EventBatch, u64)> {
    if let Some(pos) = starts.windows(2).position(|w| w[1] < w[0]) {
        return Err(Error::TriggerOrdering(format!(
            "trigger {} at {:.9} s precedes trigger {} at {:.9} s",
            pos + 1,
            starts[pos + 1],
            pos,
            starts[pos]
        )));
    }

    let mut events = EventBatch::with_capacity(ready.len());
    let mut used = vec![false; starts.len()];
    let mut out_of_window = 0;

    for i in 0..ready.len() {
        let toa = ready.toa[i];
        let bucket = starts.partition_point(|&t| t <= toa);
        let Some(bucket) = bucket.checked_sub(1) else {
            return Err(Error::TriggerOrdering(format!(
                "pixel at {toa:.9} s precedes every trigger start"
            )));
        };

        let tof = toa - starts[bucket];
        if !config.accepts(tof) {
            out_of_window += 1;
            continue;
        }
        used[bucket] = true;
        events.push(Event::new(
            base + bucket as u64,
            ready.x[i],
            ready.y[i],
            tof,
            ready.tot[i],
        ));
    }

    for (bucket, _) in used.iter().enumerate().filter(|(_, &u)| u) {
        events
            .timestamps
            .push(base + bucket as u64, config.wall_clock_ns(starts[bucket]));
    }
    Ok((events, out_of_window))
}

/// Drops leading triggers so the buffer starts at its minimum.
///
/// Only the prefix before the first occurrence of the minimum is removed;
/// nothing is reordered.
pub fn trim_triggers(triggers: &mut Vec<f64>) {
    let Some(min_idx) = triggers
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
    else {
        return;
    };
    if min_idx > 0 {
        debug!("trimming {min_idx} out-of-order leading triggers");
        triggers.drain(..min_idx);
    }
}
