//! Authoritative time estimation.
//!
//! Keeps `corrected = wall + offset` tracking the server clock. New samples are
//! folded in one of three ways depending on how far they disagree with the
//! current offset:
//! - **Small**: slewed over a long window, invisible on the display
//! - **Medium**: slewed over a short window
//! - **Large**: applied at once (resume from suspend, server clock stepped)
//!
//! Slew pacing uses the monotonic tick, never the wall clock, so a local
//! time adjustment cannot speed up or stall an in-flight correction.

use crate::config::SyncConfig;
use crate::traits::ClockSource;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Latest authoritative time taken seriously: 9999-12-31T23:59:59.999Z.
/// Anything beyond is a broken server, not a clock offset.
pub const MAX_AUTHORITATIVE_MS: i64 = 253_402_300_799_999;

/// One authoritative timestamp, tagged with the local tick it corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSample {
    pub authoritative_time_ms: i64,
    pub received_at_local_tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockOffset {
    /// Best estimate of (authoritative - local wall) in ms
    pub value_ms: f64,
    /// Part of the last correction not yet folded into `value_ms`
    pub pending_correction_ms: f64,
    pub correction_deadline_tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlewBand {
    Small,
    Medium,
    Large,
}

pub struct TimeSync<C: ClockSource> {
    clock: C,
    config: SyncConfig,
    offset: ClockOffset,

    // Tick at which `offset` was last brought up to date
    last_tick: u64,

    last_band: Option<SlewBand>,
    last_sample_tick: Option<u64>,
    samples_accepted: u64,
    samples_rejected: u64,
}

impl<C: ClockSource> TimeSync<C> {
    pub fn new(clock: C, config: SyncConfig) -> Self {
        let last_tick = clock.now_tick();
        TimeSync {
            clock,
            config,
            offset: ClockOffset::default(),
            last_tick,
            last_band: None,
            last_sample_tick: None,
            samples_accepted: 0,
            samples_rejected: 0,
        }
    }

    pub fn classify(&self, delta_ms: f64) -> SlewBand {
        let magnitude = delta_ms.abs();
        if magnitude <= self.config.small_max_ms {
            SlewBand::Small
        } else if magnitude < self.config.medium_max_ms {
            SlewBand::Medium
        } else {
            SlewBand::Large
        }
    }

    /// Fold a fresh sample into the offset. Returns the band it was handled
    /// in, or `None` if the sample was malformed and discarded.
    pub fn ingest_sample(&mut self, sample: TimeSample) -> Option<SlewBand> {
        if sample.authoritative_time_ms <= 0 || sample.authoritative_time_ms > MAX_AUTHORITATIVE_MS {
            warn!("[Sync] Discarding sample with invalid time {}", sample.authoritative_time_ms);
            self.samples_rejected += 1;
            return None;
        }

        let now = self.clock.now_tick();
        // Bring any running slew up to now so the delta starts from the
        // offset actually on screen.
        self.advance_slew(now);

        let age_ms = now.saturating_sub(sample.received_at_local_tick);
        let wall_at_sample = self.clock.wall_clock_ms().saturating_sub(age_ms as i64);
        let new_offset = sample.authoritative_time_ms.saturating_sub(wall_at_sample) as f64;
        let delta = new_offset - self.offset.value_ms;
        let band = self.classify(delta);

        match band {
            SlewBand::Large => {
                info!("[Sync] Jump {:+.0}ms (offset {:+.0}ms -> {:+.0}ms)",
                      delta, self.offset.value_ms, new_offset);
                self.offset.value_ms = new_offset;
                self.offset.pending_correction_ms = 0.0;
                self.offset.correction_deadline_tick = now;
            }
            SlewBand::Small | SlewBand::Medium => {
                let window = if band == SlewBand::Small {
                    self.config.small_window_ms
                } else {
                    self.config.medium_window_ms
                };
                debug!("[Sync] Slew {:+.1}ms over {}ms ({:?})", delta, window, band);
                self.offset.pending_correction_ms = delta;
                self.offset.correction_deadline_tick = now + window;
            }
        }

        self.last_band = Some(band);
        self.last_sample_tick = Some(now);
        self.samples_accepted += 1;
        Some(band)
    }

    /// Record a fetch that produced no usable sample. The offset is kept.
    pub fn reject_sample(&mut self) {
        self.samples_rejected += 1;
    }

    /// Current estimate of authoritative time. Advances any running slew.
    pub fn corrected_time_ms(&mut self) -> i64 {
        let now = self.clock.now_tick();
        self.advance_slew(now);
        self.clock.wall_clock_ms().saturating_add(self.offset.value_ms.round() as i64)
    }

    fn advance_slew(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_tick);
        self.last_tick = self.last_tick.max(now);

        let pending = self.offset.pending_correction_ms;
        if pending == 0.0 || elapsed == 0 {
            return;
        }

        let remaining_ticks = self.offset.correction_deadline_tick.saturating_sub(now).max(1);
        let rate = pending / remaining_ticks as f64;
        let step = rate * elapsed as f64;

        // step and pending share a sign; only the magnitude can overshoot
        if step.abs() >= pending.abs() {
            self.offset.value_ms += pending;
            self.offset.pending_correction_ms = 0.0;
            debug!("[Sync] Slew complete, offset {:+.1}ms", self.offset.value_ms);
        } else {
            self.offset.value_ms += step;
            self.offset.pending_correction_ms -= step;
        }
    }

    pub fn offset(&self) -> ClockOffset {
        self.offset
    }

    pub fn is_slewing(&self) -> bool {
        self.offset.pending_correction_ms != 0.0
    }

    pub fn last_band(&self) -> Option<SlewBand> {
        self.last_band
    }

    /// Milliseconds since the last accepted sample, if any.
    pub fn sample_age_ms(&self) -> Option<u64> {
        self.last_sample_tick.map(|t| self.clock.now_tick().saturating_sub(t))
    }

    pub fn samples_accepted(&self) -> u64 {
        self.samples_accepted
    }

    pub fn samples_rejected(&self) -> u64 {
        self.samples_rejected
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

// ============================================================================
// TESTS
// ============================================================================
