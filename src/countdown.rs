//! Countdown phase evaluation.
//!
//! `evaluate` is a pure function of (corrected time, target config): no state
//! is carried between frames, so a restarted display lands in the same phase
//! as one that has been running for days.

use serde::{Deserialize, Serialize};

/// Snapshot of the countdown target. Always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// `None` means there is nothing to count down to
    pub target_time_ms: Option<i64>,
    pub warn_ms: u32,
    pub alert_ms: u32,
    pub overrun_ms: u32,
    pub blink_threshold_ms: u32,
}

impl TargetConfig {
    pub fn without_target(&self) -> Self {
        TargetConfig { target_time_ms: None, ..*self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayPhase {
    Normal,
    Warn,
    Alert,
    Overrun { remaining_of_window_ms: u32 },
    Ended,
}

impl DisplayPhase {
    pub fn name(&self) -> &'static str {
        match self {
            DisplayPhase::Normal => "normal",
            DisplayPhase::Warn => "warn",
            DisplayPhase::Alert => "alert",
            DisplayPhase::Overrun { .. } => "overrun",
            DisplayPhase::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub display_ms: u32,
    pub phase: DisplayPhase,
    pub blink: bool,
}

impl Evaluation {
    pub const ENDED: Evaluation = Evaluation {
        display_ms: 0,
        phase: DisplayPhase::Ended,
        blink: false,
    };
}

/// Derive what the display shows at `corrected_time_ms`.
///
/// Ties on a threshold resolve to the more urgent phase, and the last
/// millisecond of the overrun window still counts as overrun.
pub fn evaluate(corrected_time_ms: i64, cfg: &TargetConfig) -> Evaluation {
    let target = match cfg.target_time_ms {
        Some(t) => t,
        None => return Evaluation::ENDED,
    };

    let remaining = target.saturating_sub(corrected_time_ms);

    if remaining > 0 {
        let phase = if remaining <= cfg.alert_ms as i64 {
            DisplayPhase::Alert
        } else if remaining <= cfg.warn_ms as i64 {
            DisplayPhase::Warn
        } else {
            DisplayPhase::Normal
        };
        return Evaluation {
            display_ms: saturate_u32(remaining),
            phase,
            blink: remaining <= cfg.blink_threshold_ms as i64,
        };
    }

    // Past the target: count the overrun window down to zero
    let overshoot = remaining.saturating_neg();
    if overshoot <= cfg.overrun_ms as i64 {
        let left = cfg.overrun_ms - overshoot as u32;
        Evaluation {
            display_ms: left,
            phase: DisplayPhase::Overrun { remaining_of_window_ms: left },
            blink: false,
        }
    } else {
        Evaluation::ENDED
    }
}

fn saturate_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}
