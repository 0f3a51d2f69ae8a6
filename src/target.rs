use crate::countdown::TargetConfig;
use log::{debug, info};

/// Holds the active `TargetConfig` and filters sub-threshold target jitter
/// from periodic snapshots before it reaches the countdown.
#[derive(Debug, Clone)]
pub struct TargetSlot {
    current: TargetConfig,
    jitter_threshold_ms: u32,
    updates: u64,
}

impl TargetSlot {
    pub fn new(initial: TargetConfig, jitter_threshold_ms: u32) -> Self {
        TargetSlot {
            current: initial,
            jitter_threshold_ms,
            updates: 0,
        }
    }

    pub fn current(&self) -> &TargetConfig {
        &self.current
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Replace the held config with `incoming`. A target that moved by less
    /// than the jitter threshold keeps its previous value; every other field
    /// is taken from `incoming`. Returns true if anything visible changed.
    pub fn apply(&mut self, incoming: TargetConfig) -> bool {
        let target_time_ms = match (self.current.target_time_ms, incoming.target_time_ms) {
            (Some(old), Some(new)) if self.is_jitter(old, new) => {
                if old != new {
                    debug!("[Target] Ignoring {:+}ms target jitter", new - old);
                }
                Some(old)
            }
            (_, new) => new,
        };

        let next = TargetConfig { target_time_ms, ..incoming };
        if next == self.current {
            return false;
        }

        if next.target_time_ms != self.current.target_time_ms {
            match next.target_time_ms {
                Some(t) => info!("[Target] Target set to {}", t),
                None => info!("[Target] Target cleared"),
            }
        }
        self.current = next;
        self.updates += 1;
        true
    }

    fn is_jitter(&self, old: i64, new: i64) -> bool {
        self.jitter_threshold_ms > 0
            && new.abs_diff(old) < self.jitter_threshold_ms as u64
    }
}
