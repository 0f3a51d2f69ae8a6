//! Server state as delivered by `/state` and `/api/config`.
//!
//! Everything numeric arrives as a JSON number of unknown sanity. Thresholds
//! are clamped into range, a missing or bogus server time just means the
//! snapshot carries no time sample.
//!
//! `/state` carries the clock and the target; thresholds it leaves out come
//! from the configuration endpoint, then from local defaults.

use crate::config::TargetDefaults;
use crate::countdown::TargetConfig;
use crate::time_sync::MAX_AUTHORITATIVE_MS;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireSnapshot {
    pub now_ms: Option<f64>,
    pub target_ms: Option<f64>,
    pub warn_ms: Option<f64>,
    pub alert_ms: Option<f64>,
    pub overrun_ms: Option<f64>,
    pub mode: Option<String>,
    pub cfg_rev: Option<f64>,
}

impl WireSnapshot {
    pub fn parse(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    pub fn revision(&self) -> Option<i64> {
        self.cfg_rev.filter(|r| r.is_finite()).map(|r| r as i64)
    }
}

/// Display settings from the configuration endpoint, already in ms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerConfig {
    pub warn_ms: Option<u32>,
    pub alert_ms: Option<u32>,
    pub overrun_ms: Option<u32>,
    pub blink_threshold_ms: Option<u32>,
    /// `_updated_at` of the stored config; `/tick` reports it as `cfg_rev`
    pub revision: Option<i64>,
}

const MINUTE_MS: f64 = 60_000.0;

impl ServerConfig {
    pub fn parse(body: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(body)?;
        Ok(Self::from_value(&value))
    }

    /// Accepts `{ "config": { ... } }` as well as the bare config object.
    /// Numbers may arrive as strings.
    pub fn from_value(value: &Value) -> Self {
        let cfg = value.get("config").filter(|c| c.is_object()).unwrap_or(value);
        ServerConfig {
            warn_ms: scaled(cfg.get("warn_minutes"), MINUTE_MS),
            alert_ms: scaled(cfg.get("alert_minutes"), MINUTE_MS),
            overrun_ms: scaled(cfg.get("overrun_minutes"), MINUTE_MS),
            blink_threshold_ms: scaled(cfg.get("blink_seconds"), 1_000.0),
            revision: number(cfg.get("_updated_at")).map(|r| r as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewMode {
    Countdown,
    Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Authoritative time at the moment the server built the snapshot
    pub server_time_ms: Option<i64>,
    pub target: TargetConfig,
    pub view: ViewMode,
}

impl Snapshot {
    pub fn from_wire(wire: &WireSnapshot, config: Option<&ServerConfig>, defaults: &TargetDefaults) -> Self {
        let view = match wire.mode.as_deref() {
            Some(m) if m.eq_ignore_ascii_case("clock") => ViewMode::Clock,
            _ => ViewMode::Countdown,
        };

        let target_time_ms = match view {
            ViewMode::Countdown => instant_ms(wire.target_ms),
            ViewMode::Clock => None,
        };

        let cfg = config.copied().unwrap_or_default();
        Snapshot {
            server_time_ms: instant_ms(wire.now_ms),
            target: TargetConfig {
                target_time_ms,
                warn_ms: field_ms(wire.warn_ms).or(cfg.warn_ms).unwrap_or(defaults.warn_ms),
                alert_ms: field_ms(wire.alert_ms).or(cfg.alert_ms).unwrap_or(defaults.alert_ms),
                overrun_ms: field_ms(wire.overrun_ms).or(cfg.overrun_ms).unwrap_or(defaults.overrun_ms),
                blink_threshold_ms: cfg.blink_threshold_ms.unwrap_or(defaults.blink_threshold_ms),
            },
            view,
        }
    }
}

/// Unix-ms instant, or `None` for zero, negative, non-finite or absurd values.
fn instant_ms(value: Option<f64>) -> Option<i64> {
    value
        .filter(|t| t.is_finite() && *t > 0.0 && *t <= MAX_AUTHORITATIVE_MS as f64)
        .map(|t| t.round() as i64)
}

fn field_ms(value: Option<f64>) -> Option<u32> {
    value.filter(|v| v.is_finite()).map(clamp_ms)
}

fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn scaled(value: Option<&Value>, unit_ms: f64) -> Option<u32> {
    number(value).map(|n| clamp_ms(n * unit_ms))
}

fn clamp_ms(value: f64) -> u32 {
    value.round().clamp(0.0, u32::MAX as f64) as u32
}
