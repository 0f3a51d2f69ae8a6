//! Offline schedule: resolves a local schedule file to a target instant so a
//! kiosk can run without a server, using its own wall clock as authority.

use crate::snapshot::{ServerConfig, WireSnapshot};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Schedule {
    /// Plain clock, nothing to count down to
    Clock,
    /// Every day at `time` ("HH:MM", local)
    Daily { time: String },
    /// A single instant, RFC 3339 or naive local "YYYY-MM-DDTHH:MM[:SS]"
    Once { at: String },
    /// `minutes` after `started_ms`
    Duration { started_ms: i64, minutes: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFile {
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(default)]
    pub warn_minutes: Option<f64>,
    #[serde(default)]
    pub alert_minutes: Option<f64>,
    #[serde(default)]
    pub overrun_minutes: Option<f64>,
    #[serde(default)]
    pub blink_seconds: Option<f64>,
}

const MINUTE_MS: f64 = 60_000.0;

impl ScheduleFile {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| anyhow!("Invalid schedule: {}", e))
    }

    /// Build the `/state` payload a server would have sent at `now_ms`.
    pub fn to_wire<Tz: TimeZone>(&self, now_ms: i64, tz: &Tz, default_overrun_ms: u32) -> WireSnapshot {
        let window = self.overrun_minutes
            .map(|m| m * MINUTE_MS)
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| ms as i64)
            .unwrap_or(default_overrun_ms as i64);

        let target = resolve_target(&self.schedule, now_ms, window, tz);
        WireSnapshot {
            now_ms: Some(now_ms as f64),
            target_ms: Some(target.unwrap_or(0) as f64),
            mode: match self.schedule {
                Schedule::Clock => Some("clock".to_string()),
                _ => None,
            },
            ..Default::default()
        }
    }

    /// The display settings, as the configuration endpoint would report them.
    pub fn to_config(&self) -> ServerConfig {
        let value = serde_json::json!({
            "warn_minutes": self.warn_minutes,
            "alert_minutes": self.alert_minutes,
            "overrun_minutes": self.overrun_minutes,
            "blink_seconds": self.blink_seconds,
        });
        ServerConfig::from_value(&value)
    }
}

/// Target instant in Unix ms, or `None` if the schedule has no usable target.
pub fn resolve_target<Tz: TimeZone>(schedule: &Schedule, now_ms: i64, overrun_ms: i64, tz: &Tz) -> Option<i64> {
    match schedule {
        Schedule::Clock => None,
        Schedule::Daily { time } => next_daily(time, now_ms, overrun_ms, tz),
        Schedule::Once { at } => parse_instant(at, tz),
        Schedule::Duration { started_ms, minutes } => {
            if *started_ms <= 0 || *minutes <= 0 {
                None
            } else {
                Some(started_ms + minutes * 60_000)
            }
        }
    }
}

// Today's occurrence stays the target until its overrun window has passed,
// then tomorrow's takes over.
fn next_daily<Tz: TimeZone>(hhmm: &str, now_ms: i64, overrun_ms: i64, tz: &Tz) -> Option<i64> {
    let time = NaiveTime::parse_from_str(hhmm.trim(), "%H:%M").ok()?;
    let now = tz.timestamp_millis_opt(now_ms).single()?;
    let today = now.date_naive().and_time(time);
    let today_ms = local_ms(&today, tz)?;

    if now_ms - today_ms <= overrun_ms {
        Some(today_ms)
    } else {
        local_ms(&(today + Duration::days(1)), tz)
    }
}

fn parse_instant<Tz: TimeZone>(text: &str, tz: &Tz) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| local_ms(&naive, tz))
}

fn local_ms<Tz: TimeZone>(naive: &NaiveDateTime, tz: &Tz) -> Option<i64> {
    // On a DST fold take the first occurrence; a skipped hour has no target
    tz.from_local_datetime(naive).earliest().map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    // 2024-03-10 12:00:00 UTC
    const NOON: i64 = 1_710_072_000_000;
    const HOUR: i64 = 3_600_000;

    fn daily(time: &str) -> Schedule {
        Schedule::Daily { time: time.to_string() }
    }

    #[test]
    fn test_daily_later_today() {
        assert_eq!(resolve_target(&daily("18:30"), NOON, 300_000, &Utc), Some(NOON + 6 * HOUR + 30 * 60_000));
    }

    #[test]
    fn test_daily_holds_through_overrun_then_rolls() {
        let s = daily("11:58");
        let today = NOON - 2 * 60_000;
        // 2 minutes past, 5 minute overrun window: still today's target
        assert_eq!(resolve_target(&s, NOON, 300_000, &Utc), Some(today));
        // 1 minute overrun window: already rolled to tomorrow
        assert_eq!(resolve_target(&s, NOON, 60_000, &Utc), Some(today + 24 * HOUR));
    }

    #[test]
    fn test_daily_respects_timezone() {
        let oslo = FixedOffset::east_opt(HOUR as i32 / 1000).unwrap();
        // 18:30 at UTC+1 is 17:30 UTC
        assert_eq!(resolve_target(&daily("18:30"), NOON, 0, &oslo), Some(NOON + 5 * HOUR + 30 * 60_000));
    }

    #[test]
    fn test_bad_daily_time_has_no_target() {
        assert_eq!(resolve_target(&daily(""), NOON, 0, &Utc), None);
        assert_eq!(resolve_target(&daily("25:99"), NOON, 0, &Utc), None);
    }

    #[test]
    fn test_once_formats() {
        let rfc = Schedule::Once { at: "2024-03-10T13:00:00+00:00".to_string() };
        assert_eq!(resolve_target(&rfc, NOON, 0, &Utc), Some(NOON + HOUR));

        let naive = Schedule::Once { at: "2024-03-10T13:00".to_string() };
        assert_eq!(resolve_target(&naive, NOON, 0, &Utc), Some(NOON + HOUR));

        let junk = Schedule::Once { at: "tomorrow-ish".to_string() };
        assert_eq!(resolve_target(&junk, NOON, 0, &Utc), None);
    }

    #[test]
    fn test_duration() {
        let s = Schedule::Duration { started_ms: NOON, minutes: 15 };
        assert_eq!(resolve_target(&s, NOON, 0, &Utc), Some(NOON + 15 * 60_000));
        let unset = Schedule::Duration { started_ms: 0, minutes: 15 };
        assert_eq!(resolve_target(&unset, NOON, 0, &Utc), None);
    }

    #[test]
    fn test_schedule_file_to_wire() {
        let file = ScheduleFile::parse(r#"{ "mode": "daily", "time": "12:10", "warn_minutes": 4, "blink_seconds": 10 }"#).unwrap();
        let wire = file.to_wire(NOON, &Utc, 300_000);
        assert_eq!(wire.now_ms, Some(NOON as f64));
        assert_eq!(wire.target_ms, Some((NOON + 10 * 60_000) as f64));
        assert_eq!(wire.mode, None);

        let config = file.to_config();
        assert_eq!(config.warn_ms, Some(240_000));
        assert_eq!(config.blink_threshold_ms, Some(10_000));
        assert_eq!(config.alert_ms, None);
        assert_eq!(config.revision, None);
    }

    #[test]
    fn test_clock_schedule_file() {
        let file = ScheduleFile::parse(r#"{ "mode": "clock" }"#).unwrap();
        let wire = file.to_wire(NOON, &Utc, 300_000);
        assert_eq!(wire.mode.as_deref(), Some("clock"));
        assert_eq!(wire.target_ms, Some(0.0));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(ScheduleFile::parse(r#"{ "mode": "weekly" }"#).is_err());
    }
}
