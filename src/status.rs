use crate::render::Display;
use crate::time_sync::SlewBand;
use crate::traits::ClockSource;
use crate::transport::{TransportChannel, TransportState};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::SystemTime;

/// Health snapshot of one display, logged periodically and optionally
/// written to disk for an external watchdog or kiosk manager.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DisplayStatus {
    // ========================================================================
    // Time sync
    // ========================================================================
    /// Applied offset (authoritative - local wall), ms
    pub offset_ms: f64,

    /// Part of the last correction still being slewed in, ms
    pub pending_correction_ms: f64,

    /// Band of the most recent accepted sample
    pub last_band: Option<SlewBand>,

    /// Age of the last accepted sample, ms
    pub last_sample_age_ms: Option<u64>,

    pub samples_accepted: u64,
    pub samples_rejected: u64,

    // ========================================================================
    // Transport
    // ========================================================================
    pub transport: TransportState,

    /// True when no fetch has succeeded for longer than the safety-net interval
    pub stale: bool,

    pub fetch_failures: u64,
    pub push_failures: u64,

    // ========================================================================
    // Display
    // ========================================================================
    /// "normal", "warn", "alert", "overrun", "ended"
    pub phase: String,

    pub display_ms: u32,
    pub blink: bool,
    pub has_target: bool,
    pub frames: u64,

    /// Unix timestamp of last status update
    pub updated_ts: u64,
}

impl Default for DisplayStatus {
    fn default() -> Self {
        DisplayStatus {
            offset_ms: 0.0,
            pending_correction_ms: 0.0,
            last_band: None,
            last_sample_age_ms: None,
            samples_accepted: 0,
            samples_rejected: 0,

            transport: TransportState::Disconnected,
            stale: false,
            fetch_failures: 0,
            push_failures: 0,

            phase: "ended".to_string(),
            display_ms: 0,
            blink: false,
            has_target: false,
            frames: 0,
            updated_ts: 0,
        }
    }
}

impl DisplayStatus {
    pub fn capture<C: ClockSource>(display: &mut Display<C>, transport: &TransportChannel) -> Self {
        let frame = display.frame();
        let sync = display.sync();
        let offset = sync.offset();

        DisplayStatus {
            offset_ms: offset.value_ms,
            pending_correction_ms: offset.pending_correction_ms,
            last_band: sync.last_band(),
            last_sample_age_ms: sync.sample_age_ms(),
            samples_accepted: sync.samples_accepted(),
            samples_rejected: sync.samples_rejected(),

            transport: transport.state(),
            stale: transport.is_stale(),
            fetch_failures: transport.fetch_failures(),
            push_failures: transport.push_failures(),

            phase: frame.phase.name().to_string(),
            display_ms: frame.display_ms,
            blink: frame.blink,
            has_target: display.target().current().target_time_ms.is_some(),
            frames: display.frames(),
            updated_ts: SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    pub fn log(&self) {
        let age = match self.last_sample_age_ms {
            Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
            None => "never".to_string(),
        };
        info!("[Status] {:?}{}  Offset:{:+.0}ms  Slew:{:+.0}ms  Sample:{}  {} {}ms  Fail:{}/{}",
              self.transport,
              if self.stale { " STALE" } else { "" },
              self.offset_ms,
              self.pending_correction_ms,
              age,
              self.phase,
              self.display_ms,
              self.fetch_failures,
              self.push_failures);
    }

    /// Write as JSON next to `path` and rename over it, so readers never
    /// see a half-written file.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{KioskConfig, TransportConfig};
    use crate::countdown::TargetConfig;
    use crate::snapshot::{Snapshot, ViewMode};

    #[test]
    fn test_display_status_default() {
        let status = DisplayStatus::default();
        assert_eq!(status.offset_ms, 0.0);
        assert_eq!(status.transport, TransportState::Disconnected);
        assert_eq!(status.phase, "ended");
        assert!(!status.stale);
    }

    #[test]
    fn test_display_status_serde_roundtrip() {
        let mut status = DisplayStatus::default();
        status.offset_ms = -812.5;
        status.last_band = Some(SlewBand::Medium);
        status.transport = TransportState::ConnectedPull;
        status.phase = "alert".to_string();

        let json = serde_json::to_string(&status).expect("serialize failed");
        let restored: DisplayStatus = serde_json::from_str(&json).expect("deserialize failed");

        assert_eq!(restored, status);
    }

    #[test]
    fn test_capture_reflects_display_and_transport() {
        let wall = 1_700_000_000_000;
        let clock = ManualClock::new(0, wall);
        let config = KioskConfig::default();
        let mut display = Display::new(clock, &config);
        let snapshot = Snapshot {
            server_time_ms: Some(wall + 5_000),
            target: TargetConfig {
                target_time_ms: Some(wall + 65_000),
                warn_ms: 180_000,
                alert_ms: 60_000,
                overrun_ms: 300_000,
                blink_threshold_ms: 15_000,
            },
            view: ViewMode::Countdown,
        };
        display.ingest_snapshot(&snapshot, 0);

        let mut transport = TransportChannel::new(&TransportConfig::default());
        transport.start(0);

        let status = DisplayStatus::capture(&mut display, &transport);
        assert_eq!(status.offset_ms, 5_000.0);
        assert_eq!(status.last_band, Some(SlewBand::Large));
        assert_eq!(status.transport, TransportState::ConnectingPush);
        assert_eq!(status.display_ms, 60_000);
        assert!(status.has_target);
        assert_eq!(status.samples_accepted, 1);
    }

    #[tokio::test]
    async fn test_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, "old").unwrap();

        let mut status = DisplayStatus::default();
        status.frames = 42;
        status.write_to(&path).await.unwrap();

        let restored: DisplayStatus = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(restored.frames, 42);
        assert!(!dir.path().join("status.json.tmp").exists());
    }
}
