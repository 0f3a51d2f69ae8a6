use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub sync: SyncConfig,
    pub transport: TransportConfig,
    pub render: RenderConfig,
    pub target: TargetDefaults,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub small_max_ms: f64,      // |delta| <= this slews over small_window_ms
    pub medium_max_ms: f64,     // |delta| < this slews over medium_window_ms, else jump
    pub small_window_ms: u64,
    pub medium_window_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub push_enabled: bool,
    pub pull_interval_ms: u64,
    pub safety_refresh_ms: u64,
    pub fetch_timeout_ms: u64,
    pub state_path: String,
    pub config_path: String,
    pub events_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub cadence_ms: u64,
}

/// Debounce and fallback thresholds for incoming target configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetDefaults {
    pub jitter_threshold_ms: u32, // 0 disables the guard
    pub warn_ms: u32,
    pub alert_ms: u32,
    pub overrun_ms: u32,
    pub blink_threshold_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            small_max_ms: 120.0,
            medium_max_ms: 1_500.0,
            small_window_ms: 5_000,
            medium_window_ms: 2_000,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            push_enabled: true,
            pull_interval_ms: 1_000,
            safety_refresh_ms: 15_000,
            fetch_timeout_ms: 4_000,
            state_path: "/state".to_string(),
            config_path: "/api/config".to_string(),
            events_path: "/sse".to_string(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig { cadence_ms: 200 }
    }
}

impl Default for TargetDefaults {
    fn default() -> Self {
        TargetDefaults {
            jitter_threshold_ms: 1_000,
            warn_ms: 180_000,
            alert_ms: 60_000,
            overrun_ms: 300_000,
            blink_threshold_ms: 15_000,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        StatusConfig { interval_ms: 10_000 }
    }
}

const MIN_CADENCE_MS: u64 = 10;

impl KioskConfig {
    /// Load a JSON config file. Absent sections keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: KioskConfig = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(config.sanitized())
    }

    /// Clamp every knob into a range the render loop can live with.
    /// A kiosk left running for days must not crash on a bad value.
    pub fn sanitized(mut self) -> Self {
        let s = &mut self.sync;
        s.small_max_ms = finite_or(s.small_max_ms, 120.0).max(0.0);
        s.medium_max_ms = finite_or(s.medium_max_ms, 1_500.0).max(s.small_max_ms);
        s.small_window_ms = s.small_window_ms.max(1);
        s.medium_window_ms = s.medium_window_ms.max(1);

        let t = &mut self.transport;
        t.pull_interval_ms = t.pull_interval_ms.max(MIN_CADENCE_MS);
        t.safety_refresh_ms = t.safety_refresh_ms.max(MIN_CADENCE_MS);
        t.fetch_timeout_ms = t.fetch_timeout_ms.max(MIN_CADENCE_MS);
        for path in [&mut t.state_path, &mut t.config_path, &mut t.events_path] {
            if !path.starts_with('/') {
                path.insert(0, '/');
            }
        }

        self.render.cadence_ms = self.render.cadence_ms.max(MIN_CADENCE_MS);
        self.status.interval_ms = self.status.interval_ms.max(MIN_CADENCE_MS);
        self
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = KioskConfig::default();
        assert_eq!(config.sync.small_max_ms, 120.0);
        assert_eq!(config.sync.medium_max_ms, 1_500.0);
        assert_eq!(config.sync.small_window_ms, 5_000);
        assert_eq!(config.sync.medium_window_ms, 2_000);
        assert_eq!(config.transport.pull_interval_ms, 1_000);
        assert_eq!(config.transport.safety_refresh_ms, 15_000);
        assert_eq!(config.render.cadence_ms, 200);
        assert_eq!(config.target.jitter_threshold_ms, 1_000);
    }

    #[test]
    fn test_sanitize_clamps_bad_values() {
        let mut config = KioskConfig::default();
        config.sync.small_max_ms = f64::NAN;
        config.sync.medium_max_ms = 10.0;
        config.sync.small_window_ms = 0;
        config.render.cadence_ms = 0;
        config.transport.pull_interval_ms = 1;
        config.transport.state_path = "state".to_string();
        config.transport.config_path = "api/config".to_string();

        let config = config.sanitized();
        assert_eq!(config.sync.small_max_ms, 120.0);
        // Medium band can never be narrower than the small band
        assert_eq!(config.sync.medium_max_ms, 120.0);
        assert_eq!(config.sync.small_window_ms, 1);
        assert_eq!(config.render.cadence_ms, MIN_CADENCE_MS);
        assert_eq!(config.transport.pull_interval_ms, MIN_CADENCE_MS);
        assert_eq!(config.transport.state_path, "/state");
        assert_eq!(config.transport.config_path, "/api/config");
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "render": {{ "cadence_ms": 250 }}, "transport": {{ "push_enabled": false }} }}"#).unwrap();

        let config = KioskConfig::load(file.path()).unwrap();
        assert_eq!(config.render.cadence_ms, 250);
        assert!(!config.transport.push_enabled);
        assert_eq!(config.transport.pull_interval_ms, 1_000);
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(KioskConfig::load(file.path()).is_err());
    }
}
