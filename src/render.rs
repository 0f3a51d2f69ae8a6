use crate::config::{KioskConfig, TargetDefaults};
use crate::countdown::{evaluate, DisplayPhase, TargetConfig};
use crate::snapshot::{ServerConfig, Snapshot, ViewMode};
use crate::source::Payload;
use crate::target::TargetSlot;
use crate::time_sync::{SlewBand, TimeSample, TimeSync};
use crate::traits::{ClockSource, PresentationSink};
use log::{debug, info};

/// Everything the presentation layer needs for one render tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub corrected_time_ms: i64,
    pub display_ms: u32,
    pub phase: DisplayPhase,
    pub blink: bool,
    pub view: ViewMode,
}

/// One display's worth of state: the synced clock and the active target.
/// Owned by a single driver; several can coexist in one process.
pub struct Display<C: ClockSource> {
    sync: TimeSync<C>,
    target: TargetSlot,
    view: ViewMode,
    defaults: TargetDefaults,
    // Last settings from the config endpoint; kept across state-only fetches
    server_config: Option<ServerConfig>,
    requested_revision: Option<i64>,
    frames: u64,
    // Only used to log transitions, never fed back into evaluation
    logged_phase: Option<&'static str>,
}

impl<C: ClockSource> Display<C> {
    pub fn new(clock: C, config: &KioskConfig) -> Self {
        let d = &config.target;
        let initial = TargetConfig {
            target_time_ms: None,
            warn_ms: d.warn_ms,
            alert_ms: d.alert_ms,
            overrun_ms: d.overrun_ms,
            blink_threshold_ms: d.blink_threshold_ms,
        };
        Display {
            sync: TimeSync::new(clock, config.sync.clone()),
            target: TargetSlot::new(initial, d.jitter_threshold_ms),
            view: ViewMode::Countdown,
            defaults: d.clone(),
            server_config: None,
            requested_revision: None,
            frames: 0,
            logged_phase: None,
        }
    }

    /// Merge a fetched payload: fresh settings replace the held ones, then
    /// the state is resolved against them and ingested.
    pub fn ingest_payload(&mut self, payload: &Payload, sampled_at_tick: u64) -> Option<SlewBand> {
        if let Some(config) = payload.config {
            if self.server_config != Some(config) {
                debug!("[Render] Server config {:?}", config);
            }
            self.server_config = Some(config);
        }
        let snapshot = Snapshot::from_wire(&payload.state, self.server_config.as_ref(), &self.defaults);
        self.ingest_snapshot(&snapshot, sampled_at_tick)
    }

    /// True once for each state revision newer than the held settings.
    pub fn config_outdated(&mut self, state_revision: Option<i64>) -> bool {
        let held = self.server_config.and_then(|c| c.revision);
        let (Some(rev), Some(held)) = (state_revision, held) else {
            return false;
        };
        if rev <= held || self.requested_revision == Some(rev) {
            return false;
        }
        info!("[Render] Config revision {} behind server {}", held, rev);
        self.requested_revision = Some(rev);
        true
    }

    /// Fold a fetched snapshot in. `sampled_at_tick` is the local tick the
    /// server's timestamp corresponds to.
    pub fn ingest_snapshot(&mut self, snapshot: &Snapshot, sampled_at_tick: u64) -> Option<SlewBand> {
        let band = match snapshot.server_time_ms {
            Some(t) => self.sync.ingest_sample(TimeSample {
                authoritative_time_ms: t,
                received_at_local_tick: sampled_at_tick,
            }),
            None => {
                debug!("[Render] Snapshot without server time");
                self.sync.reject_sample();
                None
            }
        };

        self.target.apply(snapshot.target);
        if snapshot.view != self.view {
            info!("[Render] View {:?} -> {:?}", self.view, snapshot.view);
            self.view = snapshot.view;
        }
        band
    }

    /// Evaluate the current tick without presenting it.
    pub fn frame(&mut self) -> Frame {
        let corrected_time_ms = self.sync.corrected_time_ms();
        let eval = evaluate(corrected_time_ms, self.target.current());
        Frame {
            corrected_time_ms,
            display_ms: eval.display_ms,
            phase: eval.phase,
            blink: eval.blink,
            view: self.view,
        }
    }

    pub fn render<S: PresentationSink + ?Sized>(&mut self, sink: &mut S) -> Frame {
        let frame = self.frame();
        self.frames += 1;

        if self.view == ViewMode::Countdown && self.logged_phase != Some(frame.phase.name()) {
            debug!("[Render] Phase {} ({}ms)", frame.phase.name(), frame.display_ms);
            self.logged_phase = Some(frame.phase.name());
        }

        sink.present(&frame);
        frame
    }

    pub fn sync(&self) -> &TimeSync<C> {
        &self.sync
    }

    pub fn target(&self) -> &TargetSlot {
        &self.target
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn server_config(&self) -> Option<&ServerConfig> {
        self.server_config.as_ref()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}
