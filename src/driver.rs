//! The render loop and everything that feeds it.
//!
//! One task owns the display state. Fetches and the push stream run as
//! spawned tasks and report back over channels, so nothing they do can
//! stall a frame.

use crate::config::KioskConfig;
use crate::render::Display;
use crate::source::{Payload, PushMessage, SnapshotSource};
use crate::status::DisplayStatus;
use crate::traits::{ClockSource, PresentationSink};
use crate::transport::{FetchReason, TransportChannel};
use anyhow::Result;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{self, MissedTickBehavior};

struct FetchOutcome {
    reason: FetchReason,
    result: Result<Payload>,
}

pub struct Driver<C: ClockSource, S: PresentationSink> {
    display: Display<C>,
    transport: TransportChannel,
    source: SnapshotSource,
    sink: S,
    render_cadence: Duration,
    status_interval: Duration,
    status_file: Option<PathBuf>,
    running: Arc<AtomicBool>,
    consecutive_failures: u32,
}

impl<C: ClockSource, S: PresentationSink> Driver<C, S> {
    pub fn new(
        clock: C,
        config: &KioskConfig,
        source: SnapshotSource,
        sink: S,
        running: Arc<AtomicBool>,
    ) -> Self {
        let mut transport_config = config.transport.clone();
        if !source.supports_push() {
            transport_config.push_enabled = false;
        }

        Driver {
            display: Display::new(clock, config),
            transport: TransportChannel::new(&transport_config),
            source,
            sink,
            render_cadence: Duration::from_millis(config.render.cadence_ms),
            status_interval: Duration::from_millis(config.status.interval_ms),
            status_file: None,
            running,
            consecutive_failures: 0,
        }
    }

    pub fn with_status_file(mut self, path: Option<PathBuf>) -> Self {
        self.status_file = path;
        self
    }

    /// Run until the shutdown flag is cleared. Returns the final status.
    pub async fn run(mut self) -> DisplayStatus {
        let (fetch_tx, mut fetch_rx) = mpsc::unbounded_channel::<FetchOutcome>();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<PushMessage>();

        info!("[Transport] Source: {}", self.source.describe());
        if self.transport.start(self.now()) {
            self.spawn_push(push_tx.clone());
        }
        self.pump(&fetch_tx);

        let mut render = time::interval(self.render_cadence);
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut status_timer = time::interval(self.status_interval);
        status_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of an interval completes immediately
        status_timer.tick().await;

        let mut ready = false;
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = render.tick() => {
                    self.display.render(&mut self.sink);
                    if !ready {
                        notify_ready();
                        ready = true;
                    }
                }
                Some(outcome) = fetch_rx.recv() => self.on_fetch(outcome),
                Some(msg) = push_rx.recv() => self.on_push(msg),
                _ = status_timer.tick() => {
                    self.publish_status().await;
                }
            }
            self.pump(&fetch_tx);
        }

        info!("[Render] Stopping after {} frames", self.display.frames());
        notify_stopping();
        self.publish_status().await
    }

    fn now(&self) -> u64 {
        self.display.sync().clock().now_tick()
    }

    fn spawn_push(&self, tx: UnboundedSender<PushMessage>) {
        let source = self.source.clone();
        tokio::spawn(async move {
            if let Err(e) = source.stream_events(tx.clone()).await {
                let _ = tx.send(PushMessage::Failed(e.to_string()));
            }
        });
    }

    fn pump(&mut self, tx: &UnboundedSender<FetchOutcome>) {
        let Some(reason) = self.transport.poll(self.now()) else {
            return;
        };
        debug!("[Transport] Fetching ({:?})", reason);
        let source = self.source.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = source.fetch(reason.wants_config()).await;
            let _ = tx.send(FetchOutcome { reason, result });
        });
    }

    fn on_fetch(&mut self, outcome: FetchOutcome) {
        let now = self.now();
        match outcome.result {
            Ok(payload) => {
                let sent = self.transport
                    .on_fetch_complete(now, true)
                    .map_or(now, |f| f.sent_tick);
                // Server time is taken as of the middle of the `/state` round trip
                let state_sent = (sent + payload.leading_ms).min(now);
                let sampled_at = state_sent + (now - state_sent) / 2;
                if self.consecutive_failures > 0 {
                    info!("[Transport] Fetch recovered after {} failures", self.consecutive_failures);
                    self.consecutive_failures = 0;
                }
                self.display.ingest_payload(&payload, sampled_at);
                if self.display.config_outdated(payload.state.revision()) {
                    self.transport.request_config();
                }
            }
            Err(e) => {
                self.transport.on_fetch_complete(now, false);
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    warn!("[Transport] {:?} fetch failed: {}", outcome.reason, e);
                } else {
                    debug!("[Transport] {:?} fetch failed ({} in a row): {}",
                           outcome.reason, self.consecutive_failures, e);
                }
            }
        }
    }

    fn on_push(&mut self, msg: PushMessage) {
        match msg {
            PushMessage::Opened => self.transport.on_push_opened(),
            PushMessage::Event(event) => self.transport.on_push_event(&event),
            PushMessage::Failed(reason) => {
                let now = self.now();
                self.transport.on_push_failed(now, &reason);
            }
        }
    }

    async fn publish_status(&mut self) -> DisplayStatus {
        let status = DisplayStatus::capture(&mut self.display, &self.transport);
        status.log();
        if let Some(path) = &self.status_file {
            if let Err(e) = status.write_to(path).await {
                warn!("[Status] Failed to write {}: {}", path.display(), e);
            }
        }
        status
    }
}

fn notify_ready() {
    #[cfg(unix)]
    {
        if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
            debug!("sd_notify READY failed: {}", e);
        }
    }
}

fn notify_stopping() {
    #[cfg(unix)]
    {
        if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
            debug!("sd_notify STOPPING failed: {}", e);
        }
    }
}
