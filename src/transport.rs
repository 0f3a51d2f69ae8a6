//! Transport state machine.
//!
//! Decides *when* to fetch; the driver does the actual I/O and reports back.
//!
//! ```text
//! Disconnected -> ConnectingPush -> ConnectedPush
//!                      |                 |
//!                      +---- error ------+--> ConnectingPull -> ConnectedPull
//! ```
//!
//! Once push has failed it is not retried for the lifetime of the process;
//! polling keeps the display fed from then on. A safety-net refresh fires on
//! its own cadence in every state, in case push stalls without erroring.

use crate::config::TransportConfig;
use crate::sse::PushEvent;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Disconnected,
    ConnectingPush,
    ConnectedPush,
    ConnectingPull,
    ConnectedPull,
}

impl TransportState {
    pub fn is_push(&self) -> bool {
        matches!(self, TransportState::ConnectingPush | TransportState::ConnectedPush)
    }

    pub fn is_pull(&self) -> bool {
        matches!(self, TransportState::ConnectingPull | TransportState::ConnectedPull)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    Initial,
    PushNotified,
    Poll,
    SafetyRefresh,
    /// `/state` reported a config revision newer than the one held
    ConfigRevision,
}

impl FetchReason {
    /// Whether this fetch also pulls the configuration endpoint.
    pub fn wants_config(&self) -> bool {
        !matches!(self, FetchReason::Poll)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    pub reason: FetchReason,
    pub sent_tick: u64,
}

pub struct TransportChannel {
    push_enabled: bool,
    pull_interval_ms: u64,
    safety_refresh_ms: u64,

    state: TransportState,
    next_pull_tick: u64,
    next_refresh_tick: u64,
    pending: Option<FetchReason>,
    in_flight: Option<InFlight>,

    // Staleness is measured from here; start() seeds it
    last_success_tick: u64,
    has_succeeded: bool,
    stale: bool,

    fetch_failures: u64,
    push_failures: u64,
}

impl TransportChannel {
    pub fn new(config: &TransportConfig) -> Self {
        TransportChannel {
            push_enabled: config.push_enabled,
            pull_interval_ms: config.pull_interval_ms,
            safety_refresh_ms: config.safety_refresh_ms,
            state: TransportState::Disconnected,
            next_pull_tick: 0,
            next_refresh_tick: 0,
            pending: None,
            in_flight: None,
            last_success_tick: 0,
            has_succeeded: false,
            stale: false,
            fetch_failures: 0,
            push_failures: 0,
        }
    }

    /// Begin the lifecycle. Returns true if the caller should open the push stream.
    pub fn start(&mut self, now: u64) -> bool {
        self.state = if self.push_enabled {
            TransportState::ConnectingPush
        } else {
            TransportState::ConnectingPull
        };
        info!("[Transport] Starting in {:?}", self.state);
        self.pending = Some(FetchReason::Initial);
        self.next_pull_tick = now + self.pull_interval_ms;
        self.next_refresh_tick = now + self.safety_refresh_ms;
        self.last_success_tick = now;
        self.state.is_push()
    }

    pub fn on_push_opened(&mut self) {
        if self.state == TransportState::ConnectingPush {
            info!("[Push] Connected");
            self.state = TransportState::ConnectedPush;
        }
    }

    pub fn on_push_event(&mut self, event: &PushEvent) {
        match event {
            PushEvent::ConfigChanged => {
                debug!("[Push] Config changed, scheduling fetch");
                self.request(FetchReason::PushNotified);
            }
            PushEvent::Keepalive => {}
            PushEvent::Other(kind) => debug!("[Push] Ignoring '{}' event", kind),
        }
    }

    pub fn on_push_failed(&mut self, now: u64, reason: &str) {
        if !self.state.is_push() {
            return;
        }
        self.push_failures += 1;
        warn!("[Push] Failed ({}), falling back to polling every {}ms", reason, self.pull_interval_ms);
        self.state = TransportState::ConnectingPull;
        self.next_pull_tick = now;
    }

    /// Advance timers. Returns a fetch to start now, if any.
    pub fn poll(&mut self, now: u64) -> Option<FetchReason> {
        if now >= self.next_refresh_tick {
            self.request(FetchReason::SafetyRefresh);
            self.next_refresh_tick = now + self.safety_refresh_ms;
        }
        if self.state.is_pull() && now >= self.next_pull_tick {
            self.request(FetchReason::Poll);
            self.next_pull_tick = now + self.pull_interval_ms;
        }

        if !self.stale && now.saturating_sub(self.last_success_tick) > self.safety_refresh_ms {
            self.stale = true;
            warn!("[Transport] No fresh data for {}ms, showing last known state",
                  now - self.last_success_tick);
        }

        if self.in_flight.is_some() {
            return None;
        }
        let reason = self.pending.take()?;
        self.in_flight = Some(InFlight { reason, sent_tick: now });
        Some(reason)
    }

    /// Report the outcome of the fetch returned by the last `poll`.
    pub fn on_fetch_complete(&mut self, now: u64, ok: bool) -> Option<InFlight> {
        let done = self.in_flight.take();
        if ok {
            self.last_success_tick = now;
            self.has_succeeded = true;
            if self.stale {
                info!("[Transport] Fresh data again");
                self.stale = false;
            }
            if self.state == TransportState::ConnectingPull {
                info!("[Transport] Polling established");
                self.state = TransportState::ConnectedPull;
            }
        } else {
            self.fetch_failures += 1;
        }
        done
    }

    /// Queue a config refresh, e.g. when `/state` carries a newer `cfg_rev`.
    pub fn request_config(&mut self) {
        self.request(FetchReason::ConfigRevision);
    }

    fn request(&mut self, reason: FetchReason) {
        // One queued request is enough; a plain poll is upgraded if config is wanted too
        match self.pending {
            None => self.pending = Some(reason),
            Some(queued) if !queued.wants_config() && reason.wants_config() => self.pending = Some(reason),
            Some(_) => {}
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn has_succeeded(&self) -> bool {
        self.has_succeeded
    }

    pub fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures
    }

    pub fn push_failures(&self) -> u64 {
        self.push_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(push: bool) -> TransportChannel {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = TransportConfig {
            push_enabled: push,
            ..TransportConfig::default()
        };
        TransportChannel::new(&config)
    }

    #[test]
    fn test_start_fetches_immediately() {
        let mut t = channel(true);
        assert_eq!(t.state(), TransportState::Disconnected);
        assert!(t.start(0));
        assert_eq!(t.state(), TransportState::ConnectingPush);
        assert_eq!(t.poll(0), Some(FetchReason::Initial));
        assert_eq!(t.in_flight().map(|f| f.sent_tick), Some(0));
    }

    #[test]
    fn test_push_disabled_starts_polling() {
        let mut t = channel(false);
        assert!(!t.start(0));
        assert_eq!(t.poll(0), Some(FetchReason::Initial));
        t.on_fetch_complete(50, true);
        assert_eq!(t.state(), TransportState::ConnectedPull);

        assert_eq!(t.poll(999), None);
        assert_eq!(t.poll(1_000), Some(FetchReason::Poll));
    }

    #[test]
    fn test_push_does_not_poll() {
        let mut t = channel(true);
        t.start(0);
        t.poll(0);
        t.on_fetch_complete(40, true);
        t.on_push_opened();
        assert_eq!(t.state(), TransportState::ConnectedPush);

        for now in (200..15_000).step_by(200) {
            assert_eq!(t.poll(now), None, "unexpected fetch at {}", now);
        }
    }

    #[test]
    fn test_push_notification_triggers_fetch() {
        let mut t = channel(true);
        t.start(0);
        t.poll(0);
        t.on_fetch_complete(40, true);
        t.on_push_opened();

        t.on_push_event(&PushEvent::Keepalive);
        assert_eq!(t.poll(200), None);
        t.on_push_event(&PushEvent::ConfigChanged);
        assert_eq!(t.poll(400), Some(FetchReason::PushNotified));
    }

    #[test]
    fn test_push_failure_falls_back_to_pull_for_good() {
        let mut t = channel(true);
        t.start(0);
        t.poll(0);
        t.on_fetch_complete(40, true);
        t.on_push_opened();

        t.on_push_failed(3_000, "connection reset");
        assert_eq!(t.state(), TransportState::ConnectingPull);
        assert_eq!(t.push_failures(), 1);
        // First poll goes out right away
        assert_eq!(t.poll(3_000), Some(FetchReason::Poll));
        t.on_fetch_complete(3_050, true);
        assert_eq!(t.state(), TransportState::ConnectedPull);

        // A late error from the dead stream changes nothing
        t.on_push_failed(3_100, "late");
        assert_eq!(t.state(), TransportState::ConnectedPull);
        assert_eq!(t.push_failures(), 1);
    }

    #[test]
    fn test_safety_refresh_fires_in_push_mode() {
        let mut t = channel(true);
        t.start(0);
        t.poll(0);
        t.on_fetch_complete(40, true);
        t.on_push_opened();

        assert_eq!(t.poll(14_800), None);
        assert_eq!(t.poll(15_000), Some(FetchReason::SafetyRefresh));
    }

    #[test]
    fn test_one_fetch_in_flight() {
        let mut t = channel(false);
        t.start(0);
        assert_eq!(t.poll(0), Some(FetchReason::Initial));
        // Slow server: pull comes due while the first fetch is outstanding
        assert_eq!(t.poll(1_000), None);
        assert_eq!(t.poll(1_200), None);
        let done = t.on_fetch_complete(1_300, true);
        assert_eq!(done, Some(InFlight { reason: FetchReason::Initial, sent_tick: 0 }));
        assert_eq!(t.poll(1_400), Some(FetchReason::Poll));
    }

    #[test]
    fn test_config_fetched_except_on_plain_poll() {
        assert!(FetchReason::Initial.wants_config());
        assert!(FetchReason::PushNotified.wants_config());
        assert!(FetchReason::SafetyRefresh.wants_config());
        assert!(FetchReason::ConfigRevision.wants_config());
        assert!(!FetchReason::Poll.wants_config());
    }

    #[test]
    fn test_queued_poll_upgraded_to_config_fetch() {
        let mut t = channel(false);
        t.start(0);
        assert_eq!(t.poll(0), Some(FetchReason::Initial));
        // Poll queues behind the slow initial fetch, then a newer cfg_rev arrives
        assert_eq!(t.poll(1_000), None);
        t.request_config();
        t.on_fetch_complete(1_100, true);
        assert_eq!(t.poll(1_200), Some(FetchReason::ConfigRevision));
        t.on_fetch_complete(1_250, true);

        // A queued config fetch is never downgraded by a poll
        t.request_config();
        assert_eq!(t.poll(2_200), Some(FetchReason::ConfigRevision));
    }

    #[test]
    fn test_failures_swallowed_and_retried() {
        let mut t = channel(false);
        t.start(0);
        t.poll(0);
        t.on_fetch_complete(30, false);
        assert_eq!(t.state(), TransportState::ConnectingPull);
        assert_eq!(t.fetch_failures(), 1);
        assert!(!t.has_succeeded());
        assert_eq!(t.poll(1_000), Some(FetchReason::Poll));
    }

    #[test]
    fn test_stale_after_refresh_window_without_success() {
        let mut t = channel(false);
        t.start(0);
        let mut now = 0;
        while now <= 15_000 {
            if t.poll(now).is_some() {
                t.on_fetch_complete(now, false);
            }
            now += 200;
        }
        assert!(!t.is_stale());
        t.poll(15_200);
        assert!(t.is_stale());

        // Any success clears it
        t.on_fetch_complete(15_300, true);
        assert!(!t.is_stale());
    }
}
