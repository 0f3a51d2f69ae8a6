//! Where snapshots come from: the countdown server over HTTP (with an SSE
//! push stream), or a local schedule file when running offline.

use crate::config::KioskConfig;
use crate::schedule::ScheduleFile;
use crate::snapshot::{ServerConfig, WireSnapshot};
use crate::sse::{PushEvent, SseParser};
use anyhow::{anyhow, Result};
use log::warn;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Url;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Messages from the push stream task to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    Opened,
    Event(PushEvent),
    Failed(String),
}

/// One fetch: the `/state` body, plus the display settings when asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub state: WireSnapshot,
    pub config: Option<ServerConfig>,
    /// Time spent before the `/state` request went out
    pub leading_ms: u64,
}

#[derive(Clone)]
pub enum SnapshotSource {
    Http(HttpSource),
    Schedule(ScheduleSource),
}

impl SnapshotSource {
    pub async fn fetch(&self, with_config: bool) -> Result<Payload> {
        match self {
            SnapshotSource::Http(s) => s.fetch(with_config).await,
            SnapshotSource::Schedule(s) => s.fetch().await,
        }
    }

    pub fn supports_push(&self) -> bool {
        matches!(self, SnapshotSource::Http(_))
    }

    /// Run the push stream until it fails. Only HTTP sources have one.
    pub async fn stream_events(&self, tx: UnboundedSender<PushMessage>) -> Result<()> {
        match self {
            SnapshotSource::Http(s) => s.stream_events(tx).await,
            SnapshotSource::Schedule(_) => Err(anyhow!("schedule files have no push channel")),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SnapshotSource::Http(s) => s.state_url.to_string(),
            SnapshotSource::Schedule(s) => s.path.display().to_string(),
        }
    }
}

#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    state_url: Url,
    config_url: Url,
    events_url: Url,
    fetch_timeout: Duration,
}

impl HttpSource {
    pub fn new(base_url: &str, config: &KioskConfig) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        let join = |path: &str| {
            Url::parse(&format!("{}{}", base, path))
                .map_err(|e| anyhow!("Invalid server URL {}: {}", base_url, e))
        };
        let state_url = join(&config.transport.state_path)?;
        let config_url = join(&config.transport.config_path)?;
        let events_url = join(&config.transport.events_path)?;

        // No overall client timeout: it would cut the long-lived event stream
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.transport.fetch_timeout_ms))
            .user_agent(concat!("kioskclock/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HttpSource {
            client,
            state_url,
            config_url,
            events_url,
            fetch_timeout: Duration::from_millis(config.transport.fetch_timeout_ms),
        })
    }

    pub fn state_url(&self) -> &Url {
        &self.state_url
    }

    pub fn config_url(&self) -> &Url {
        &self.config_url
    }

    pub fn events_url(&self) -> &Url {
        &self.events_url
    }

    /// Settings first, then state, so the state round trip is the one the
    /// time sample is taken from. A config failure leaves the previous
    /// settings in place and only costs a warning.
    pub async fn fetch(&self, with_config: bool) -> Result<Payload> {
        let started = Instant::now();
        let config = if with_config {
            match self.fetch_config().await {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("[Transport] Config fetch failed: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let leading_ms = started.elapsed().as_millis() as u64;

        let body = self.get(&self.state_url).await?;
        let state = WireSnapshot::parse(&body)
            .map_err(|e| anyhow!("Malformed snapshot: {}", e))?;
        Ok(Payload { state, config, leading_ms })
    }

    async fn fetch_config(&self) -> Result<ServerConfig> {
        let body = self.get(&self.config_url).await?;
        ServerConfig::parse(&body).map_err(|e| anyhow!("Malformed config: {}", e))
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>> {
        let body = self.client
            .get(url.clone())
            .header(CACHE_CONTROL, "no-store")
            .timeout(self.fetch_timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(body.to_vec())
    }

    pub async fn stream_events(&self, tx: UnboundedSender<PushMessage>) -> Result<()> {
        let mut response = self.client
            .get(self.events_url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;

        if tx.send(PushMessage::Opened).is_err() {
            return Ok(());
        }

        let mut parser = SseParser::new();
        while let Some(chunk) = response.chunk().await? {
            for event in parser.feed(&chunk) {
                if tx.send(PushMessage::Event(event.classify())).is_err() {
                    // Driver is gone, nothing left to notify
                    return Ok(());
                }
            }
        }
        Err(anyhow!("event stream closed by server"))
    }
}

#[derive(Clone)]
pub struct ScheduleSource {
    path: PathBuf,
    default_overrun_ms: u32,
}

impl ScheduleSource {
    pub fn new(path: PathBuf, config: &KioskConfig) -> Self {
        ScheduleSource {
            path,
            default_overrun_ms: config.target.overrun_ms,
        }
    }

    /// Re-read the schedule so edits are picked up on the next pull.
    /// Settings live in the same file, so they always come along.
    pub async fn fetch(&self) -> Result<Payload> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| anyhow!("Failed to read schedule {}: {}", self.path.display(), e))?;
        let file = ScheduleFile::parse(&text)?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        Ok(Payload {
            state: file.to_wire(now_ms, &chrono::Local, self.default_overrun_ms),
            config: Some(file.to_config()),
            leading_ms: 0,
        })
    }
}
