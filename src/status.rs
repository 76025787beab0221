//! Adaptive-interval polling of the backend sync status.
//!
//! The poller samples `GET /sync/status` and publishes the latest value on a
//! `watch` channel. The next poll's delay is chosen from the status that poll
//! produced, so a transition into or out of `syncing` changes the cadence on
//! the very next cycle rather than after a fixed period.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::retry::with_timeout;

/// Default timing for the status poller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollerDefaults;

impl PollerDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3);
    /// Cadence while the backend reports `syncing`.
    pub const FAST_INTERVAL: Duration = Duration::from_secs(2);
    /// Cadence for every other status, including failures.
    pub const SLOW_INTERVAL: Duration = Duration::from_secs(10);
}

/// Backend-reported synchronization state.
///
/// `Offline` is also the local verdict for any failed poll, and the value
/// consumers observe before the first poll completes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
    Offline,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: SyncStatus,
}

/// Tuning knobs for [`AdaptivePoller`].
#[derive(Clone, Debug)]
pub struct PollerOptions {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    pub fast_interval: Duration,
    pub slow_interval: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: PollerDefaults::CONNECT_TIMEOUT,
            attempt_timeout: PollerDefaults::ATTEMPT_TIMEOUT,
            fast_interval: PollerDefaults::FAST_INTERVAL,
            slow_interval: PollerDefaults::SLOW_INTERVAL,
        }
    }
}

/// Errors produced by a single poll attempt.
///
/// At runtime each of these collapses to `SyncStatus::Offline`; only client
/// construction surfaces a `Result`.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("failed to build http client: {0}")]
    Build(reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http status {0}")]
    HttpStatus(StatusCode),

    #[error("poll timed out")]
    Timeout,
}

/// Poll state: the shutdown signal plus the worker task.
struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Periodic status sampler that adjusts its own interval.
pub struct AdaptivePoller {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    options: PollerOptions,
    worker: Option<WorkerHandle>,
}

impl AdaptivePoller {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PollError> {
        Self::with_options(base_url, PollerOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        options: PollerOptions,
    ) -> Result<Self, PollError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(PollError::Build)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            options,
            worker: None,
        })
    }

    /// Attaches an `x-api-key` header to every poll request.
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Starts polling and returns the status channel, seeded `Offline`.
    ///
    /// The first poll fires immediately. A previous worker, if any, is torn
    /// down first. The worker stops on its own when every receiver clone is
    /// dropped.
    pub fn start(&mut self) -> watch::Receiver<SyncStatus> {
        self.stop();

        let (status_tx, status_rx) = watch::channel(SyncStatus::Offline);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let http = self.http.clone();
        let url = format!("{}/sync/status", self.base_url);
        let api_key = self.api_key.clone();
        let options = self.options.clone();

        let task = tokio::spawn(async move {
            poll_worker(http, url, api_key, options, status_tx, shutdown_rx).await;
        });

        self.worker = Some(WorkerHandle { shutdown_tx, task });
        status_rx
    }

    /// Cancels the pending poll timer. Idempotent; no further polls fire.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(());
            worker.task.abort();
        }
    }
}

impl Drop for AdaptivePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_worker(
    http: Client,
    url: String,
    api_key: Option<SecretString>,
    options: PollerOptions,
    status_tx: watch::Sender<SyncStatus>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let status = tokio::select! {
            _ = &mut shutdown_rx => return,
            polled = fetch_status(&http, &url, api_key.as_ref(), options.attempt_timeout) => {
                match polled {
                    Ok(status) => status,
                    Err(err) => {
                        debug!(error = %err, "status poll failed");
                        SyncStatus::Offline
                    }
                }
            }
        };

        if status_tx.send(status).is_err() {
            return;
        }

        tokio::select! {
            _ = &mut shutdown_rx => return,
            () = tokio::time::sleep(next_delay(status, &options)) => {}
        }
    }
}

/// Chooses the next poll delay from the status the last poll produced.
fn next_delay(status: SyncStatus, options: &PollerOptions) -> Duration {
    if status == SyncStatus::Syncing {
        options.fast_interval
    } else {
        options.slow_interval
    }
}

async fn fetch_status(
    http: &Client,
    url: &str,
    api_key: Option<&SecretString>,
    attempt_timeout: Duration,
) -> Result<SyncStatus, PollError> {
    let mut builder = http.get(url);
    if let Some(api_key) = api_key {
        builder = builder.header("x-api-key", api_key.expose_secret());
    }

    let response = with_timeout(attempt_timeout, builder.send())
        .await
        .map_err(|_| PollError::Timeout)??;

    let status = response.status();
    if !status.is_success() {
        return Err(PollError::HttpStatus(status));
    }

    let body: StatusResponse = with_timeout(attempt_timeout, response.json())
        .await
        .map_err(|_| PollError::Timeout)??;
    Ok(body.status)
}
