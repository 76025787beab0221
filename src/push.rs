//! Persistent server-push subscription for out-of-band mutation notices.
//!
//! The listener's only job is "something changed, go refetch": it never
//! interprets payload details beyond the `type` tag. A background worker owns
//! the connection and reconnects indefinitely after any failure until
//! [`PushEventListener::stop`] is called.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::retry::ReconnectPolicy;
use crate::stream::decoder::DataLineBuffer;

/// Payload tag that triggers a refresh notice.
const GRAPH_UPDATED: &str = "GRAPH_UPDATED";

/// Default timing for the push subscription.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PushDefaults;

impl PushDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
}

/// Tuning knobs for [`PushEventListener`].
#[derive(Clone, Debug)]
pub struct PushListenerOptions {
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for PushListenerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: PushDefaults::CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::fixed(PushDefaults::RECONNECT_DELAY),
        }
    }
}

/// Notice that remote state changed and should be refetched.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PushNotice {
    GraphUpdated,
}

/// Errors produced by the push transport.
///
/// These never escape to the consumer at runtime; the worker absorbs them and
/// schedules a reconnect. Only client construction surfaces a `Result`.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to build http client: {0}")]
    Build(reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http status {0}")]
    HttpStatus(StatusCode),
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Subscription state: the shutdown signal plus the worker task.
struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Long-lived listener for server-pushed mutation notifications.
pub struct PushEventListener {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    reconnect: ReconnectPolicy,
    worker: Option<WorkerHandle>,
}

impl PushEventListener {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PushError> {
        Self::with_options(base_url, PushListenerOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        options: PushListenerOptions,
    ) -> Result<Self, PushError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(PushError::Build)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            reconnect: options.reconnect,
            worker: None,
        })
    }

    /// Attaches an `x-api-key` header to the subscription request.
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Opens the subscription and returns the notice channel.
    ///
    /// A previous worker, if any, is torn down first. The worker stops on its
    /// own when every receiver clone is dropped.
    pub fn start(&mut self) -> mpsc::UnboundedReceiver<PushNotice> {
        self.stop();

        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let http = self.http.clone();
        let url = format!("{}/project/events", self.base_url);
        let api_key = self.api_key.clone();
        let reconnect = self.reconnect.clone();

        let task = tokio::spawn(async move {
            subscription_worker(http, url, api_key, reconnect, notices_tx, shutdown_rx).await;
        });

        self.worker = Some(WorkerHandle { shutdown_tx, task });
        notices_rx
    }

    /// Tears down the subscription: cancels any pending reconnect and closes
    /// the active connection. Idempotent; no notice or reconnect follows.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(());
            worker.task.abort();
        }
    }
}

impl Drop for PushEventListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn subscription_worker(
    http: Client,
    url: String,
    api_key: Option<SecretString>,
    reconnect: ReconnectPolicy,
    notices_tx: mpsc::UnboundedSender<PushNotice>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut failures: usize = 0;

    loop {
        let outcome = tokio::select! {
            _ = &mut shutdown_rx => return,
            outcome = run_subscription(&http, &url, api_key.as_ref(), &notices_tx) => outcome,
        };

        match outcome {
            Ok(()) => {
                debug!("push subscription closed");
                failures = 0;
            }
            Err(err) => {
                failures += 1;
                warn!(error = %err, failures, "push subscription failed");
            }
        }

        if notices_tx.is_closed() {
            return;
        }

        let delay = reconnect.delay_for_attempt(failures.max(1));
        tokio::select! {
            _ = &mut shutdown_rx => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Reads one subscription connection until it closes or fails.
async fn run_subscription(
    http: &Client,
    url: &str,
    api_key: Option<&SecretString>,
    notices_tx: &mpsc::UnboundedSender<PushNotice>,
) -> Result<(), PushError> {
    let mut builder = http.get(url);
    if let Some(api_key) = api_key {
        builder = builder.header("x-api-key", api_key.expose_secret());
    }

    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PushError::HttpStatus(status));
    }

    let mut stream = response.bytes_stream();
    let mut lines = DataLineBuffer::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for payload in lines.feed(&chunk) {
            if let Some(notice) = notice_from_payload(&payload) {
                if notices_tx.send(notice).is_err() {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// Maps one pushed payload to a notice, ignoring everything unrecognized.
fn notice_from_payload(payload: &[u8]) -> Option<PushNotice> {
    match serde_json::from_slice::<PushEnvelope>(payload) {
        Ok(envelope) if envelope.kind == GRAPH_UPDATED => Some(PushNotice::GraphUpdated),
        Ok(envelope) => {
            debug!(kind = %envelope.kind, "ignoring push payload");
            None
        }
        Err(err) => {
            debug!(error = %err, "ignoring unparseable push payload");
            None
        }
    }
}
