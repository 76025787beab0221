//! Turn request lifecycle and frame dispatch.
//!
//! `SessionStreamClient` owns at most one in-flight turn at a time. Sending a
//! new message always retires the previous request first: its transport read
//! is cancelled and its decoder state dropped, so no callback belonging to a
//! superseded turn ever fires after the new one begins.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::retry::with_timeout;
use crate::stream::decoder::FrameDecoder;
use crate::stream::proto::{CompletePayload, MessageRequest, StreamFrame};

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// Default timeouts for turn requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamDefaults;

impl StreamDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Tuning knobs for [`SessionStreamClient`].
#[derive(Clone, Debug)]
pub struct SessionStreamOptions {
    pub connect_timeout: Duration,
    /// Maximum time to wait between chunks of a stream before treating the
    /// connection as failed. `None` relies solely on explicit [`abort`].
    ///
    /// [`abort`]: SessionStreamClient::abort
    pub idle_read_timeout: Option<Duration>,
}

impl Default for SessionStreamOptions {
    fn default() -> Self {
        Self {
            connect_timeout: StreamDefaults::CONNECT_TIMEOUT,
            idle_read_timeout: None,
        }
    }
}

/// Callback set receiving decoded frames for one turn.
///
/// Dispatch is synchronous and preserves frame arrival order. All methods
/// default to no-ops so consumers implement only what they render.
pub trait EventSink: Send + Sync {
    fn on_token(&self, _text: &str) {}
    fn on_action_trace(&self, _data: &Value) {}
    fn on_artifact(&self, _data: &Value) {}
    fn on_approval_needed(&self, _data: &Value) {}
    fn on_background_update(&self, _data: &Value) {}
    fn on_complete(&self, _done: &CompletePayload) {}
    fn on_error(&self, _message: &str) {}
}

/// Routes one decoded frame to its callback.
pub fn dispatch(frame: &StreamFrame, sink: &dyn EventSink) {
    match frame {
        StreamFrame::Token(payload) => sink.on_token(&payload.text),
        StreamFrame::ActionTrace(data) => sink.on_action_trace(data),
        StreamFrame::Artifact(data) => sink.on_artifact(data),
        StreamFrame::ApprovalNeeded(data) => sink.on_approval_needed(data),
        StreamFrame::BackgroundUpdate(data) => sink.on_background_update(data),
        StreamFrame::Complete(payload) => sink.on_complete(payload),
        StreamFrame::Error(payload) => sink.on_error(&payload.error),
    }
}

/// Errors produced while constructing the client.
///
/// Runtime failures of a turn are reported through [`EventSink::on_error`],
/// never through a `Result`: by the time they occur the caller has already
/// handed the turn off to the worker task.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to build http client: {0}")]
    Build(reqwest::Error),
}

/// State of one active turn: a cancellation handle plus the worker task.
///
/// Exactly zero or one instance exists per client. Dropping the sender after
/// `send(())` unblocks the worker at its next suspension point.
struct InFlightRequest {
    cancel_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Client for streamed conversational turns against a session endpoint.
pub struct SessionStreamClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    sink: Arc<dyn EventSink>,
    idle_read_timeout: Option<Duration>,
    in_flight: Option<InFlightRequest>,
}

impl SessionStreamClient {
    /// Creates a client against `base_url` delivering callbacks to `sink`.
    pub fn new(base_url: impl Into<String>, sink: Arc<dyn EventSink>) -> Result<Self, StreamError> {
        Self::with_options(base_url, sink, SessionStreamOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        sink: Arc<dyn EventSink>,
        options: SessionStreamOptions,
    ) -> Result<Self, StreamError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(StreamError::Build)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            sink,
            idle_read_timeout: options.idle_read_timeout,
            in_flight: None,
        })
    }

    /// Attaches an `x-api-key` header to every turn request.
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Starts a new turn, retiring any in-flight one first.
    ///
    /// The turn runs on a spawned task; completion is observable through the
    /// sink (`on_complete`, `on_error`) or by awaiting [`finished`].
    ///
    /// [`finished`]: SessionStreamClient::finished
    pub fn send_message(
        &mut self,
        session_id: &str,
        content: impl Into<String>,
        mentioned_entity_ids: Vec<String>,
        context_payload: Option<Value>,
    ) {
        self.abort();

        let url = format!("{}/sessions/{}/messages", self.base_url, session_id);
        let request = MessageRequest {
            content: content.into(),
            mentioned_entity_ids,
            context_payload,
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let http = self.http.clone();
        let api_key = self.api_key.clone();
        let sink = Arc::clone(&self.sink);
        let idle_read_timeout = self.idle_read_timeout;

        let task = tokio::spawn(async move {
            run_turn(http, url, api_key, request, sink, idle_read_timeout, cancel_rx).await;
        });

        self.in_flight = Some(InFlightRequest { cancel_tx, task });
    }

    /// Cancels the in-flight turn, if any.
    ///
    /// Cancellation is silent: no further callbacks fire for that turn and it
    /// is never reported through `on_error`. Safe to call repeatedly.
    pub fn abort(&mut self) {
        if let Some(request) = self.in_flight.take() {
            let _ = request.cancel_tx.send(());
        }
    }

    /// Waits until the current turn's worker task has wound down.
    pub async fn finished(&mut self) {
        if let Some(mut request) = self.in_flight.take() {
            let _ = (&mut request.task).await;
        }
    }
}

impl Drop for SessionStreamClient {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn run_turn(
    http: Client,
    url: String,
    api_key: Option<SecretString>,
    request: MessageRequest,
    sink: Arc<dyn EventSink>,
    idle_read_timeout: Option<Duration>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    // Biased so that a pending cancellation always wins over a chunk that
    // became ready in the same wakeup.
    tokio::select! {
        biased;
        _ = &mut cancel_rx => {
            debug!("turn cancelled before completion");
        }
        () = stream_turn(&http, &url, api_key.as_ref(), &request, sink.as_ref(), idle_read_timeout) => {}
    }
}

/// Drives one turn to its terminal state, dispatching every decoded frame.
///
/// Exactly one of `on_complete` / `on_error` fires per turn, unless the
/// server ends the stream without a terminal frame, in which case the turn
/// ends silently after the last dispatched frame.
async fn stream_turn(
    http: &Client,
    url: &str,
    api_key: Option<&SecretString>,
    request: &MessageRequest,
    sink: &dyn EventSink,
    idle_read_timeout: Option<Duration>,
) {
    let mut builder = http.post(url).json(request);
    if let Some(api_key) = api_key {
        builder = builder.header("x-api-key", api_key.expose_secret());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) => {
            sink.on_error(&format!("request failed: {err}"));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        sink.on_error(&format!("http status {status}: {}", summarize_error_body(&body)));
        return;
    }

    let mut stream = response.bytes_stream();
    let mut decoder = FrameDecoder::new();

    loop {
        let next = match idle_read_timeout {
            Some(limit) => match with_timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    sink.on_error(&format!("stream idle for {}ms", limit.as_millis()));
                    return;
                }
            },
            None => stream.next().await,
        };

        let Some(chunk) = next else {
            // Server closed the stream without a terminal frame.
            return;
        };

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                sink.on_error(&format!("stream read failed: {err}"));
                return;
            }
        };

        for frame in decoder.feed(&chunk) {
            let terminal = frame.is_terminal();
            dispatch(&frame, sink);
            if terminal {
                return;
            }
        }
    }
}

/// Extracts a human-readable message from a non-success response body.
fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::{dispatch, summarize_error_body, EventSink};
    use crate::stream::proto::{CompletePayload, ErrorPayload, StreamFrame, TokenPayload};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<String> {
            self.events.lock().expect("events lock").clone()
        }

        fn push(&self, event: String) {
            self.events.lock().expect("events lock").push(event);
        }
    }

    impl EventSink for RecordingSink {
        fn on_token(&self, text: &str) {
            self.push(format!("token:{text}"));
        }
        fn on_action_trace(&self, data: &serde_json::Value) {
            self.push(format!("action_trace:{data}"));
        }
        fn on_artifact(&self, _data: &serde_json::Value) {
            self.push("artifact".to_string());
        }
        fn on_approval_needed(&self, _data: &serde_json::Value) {
            self.push("approval_needed".to_string());
        }
        fn on_background_update(&self, _data: &serde_json::Value) {
            self.push("background_update".to_string());
        }
        fn on_complete(&self, done: &CompletePayload) {
            self.push(format!("complete:{}", done.message_id));
        }
        fn on_error(&self, message: &str) {
            self.push(format!("error:{message}"));
        }
    }

    #[test]
    fn dispatch_routes_each_variant_to_exactly_one_callback() {
        let sink = RecordingSink::default();
        let frames = [
            StreamFrame::Token(TokenPayload {
                text: "Hi".to_string(),
            }),
            StreamFrame::ActionTrace(json!({"tool": "search"})),
            StreamFrame::Artifact(json!({})),
            StreamFrame::ApprovalNeeded(json!({})),
            StreamFrame::BackgroundUpdate(json!({})),
            StreamFrame::Complete(CompletePayload {
                message_id: "m1".to_string(),
                session_id: "s1".to_string(),
                duration_ms: 120,
            }),
        ];
        for frame in &frames {
            dispatch(frame, &sink);
        }
        assert_eq!(
            sink.events(),
            vec![
                "token:Hi",
                "action_trace:{\"tool\":\"search\"}",
                "artifact",
                "approval_needed",
                "background_update",
                "complete:m1",
            ]
        );
    }

    #[test]
    fn dispatch_surfaces_error_frame_message() {
        let sink = RecordingSink::default();
        dispatch(
            &StreamFrame::Error(ErrorPayload {
                error: "model unavailable".to_string(),
            }),
            &sink,
        );
        assert_eq!(sink.events(), vec!["error:model unavailable"]);
    }

    #[test]
    fn summarize_prefers_error_field() {
        assert_eq!(
            summarize_error_body(r#"{"error":"session not found"}"#),
            "session not found"
        );
    }

    #[test]
    fn summarize_falls_back_to_message_field() {
        assert_eq!(summarize_error_body(r#"{"message":"try later"}"#), "try later");
    }

    #[test]
    fn summarize_truncates_opaque_bodies() {
        let body = "x".repeat(1000);
        assert_eq!(summarize_error_body(&body).len(), 220);
    }
}
