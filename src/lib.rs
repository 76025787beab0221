//! Client-side realtime synchronization SDK for the studio authoring backend.
//!
//! The crate is organized by transport surface:
//! - `stream`: per-turn streamed chat responses and frame dispatch.
//! - `push`: long-lived server-push mutation subscription with reconnect.
//! - `status`: adaptive-interval sync status polling.
//! - `retry`: reconnect delay and timeout helpers shared across the SDK.
//!
//! The three channels are independent: they never share mutable state and may
//! interleave in any order relative to wall-clock time. Each channel is owned
//! by a spawned worker task that shuts down through an explicit signal, so
//! `stop()` and `abort()` always have a concrete handle to cancel.

/// Server-push mutation subscription with automatic reconnect.
pub mod push;
/// Reconnect delay policy and timeout helpers.
pub mod retry;
/// Sync status polling with an adaptive interval.
pub mod status;
/// Streamed chat turns: frame decoding, dispatch, and request lifecycle.
pub mod stream;
