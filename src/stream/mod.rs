//! Streamed chat turn modules.
//!
//! - `client`: request lifecycle, cancellation, and frame dispatch.
//! - `decoder`: chunk-fragmentation-proof frame decoding.
//! - `proto`: wire frame and request body types shared with the backend.

/// Turn request lifecycle and event dispatch.
pub mod client;
/// Incremental frame decoding over arbitrary chunk boundaries.
pub mod decoder;
/// Wire frame and request types.
pub mod proto;
