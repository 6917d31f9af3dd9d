//! # Vigil Stream Guard (vigil-sg)
//!
//! Pre-emptive content suppression for live media streams.
//!
//! **Purpose:** Convert content detections into suppression instructions,
//! hold them in a per-stream delay buffer where users can still cancel them,
//! and learn per-user threshold preferences from repeated overrides.
//!
//! **Architecture:** Per-stream session engine (decision → delay buffer →
//! output boundary) with a shared learning engine, an injected detection
//! source, an injected profile store, and an HTTP/SSE control surface.

pub mod analysis;
pub mod api;
pub mod db;
pub mod engine;
pub mod error;

pub use error::{Error, Result};
