//! # Vigil Common Library (vigil-common)
//!
//! Shared types and utilities for the Vigil stream-filtering workspace.
//!
//! **Purpose:** Domain model (detections, filter configuration, learned
//! preferences), the event system used at the output boundary, error types,
//! configuration loading, and timestamp helpers.

pub mod config;
pub mod error;
pub mod events;
pub mod time;
pub mod types;

pub use error::{Error, Result};
