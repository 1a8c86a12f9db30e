//! # NeuralCast Common Library
//!
//! Shared bootstrap code for the NeuralCast tools:
//! - Error types
//! - TOML configuration loading and stations root resolution
//! - Atomic file writes
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod fs_util;
pub mod logging;

pub use error::{Error, Result};
