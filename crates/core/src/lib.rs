//! Core types and configuration for the MIA stream unifier.
//!
//! This crate provides shared types used across all other crates:
//! - Event kinds, parsed events and bucket keys
//! - Field groups of the unified snapshot
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::{CarryForwardConfig, UnifierConfig};
pub use error::{Error, Result};
pub use types::*;
