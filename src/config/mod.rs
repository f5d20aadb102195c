//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (timeouts, retry policy, scan defaults)
//! - The `Config` struct built once at startup and passed to each component

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::Config;
