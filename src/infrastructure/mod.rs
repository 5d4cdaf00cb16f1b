//! Infrastructure layer module
//!
//! - Configuration management
//! - Logging infrastructure
//! - Run artifacts (results store, text report)

pub mod artifacts;
pub mod config;
pub mod logging;
