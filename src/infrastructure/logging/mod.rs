//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - Console output (pretty or JSON) on stderr
//! - JSON run log via tracing-appender

pub mod logger;

pub use logger::{LogFormat, LoggerImpl, LOG_FILE_NAME};
