//! Domain layer for covergen
//!
//! Core models of a coverage session, the error taxonomy, and the port
//! traits that adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{CoverError, CoverResult, GeneratorError};
