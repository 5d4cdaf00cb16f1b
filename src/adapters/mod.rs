//! Adapters implementing the domain ports.

pub mod coverage;
pub mod generators;
pub mod process;
pub mod recording;
