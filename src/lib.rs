//! covergen - coverage-driven test generation
//!
//! Given a source file, its test file and a command that runs the tests and
//! writes a coverage report, covergen asks a language model for new tests,
//! merges the ones that compile, pass and raise coverage, and repeats until
//! the target is met or a budget runs out. Model interactions can be
//! recorded and replayed so that runs are reproducible offline.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, error taxonomy and port traits
//! - **Adapters** (`adapters`): coverage decoders, process runner, recording
//!   stores and Generator backends
//! - **Service Layer** (`services`): validation, convergence and the session loop
//! - **Infrastructure Layer** (`infrastructure`): config, logging, run artifacts
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::{
    Config, CoverageFormat, CoverageSnapshot, SessionReport, SessionSpec, TerminalState,
};
pub use domain::{CoverError, CoverResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::SessionController;
