//! Port trait definitions (Hexagonal Architecture)
//!
//! The Session Controller only talks to its collaborators through these
//! traits:
//! - Generator: proposes test code for a prompt
//! - RecordingStore: content-addressed cache of Generator responses
//! - CommandRunner: runs the project's test command under a time budget

pub mod command_runner;
pub mod generator;
pub mod recording_store;

pub use command_runner::{CommandOutput, CommandRunner, CommandSpec};
pub use generator::{GenerationRequest, Generator, GeneratorResponse, Prompt};
pub use recording_store::RecordingStore;
