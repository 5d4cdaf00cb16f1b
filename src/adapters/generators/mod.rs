//! Generator adapters.
//!
//! The session talks to a single `Arc<dyn Generator>`, normally assembled as
//! `RecordReplayGenerator(RetryingGenerator(AnthropicGenerator))` in record
//! mode and a bare `RecordReplayGenerator` in replay mode.

mod anthropic;
mod record_replay;
mod retrying;
mod scripted;

pub use anthropic::AnthropicGenerator;
pub use record_replay::RecordReplayGenerator;
pub use retrying::RetryingGenerator;
pub use scripted::ScriptedGenerator;
