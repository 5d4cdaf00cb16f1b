pub mod candidate;
pub mod config;
pub mod coverage;
pub mod recording;
pub mod session;

pub use candidate::{normalize_body, TestCandidate};
pub use config::{
    ArtifactsConfig, Config, GeneratorConfig, LoggingConfig, PolicyConfig, RecordingConfig,
    RetryConfig,
};
pub use coverage::{
    checked_sum, CounterOverflow, CoverageFormat, CoverageMeasurement, CoverageScope,
    CoverageSnapshot, FileCoverage,
};
pub use recording::{GroupHash, PromptFingerprint, RecordedResponse};
pub use session::{
    FailedTest, Feedback, FeedbackEntry, Iteration, IterationOutcome, Session, SessionReport,
    SessionSpec, TerminalState,
};
