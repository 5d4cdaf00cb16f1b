pub mod candidate_validator;
pub mod convergence_evaluator;
pub mod prompt_builder;
pub mod session_controller;
pub mod syntax;
pub mod test_failures;

pub use candidate_validator::CandidateValidator;
pub use convergence_evaluator::{evaluate, ConvergencePolicy, Progress, Verdict};
pub use prompt_builder::{IncludedFile, PromptBuilder, PromptContext};
pub use session_controller::SessionController;
pub use syntax::{SyntaxChecker, SyntaxIssue, SyntaxLanguage};
pub use test_failures::FailureScanner;
