//! Session and Iteration records.
//!
//! A [`Session`] owns an ordered, append-only list of [`Iteration`]s. Each
//! iteration is immutable once pushed; feedback for the next prompt is derived
//! by folding over the history rather than kept as mutable state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::candidate::TestCandidate;
use super::coverage::{CoverageFormat, CoverageMeasurement, CoverageScope, CoverageSnapshot};
use super::recording::GroupHash;
use crate::domain::errors::CoverError;

/// Everything needed to run one session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub source_file: PathBuf,
    /// Test file the session merges candidates into.
    pub test_file: PathBuf,
    pub project_root: PathBuf,
    /// Context files rendered into every prompt, read once at session start.
    pub included_files: Vec<PathBuf>,
    pub test_command: String,
    pub test_command_dir: PathBuf,
    pub coverage_report_path: PathBuf,
    pub coverage_format: CoverageFormat,
    pub coverage_scope: CoverageScope,
    /// Target line coverage, 0-100.
    pub desired_coverage: f64,
    pub max_iterations: u32,
    pub max_wall_clock: Duration,
    /// Consecutive no-gain iterations after which the session stops early.
    pub stall_threshold: Option<u32>,
    /// Per-run cap on the test command, on top of the session budget.
    pub test_timeout: Option<Duration>,
    pub record_mode: bool,
    /// Extra environment for the test command.
    pub env: HashMap<String, String>,
    /// Free-form guidance appended to every prompt.
    pub additional_instructions: String,
}

/// How an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IterationOutcome {
    /// Iteration 0: the unmodified test file.
    Baseline,
    /// Compiled, passed, and raised covered lines. Kept in the test file.
    Accepted,
    /// Did not parse as a well-formed unit, or no code could be extracted.
    RejectedCompile,
    /// Identical to a test already run green in this session.
    RejectedDuplicate,
    /// Compiled and passed but covered no new lines.
    RejectedNoGain,
    /// Test command failed, timed out, or left no usable report.
    RejectedTestFailure,
}

impl IterationOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Accepted => "accepted",
            Self::RejectedCompile => "rejected-compile",
            Self::RejectedDuplicate => "rejected-duplicate",
            Self::RejectedNoGain => "rejected-no-gain",
            Self::RejectedTestFailure => "rejected-test-failure",
        }
    }

    /// Whether the candidate ran green, which makes it a duplicate target.
    pub const fn ran_green(self) -> bool {
        matches!(self, Self::Accepted | Self::RejectedNoGain)
    }

    pub const fn is_rejection(self) -> bool {
        !matches!(self, Self::Baseline | Self::Accepted)
    }
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failing test identifier with the output captured for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTest {
    pub identifier: String,
    pub output: String,
}

/// One generate-validate-execute-evaluate pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub number: u32,
    /// `None` for the baseline.
    pub candidate: Option<TestCandidate>,
    /// Test file content actually executed, if execution happened.
    pub merged_content: Option<String>,
    pub exit_code: Option<i32>,
    pub raw_report: Option<Vec<u8>>,
    pub snapshot: Option<CoverageSnapshot>,
    pub measurement: Option<CoverageMeasurement>,
    pub failures: Vec<FailedTest>,
    /// Why the candidate was rejected, fed back into the next prompt.
    pub diagnostic: Option<String>,
    pub outcome: IterationOutcome,
    pub duration: Duration,
}

impl Iteration {
    /// A rejected iteration that never reached the test command.
    pub fn rejected_before_run(
        number: u32,
        candidate: Option<TestCandidate>,
        outcome: IterationOutcome,
        diagnostic: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            number,
            candidate,
            merged_content: None,
            exit_code: None,
            raw_report: None,
            snapshot: None,
            measurement: None,
            failures: Vec::new(),
            diagnostic: Some(diagnostic.into()),
            outcome,
            duration,
        }
    }

    pub fn covered_lines(&self) -> Option<u64> {
        self.measurement.as_ref().map(|m| m.covered_lines)
    }
}

/// One item of diagnostic context carried into the next prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub iteration: u32,
    pub outcome: IterationOutcome,
    pub candidate_code: String,
    pub reason: String,
    pub failures: Vec<FailedTest>,
}

/// Feedback for the next prompt, derived from the history so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub entries: Vec<FeedbackEntry>,
}

impl Feedback {
    /// Fold the history into feedback: only the latest iteration counts, and
    /// only if it was rejected. Older failures have been superseded.
    pub fn from_history(iterations: &[Iteration]) -> Self {
        let entries = iterations
            .last()
            .filter(|last| last.outcome.is_rejection())
            .map(|last| FeedbackEntry {
                iteration: last.number,
                outcome: last.outcome,
                candidate_code: last
                    .candidate
                    .as_ref()
                    .map(|c| c.code.clone())
                    .unwrap_or_default(),
                reason: last.diagnostic.clone().unwrap_or_default(),
                failures: last.failures.clone(),
            })
            .into_iter()
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The live state of one run.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub spec: SessionSpec,
    pub group_hash: GroupHash,
    iterations: Vec<Iteration>,
}

impl Session {
    pub fn new(spec: SessionSpec, group_hash: GroupHash) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            group_hash,
            iterations: Vec::new(),
        }
    }

    pub fn record(&mut self, iteration: Iteration) {
        self.iterations.push(iteration);
    }

    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }

    /// Non-baseline iterations so far.
    pub fn iterations_used(&self) -> u32 {
        self.iterations
            .iter()
            .filter(|it| it.outcome != IterationOutcome::Baseline)
            .count() as u32
    }

    /// The most recent iteration whose coverage counts: the baseline or an
    /// accepted candidate.
    pub fn last_accepted(&self) -> Option<&Iteration> {
        self.iterations.iter().rev().find(|it| {
            matches!(
                it.outcome,
                IterationOutcome::Baseline | IterationOutcome::Accepted
            )
        })
    }

    /// Coverage of the test file as it currently stands.
    pub fn current_coverage(&self) -> f64 {
        self.last_accepted()
            .and_then(|it| it.measurement.as_ref())
            .map_or(0.0, CoverageMeasurement::percentage)
    }

    /// Iterations since the covered-line count last went up.
    pub fn consecutive_no_gain(&self) -> u32 {
        self.iterations
            .iter()
            .rev()
            .take_while(|it| {
                !matches!(
                    it.outcome,
                    IterationOutcome::Baseline | IterationOutcome::Accepted
                )
            })
            .count() as u32
    }

    /// Normalized bodies of every candidate that ran green so far.
    pub fn green_bodies(&self) -> Vec<String> {
        self.iterations
            .iter()
            .filter(|it| it.outcome.ran_green())
            .filter_map(|it| it.candidate.as_ref().map(TestCandidate::normalized_body))
            .collect()
    }

    pub fn into_iterations(self) -> Vec<Iteration> {
        self.iterations
    }
}

/// Where a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalState {
    Converged,
    Exhausted,
    Stalled,
    /// In-flight work was cancelled because the wall-clock budget ran out.
    TimedOut,
    /// A fatal error aborted the session.
    Failed,
}

impl TerminalState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
            Self::Stalled => "stalled",
            Self::TimedOut => "timed-out",
            Self::Failed => "failed",
        }
    }

    /// Process exit status for this terminal state.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Converged => 0,
            Self::Failed => 1,
            Self::Exhausted => 2,
            Self::Stalled => 3,
            Self::TimedOut => 4,
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished session reports, whatever the outcome.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub terminal: TerminalState,
    pub group_hash: Option<GroupHash>,
    pub desired_coverage: f64,
    pub baseline_coverage: Option<f64>,
    pub final_coverage: f64,
    pub iterations_used: u32,
    pub elapsed: Duration,
    pub iterations: Vec<Iteration>,
    /// Set when `terminal` is [`TerminalState::Failed`] or [`TerminalState::TimedOut`].
    pub error: Option<CoverError>,
}

impl SessionReport {
    /// How many iterations ended with each outcome, keyed by outcome tag.
    pub fn outcome_counts(&self) -> BTreeMap<&'static str, u32> {
        let mut counts = BTreeMap::new();
        for it in &self.iterations {
            *counts.entry(it.outcome.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::recording::PromptFingerprint;

    fn measured(covered: u64, total: u64) -> CoverageMeasurement {
        CoverageMeasurement {
            matched_path: Some("app.py".into()),
            covered_lines: covered,
            total_lines: total,
            missed_lines: vec![],
        }
    }

    fn iteration(number: u32, outcome: IterationOutcome, covered: Option<u64>) -> Iteration {
        let candidate = (number > 0).then(|| {
            TestCandidate::new(
                format!("def test_{number}(): pass"),
                number,
                PromptFingerprint::of_bytes(&[number as u8]),
            )
        });
        Iteration {
            number,
            candidate,
            merged_content: None,
            exit_code: Some(0),
            raw_report: None,
            snapshot: None,
            measurement: covered.map(|c| measured(c, 10)),
            failures: vec![],
            diagnostic: outcome.is_rejection().then(|| format!("reason {number}")),
            outcome,
            duration: Duration::ZERO,
        }
    }

    fn spec() -> SessionSpec {
        SessionSpec {
            source_file: "app.py".into(),
            test_file: "test_app.py".into(),
            project_root: ".".into(),
            included_files: Vec::new(),
            test_command: "true".into(),
            test_command_dir: ".".into(),
            coverage_report_path: "coverage.xml".into(),
            coverage_format: CoverageFormat::Cobertura,
            coverage_scope: CoverageScope::Target,
            desired_coverage: 70.0,
            max_iterations: 3,
            max_wall_clock: Duration::from_secs(60),
            stall_threshold: None,
            test_timeout: None,
            record_mode: false,
            env: HashMap::new(),
            additional_instructions: String::new(),
        }
    }

    #[test]
    fn feedback_comes_from_the_latest_rejection_only() {
        let history = vec![
            iteration(0, IterationOutcome::Baseline, Some(0)),
            iteration(1, IterationOutcome::RejectedCompile, None),
            iteration(2, IterationOutcome::RejectedTestFailure, None),
        ];
        let feedback = Feedback::from_history(&history);
        assert_eq!(feedback.entries.len(), 1);
        assert_eq!(feedback.entries[0].iteration, 2);
        assert_eq!(feedback.entries[0].reason, "reason 2");

        let accepted = vec![
            iteration(0, IterationOutcome::Baseline, Some(0)),
            iteration(1, IterationOutcome::Accepted, Some(5)),
        ];
        assert!(Feedback::from_history(&accepted).is_empty());
    }

    #[test]
    fn no_gain_counter_resets_on_acceptance() {
        let mut session = Session::new(spec(), GroupHash::compute(b"a", b"b"));
        session.record(iteration(0, IterationOutcome::Baseline, Some(0)));
        session.record(iteration(1, IterationOutcome::RejectedNoGain, Some(0)));
        session.record(iteration(2, IterationOutcome::RejectedCompile, None));
        assert_eq!(session.consecutive_no_gain(), 2);

        session.record(iteration(3, IterationOutcome::Accepted, Some(4)));
        assert_eq!(session.consecutive_no_gain(), 0);
        assert_eq!(session.iterations_used(), 3);
        assert!((session.current_coverage() - 40.0).abs() < f64::EPSILON);
        assert_eq!(session.green_bodies().len(), 2);
    }

    #[test]
    fn report_counts_outcomes_by_tag() {
        let report = SessionReport {
            session_id: Uuid::new_v4(),
            terminal: TerminalState::Exhausted,
            group_hash: None,
            desired_coverage: 70.0,
            baseline_coverage: Some(0.0),
            final_coverage: 40.0,
            iterations_used: 3,
            elapsed: Duration::ZERO,
            iterations: vec![
                iteration(0, IterationOutcome::Baseline, Some(0)),
                iteration(1, IterationOutcome::RejectedCompile, None),
                iteration(2, IterationOutcome::Accepted, Some(4)),
                iteration(3, IterationOutcome::RejectedCompile, None),
            ],
            error: None,
        };
        let counts = report.outcome_counts();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["baseline"], 1);
        assert_eq!(counts["accepted"], 1);
        assert_eq!(counts["rejected-compile"], 2);
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes: std::collections::HashSet<i32> = [
            TerminalState::Converged,
            TerminalState::Exhausted,
            TerminalState::Stalled,
            TerminalState::TimedOut,
            TerminalState::Failed,
        ]
        .into_iter()
        .map(TerminalState::exit_code)
        .collect();
        assert_eq!(codes.len(), 5);
        assert_eq!(TerminalState::Converged.exit_code(), 0);
    }
}
