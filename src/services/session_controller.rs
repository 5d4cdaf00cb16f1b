//! Session Controller.
//!
//! Drives one session end to end: a baseline run (iteration 0), then
//! generate, validate, merge, execute, measure and evaluate until the
//! Convergence Evaluator returns a terminal verdict or a fatal error aborts
//! the run. Every iteration is recorded, whatever its outcome.
//!
//! The wall-clock budget is enforced here rather than trusted to the child:
//! each Generator call and test run is bounded by the time remaining, and
//! running out while work is in flight ends the session as `TimedOut`. A
//! budget found spent before the next Generator call ends it as `Exhausted`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::candidate_validator::CandidateValidator;
use super::convergence_evaluator::{evaluate, ConvergencePolicy, Progress, Verdict};
use super::prompt_builder::{IncludedFile, PromptBuilder, PromptContext};
use super::test_failures::{tail, FailureScanner};
use crate::adapters::coverage::{read_fresh_report, CoverageParser};
use crate::domain::errors::{CoverError, CoverResult, PartialOutput};
use crate::domain::models::{
    CoverageMeasurement, CoverageSnapshot, Feedback, GroupHash, Iteration, IterationOutcome,
    Session, SessionReport, SessionSpec, TerminalState, TestCandidate,
};
use crate::domain::ports::{
    CommandOutput, CommandRunner, CommandSpec, GenerationRequest, Generator, GeneratorResponse,
};

/// Slack given to a runner past its own deadline before the run is dropped.
const RUNNER_GRACE: Duration = Duration::from_secs(5);

/// Captured output kept in a `BaselineFailed` error.
const MAX_BASELINE_OUTPUT: usize = 8000;

// ---------------------------------------------------------------------------
// Test runs
// ---------------------------------------------------------------------------

/// How one invocation of the test command ended, short of a fatal error.
#[derive(Debug)]
enum TestRun {
    Completed(CommandOutput),
    /// The per-run cap expired while session budget remained.
    CapExpired {
        timeout: Duration,
        partial: PartialOutput,
    },
}

/// Pick the runner timeout: the remaining budget, or the per-run cap if it
/// is tighter. The flag says whether the cap was chosen.
fn run_limit(remaining: Duration, cap: Option<Duration>) -> (Duration, bool) {
    match cap {
        Some(cap) if cap < remaining => (cap, true),
        _ => (remaining, false),
    }
}

fn budget_exceeded(spec: &SessionSpec, partial: PartialOutput) -> CoverError {
    CoverError::TimedOut {
        timeout: spec.max_wall_clock,
        partial,
    }
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(
        || "test command was terminated by a signal".to_string(),
        |code| format!("test command exited with status {code}"),
    )
}

const fn terminal_for(verdict: Verdict) -> Option<TerminalState> {
    match verdict {
        Verdict::Converged => Some(TerminalState::Converged),
        Verdict::Exhausted => Some(TerminalState::Exhausted),
        Verdict::Stalled => Some(TerminalState::Stalled),
        Verdict::Retrying => None,
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Orchestrates sessions against a Generator and a test-command runner.
///
/// The Generator passed in is expected to already carry any recording and
/// retry behavior; the controller treats every error it returns as fatal.
pub struct SessionController {
    generator: Arc<dyn Generator>,
    runner: Arc<dyn CommandRunner>,
    prompts: PromptBuilder,
    failures: FailureScanner,
}

impl SessionController {
    pub fn new(generator: Arc<dyn Generator>, runner: Arc<dyn CommandRunner>) -> CoverResult<Self> {
        let regex_error = |e: regex::Error| CoverError::Config(format!("invalid pattern: {e}"));
        Ok(Self {
            generator,
            runner,
            prompts: PromptBuilder::new().map_err(regex_error)?,
            failures: FailureScanner::new().map_err(regex_error)?,
        })
    }

    /// Run one session to a terminal state.
    ///
    /// Never fails: fatal errors end the session as `Failed` (or `TimedOut`)
    /// and are carried in the report.
    pub async fn run(&self, spec: SessionSpec) -> SessionReport {
        let started = Instant::now();

        let (source, test, included) = match read_inputs(&spec).await {
            Ok(inputs) => inputs,
            Err(error) => {
                warn!(error = %error, "could not read session inputs");
                return SessionReport {
                    session_id: Uuid::new_v4(),
                    terminal: TerminalState::Failed,
                    group_hash: None,
                    desired_coverage: spec.desired_coverage,
                    baseline_coverage: None,
                    final_coverage: 0.0,
                    iterations_used: 0,
                    elapsed: started.elapsed(),
                    iterations: Vec::new(),
                    error: Some(error),
                };
            }
        };

        let group_hash = GroupHash::compute(source.as_bytes(), test.as_bytes());
        let mut session = Session::new(spec, group_hash);
        let span = info_span!(
            "session",
            session_id = %session.id,
            group_hash = session.group_hash.short(),
        );

        let outcome = self
            .drive(&mut session, &source, &included, started)
            .instrument(span.clone())
            .await;
        let (terminal, error) = match outcome {
            Ok(terminal) => (terminal, None),
            Err(error @ CoverError::TimedOut { .. }) => (TerminalState::TimedOut, Some(error)),
            Err(error) => (TerminalState::Failed, Some(error)),
        };

        let report = SessionReport {
            session_id: session.id,
            terminal,
            group_hash: Some(session.group_hash.clone()),
            desired_coverage: session.spec.desired_coverage,
            baseline_coverage: session
                .iterations()
                .first()
                .and_then(|it| it.measurement.as_ref())
                .map(CoverageMeasurement::percentage),
            final_coverage: session.current_coverage(),
            iterations_used: session.iterations_used(),
            elapsed: started.elapsed(),
            iterations: session.into_iterations(),
            error,
        };

        span.in_scope(|| match &report.error {
            None => info!(
                terminal = %report.terminal,
                coverage = report.final_coverage,
                iterations = report.iterations_used,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "session finished"
            ),
            Some(error) => warn!(
                terminal = %report.terminal,
                coverage = report.final_coverage,
                iterations = report.iterations_used,
                elapsed_ms = report.elapsed.as_millis() as u64,
                error = %error,
                "session aborted"
            ),
        });
        report
    }

    async fn drive(
        &self,
        session: &mut Session,
        source: &str,
        included: &[IncludedFile],
        started: Instant,
    ) -> CoverResult<TerminalState> {
        let policy = ConvergencePolicy {
            desired_coverage: session.spec.desired_coverage,
            max_iterations: session.spec.max_iterations,
            max_wall_clock: session.spec.max_wall_clock,
            stall_threshold: session.spec.stall_threshold,
        };
        info!(
            source = %session.spec.source_file.display(),
            test = %session.spec.test_file.display(),
            desired = policy.desired_coverage,
            max_iterations = policy.max_iterations,
            generator = self.generator.name(),
            "session started"
        );

        let baseline = self
            .baseline(&session.spec, started)
            .instrument(info_span!("iteration", iteration = 0))
            .await?;
        info!(
            coverage = baseline.measurement.as_ref().map_or(0.0, CoverageMeasurement::percentage),
            "baseline established"
        );
        session.record(baseline);

        loop {
            let verdict = evaluate(&policy, &progress(session, started));
            if let Some(terminal) = terminal_for(verdict) {
                return Ok(terminal);
            }

            let number = session.iterations_used() + 1;
            let Some(iteration) = self
                .iterate(session, source, included, number, started)
                .instrument(info_span!("iteration", iteration = number))
                .await?
            else {
                info!(iteration = number, "wall-clock budget spent before generation");
                return Ok(TerminalState::Exhausted);
            };
            info!(
                iteration = number,
                outcome = %iteration.outcome,
                covered_lines = iteration.covered_lines(),
                duration_ms = iteration.duration.as_millis() as u64,
                "iteration recorded"
            );
            session.record(iteration);
        }
    }

    // -----------------------------------------------------------------------
    // Iteration 0
    // -----------------------------------------------------------------------

    async fn baseline(&self, spec: &SessionSpec, started: Instant) -> CoverResult<Iteration> {
        let iteration_started = Instant::now();
        let output = match self.run_tests(spec, started).await? {
            TestRun::Completed(output) => output,
            TestRun::CapExpired { timeout, partial } => {
                return Err(CoverError::BaselineFailed {
                    exit_code: None,
                    output: format!(
                        "timed out after {}s\n{}",
                        timeout.as_secs_f64(),
                        tail(&partial.stdout, MAX_BASELINE_OUTPUT)
                    ),
                });
            }
        };
        if !output.success() {
            return Err(CoverError::BaselineFailed {
                exit_code: output.exit_code,
                output: tail(&output.combined(), MAX_BASELINE_OUTPUT),
            });
        }

        let (raw, snapshot) = read_snapshot(spec, output.started_at).await?;
        let measurement = snapshot.measure(&spec.source_file, spec.coverage_scope);
        Ok(Iteration {
            number: 0,
            candidate: None,
            merged_content: None,
            exit_code: output.exit_code,
            raw_report: Some(raw),
            snapshot: Some(snapshot),
            measurement: Some(measurement),
            failures: Vec::new(),
            diagnostic: None,
            outcome: IterationOutcome::Baseline,
            duration: iteration_started.elapsed(),
        })
    }

    // -----------------------------------------------------------------------
    // Iterations 1..
    // -----------------------------------------------------------------------

    async fn iterate(
        &self,
        session: &Session,
        source: &str,
        included: &[IncludedFile],
        number: u32,
        started: Instant,
    ) -> CoverResult<Option<Iteration>> {
        let iteration_started = Instant::now();
        let spec = &session.spec;
        let current = read_utf8(&spec.test_file).await?;
        let validator = CandidateValidator::for_test_file(&spec.test_file);

        let feedback = Feedback::from_history(session.iterations());
        let missed: &[u32] = session
            .last_accepted()
            .and_then(|it| it.measurement.as_ref())
            .map(|m| m.missed_lines.as_slice())
            .unwrap_or_default();
        let source_path = display_path(spec, &spec.source_file);
        let test_path = display_path(spec, &spec.test_file);
        let (prompt, fingerprint) = self.prompts.build(&PromptContext {
            source_path: &source_path,
            source,
            test_path: &test_path,
            test: &current,
            included_files: included,
            language: validator.checker().label(),
            current_coverage: session.current_coverage(),
            desired_coverage: spec.desired_coverage,
            missed_lines: missed,
            feedback: &feedback,
            additional_instructions: &spec.additional_instructions,
        });
        debug!(fingerprint = fingerprint.short(), "requesting candidate");

        let request = GenerationRequest {
            group: session.group_hash.clone(),
            fingerprint: fingerprint.clone(),
            prompt,
        };
        let Some(response) = self.generate(&request, spec, started).await? else {
            return Ok(None);
        };
        debug!(
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "candidate received"
        );

        let code = match self.prompts.extract_candidate(&response.content) {
            Ok(code) => code,
            Err(error) => {
                return Ok(Some(Iteration::rejected_before_run(
                    number,
                    Some(TestCandidate::new(response.content, number, fingerprint)),
                    IterationOutcome::RejectedCompile,
                    error.to_string(),
                    iteration_started.elapsed(),
                )));
            }
        };
        let candidate = TestCandidate::new(code, number, fingerprint);

        let merged = match validator.validate(&current, &candidate, &session.green_bodies()) {
            Ok(merged) => merged,
            Err(error @ CoverError::Duplicate) => {
                debug!("candidate duplicates an earlier test");
                return Ok(Some(Iteration::rejected_before_run(
                    number,
                    Some(candidate),
                    IterationOutcome::RejectedDuplicate,
                    error.to_string(),
                    iteration_started.elapsed(),
                )));
            }
            Err(error @ CoverError::MalformedCandidate(_)) => {
                debug!(error = %error, "candidate failed structural validation");
                return Ok(Some(Iteration::rejected_before_run(
                    number,
                    Some(candidate),
                    IterationOutcome::RejectedCompile,
                    error.to_string(),
                    iteration_started.elapsed(),
                )));
            }
            Err(error) => return Err(error),
        };

        write_utf8(&spec.test_file, &merged).await?;
        let result = self.execute(session, candidate, merged, started).await;
        let keep = matches!(&result, Ok(it) if it.outcome == IterationOutcome::Accepted);
        if !keep {
            if let Err(restore) = write_utf8(&spec.test_file, &current).await {
                if result.is_ok() {
                    return Err(restore);
                }
                warn!(error = %restore, "could not restore test file");
            }
        }
        result.map(|mut iteration| {
            iteration.duration = iteration_started.elapsed();
            Some(iteration)
        })
    }

    /// Run the suite against the merged file and classify the result.
    async fn execute(
        &self,
        session: &Session,
        candidate: TestCandidate,
        merged: String,
        started: Instant,
    ) -> CoverResult<Iteration> {
        let spec = &session.spec;
        let mut iteration = Iteration {
            number: candidate.iteration,
            candidate: Some(candidate),
            merged_content: Some(merged),
            exit_code: None,
            raw_report: None,
            snapshot: None,
            measurement: None,
            failures: Vec::new(),
            diagnostic: None,
            outcome: IterationOutcome::RejectedTestFailure,
            duration: Duration::ZERO,
        };

        let output = match self.run_tests(spec, started).await? {
            TestRun::Completed(output) => output,
            TestRun::CapExpired { timeout, partial } => {
                iteration.failures =
                    self.failures
                        .scan(&spec.test_command, &partial.stdout, &partial.stderr);
                iteration.diagnostic = Some(format!(
                    "test command exceeded the per-run limit of {}s",
                    timeout.as_secs_f64()
                ));
                return Ok(iteration);
            }
        };

        iteration.exit_code = output.exit_code;
        if !output.success() {
            iteration.failures = self
                .failures
                .scan(&spec.test_command, &output.stdout, &output.stderr);
            iteration.diagnostic = Some(describe_exit(output.exit_code));
            return Ok(iteration);
        }

        let (raw, snapshot) = match read_snapshot(spec, output.started_at).await {
            Ok(report) => report,
            Err(error) if !error.is_fatal() => {
                warn!(error = %error, "no usable coverage report after test run");
                iteration.diagnostic = Some(error.to_string());
                return Ok(iteration);
            }
            Err(error) => return Err(error),
        };

        let measurement = snapshot.measure(&spec.source_file, spec.coverage_scope);
        let previous = session
            .last_accepted()
            .and_then(Iteration::covered_lines)
            .unwrap_or(0);
        if measurement.covered_lines > previous {
            iteration.outcome = IterationOutcome::Accepted;
        } else {
            iteration.outcome = IterationOutcome::RejectedNoGain;
            iteration.diagnostic = Some(format!(
                "tests passed but covered lines stayed at {} of {}",
                measurement.covered_lines, measurement.total_lines
            ));
        }
        iteration.raw_report = Some(raw);
        iteration.snapshot = Some(snapshot);
        iteration.measurement = Some(measurement);
        Ok(iteration)
    }

    // -----------------------------------------------------------------------
    // Budget-bounded collaborators
    // -----------------------------------------------------------------------

    async fn generate(
        &self,
        request: &GenerationRequest,
        spec: &SessionSpec,
        started: Instant,
    ) -> CoverResult<Option<GeneratorResponse>> {
        // Nothing is in flight yet, so a spent budget is not a cancellation.
        let Some(remaining) = remaining_budget(spec, started) else {
            return Ok(None);
        };
        tokio::time::timeout(remaining, self.generator.generate(request))
            .await
            .map_err(|_| budget_exceeded(spec, PartialOutput::default()))?
            .map(Some)
    }

    async fn run_tests(&self, spec: &SessionSpec, started: Instant) -> CoverResult<TestRun> {
        let remaining = remaining_budget(spec, started)
            .ok_or_else(|| budget_exceeded(spec, PartialOutput::default()))?;
        let (timeout, capped) = run_limit(remaining, spec.test_timeout);
        let command = CommandSpec {
            command: spec.test_command.clone(),
            cwd: spec.test_command_dir.clone(),
            env: spec.env.clone(),
            timeout,
        };
        debug!(
            command = %command.command,
            timeout_ms = timeout.as_millis() as u64,
            "running test command"
        );

        let run = tokio::time::timeout(timeout + RUNNER_GRACE, self.runner.run(&command))
            .await
            .map_err(|_| budget_exceeded(spec, PartialOutput::default()))?;
        match run {
            Ok(output) => Ok(TestRun::Completed(output)),
            Err(CoverError::TimedOut { timeout, partial }) if capped => {
                Ok(TestRun::CapExpired { timeout, partial })
            }
            Err(CoverError::TimedOut { partial, .. }) => Err(budget_exceeded(spec, partial)),
            Err(error) => Err(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn progress(session: &Session, started: Instant) -> Progress {
    Progress {
        coverage: session.current_coverage(),
        iterations_used: session.iterations_used(),
        elapsed: started.elapsed(),
        consecutive_no_gain: session.consecutive_no_gain(),
    }
}

fn remaining_budget(spec: &SessionSpec, started: Instant) -> Option<Duration> {
    spec.max_wall_clock
        .checked_sub(started.elapsed())
        .filter(|remaining| !remaining.is_zero())
}

/// Path relative to the project root when it lies inside it.
fn display_path(spec: &SessionSpec, path: &Path) -> String {
    path.strip_prefix(&spec.project_root)
        .unwrap_or(path)
        .display()
        .to_string()
}

async fn read_inputs(spec: &SessionSpec) -> CoverResult<(String, String, Vec<IncludedFile>)> {
    let source = read_utf8(&spec.source_file).await?;
    let test = read_utf8(&spec.test_file).await?;
    let mut included = Vec::with_capacity(spec.included_files.len());
    for path in &spec.included_files {
        included.push(IncludedFile {
            path: display_path(spec, path),
            content: read_utf8(path).await?,
        });
    }
    Ok((source, test, included))
}

async fn read_utf8(path: &Path) -> CoverResult<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CoverError::io(path, e))?;
    String::from_utf8(bytes).map_err(|e| {
        CoverError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.utf8_error()),
        )
    })
}

async fn write_utf8(path: &Path, content: &str) -> CoverResult<()> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| CoverError::io(path, e))
}

async fn read_snapshot(
    spec: &SessionSpec,
    not_before: SystemTime,
) -> CoverResult<(Vec<u8>, CoverageSnapshot)> {
    let raw = read_fresh_report(&spec.coverage_report_path, not_before).await?;
    let snapshot = CoverageParser::new(spec.coverage_format).parse(&raw)?;
    Ok((raw, snapshot))
}
