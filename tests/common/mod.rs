//! Common test utilities for integration tests
//!
//! Provides a throwaway Python project, a Cobertura report generator for it,
//! and a scripted test-command runner.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use covergen::domain::errors::{CoverError, CoverResult, PartialOutput};
use covergen::domain::models::{CoverageFormat, CoverageScope, SessionSpec};
use covergen::domain::ports::{CommandOutput, CommandRunner, CommandSpec};

/// Ten statements, one per line.
pub const CALC_SOURCE: &str = "\
def add(a, b):
    return a + b
def sub(a, b):
    return a - b
def mul(a, b):
    return a * b
def div(a, b):
    if b == 0:
        raise ZeroDivisionError
    return a / b
";

pub const CALC_TESTS: &str = "from calc import add, sub, mul, div\n";

pub const CALC_LINES: u64 = 10;

/// A temporary project holding `calc.py` and `test_calc.py`.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::write(dir.path().join("calc.py"), CALC_SOURCE).expect("write source");
        std::fs::write(dir.path().join("test_calc.py"), CALC_TESTS).expect("write tests");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn source(&self) -> PathBuf {
        self.root().join("calc.py")
    }

    pub fn test_file(&self) -> PathBuf {
        self.root().join("test_calc.py")
    }

    pub fn report(&self) -> PathBuf {
        self.root().join("coverage.xml")
    }

    pub fn recordings(&self) -> PathBuf {
        self.root().join(".covergen").join("recordings")
    }

    pub fn test_contents(&self) -> String {
        std::fs::read_to_string(self.test_file()).expect("read test file")
    }

    pub fn reset_tests(&self) {
        std::fs::write(self.test_file(), CALC_TESTS).expect("reset test file");
    }

    /// A session over this project with a generous budget.
    pub fn spec(&self, desired_coverage: f64, max_iterations: u32) -> SessionSpec {
        SessionSpec {
            source_file: self.source(),
            test_file: self.test_file(),
            project_root: self.root().to_path_buf(),
            included_files: Vec::new(),
            test_command: "pytest --cov=. --cov-report=xml".into(),
            test_command_dir: self.root().to_path_buf(),
            coverage_report_path: self.report(),
            coverage_format: CoverageFormat::Cobertura,
            coverage_scope: CoverageScope::Target,
            desired_coverage,
            max_iterations,
            max_wall_clock: Duration::from_secs(60),
            stall_threshold: None,
            test_timeout: None,
            record_mode: false,
            env: HashMap::new(),
            additional_instructions: String::new(),
        }
    }
}

/// Cobertura report for `calc.py` with the first `covered` lines hit.
pub fn cobertura(covered: u64, total: u64) -> String {
    let lines: String = (1..=total)
        .map(|n| {
            let hits = u64::from(n <= covered);
            format!("          <line number=\"{n}\" hits=\"{hits}\"/>\n")
        })
        .collect();
    format!(
        r#"<?xml version="1.0" ?>
<coverage version="7.4">
  <packages>
    <package name=".">
      <classes>
        <class name="calc.py" filename="calc.py">
          <lines>
{lines}          </lines>
        </class>
      </classes>
    </package>
  </packages>
</coverage>
"#
    )
}

/// A candidate in the YAML shape the prompt asks for.
pub fn yaml_candidate(code: &str) -> String {
    let indented: String = code.lines().map(|line| format!("      {line}\n")).collect();
    format!("tests:\n  - test_code: |\n{indented}")
}

/// What a scripted run does to the coverage report.
#[derive(Debug, Clone)]
pub enum ReportAction {
    Write(String),
    Remove,
    Keep,
}

/// One scripted invocation of the test command.
#[derive(Debug, Clone)]
pub struct Step {
    pub exit_code: i32,
    pub stdout: String,
    pub report: ReportAction,
    /// Simulated run time; longer than the command's timeout means a kill.
    pub delay: Duration,
}

impl Step {
    /// A green run that writes a report with `covered` of `CALC_LINES` hit.
    pub fn passing(covered: u64) -> Self {
        Self {
            exit_code: 0,
            stdout: "1 passed".into(),
            report: ReportAction::Write(cobertura(covered, CALC_LINES)),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(stdout: &str) -> Self {
        Self {
            exit_code: 1,
            stdout: stdout.into(),
            report: ReportAction::Keep,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_report(mut self, report: ReportAction) -> Self {
        self.report = report;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// [`CommandRunner`] that plays back a list of steps.
///
/// Each run also snapshots the test file, so tests can check what was
/// actually executed.
pub struct ScriptedRunner {
    report_path: PathBuf,
    test_file: PathBuf,
    steps: Mutex<VecDeque<Step>>,
    executed: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(project: &Project, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            report_path: project.report(),
            test_file: project.test_file(),
            steps: Mutex::new(steps.into_iter().collect()),
            executed: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Test file contents seen by each run, in order.
    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> CoverResult<CommandOutput> {
        let started_at = SystemTime::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        let contents = tokio::fs::read_to_string(&self.test_file)
            .await
            .unwrap_or_default();
        self.executed.lock().await.push(contents);

        let Some(step) = self.steps.lock().await.pop_front() else {
            return Ok(CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "no scripted step left".into(),
                elapsed: Duration::ZERO,
                started_at,
            });
        };

        if step.delay > spec.timeout {
            tokio::time::sleep(spec.timeout).await;
            return Err(CoverError::TimedOut {
                timeout: spec.timeout,
                partial: PartialOutput {
                    stdout: step.stdout,
                    stderr: String::new(),
                },
            });
        }
        tokio::time::sleep(step.delay).await;

        match &step.report {
            ReportAction::Write(report) => tokio::fs::write(&self.report_path, report)
                .await
                .map_err(|e| CoverError::io(&self.report_path, e))?,
            ReportAction::Remove => {
                let _ = tokio::fs::remove_file(&self.report_path).await;
            }
            ReportAction::Keep => {}
        }

        Ok(CommandOutput {
            exit_code: Some(step.exit_code),
            stdout: step.stdout,
            stderr: String::new(),
            elapsed: step.delay,
            started_at,
        })
    }
}
