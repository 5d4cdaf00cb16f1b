//! Implementation of the session run (the default and only command).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use tracing::{info, warn};

use crate::adapters::generators::{AnthropicGenerator, RecordReplayGenerator, RetryingGenerator};
use crate::adapters::process::ShellCommandRunner;
use crate::adapters::recording::{resolve_scenario, FileRecordingStore};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{
    Config, CoverageFormat, CoverageScope, GroupHash, SessionReport, SessionSpec, TerminalState,
};
use crate::domain::ports::Generator;
use crate::infrastructure::artifacts::{render_report, summary_line, ResultsStore};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::LoggerImpl;
use crate::services::SessionController;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Source file to raise coverage for
    #[arg(long)]
    pub source_file_path: PathBuf,

    /// Existing test file that new tests are appended to
    #[arg(long)]
    pub test_file_path: PathBuf,

    /// Project root; config is read from `<root>/.covergen/`
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Extra files shown to the model as context
    #[arg(long = "included-files", num_args = 1..)]
    pub included_files: Vec<PathBuf>,

    /// Shell command that runs the tests and writes the coverage report
    #[arg(long)]
    pub test_command: String,

    /// Working directory for the test command (defaults to the project root)
    #[arg(long)]
    pub test_command_dir: Option<PathBuf>,

    /// Where the test command writes its coverage report
    #[arg(long)]
    pub code_coverage_report_path: PathBuf,

    /// Report format: cobertura, jacoco, jacoco-csv, lcov, diff-cover-json
    #[arg(long, default_value = "cobertura", value_parser = parse_format)]
    pub coverage_type: CoverageFormat,

    /// Target line coverage percentage (0-100)
    #[arg(long, default_value_t = 90.0, value_parser = parse_percentage)]
    pub desired_coverage: f64,

    /// Maximum number of generation iterations
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_iterations: u32,

    /// Wall-clock budget for the whole session, in seconds
    #[arg(long, default_value_t = 1800, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_run_time_sec: u64,

    /// Call the model and record every response
    #[arg(long)]
    pub record_mode: bool,

    /// Start recording files from empty instead of extending them
    #[arg(long)]
    pub regenerate_recordings: bool,

    /// Do not write the run log, results database or text report
    #[arg(long)]
    pub suppress_log_files: bool,

    /// Copy the test file here first and generate into the copy
    #[arg(long)]
    pub test_file_output_path: Option<PathBuf>,

    /// Measure coverage across the whole report instead of the source file
    #[arg(long)]
    pub global_coverage: bool,

    /// Stop after this many consecutive iterations without coverage gain
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub stall_threshold: Option<u32>,

    /// Per-run cap on the test command, in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub test_timeout_sec: Option<u64>,

    /// Recording scenario name (overrides config)
    #[arg(long)]
    pub scenario: Option<String>,

    /// Extra guidance appended to every prompt
    #[arg(long, default_value = "")]
    pub additional_instructions: String,
}

fn parse_format(value: &str) -> Result<CoverageFormat, String> {
    value.parse().map_err(|e: crate::domain::CoverError| e.to_string())
}

fn parse_percentage(value: &str) -> Result<f64, String> {
    let parsed: f64 = value.parse().map_err(|_| format!("`{value}` is not a number"))?;
    if (0.0..=100.0).contains(&parsed) {
        Ok(parsed)
    } else {
        Err(format!("{parsed} is outside 0-100"))
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    pub session_id: String,
    pub terminal: TerminalState,
    pub exit_code: i32,
    pub final_coverage: f64,
    pub baseline_coverage: Option<f64>,
    pub desired_coverage: f64,
    pub iterations_used: u32,
    pub elapsed_secs: f64,
    pub outcomes: BTreeMap<&'static str, u32>,
    pub error: Option<String>,
    #[serde(skip)]
    summary: String,
}

impl RunOutput {
    pub fn from_report(report: &SessionReport) -> Self {
        Self {
            session_id: report.session_id.to_string(),
            terminal: report.terminal,
            exit_code: report.terminal.exit_code(),
            final_coverage: report.final_coverage,
            baseline_coverage: report.baseline_coverage,
            desired_coverage: report.desired_coverage,
            iterations_used: report.iterations_used,
            elapsed_secs: report.elapsed.as_secs_f64(),
            outcomes: report.outcome_counts(),
            error: report.error.as_ref().map(ToString::to_string),
            summary: summary_line(report),
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let summary = match self.terminal {
            TerminalState::Converged => style(&self.summary).green().to_string(),
            TerminalState::Exhausted | TerminalState::Stalled => {
                style(&self.summary).yellow().to_string()
            }
            TerminalState::TimedOut | TerminalState::Failed => style(&self.summary).red().to_string(),
        };
        match &self.error {
            Some(error) => format!("{summary}\n{error}"),
            None => summary,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Run one session and return its terminal state.
pub async fn execute(args: RunArgs, json_mode: bool) -> Result<TerminalState> {
    let project_root = std::path::absolute(&args.project_root)
        .context("Failed to resolve project root")?;
    let mut config = ConfigLoader::load_from(&project_root)?;
    apply_overrides(&mut config, &args);

    let artifacts_dir = project_root.join(&config.artifacts.dir);
    let log_dir = (!args.suppress_log_files).then_some(artifacts_dir.as_path());
    let _logger = LoggerImpl::init(&config.logging, log_dir)?;

    let source_file = std::path::absolute(&args.source_file_path)
        .context("Failed to resolve source file path")?;
    let test_file = prepare_test_file(&args).await?;
    let report_path = std::path::absolute(&args.code_coverage_report_path)
        .context("Failed to resolve coverage report path")?;
    let group = group_hash(&source_file, &test_file).await?;
    let included_files = args
        .included_files
        .iter()
        .map(std::path::absolute)
        .collect::<std::io::Result<Vec<_>>>()
        .context("Failed to resolve included file paths")?;

    let generator = build_generator(&config, &project_root, &args, &source_file, &group).await?;
    let spec = SessionSpec {
        source_file,
        test_file,
        test_command_dir: args
            .test_command_dir
            .clone()
            .unwrap_or_else(|| project_root.clone()),
        project_root: project_root.clone(),
        included_files,
        test_command: args.test_command.clone(),
        coverage_report_path: report_path,
        coverage_format: args.coverage_type,
        coverage_scope: config.policy.coverage_scope,
        desired_coverage: args.desired_coverage,
        max_iterations: args.max_iterations,
        max_wall_clock: Duration::from_secs(args.max_run_time_sec),
        stall_threshold: config.policy.stall_threshold,
        test_timeout: config.policy.test_timeout_secs.map(Duration::from_secs),
        record_mode: args.record_mode,
        env: std::collections::HashMap::new(),
        additional_instructions: args.additional_instructions.clone(),
    };

    let controller = SessionController::new(generator, Arc::new(ShellCommandRunner::new()))?;
    let report = controller.run(spec.clone()).await;

    if !args.suppress_log_files {
        if let Err(e) = write_artifacts(&config, &project_root, &spec, &report).await {
            warn!(error = %e, "could not write run artifacts");
        }
    }

    output(&RunOutput::from_report(&report), json_mode);
    Ok(report.terminal)
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if args.global_coverage {
        config.policy.coverage_scope = CoverageScope::Global;
    }
    if args.stall_threshold.is_some() {
        config.policy.stall_threshold = args.stall_threshold;
    }
    if args.test_timeout_sec.is_some() {
        config.policy.test_timeout_secs = args.test_timeout_sec;
    }
    if args.scenario.is_some() {
        config.recording.scenario.clone_from(&args.scenario);
    }
}

/// The file the session merges into: a fresh copy when requested.
async fn prepare_test_file(args: &RunArgs) -> Result<PathBuf> {
    let original = std::path::absolute(&args.test_file_path)
        .context("Failed to resolve test file path")?;
    let Some(output_path) = &args.test_file_output_path else {
        return Ok(original);
    };
    let output_path = std::path::absolute(output_path)
        .context("Failed to resolve test file output path")?;
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::copy(&original, &output_path).await.with_context(|| {
        format!(
            "Failed to copy {} to {}",
            original.display(),
            output_path.display()
        )
    })?;
    info!(path = %output_path.display(), "generating into a copy of the test file");
    Ok(output_path)
}

async fn group_hash(source_file: &Path, test_file: &Path) -> Result<GroupHash> {
    let source = tokio::fs::read(source_file)
        .await
        .with_context(|| format!("Failed to read {}", source_file.display()))?;
    let test = tokio::fs::read(test_file)
        .await
        .with_context(|| format!("Failed to read {}", test_file.display()))?;
    Ok(GroupHash::compute(&source, &test))
}

/// Record mode wraps the live backend; otherwise an existing recording for
/// this group is replayed strictly, and without one the live backend is used.
async fn build_generator(
    config: &Config,
    project_root: &Path,
    args: &RunArgs,
    source_file: &Path,
    group: &GroupHash,
) -> Result<Arc<dyn Generator>> {
    let scenario = resolve_scenario(config.recording.scenario.as_deref(), source_file);
    let store = FileRecordingStore::new(project_root.join(&config.recording.dir), scenario)
        .regenerate(args.regenerate_recordings);

    if args.record_mode {
        info!(file = %store.file_path(group).display(), "recording generator responses");
        return Ok(Arc::new(RecordReplayGenerator::record(
            live_generator(config)?,
            Arc::new(store),
        )));
    }
    if store.has_recording(group).await {
        info!(file = %store.file_path(group).display(), "replaying recorded responses");
        return Ok(Arc::new(RecordReplayGenerator::replay(Arc::new(store))));
    }
    live_generator(config)
}

fn live_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    let backend = AnthropicGenerator::new(config.generator.clone())?;
    Ok(Arc::new(RetryingGenerator::new(
        Arc::new(backend),
        config.retry.clone(),
    )))
}

async fn write_artifacts(
    config: &Config,
    project_root: &Path,
    spec: &SessionSpec,
    report: &SessionReport,
) -> Result<()> {
    let db_path = project_root.join(&config.artifacts.results_db);
    let store = ResultsStore::open(&db_path).await?;
    store.save_report(spec, report).await?;

    let report_path = project_root.join(&config.artifacts.report_file);
    if let Some(parent) = report_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&report_path, render_report(spec, report))
        .await
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    info!(
        results_db = %db_path.display(),
        report = %report_path.display(),
        "run artifacts written"
    );
    Ok(())
}
