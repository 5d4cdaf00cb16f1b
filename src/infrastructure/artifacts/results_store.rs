//! SQLite results store: one row per session, one per iteration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoverError, CoverResult};
use crate::domain::models::{SessionReport, SessionSpec};

const SCHEMA: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        source_file TEXT NOT NULL,
        test_file TEXT NOT NULL,
        test_command TEXT NOT NULL,
        coverage_format TEXT NOT NULL,
        group_hash TEXT,
        terminal TEXT NOT NULL,
        desired_coverage REAL NOT NULL,
        baseline_coverage REAL,
        final_coverage REAL NOT NULL,
        iterations_used INTEGER NOT NULL,
        elapsed_ms INTEGER NOT NULL,
        error TEXT,
        created_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS iterations (
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        number INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        exit_code INTEGER,
        covered_lines INTEGER,
        total_lines INTEGER,
        coverage REAL,
        prompt_fingerprint TEXT,
        candidate_code TEXT,
        diagnostic TEXT,
        failures TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        PRIMARY KEY (session_id, number)
    )",
];

/// A stored `sessions` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSession {
    pub id: String,
    pub terminal: String,
    pub final_coverage: f64,
    pub iterations_used: i64,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ResultsStore {
    pool: SqlitePool,
}

impl ResultsStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> CoverResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoverError::io(parent, e))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database.
    pub async fn in_memory() -> CoverResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> CoverResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Persist a finished session and its iterations in one transaction.
    pub async fn save_report(&self, spec: &SessionSpec, report: &SessionReport) -> CoverResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"INSERT OR REPLACE INTO sessions (id, source_file, test_file, test_command, coverage_format, group_hash, terminal, desired_coverage, baseline_coverage, final_coverage, iterations_used, elapsed_ms, error, created_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(report.session_id.to_string())
        .bind(spec.source_file.display().to_string())
        .bind(spec.test_file.display().to_string())
        .bind(&spec.test_command)
        .bind(spec.coverage_format.tag())
        .bind(report.group_hash.as_ref().map(|g| g.as_str().to_string()))
        .bind(report.terminal.as_str())
        .bind(report.desired_coverage)
        .bind(report.baseline_coverage)
        .bind(report.final_coverage)
        .bind(i64::from(report.iterations_used))
        .bind(millis(report.elapsed))
        .bind(report.error.as_ref().map(ToString::to_string))
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for iteration in &report.iterations {
            let failures = serde_json::to_string(&iteration.failures)
                .map_err(|e| CoverError::Storage(e.to_string()))?;
            let measurement = iteration.measurement.as_ref();
            sqlx::query(
                r"INSERT OR REPLACE INTO iterations (session_id, number, outcome, exit_code, covered_lines, total_lines, coverage, prompt_fingerprint, candidate_code, diagnostic, failures, duration_ms)
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(report.session_id.to_string())
            .bind(i64::from(iteration.number))
            .bind(iteration.outcome.as_str())
            .bind(iteration.exit_code)
            .bind(measurement.map(|m| m.covered_lines as i64))
            .bind(measurement.map(|m| m.total_lines as i64))
            .bind(measurement.map(|m| m.percentage()))
            .bind(
                iteration
                    .candidate
                    .as_ref()
                    .map(|c| c.prompt_fingerprint.as_str().to_string()),
            )
            .bind(iteration.candidate.as_ref().map(|c| c.code.clone()))
            .bind(iteration.diagnostic.clone())
            .bind(failures)
            .bind(millis(iteration.duration))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_session(&self, id: Uuid) -> CoverResult<Option<StoredSession>> {
        let row = sqlx::query_as::<_, StoredSession>(
            "SELECT id, terminal, final_coverage, iterations_used, error FROM sessions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Outcome tags of a session's iterations, in order.
    pub async fn iteration_outcomes(&self, id: Uuid) -> CoverResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT outcome FROM iterations WHERE session_id = ? ORDER BY number")
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(outcome,)| outcome).collect())
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::models::{
        CoverageFormat, CoverageMeasurement, CoverageScope, GroupHash, Iteration,
        IterationOutcome, PromptFingerprint, TerminalState, TestCandidate,
    };

    pub(crate) fn spec() -> SessionSpec {
        SessionSpec {
            source_file: "calc.py".into(),
            test_file: "test_calc.py".into(),
            project_root: ".".into(),
            included_files: Vec::new(),
            test_command: "pytest --cov".into(),
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

    pub(crate) fn report() -> SessionReport {
        let measured = |covered| CoverageMeasurement {
            matched_path: Some("calc.py".into()),
            covered_lines: covered,
            total_lines: 10,
            missed_lines: vec![],
        };
        let baseline = Iteration {
            measurement: Some(measured(0)),
            outcome: IterationOutcome::Baseline,
            diagnostic: None,
            ..Iteration::rejected_before_run(0, None, IterationOutcome::Baseline, "", Duration::ZERO)
        };
        let mut accepted = Iteration::rejected_before_run(
            1,
            Some(TestCandidate::new(
                "def test_a(): pass",
                1,
                PromptFingerprint::of_bytes(b"p"),
            )),
            IterationOutcome::Accepted,
            "",
            Duration::from_millis(1500),
        );
        accepted.diagnostic = None;
        accepted.exit_code = Some(0);
        accepted.measurement = Some(measured(8));

        SessionReport {
            session_id: Uuid::new_v4(),
            terminal: TerminalState::Converged,
            group_hash: Some(GroupHash::compute(b"src", b"test")),
            desired_coverage: 70.0,
            baseline_coverage: Some(0.0),
            final_coverage: 80.0,
            iterations_used: 1,
            elapsed: Duration::from_secs(3),
            iterations: vec![baseline, accepted],
            error: None,
        }
    }

    #[tokio::test]
    async fn saves_session_and_iterations() {
        let store = ResultsStore::in_memory().await.unwrap();
        let report = report();
        store.save_report(&spec(), &report).await.unwrap();

        let stored = store.get_session(report.session_id).await.unwrap().unwrap();
        assert_eq!(stored.terminal, "converged");
        assert!((stored.final_coverage - 80.0).abs() < f64::EPSILON);
        assert_eq!(stored.iterations_used, 1);
        assert!(stored.error.is_none());

        let outcomes = store.iteration_outcomes(report.session_id).await.unwrap();
        assert_eq!(outcomes, vec!["baseline", "accepted"]);
    }

    #[tokio::test]
    async fn saving_twice_replaces_rows() {
        let store = ResultsStore::in_memory().await.unwrap();
        let report = report();
        store.save_report(&spec(), &report).await.unwrap();
        store.save_report(&spec(), &report).await.unwrap();
        assert_eq!(store.iteration_outcomes(report.session_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn opens_a_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("results.db");
        let store = ResultsStore::open(&path).await.unwrap();
        store.save_report(&spec(), &report()).await.unwrap();
        assert!(path.exists());
    }
}
