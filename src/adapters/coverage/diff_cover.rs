//! `diff-cover --json-report` decoder.
//!
//! diff-cover only reports lines touched by the diff: `covered_lines` and
//! `violation_lines` together make up the measurable lines of each file.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::domain::errors::{CoverError, CoverResult, ReportPosition};
use crate::domain::models::{checked_sum, CoverageFormat, CoverageSnapshot, FileCoverage};

const FORMAT: CoverageFormat = CoverageFormat::DiffCoverJson;

#[derive(Debug, Deserialize)]
struct Report {
    src_stats: BTreeMap<String, FileStats>,
}

#[derive(Debug, Deserialize)]
struct FileStats {
    #[serde(default)]
    covered_lines: Vec<u32>,
    #[serde(default)]
    violation_lines: Vec<u32>,
}

fn malformed(message: String) -> CoverError {
    CoverError::MalformedReport {
        format: FORMAT,
        position: ReportPosition::Line(0),
        message,
    }
}

pub fn decode(bytes: &[u8]) -> CoverResult<CoverageSnapshot> {
    let report: Report = serde_json::from_slice(bytes).map_err(|e| CoverError::MalformedReport {
        format: FORMAT,
        position: ReportPosition::Line(e.line()),
        message: e.to_string(),
    })?;

    let mut snapshot = CoverageSnapshot::new();
    for (path, stats) in report.src_stats {
        let covered = stats.covered_lines.len() as u64;
        let missed = stats.violation_lines.len() as u64;
        let total = checked_sum(covered, missed, "line")
            .map_err(|e| malformed(format!("{path}: {e}")))?;
        let coverage = FileCoverage::new(covered, total, 0, 0)
            .map_err(|violation| malformed(violation.to_string()))?
            .with_missed_lines(stats.violation_lines);
        snapshot
            .merge_file(path.clone(), coverage)
            .map_err(|e| malformed(format!("{path}: {e}")))?;
    }
    Ok(snapshot)
}
