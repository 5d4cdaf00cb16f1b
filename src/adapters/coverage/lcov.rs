//! LCOV tracefile decoder.
//!
//! Per-line `DA` and per-branch `BRDA` records are authoritative. The `LF/LH`
//! and `BRF/BRH` summaries are only used for records that carry no detail
//! lines, but they are always checked: a summary claiming more hits than
//! found is rejected.

use std::collections::BTreeMap;

use super::text::{malformed_line, utf8};
use crate::domain::errors::CoverResult;
use crate::domain::models::{checked_sum, CoverageFormat, CoverageSnapshot, FileCoverage};

const FORMAT: CoverageFormat = CoverageFormat::Lcov;

#[derive(Default)]
struct Record {
    path: String,
    started_at: usize,
    lines: BTreeMap<u32, u64>,
    branches: BTreeMap<(u32, String, String), u64>,
    lines_found: Option<u64>,
    lines_hit: Option<u64>,
    branches_found: Option<u64>,
    branches_hit: Option<u64>,
}

impl Record {
    fn finish(self, snapshot: &mut CoverageSnapshot) -> CoverResult<()> {
        let summary = |found: Option<u64>, hit: Option<u64>, name: &str| -> CoverResult<(u64, u64)> {
            let found = found.unwrap_or(0);
            let hit = hit.unwrap_or(0);
            if hit > found {
                return Err(malformed_line(
                    FORMAT,
                    self.started_at,
                    format!("{}: {name} summary reports {hit} hit out of {found} found", self.path),
                ));
            }
            Ok((hit, found))
        };
        let (summary_lines_hit, summary_lines_found) =
            summary(self.lines_found, self.lines_hit, "line")?;
        let (summary_branches_hit, summary_branches_found) =
            summary(self.branches_found, self.branches_hit, "branch")?;

        let (covered_lines, total_lines) = if self.lines.is_empty() {
            (summary_lines_hit, summary_lines_found)
        } else {
            let covered = self.lines.values().filter(|hits| **hits > 0).count() as u64;
            (covered, self.lines.len() as u64)
        };
        let (covered_branches, total_branches) = if self.branches.is_empty() {
            (summary_branches_hit, summary_branches_found)
        } else {
            let covered = self.branches.values().filter(|taken| **taken > 0).count() as u64;
            (covered, self.branches.len() as u64)
        };

        let missed = self
            .lines
            .iter()
            .filter(|(_, hits)| **hits == 0)
            .map(|(line, _)| *line);
        let coverage = FileCoverage::new(covered_lines, total_lines, covered_branches, total_branches)
            .map_err(|violation| malformed_line(FORMAT, self.started_at, violation.to_string()))?
            .with_missed_lines(missed);
        let path = self.path;
        snapshot
            .merge_file(path.clone(), coverage)
            .map_err(|e| malformed_line(FORMAT, self.started_at, format!("{path}: {e}")))
    }
}

fn number<T: std::str::FromStr>(raw: &str, line: usize, what: &str) -> CoverResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| malformed_line(FORMAT, line, format!("{what} is not a number: {raw:?}")))
}

pub fn decode(bytes: &[u8]) -> CoverResult<CoverageSnapshot> {
    let text = utf8(FORMAT, bytes)?;
    let mut snapshot = CoverageSnapshot::new();
    let mut current: Option<Record> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line == "end_of_record" {
            match current.take() {
                Some(record) => record.finish(&mut snapshot)?,
                None => {
                    return Err(malformed_line(FORMAT, line_no, "end_of_record without SF"));
                }
            }
            continue;
        }

        let Some((tag, value)) = line.split_once(':') else {
            return Err(malformed_line(FORMAT, line_no, format!("unrecognized line {line:?}")));
        };

        if tag == "SF" {
            if let Some(record) = current.take() {
                record.finish(&mut snapshot)?;
            }
            current = Some(Record {
                path: value.trim().to_string(),
                started_at: line_no,
                ..Record::default()
            });
            continue;
        }
        if tag == "TN" {
            continue;
        }

        let Some(record) = current.as_mut() else {
            return Err(malformed_line(FORMAT, line_no, format!("{tag} record outside SF block")));
        };
        match tag {
            "DA" => {
                let mut parts = value.split(',');
                let (Some(line), Some(hits)) = (parts.next(), parts.next()) else {
                    return Err(malformed_line(FORMAT, line_no, "DA needs line,hits"));
                };
                let line: u32 = number(line, line_no, "DA line")?;
                // Some generators emit negative hit counts on overflow; treat as hit.
                let hits: i64 = number(hits, line_no, "DA hits")?;
                let total = record.lines.entry(line).or_insert(0);
                *total = checked_sum(*total, hits.unsigned_abs(), "line")
                    .map_err(|e| malformed_line(FORMAT, line_no, format!("DA hits: {e}")))?;
            }
            "BRDA" => {
                let parts: Vec<&str> = value.split(',').collect();
                let [line, block, branch, taken] = parts[..] else {
                    return Err(malformed_line(FORMAT, line_no, "BRDA needs line,block,branch,taken"));
                };
                let line: u32 = number(line, line_no, "BRDA line")?;
                let taken: u64 = match taken.trim() {
                    "-" => 0,
                    other => number(other, line_no, "BRDA taken")?,
                };
                let total = record
                    .branches
                    .entry((line, block.trim().to_string(), branch.trim().to_string()))
                    .or_insert(0);
                *total = checked_sum(*total, taken, "branch")
                    .map_err(|e| malformed_line(FORMAT, line_no, format!("BRDA taken: {e}")))?;
            }
            "LF" => record.lines_found = Some(number(value, line_no, "LF")?),
            "LH" => record.lines_hit = Some(number(value, line_no, "LH")?),
            "BRF" => record.branches_found = Some(number(value, line_no, "BRF")?),
            "BRH" => record.branches_hit = Some(number(value, line_no, "BRH")?),
            // FN, FNDA, FNF, FNH, VER and friends carry nothing we measure.
            _ => {}
        }
    }

    // Tolerate a missing trailing end_of_record.
    if let Some(record) = current {
        record.finish(&mut snapshot)?;
    }
    Ok(snapshot)
}
