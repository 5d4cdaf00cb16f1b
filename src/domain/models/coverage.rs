//! Canonical coverage model shared by every report decoder.
//!
//! All decoders converge on [`CoverageSnapshot`]: a mapping from report path
//! to covered/total line and branch counts. Counts are validated on
//! construction so a snapshot can never hold `covered > total`.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::errors::CoverError;

/// Closed set of coverage report formats understood by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoverageFormat {
    /// Cobertura XML (`coverage.py`, `gcovr`, `cargo llvm-cov --cobertura`, ...).
    Cobertura,
    /// JaCoCo XML report.
    Jacoco,
    /// JaCoCo CSV report.
    JacocoCsv,
    /// LCOV tracefile.
    Lcov,
    /// `diff-cover --json-report` output.
    DiffCoverJson,
}

impl CoverageFormat {
    /// Every supported format, in tag order.
    pub const ALL: [Self; 5] = [
        Self::Cobertura,
        Self::Jacoco,
        Self::JacocoCsv,
        Self::Lcov,
        Self::DiffCoverJson,
    ];

    /// The canonical tag, as accepted on the command line.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Cobertura => "cobertura",
            Self::Jacoco => "jacoco",
            Self::JacocoCsv => "jacoco-csv",
            Self::Lcov => "lcov",
            Self::DiffCoverJson => "diff-cover-json",
        }
    }
}

impl fmt::Display for CoverageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CoverageFormat {
    type Err = CoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|format| format.tag() == normalized)
            .ok_or_else(|| CoverError::UnsupportedFormat(s.to_string()))
    }
}

/// Which part of a report the session measures against the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageScope {
    /// Only the file matching the session's source file.
    #[default]
    Target,
    /// Sum across every file in the report.
    Global,
}

/// A counter pair that violates `covered <= total`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterViolation {
    /// `"line"` or `"branch"`.
    pub counter: &'static str,
    pub covered: u64,
    pub total: u64,
}

impl fmt::Display for CounterViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} counter reports {} covered out of {} total",
            self.counter, self.covered, self.total
        )
    }
}

/// Summing counters would exceed `u64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOverflow {
    /// `"line"` or `"branch"`.
    pub counter: &'static str,
}

impl fmt::Display for CounterOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} counter overflow", self.counter)
    }
}

/// `a + b`, or the overflow error for `counter`.
pub fn checked_sum(a: u64, b: u64, counter: &'static str) -> Result<u64, CounterOverflow> {
    a.checked_add(b).ok_or(CounterOverflow { counter })
}

/// Coverage counters for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    covered_lines: u64,
    total_lines: u64,
    covered_branches: u64,
    total_branches: u64,
    /// Line numbers known to be uncovered. Empty for summary-only formats.
    #[serde(default)]
    missed_lines: BTreeSet<u32>,
}

impl FileCoverage {
    /// Build validated counters.
    pub const fn new(
        covered_lines: u64,
        total_lines: u64,
        covered_branches: u64,
        total_branches: u64,
    ) -> Result<Self, CounterViolation> {
        if covered_lines > total_lines {
            return Err(CounterViolation {
                counter: "line",
                covered: covered_lines,
                total: total_lines,
            });
        }
        if covered_branches > total_branches {
            return Err(CounterViolation {
                counter: "branch",
                covered: covered_branches,
                total: total_branches,
            });
        }
        Ok(Self {
            covered_lines,
            total_lines,
            covered_branches,
            total_branches,
            missed_lines: BTreeSet::new(),
        })
    }

    /// Attach the uncovered line numbers, used to describe the coverage gap.
    #[must_use]
    pub fn with_missed_lines(mut self, lines: impl IntoIterator<Item = u32>) -> Self {
        self.missed_lines.extend(lines);
        self
    }

    pub const fn covered_lines(&self) -> u64 {
        self.covered_lines
    }

    pub const fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub const fn covered_branches(&self) -> u64 {
        self.covered_branches
    }

    pub const fn total_branches(&self) -> u64 {
        self.total_branches
    }

    pub const fn missed_lines(&self) -> &BTreeSet<u32> {
        &self.missed_lines
    }

    /// Line coverage in percent; 0 when the file has no lines.
    pub fn line_percentage(&self) -> f64 {
        percentage(self.covered_lines, self.total_lines)
    }

    /// Sum another entry for the same file into this one.
    ///
    /// Both operands satisfy `covered <= total`, so the sum does too. On
    /// overflow `self` is left unchanged.
    pub fn absorb(&mut self, other: &Self) -> Result<(), CounterOverflow> {
        let summed = Self {
            covered_lines: checked_sum(self.covered_lines, other.covered_lines, "line")?,
            total_lines: checked_sum(self.total_lines, other.total_lines, "line")?,
            covered_branches: checked_sum(self.covered_branches, other.covered_branches, "branch")?,
            total_branches: checked_sum(self.total_branches, other.total_branches, "branch")?,
            missed_lines: std::mem::take(&mut self.missed_lines),
        };
        *self = summed;
        self.missed_lines.extend(other.missed_lines.iter().copied());
        Ok(())
    }
}

/// `covered / total * 100`, or 0 when `total` is 0.
pub fn percentage(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64 * 100.0
    }
}

/// The coverage figure the convergence logic works with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMeasurement {
    /// Report path that matched the target, if any (always `None` for global scope).
    pub matched_path: Option<String>,
    pub covered_lines: u64,
    pub total_lines: u64,
    pub missed_lines: Vec<u32>,
}

impl CoverageMeasurement {
    pub fn percentage(&self) -> f64 {
        percentage(self.covered_lines, self.total_lines)
    }
}

/// Normalized coverage across every file in one report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    files: BTreeMap<String, FileCoverage>,
}

impl CoverageSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, summing into any existing entry for the same path.
    pub fn merge_file(
        &mut self,
        path: impl Into<String>,
        coverage: FileCoverage,
    ) -> Result<(), CounterOverflow> {
        match self.files.entry(path.into()) {
            Entry::Occupied(mut existing) => existing.get_mut().absorb(&coverage),
            Entry::Vacant(slot) => {
                slot.insert(coverage);
                Ok(())
            }
        }
    }

    pub const fn files(&self) -> &BTreeMap<String, FileCoverage> {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&FileCoverage> {
        self.files.get(path)
    }

    /// Sum of every file in the report, failing if a counter overflows.
    pub fn checked_totals(&self) -> Result<FileCoverage, CounterOverflow> {
        let mut total = FileCoverage::default();
        for coverage in self.files.values() {
            total.covered_lines = checked_sum(total.covered_lines, coverage.covered_lines, "line")?;
            total.total_lines = checked_sum(total.total_lines, coverage.total_lines, "line")?;
            total.covered_branches =
                checked_sum(total.covered_branches, coverage.covered_branches, "branch")?;
            total.total_branches =
                checked_sum(total.total_branches, coverage.total_branches, "branch")?;
        }
        Ok(total)
    }

    /// Sum of every file in the report.
    ///
    /// Snapshots built by [`CoverageParser`](crate::adapters::coverage::CoverageParser)
    /// are checked at decode time; for anything else the sums saturate.
    pub fn totals(&self) -> FileCoverage {
        let mut total = FileCoverage::default();
        for coverage in self.files.values() {
            total.covered_lines = total.covered_lines.saturating_add(coverage.covered_lines);
            total.total_lines = total.total_lines.saturating_add(coverage.total_lines);
            total.covered_branches = total.covered_branches.saturating_add(coverage.covered_branches);
            total.total_branches = total.total_branches.saturating_add(coverage.total_branches);
        }
        total
    }

    /// Find the report entry for `source`.
    ///
    /// Paths match when one is a component-wise suffix of the other, so a
    /// report-relative `src/app.py` matches `/work/project/src/app.py`. The
    /// longest match wins; ties resolve to the first path in sorted order.
    pub fn find_target(&self, source: &Path) -> Option<(&str, &FileCoverage)> {
        let source_parts = path_components(&source.to_string_lossy());
        let mut best: Option<(usize, &str, &FileCoverage)> = None;
        for (path, coverage) in &self.files {
            let report_parts = path_components(path);
            let matched = suffix_match_len(&source_parts, &report_parts);
            if matched == 0 {
                continue;
            }
            if best.is_none_or(|(len, _, _)| matched > len) {
                best = Some((matched, path.as_str(), coverage));
            }
        }
        best.map(|(_, path, coverage)| (path, coverage))
    }

    /// Measure this snapshot for the given source file and scope.
    ///
    /// A target file absent from the report measures as 0/0.
    pub fn measure(&self, source: &Path, scope: CoverageScope) -> CoverageMeasurement {
        match scope {
            CoverageScope::Global => {
                let totals = self.totals();
                CoverageMeasurement {
                    matched_path: None,
                    covered_lines: totals.covered_lines,
                    total_lines: totals.total_lines,
                    missed_lines: Vec::new(),
                }
            }
            CoverageScope::Target => match self.find_target(source) {
                Some((path, coverage)) => CoverageMeasurement {
                    matched_path: Some(path.to_string()),
                    covered_lines: coverage.covered_lines,
                    total_lines: coverage.total_lines,
                    missed_lines: coverage.missed_lines.iter().copied().collect(),
                },
                None => {
                    tracing::warn!(
                        source = %source.display(),
                        files_in_report = self.files.len(),
                        "target file not present in coverage report, treating as 0/0"
                    );
                    CoverageMeasurement {
                        matched_path: None,
                        covered_lines: 0,
                        total_lines: 0,
                        missed_lines: Vec::new(),
                    }
                }
            },
        }
    }
}

fn path_components(path: &str) -> Vec<String> {
    let unified = path.replace('\\', "/");
    Path::new(&unified)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Length of the match when the shorter list is a suffix of the longer one, else 0.
fn suffix_match_len(a: &[String], b: &[String]) -> usize {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0;
    }
    if a[a.len() - len..] == b[b.len() - len..] {
        len
    } else {
        0
    }
}
