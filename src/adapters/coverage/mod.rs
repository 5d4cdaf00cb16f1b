//! Coverage Parser.
//!
//! One decoder per [`CoverageFormat`] tag, all producing the same
//! [`CoverageSnapshot`]. Dispatch is a closed `match`; unknown tags are
//! rejected as `UnsupportedFormat` when the tag is parsed.

mod cobertura;
mod diff_cover;
mod jacoco;
mod jacoco_csv;
mod lcov;
mod text;
mod xml;

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::domain::errors::{CoverError, CoverResult, ReportPosition};
use crate::domain::models::{CoverageFormat, CoverageSnapshot};

/// Format-dispatching coverage report parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageParser {
    format: CoverageFormat,
}

impl CoverageParser {
    pub const fn new(format: CoverageFormat) -> Self {
        Self { format }
    }

    pub const fn format(&self) -> CoverageFormat {
        self.format
    }

    /// Decode raw report bytes.
    pub fn parse(&self, bytes: &[u8]) -> CoverResult<CoverageSnapshot> {
        let snapshot = match self.format {
            CoverageFormat::Cobertura => cobertura::decode(bytes),
            CoverageFormat::Jacoco => jacoco::decode(bytes),
            CoverageFormat::JacocoCsv => jacoco_csv::decode(bytes),
            CoverageFormat::Lcov => lcov::decode(bytes),
            CoverageFormat::DiffCoverJson => diff_cover::decode(bytes),
        }?;
        // Global scope sums every file, so the sums must fit as well.
        snapshot
            .checked_totals()
            .map_err(|e| CoverError::MalformedReport {
                format: self.format,
                position: ReportPosition::Byte(bytes.len() as u64),
                message: format!("report totals: {e}"),
            })?;
        debug!(
            format = %self.format,
            files = snapshot.files().len(),
            "parsed coverage report"
        );
        Ok(snapshot)
    }
}

/// Read a report the test command was expected to (re)write.
///
/// Fails with `ReportMissing` when the file does not exist and `StaleReport`
/// when it was last modified before `not_before`. The comparison is made at
/// whole-second precision because some filesystems store coarse mtimes.
pub async fn read_fresh_report(path: &Path, not_before: SystemTime) -> CoverResult<Vec<u8>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CoverError::ReportMissing {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(CoverError::io(path, e)),
    };
    let modified = metadata.modified().map_err(|e| CoverError::io(path, e))?;
    if modified < floor_to_second(not_before) {
        return Err(CoverError::StaleReport {
            path: path.to_path_buf(),
        });
    }
    tokio::fs::read(path).await.map_err(|e| CoverError::io(path, e))
}

fn floor_to_second(time: SystemTime) -> SystemTime {
    time.duration_since(UNIX_EPOCH)
        .map_or(time, |since| UNIX_EPOCH + Duration::from_secs(since.as_secs()))
}
