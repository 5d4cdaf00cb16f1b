use crate::domain::errors::{CoverError, CoverResult, ReportPosition};
use crate::domain::models::CoverageFormat;

/// Decode a text report as UTF-8, dropping a leading BOM.
pub(super) fn utf8(format: CoverageFormat, bytes: &[u8]) -> CoverResult<&str> {
    let text = std::str::from_utf8(bytes).map_err(|e| CoverError::MalformedReport {
        format,
        position: ReportPosition::Byte(e.valid_up_to() as u64),
        message: "report is not valid UTF-8".to_string(),
    })?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

pub(super) fn malformed_line(
    format: CoverageFormat,
    line: usize,
    message: impl Into<String>,
) -> CoverError {
    CoverError::MalformedReport {
        format,
        position: ReportPosition::Line(line),
        message: message.into(),
    }
}
