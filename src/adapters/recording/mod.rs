//! Recording Store adapters.

mod file;
mod memory;

use std::path::Path;

pub use file::FileRecordingStore;
pub use memory::InMemoryRecordingStore;

/// Environment variable naming the recording scenario.
pub const SCENARIO_ENV: &str = "COVERGEN_SCENARIO";

/// Pick the scenario name used in recording file names.
///
/// `COVERGEN_SCENARIO` wins, then the configured value, then the name of the
/// source file's parent directory, then `default`.
pub fn resolve_scenario(configured: Option<&str>, source_file: &Path) -> String {
    std::env::var(SCENARIO_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| configured.map(str::to_string).filter(|s| !s.trim().is_empty()))
        .or_else(|| {
            source_file
                .parent()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
        })
        .map_or_else(|| "default".to_string(), |s| sanitize(&s))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}
