//! Command-line interface.

pub mod commands;
pub mod output;
pub mod types;

pub use types::Cli;

/// Report a top-level error and exit with the fatal-error status.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "terminal": crate::domain::models::TerminalState::Failed,
            "exit_code": crate::domain::models::TerminalState::Failed.exit_code(),
            "error": format!("{err:#}"),
        });
        println!("{body}");
    } else {
        eprintln!("{} {err:#}", console::style("error:").red().bold());
    }
    std::process::exit(crate::domain::models::TerminalState::Failed.exit_code());
}
