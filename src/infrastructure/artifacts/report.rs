//! Human-readable results report.

use std::fmt::Write as _;

use comfy_table::{presets, Attribute, Cell, ContentArrangement, Table};

use crate::domain::models::{SessionReport, SessionSpec};

/// Diagnostics longer than this are cut in the table.
const MAX_DIAGNOSTIC_WIDTH: usize = 60;

/// Render the text report written to `artifacts.report_file`.
pub fn render_report(spec: &SessionSpec, report: &SessionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "covergen session {}", report.session_id);
    let _ = writeln!(out, "source:   {}", spec.source_file.display());
    let _ = writeln!(out, "test:     {}", spec.test_file.display());
    let _ = writeln!(out, "command:  {}", spec.test_command);
    if let Some(group) = &report.group_hash {
        let _ = writeln!(out, "group:    {}", group.short());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", summary_line(report));
    if let Some(error) = &report.error {
        let _ = writeln!(out, "error: {error}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", iteration_table(report));
    out
}

/// One-line outcome: terminal state, coverage, iterations, elapsed time.
pub fn summary_line(report: &SessionReport) -> String {
    let baseline = report
        .baseline_coverage
        .map_or_else(|| "-".to_string(), |c| format!("{c:.2}%"));
    format!(
        "{}: coverage {:.2}% (baseline {}, target {:.2}%) after {} iteration{} in {:.1}s",
        report.terminal,
        report.final_coverage,
        baseline,
        report.desired_coverage,
        report.iterations_used,
        if report.iterations_used == 1 { "" } else { "s" },
        report.elapsed.as_secs_f64()
    )
}

fn iteration_table(report: &SessionReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::ASCII_MARKDOWN)
        .set_content_arrangement(ContentArrangement::Disabled);
    table.set_header(vec![
        Cell::new("#").add_attribute(Attribute::Bold),
        Cell::new("Outcome").add_attribute(Attribute::Bold),
        Cell::new("Exit").add_attribute(Attribute::Bold),
        Cell::new("Lines").add_attribute(Attribute::Bold),
        Cell::new("Coverage").add_attribute(Attribute::Bold),
        Cell::new("Time").add_attribute(Attribute::Bold),
        Cell::new("Detail").add_attribute(Attribute::Bold),
    ]);

    for iteration in &report.iterations {
        let (lines, coverage) = iteration.measurement.as_ref().map_or_else(
            || ("-".to_string(), "-".to_string()),
            |m| {
                (
                    format!("{}/{}", m.covered_lines, m.total_lines),
                    format!("{:.2}%", m.percentage()),
                )
            },
        );
        let mut detail = iteration.diagnostic.clone().unwrap_or_default();
        if !iteration.failures.is_empty() {
            let names: Vec<&str> = iteration.failures.iter().map(|f| f.identifier.as_str()).collect();
            if !detail.is_empty() {
                detail.push_str("; ");
            }
            detail.push_str(&format!("failing: {}", names.join(", ")));
        }
        table.add_row(vec![
            Cell::new(iteration.number),
            Cell::new(iteration.outcome.as_str()),
            Cell::new(
                iteration
                    .exit_code
                    .map_or_else(|| "-".to_string(), |c| c.to_string()),
            ),
            Cell::new(lines),
            Cell::new(coverage),
            Cell::new(format!("{:.1}s", iteration.duration.as_secs_f64())),
            Cell::new(truncate_text(&first_line(&detail), MAX_DIAGNOSTIC_WIDTH)),
        ]);
    }
    table
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

/// Truncate to `max_len` characters, marking the cut with `...`.
fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}
