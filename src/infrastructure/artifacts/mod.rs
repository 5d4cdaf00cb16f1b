//! Persisted run artifacts: SQLite results store and text report.

pub mod report;
pub mod results_store;

pub use report::{render_report, summary_line};
pub use results_store::{ResultsStore, StoredSession};
