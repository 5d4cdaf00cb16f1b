//! CLI type definitions
//!
//! This module contains the clap structures that define the CLI interface.

use clap::Parser;

use super::commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "covergen")]
#[command(about = "covergen - coverage-driven test generation", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,

    /// Output the final summary in JSON format
    #[arg(long, global = true)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::models::CoverageFormat;

    const REQUIRED: [&str; 9] = [
        "covergen",
        "--source-file-path",
        "app/calc.py",
        "--test-file-path",
        "app/test_calc.py",
        "--test-command",
        "pytest --cov=. --cov-report=xml",
        "--code-coverage-report-path",
        "coverage.xml",
    ];

    #[test]
    fn defaults_apply() {
        let cli = Cli::try_parse_from(REQUIRED).unwrap();
        assert_eq!(cli.run.coverage_type, CoverageFormat::Cobertura);
        assert!((cli.run.desired_coverage - 90.0).abs() < f64::EPSILON);
        assert_eq!(cli.run.max_iterations, 10);
        assert!(!cli.run.record_mode);
        assert!(!cli.json);
    }

    #[test]
    fn coverage_type_accepts_known_tags_only() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--coverage-type", "jacoco_csv"]);
        let cli = Cli::try_parse_from(&args).unwrap();
        assert_eq!(cli.run.coverage_type, CoverageFormat::JacocoCsv);

        let mut args = REQUIRED.to_vec();
        args.extend(["--coverage-type", "clover"]);
        assert!(Cli::try_parse_from(&args).is_err());
    }

    #[test]
    fn rejects_out_of_range_numbers() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--desired-coverage", "120"]);
        assert!(Cli::try_parse_from(&args).is_err());

        let mut args = REQUIRED.to_vec();
        args.extend(["--max-iterations", "0"]);
        assert!(Cli::try_parse_from(&args).is_err());
    }

    #[test]
    fn included_files_take_several_values() {
        let cli = Cli::try_parse_from(REQUIRED).unwrap();
        assert!(cli.run.included_files.is_empty());

        let mut args = REQUIRED.to_vec();
        args.extend(["--included-files", "app/models.py", "conftest.py", "--json"]);
        let cli = Cli::try_parse_from(&args).unwrap();
        assert_eq!(
            cli.run.included_files,
            vec![PathBuf::from("app/models.py"), PathBuf::from("conftest.py")]
        );
        assert!(cli.json);
    }

    #[test]
    fn missing_required_flags_fail() {
        assert!(Cli::try_parse_from(["covergen", "--source-file-path", "a.py"]).is_err());
    }
}
