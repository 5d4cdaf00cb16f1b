//! JaCoCo CSV decoder.
//!
//! Columns are located by header name, so the `INSTRUCTION_*`, `COMPLEXITY_*`
//! and `METHOD_*` columns may appear in any order or not at all. Inner
//! classes (`Outer.Inner`) are folded into their outer class's source file.

use super::text::{malformed_line, utf8};
use crate::domain::errors::CoverResult;
use crate::domain::models::{
    checked_sum, CounterOverflow, CoverageFormat, CoverageSnapshot, FileCoverage,
};

const FORMAT: CoverageFormat = CoverageFormat::JacocoCsv;

struct Columns {
    package: usize,
    class: usize,
    line_missed: usize,
    line_covered: usize,
    branch: Option<(usize, usize)>,
    width: usize,
}

impl Columns {
    fn from_header(header: &str) -> CoverResult<Self> {
        let names: Vec<&str> = header.split(',').map(str::trim).collect();
        let find = |name: &str| names.iter().position(|n| n.eq_ignore_ascii_case(name));
        let require = |name: &str| {
            find(name).ok_or_else(|| malformed_line(FORMAT, 1, format!("header has no {name} column")))
        };
        let package = require("PACKAGE")?;
        let class = require("CLASS")?;
        let line_missed = require("LINE_MISSED")?;
        let line_covered = require("LINE_COVERED")?;
        let branch = find("BRANCH_MISSED").zip(find("BRANCH_COVERED"));
        let width = [package, class, line_missed, line_covered]
            .into_iter()
            .chain(branch.iter().flat_map(|(m, c)| [*m, *c]))
            .max()
            .map_or(0, |max| max + 1);
        Ok(Self {
            package,
            class,
            line_missed,
            line_covered,
            branch,
            width,
        })
    }
}

fn counter(fields: &[&str], index: usize, line: usize, name: &str) -> CoverResult<u64> {
    fields[index].parse().map_err(|_| {
        malformed_line(
            FORMAT,
            line,
            format!("{name} is not a non-negative integer: {:?}", fields[index]),
        )
    })
}

/// `com.example` + `Outer.Inner` -> `com/example/Outer.java`.
fn source_key(package: &str, class: &str) -> String {
    let outer = class.split(['.', '$']).next().unwrap_or(class);
    if package.is_empty() {
        format!("{outer}.java")
    } else {
        format!("{}/{outer}.java", package.replace('.', "/"))
    }
}

pub fn decode(bytes: &[u8]) -> CoverResult<CoverageSnapshot> {
    let text = utf8(FORMAT, bytes)?;
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

    let header = lines
        .by_ref()
        .find(|(_, l)| !l.is_empty())
        .ok_or_else(|| malformed_line(FORMAT, 1, "report is empty"))?;
    let columns = Columns::from_header(header.1)?;

    let mut snapshot = CoverageSnapshot::new();
    for (number, line) in lines {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < columns.width {
            return Err(malformed_line(
                FORMAT,
                number,
                format!("expected {} columns, found {}", columns.width, fields.len()),
            ));
        }

        let missed = counter(&fields, columns.line_missed, number, "LINE_MISSED")?;
        let covered = counter(&fields, columns.line_covered, number, "LINE_COVERED")?;
        let (branch_missed, branch_covered) = match columns.branch {
            Some((m, c)) => (
                counter(&fields, m, number, "BRANCH_MISSED")?,
                counter(&fields, c, number, "BRANCH_COVERED")?,
            ),
            None => (0, 0),
        };

        let overflow = |e: CounterOverflow| malformed_line(FORMAT, number, e.to_string());
        let total = checked_sum(covered, missed, "line").map_err(overflow)?;
        let branch_total = checked_sum(branch_covered, branch_missed, "branch").map_err(overflow)?;
        let coverage = FileCoverage::new(covered, total, branch_covered, branch_total)
            .map_err(|violation| malformed_line(FORMAT, number, violation.to_string()))?;
        snapshot
            .merge_file(
                source_key(fields[columns.package], fields[columns.class]),
                coverage,
            )
            .map_err(overflow)?;
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
GROUP,PACKAGE,CLASS,INSTRUCTION_MISSED,INSTRUCTION_COVERED,BRANCH_MISSED,BRANCH_COVERED,LINE_MISSED,LINE_COVERED,COMPLEXITY_MISSED,COMPLEXITY_COVERED,METHOD_MISSED,METHOD_COVERED\r
calc,com.example,Calculator,4,20,1,3,2,8,1,4,0,3\r
calc,com.example,Calculator.Memory,2,2,0,0,1,1,0,1,0,1\r
calc,com.example.util,Strings,0,0,0,0,0,0,0,0,0,0\r
";

    #[test]
    fn folds_inner_classes_into_outer_file() {
        let snapshot = decode(REPORT.as_bytes()).unwrap();
        let calc = snapshot.get("com/example/Calculator.java").unwrap();
        assert_eq!(calc.covered_lines(), 9);
        assert_eq!(calc.total_lines(), 12);
        assert_eq!(calc.covered_branches(), 3);
        assert_eq!(calc.total_branches(), 4);
        assert_eq!(
            snapshot.get("com/example/util/Strings.java").unwrap().total_lines(),
            0
        );
    }

    #[test]
    fn branch_columns_are_optional() {
        let csv = "PACKAGE,CLASS,LINE_MISSED,LINE_COVERED\nfoo,Bar,1,3\n";
        let snapshot = decode(csv.as_bytes()).unwrap();
        let bar = snapshot.get("foo/Bar.java").unwrap();
        assert_eq!(bar.total_lines(), 4);
        assert_eq!(bar.total_branches(), 0);
    }

    #[test]
    fn bad_counter_reports_its_line() {
        let csv = "PACKAGE,CLASS,LINE_MISSED,LINE_COVERED\nfoo,Bar,1,3\nfoo,Baz,x,3\n";
        let err = decode(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("malformed jacoco-csv report at line 3"));
    }

    #[test]
    fn missing_header_column_is_malformed() {
        assert!(decode(b"PACKAGE,CLASS,LINE_MISSED\nfoo,Bar,1\n").is_err());
    }

    #[test]
    fn counter_overflow_is_malformed() {
        let csv = "GROUP,PACKAGE,CLASS,LINE_MISSED,LINE_COVERED\ng,p,C,18446744073709551615,1\n";
        let err = decode(csv.as_bytes()).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("malformed jacoco-csv report at line 2: line counter overflow"));
    }

    #[test]
    fn folding_inner_classes_past_u64_max_is_malformed() {
        let csv = "PACKAGE,CLASS,LINE_MISSED,LINE_COVERED\n\
                   p,Outer,0,18446744073709551615\n\
                   p,Outer.Inner,0,1\n";
        let err = decode(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("malformed jacoco-csv report at line 3"));
    }
}
