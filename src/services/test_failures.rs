//! Failing-test extraction from test-runner output.
//!
//! Recognizes the cargo, pytest, `go test` and jest report styles. When a
//! run fails without naming any test, the whole run is reported under the
//! command itself.

use regex::Regex;

use crate::domain::models::FailedTest;

/// Output kept per failure.
const MAX_FAILURE_OUTPUT: usize = 4000;

/// Compiled failure patterns.
#[derive(Debug, Clone)]
pub struct FailureScanner {
    cargo: Regex,
    cargo_section: Regex,
    pytest: Regex,
    go: Regex,
    jest: Regex,
}

impl FailureScanner {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            cargo: Regex::new(r"(?m)^test (\S+) \.\.\. FAILED\s*$")?,
            cargo_section: Regex::new(r"(?m)^---- (\S+) stdout ----$")?,
            pytest: Regex::new(r"(?m)^FAILED (\S+)")?,
            go: Regex::new(r"(?m)^\s*--- FAIL: (\S+)")?,
            jest: Regex::new(r"(?m)^\s*[✕×] (.+?)(?: \(\d+(?:\.\d+)? ?m?s\))?\s*$")?,
        })
    }

    /// Identifiers of failing tests, in order of first appearance.
    pub fn identifiers(&self, output: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for pattern in [&self.cargo, &self.pytest, &self.go, &self.jest] {
            for captures in pattern.captures_iter(output) {
                if let Some(id) = captures.get(1) {
                    let id = id.as_str().trim().to_string();
                    if !found.contains(&id) {
                        found.push(id);
                    }
                }
            }
        }
        found
    }

    /// Failures for a run that exited unsuccessfully.
    pub fn scan(&self, command: &str, stdout: &str, stderr: &str) -> Vec<FailedTest> {
        let combined = if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{stdout}\n{stderr}")
        };
        let identifiers = self.identifiers(&combined);
        if identifiers.is_empty() {
            return vec![FailedTest {
                identifier: command.to_string(),
                output: tail(&combined, MAX_FAILURE_OUTPUT),
            }];
        }
        identifiers
            .into_iter()
            .map(|identifier| {
                let output = self
                    .cargo_output(&combined, &identifier)
                    .unwrap_or_else(|| tail(&combined, MAX_FAILURE_OUTPUT));
                FailedTest { identifier, output }
            })
            .collect()
    }

    /// The `---- name stdout ----` block cargo prints for a failed test.
    fn cargo_output(&self, output: &str, identifier: &str) -> Option<String> {
        let header = self
            .cargo_section
            .captures_iter(output)
            .find(|c| c.get(1).is_some_and(|m| m.as_str() == identifier))?
            .get(0)?;
        let rest = &output[header.end()..];
        let end = rest
            .find("\n---- ")
            .or_else(|| rest.find("\nfailures:"))
            .unwrap_or(rest.len());
        Some(tail(rest[..end].trim(), MAX_FAILURE_OUTPUT))
    }
}

/// Last `limit` bytes of `text`, cut on a char boundary.
pub fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> FailureScanner {
        FailureScanner::new().unwrap()
    }

    #[test]
    fn cargo_failures_carry_their_section() {
        let out = "running 2 tests\n\
test calc::tests::adds ... ok\n\
test calc::tests::divides ... FAILED\n\
\n\
failures:\n\
\n\
---- calc::tests::divides stdout ----\n\
thread 'calc::tests::divides' panicked at src/calc.rs:20:9:\n\
attempt to divide by zero\n\
\n\
failures:\n\
    calc::tests::divides\n";
        let failures = scanner().scan("cargo test", out, "");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].identifier, "calc::tests::divides");
        assert!(failures[0].output.contains("divide by zero"));
        assert!(!failures[0].output.contains("running 2 tests"));
    }

    #[test]
    fn pytest_go_and_jest_styles() {
        let s = scanner();
        assert_eq!(
            s.identifiers("FAILED tests/test_calc.py::test_div - ZeroDivisionError\n"),
            vec!["tests/test_calc.py::test_div"]
        );
        assert_eq!(
            s.identifiers("=== RUN   TestDiv\n--- FAIL: TestDiv (0.00s)\nFAIL\n"),
            vec!["TestDiv"]
        );
        assert_eq!(
            s.identifiers("  ✓ adds (2 ms)\n  ✕ divides by zero (3 ms)\n"),
            vec!["divides by zero"]
        );
    }

    #[test]
    fn unnamed_failure_is_reported_under_the_command() {
        let failures = scanner().scan("make test", "", "error: could not compile\n");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].identifier, "make test");
        assert!(failures[0].output.contains("could not compile"));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("héllo", 4), "llo");
        assert_eq!(tail("abc", 10), "abc");
    }
}
