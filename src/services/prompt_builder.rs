//! Prompt rendering and candidate extraction.
//!
//! The rendered prompt is a pure function of its context, so the same
//! session state always yields the same [`PromptFingerprint`]. Durations in
//! captured test output are masked before rendering; they change between
//! otherwise identical runs and would defeat replay.

use std::fmt::Write as _;

use regex::Regex;
use serde::Deserialize;

use crate::domain::errors::{CoverError, CoverResult};
use crate::domain::models::{Feedback, PromptFingerprint};
use crate::domain::ports::Prompt;

/// Captured output included per failing test.
const MAX_FEEDBACK_OUTPUT: usize = 2000;

/// A context file shown to the model alongside the source under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedFile {
    /// Path as shown to the model.
    pub path: String,
    pub content: String,
}

/// Everything the next prompt is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    /// Source path as shown to the model, relative to the project root.
    pub source_path: &'a str,
    pub source: &'a str,
    pub test_path: &'a str,
    pub test: &'a str,
    pub included_files: &'a [IncludedFile],
    /// Test-file language label.
    pub language: &'a str,
    pub current_coverage: f64,
    pub desired_coverage: f64,
    pub missed_lines: &'a [u32],
    pub feedback: &'a Feedback,
    pub additional_instructions: &'a str,
}

#[derive(Debug, Deserialize)]
struct TestsDocument {
    tests: Vec<GeneratedTest>,
}

#[derive(Debug, Deserialize)]
struct GeneratedTest {
    test_code: String,
}

/// Renders prompts and pulls candidate code back out of responses.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    durations: Regex,
    fenced: Regex,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            durations: Regex::new(r"\b\d+(?:\.\d+)?\s?(?:ms|s)\b")?,
            fenced: Regex::new(r"(?s)```([^\n`]*)\n(.*?)```")?,
        })
    }

    /// Render the prompt for `ctx` and fingerprint it.
    pub fn build(&self, ctx: &PromptContext<'_>) -> (Prompt, PromptFingerprint) {
        let system = format!(
            "You write new {lang} unit tests that raise line coverage of a source file.\n\
             Reply with a YAML document of the form:\n\
             tests:\n  - test_code: |\n      <complete test code>\n\
             Each test_code is appended verbatim to the end of the existing test file, \
             so include only new tests and any imports they need. \
             Do not repeat tests that already exist.",
            lang = ctx.language
        );

        let mut user = String::new();
        let _ = writeln!(user, "## Source file: {}\n", ctx.source_path);
        let _ = writeln!(user, "```\n{}```\n", numbered(ctx.source));
        let _ = writeln!(user, "## Existing test file: {}\n", ctx.test_path);
        let _ = writeln!(user, "```\n{}\n```\n", ctx.test.trim_end());
        for file in ctx.included_files {
            let _ = writeln!(user, "## Additional file: {}\n", file.path);
            let _ = writeln!(user, "```\n{}\n```\n", file.content.trim_end());
        }
        let _ = writeln!(user, "## Coverage\n");
        let _ = writeln!(
            user,
            "Current line coverage is {:.2}%; the target is {:.2}%.",
            ctx.current_coverage, ctx.desired_coverage
        );
        if !ctx.missed_lines.is_empty() {
            let lines: Vec<String> = ctx.missed_lines.iter().map(u32::to_string).collect();
            let _ = writeln!(user, "Lines not yet covered: {}.", lines.join(", "));
        }

        for entry in &ctx.feedback.entries {
            let _ = writeln!(
                user,
                "\n## Previous attempt (iteration {}) was rejected: {}\n",
                entry.iteration, entry.outcome
            );
            if !entry.reason.is_empty() {
                let _ = writeln!(user, "Reason: {}\n", self.scrub(&entry.reason));
            }
            if !entry.candidate_code.is_empty() {
                let _ = writeln!(user, "Rejected code:\n```\n{}\n```", entry.candidate_code.trim_end());
            }
            for failure in &entry.failures {
                let output = super::test_failures::tail(&failure.output, MAX_FEEDBACK_OUTPUT);
                let _ = writeln!(
                    user,
                    "\nFailing test `{}`:\n```\n{}\n```",
                    failure.identifier,
                    self.scrub(output.trim_end())
                );
            }
        }

        if !ctx.additional_instructions.trim().is_empty() {
            let _ = writeln!(
                user,
                "\n## Additional instructions\n\n{}",
                ctx.additional_instructions.trim()
            );
        }

        let prompt = Prompt { system, user };
        let fingerprint = fingerprint(&prompt);
        (prompt, fingerprint)
    }

    /// Turn raw Generator text into candidate code.
    ///
    /// Accepts a `tests: [{test_code}]` YAML document (bare or in a yaml
    /// fence), else the first fenced block, else the trimmed text.
    pub fn extract_candidate(&self, raw: &str) -> CoverResult<String> {
        let code = tests_document(raw)
            .or_else(|| {
                self.fenced
                    .captures_iter(raw)
                    .filter(|c| {
                        c.get(1)
                            .is_some_and(|info| matches!(info.as_str().trim(), "yaml" | "yml"))
                    })
                    .find_map(|c| c.get(2).and_then(|body| tests_document(body.as_str())))
            })
            .or_else(|| {
                self.fenced
                    .captures(raw)
                    .and_then(|c| c.get(2))
                    .map(|body| body.as_str().to_string())
            })
            .unwrap_or_else(|| raw.to_string());

        let code = code.trim_matches(['\n', '\r']).to_string();
        if code.trim().is_empty() {
            return Err(CoverError::MalformedCandidate(
                "generator response contained no test code".to_string(),
            ));
        }
        Ok(code)
    }

    fn scrub(&self, text: &str) -> String {
        self.durations.replace_all(text, "<duration>").into_owned()
    }
}

fn tests_document(text: &str) -> Option<String> {
    let doc: TestsDocument = serde_yaml::from_str(text).ok()?;
    let blocks: Vec<&str> = doc
        .tests
        .iter()
        .map(|t| t.test_code.trim_end())
        .filter(|code| !code.trim().is_empty())
        .collect();
    (!blocks.is_empty()).then(|| blocks.join("\n\n"))
}

/// Source with 1-based line numbers, so coverage gaps can be referenced.
fn numbered(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + source.lines().count() * 6);
    for (index, line) in source.lines().enumerate() {
        let _ = writeln!(out, "{:>4} {line}", index + 1);
    }
    out
}

pub fn fingerprint(prompt: &Prompt) -> PromptFingerprint {
    let mut bytes = Vec::with_capacity(prompt.system.len() + prompt.user.len() + 1);
    bytes.extend_from_slice(prompt.system.as_bytes());
    bytes.push(0);
    bytes.extend_from_slice(prompt.user.as_bytes());
    PromptFingerprint::of_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FailedTest, FeedbackEntry, IterationOutcome};

    fn builder() -> PromptBuilder {
        PromptBuilder::new().unwrap()
    }

    fn context<'a>(feedback: &'a Feedback) -> PromptContext<'a> {
        PromptContext {
            source_path: "calc.py",
            source: "def add(a, b):\n    return a + b\n",
            test_path: "test_calc.py",
            test: "from calc import add\n",
            included_files: &[],
            language: "Python",
            current_coverage: 0.0,
            desired_coverage: 70.0,
            missed_lines: &[1, 2],
            feedback,
            additional_instructions: "",
        }
    }

    #[test]
    fn same_context_same_fingerprint() {
        let feedback = Feedback::default();
        let (a, fa) = builder().build(&context(&feedback));
        let (b, fb) = builder().build(&context(&feedback));
        assert_eq!(a, b);
        assert_eq!(fa, fb);
        assert!(a.system.contains("Python"));
        assert!(a.user.contains("   2     return a + b"));
        assert!(a.user.contains("Lines not yet covered: 1, 2."));
    }

    #[test]
    fn feedback_changes_the_prompt_but_not_timings() {
        let run = |ms: &str| Feedback {
            entries: vec![FeedbackEntry {
                iteration: 1,
                outcome: IterationOutcome::RejectedTestFailure,
                candidate_code: "def test_x(): assert False".into(),
                reason: "test command exited with status 1".into(),
                failures: vec![FailedTest {
                    identifier: "test_calc.py::test_x".into(),
                    output: format!("AssertionError\n1 failed in {ms}"),
                }],
            }],
        };
        let quiet = Feedback::default();
        let (_, none) = builder().build(&context(&quiet));
        let (first, with_a) = builder().build(&context(&run("0.12s")));
        let (_, with_b) = builder().build(&context(&run("0.31s")));
        assert_ne!(none, with_a);
        assert_eq!(with_a, with_b);
        assert!(first.user.contains("1 failed in <duration>"));
        assert!(first.user.contains("rejected-test-failure"));
    }

    #[test]
    fn included_files_are_rendered_and_fingerprinted() {
        let feedback = Feedback::default();
        let helpers = [IncludedFile {
            path: "conftest.py".into(),
            content: "import pytest\n\n@pytest.fixture\ndef zero():\n    return 0\n".into(),
        }];
        let (_, bare) = builder().build(&context(&feedback));
        let (prompt, with_helpers) = builder().build(&PromptContext {
            included_files: &helpers,
            ..context(&feedback)
        });
        assert_ne!(bare, with_helpers);
        assert!(prompt.user.contains("## Additional file: conftest.py"));
        assert!(prompt.user.contains("def zero():\n    return 0\n```"));
        let source_at = prompt.user.find("## Source file").unwrap();
        let helper_at = prompt.user.find("## Additional file").unwrap();
        let coverage_at = prompt.user.find("## Coverage").unwrap();
        assert!(source_at < helper_at && helper_at < coverage_at);
    }

    #[test]
    fn extracts_yaml_tests() {
        let raw = "tests:\n  - test_code: |\n      def test_a():\n          assert add(1, 1) == 2\n  - test_code: |\n      def test_b():\n          assert add(0, 0) == 0\n";
        let code = builder().extract_candidate(raw).unwrap();
        assert_eq!(
            code,
            "def test_a():\n    assert add(1, 1) == 2\n\ndef test_b():\n    assert add(0, 0) == 0"
        );
    }

    #[test]
    fn extracts_fenced_yaml_then_plain_fences() {
        let fenced_yaml = "Here you go:\n```yaml\ntests:\n  - test_code: |\n      def test_a():\n          pass\n```\n";
        assert_eq!(
            builder().extract_candidate(fenced_yaml).unwrap(),
            "def test_a():\n    pass"
        );

        let fenced = "Sure.\n```python\ndef test_b():\n    pass\n```\nmore text";
        assert_eq!(builder().extract_candidate(fenced).unwrap(), "def test_b():\n    pass");

        assert_eq!(
            builder().extract_candidate("\n\ndef test_c():\n    pass\n").unwrap(),
            "def test_c():\n    pass"
        );
    }

    #[test]
    fn empty_response_is_malformed() {
        assert!(matches!(
            builder().extract_candidate("```\n\n```"),
            Err(CoverError::MalformedCandidate(_))
        ));
        assert!(builder().extract_candidate("  ").is_err());
    }
}
