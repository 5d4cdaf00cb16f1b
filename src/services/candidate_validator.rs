//! Test Candidate Validator.
//!
//! Merges a candidate into the current test file and checks the result
//! structurally. Nothing is executed here. A candidate is rejected as
//! `Duplicate` when its whitespace-normalized body matches one that already
//! ran green this session (or is already present in the file), and as
//! `MalformedCandidate` when the merged file has more syntax problems than
//! the file it was merged into.

use std::path::Path;

use tracing::debug;

use super::syntax::{SyntaxChecker, SyntaxIssue};
use crate::domain::errors::{CoverError, CoverResult};
use crate::domain::models::{normalize_body, TestCandidate};

/// Validator bound to one test file's type.
#[derive(Debug, Clone, Copy)]
pub struct CandidateValidator {
    checker: SyntaxChecker,
}

impl CandidateValidator {
    pub fn for_test_file(path: &Path) -> Self {
        Self {
            checker: SyntaxChecker::for_path(path),
        }
    }

    pub const fn checker(&self) -> SyntaxChecker {
        self.checker
    }

    /// Validate `candidate` against `current` and return the merged content.
    ///
    /// `green_bodies` are the normalized bodies of candidates that compiled
    /// and ran green earlier in the session.
    pub fn validate(
        &self,
        current: &str,
        candidate: &TestCandidate,
        green_bodies: &[String],
    ) -> CoverResult<String> {
        let body = candidate.normalized_body();
        if body.is_empty() {
            return Err(CoverError::MalformedCandidate(
                "candidate contains no code".to_string(),
            ));
        }
        if green_bodies.iter().any(|seen| *seen == body) || normalize_body(current).contains(&body) {
            return Err(CoverError::Duplicate);
        }

        let merged = merge(current, &candidate.code);
        let before = self.checker.issues(current)?;
        let after = self.checker.issues(&merged)?;
        debug!(
            checker = self.checker.label(),
            issues_before = before.len(),
            issues_after = after.len(),
            "validated candidate structure"
        );
        if after.len() > before.len() {
            let first_new = after
                .iter()
                .find(|issue| !before.contains(issue))
                .or_else(|| after.first())
                .map_or_else(|| "structural error".to_string(), SyntaxIssue::to_string);
            return Err(CoverError::MalformedCandidate(format!(
                "merged {} test file does not parse: {first_new}",
                self.checker.label()
            )));
        }
        Ok(merged)
    }
}

/// Append `code` to `current`, separated by one blank line, newline-terminated.
pub fn merge(current: &str, code: &str) -> String {
    let head = current.trim_end_matches(['\n', '\r']);
    let tail = code.trim_matches(['\n', '\r']);
    let mut merged = String::with_capacity(head.len() + tail.len() + 3);
    merged.push_str(head);
    if !head.is_empty() {
        merged.push_str("\n\n");
    }
    merged.push_str(tail);
    merged.push('\n');
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PromptFingerprint;

    const CURRENT: &str = "from calc import add\n\n\ndef test_add():\n    assert add(1, 2) == 3\n";

    fn candidate(code: &str) -> TestCandidate {
        TestCandidate::new(code, 1, PromptFingerprint::of_bytes(code.as_bytes()))
    }

    fn python() -> CandidateValidator {
        CandidateValidator::for_test_file(Path::new("test_calc.py"))
    }

    #[test]
    fn merges_with_a_blank_line() {
        assert_eq!(merge("a\n\n\n", "\nb"), "a\n\nb\n");
        assert_eq!(merge("", "b\n"), "b\n");
    }

    #[test]
    fn accepts_well_formed_candidate() {
        let merged = python()
            .validate(CURRENT, &candidate("def test_sub():\n    assert add(2, -1) == 1\n"), &[])
            .unwrap();
        assert!(merged.starts_with(CURRENT.trim_end()));
        assert!(merged.ends_with("assert add(2, -1) == 1\n"));
    }

    #[test]
    fn rejects_unparseable_candidate() {
        let err = python()
            .validate(CURRENT, &candidate("def test_sub(:\n    assert add(2, -1) == 1\n"), &[])
            .unwrap_err();
        match err {
            CoverError::MalformedCandidate(message) => assert!(message.contains("line")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicates_ignoring_whitespace() {
        let seen = vec![normalize_body("def test_two():\n    assert add(1, 1) == 2\n")];
        let err = python()
            .validate(CURRENT, &candidate("def test_two():\n\tassert add(1,1) == 2"), &seen)
            .unwrap_err();
        assert!(matches!(err, CoverError::Duplicate));

        // Restating a test already in the file is a duplicate too.
        let err = python()
            .validate(CURRENT, &candidate("def test_add():\n  assert add(1, 2) == 3"), &[])
            .unwrap_err();
        assert!(matches!(err, CoverError::Duplicate));
    }

    #[test]
    fn pre_existing_errors_do_not_block_valid_candidates() {
        let java = CandidateValidator::for_test_file(Path::new("CalcTest.java"));
        let broken = "class CalcTest {\n  void a() {\n";
        // Already two unclosed braces; a balanced method adds none.
        assert!(java
            .validate(broken, &candidate("void b() { assertEquals(2, add(1, 1)); }"), &[])
            .is_ok());
        assert!(java
            .validate(broken, &candidate("void c() { assertEquals(2, add(1, 1));"), &[])
            .is_err());
    }

    #[test]
    fn blank_candidate_is_malformed() {
        assert!(matches!(
            python().validate(CURRENT, &candidate(" \n\t"), &[]),
            Err(CoverError::MalformedCandidate(_))
        ));
    }
}
