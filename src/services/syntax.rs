//! Structural checks for test files.
//!
//! Files in a language with a bundled tree-sitter grammar are parsed and
//! their `ERROR`/`MISSING` nodes collected. Anything else falls back to a
//! delimiter-balance scan that skips string literals and comments.

use std::fmt;
use std::path::Path;

use tree_sitter::{Parser, TreeCursor};

use crate::domain::errors::{CoverError, CoverResult};

/// Test-file languages with a bundled grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxLanguage {
    Rust,
    Python,
    Go,
    TypeScript,
    /// `.tsx` and `.jsx`.
    Tsx,
    /// Plain JavaScript, parsed with the TypeScript grammar.
    JavaScript,
}

impl SyntaxLanguage {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "go" => Some(Self::Go),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" | "jsx" => Some(Self::Tsx),
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Rust => "Rust",
            Self::Python => "Python",
            Self::Go => "Go",
            Self::TypeScript => "TypeScript",
            Self::Tsx => "TSX",
            Self::JavaScript => "JavaScript",
        }
    }

    fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::TypeScript | Self::JavaScript => {
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
            }
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }
}

/// One structural problem, 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.column, self.message)
    }
}

/// How a test file is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxChecker {
    TreeSitter(SyntaxLanguage),
    Delimiters { hash_comments: bool },
}

impl SyntaxChecker {
    pub fn for_path(path: &Path) -> Self {
        if let Some(language) = SyntaxLanguage::from_path(path) {
            return Self::TreeSitter(language);
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        Self::Delimiters {
            hash_comments: matches!(
                ext.as_str(),
                "rb" | "sh" | "bash" | "pl" | "r" | "jl" | "ex" | "exs" | "cr" | "nim"
            ),
        }
    }

    /// Name of the language or check, for prompts and logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::TreeSitter(language) => language.name(),
            Self::Delimiters { .. } => "source",
        }
    }

    pub fn issues(&self, source: &str) -> CoverResult<Vec<SyntaxIssue>> {
        match *self {
            Self::TreeSitter(language) => tree_sitter_issues(language, source),
            Self::Delimiters { hash_comments } => Ok(delimiter_issues(source, hash_comments)),
        }
    }
}

fn tree_sitter_issues(language: SyntaxLanguage, source: &str) -> CoverResult<Vec<SyntaxIssue>> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| CoverError::Config(format!("{} grammar unavailable: {e}", language.name())))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| CoverError::Config(format!("{} parser gave no tree", language.name())))?;

    let mut issues = Vec::new();
    let mut cursor = tree.root_node().walk();
    collect_errors(&mut cursor, &mut issues);
    Ok(issues)
}

fn collect_errors(cursor: &mut TreeCursor<'_>, issues: &mut Vec<SyntaxIssue>) {
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            let start = node.start_position();
            issues.push(SyntaxIssue {
                line: start.row + 1,
                column: start.column + 1,
                message: if node.is_missing() {
                    format!("missing `{}`", node.kind())
                } else {
                    "syntax error".to_string()
                },
            });
        } else if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Bracket balance, ignoring strings and comments.
fn delimiter_issues(source: &str, hash_comments: bool) -> Vec<SyntaxIssue> {
    let mut issues = Vec::new();
    let mut stack: Vec<(char, usize, usize)> = Vec::new();
    let mut chars = source.chars().peekable();
    let (mut line, mut column) = (1usize, 0usize);

    macro_rules! advance {
        () => {{
            let c = chars.next();
            if c == Some('\n') {
                line += 1;
                column = 0;
            } else if c.is_some() {
                column += 1;
            }
            c
        }};
    }

    while let Some(c) = advance!() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|&n| n != '\n') {
                    advance!();
                }
            }
            '#' if hash_comments => {
                while chars.peek().is_some_and(|&n| n != '\n') {
                    advance!();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                let (start_line, start_col) = (line, column);
                advance!();
                let mut closed = false;
                while let Some(n) = advance!() {
                    if n == '*' && chars.peek() == Some(&'/') {
                        advance!();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    issues.push(SyntaxIssue {
                        line: start_line,
                        column: start_col,
                        message: "unterminated block comment".to_string(),
                    });
                }
            }
            '"' | '\'' | '`' => {
                let (start_line, start_col) = (line, column);
                let mut closed = false;
                while let Some(n) = advance!() {
                    if n == '\\' {
                        advance!();
                    } else if n == c {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    issues.push(SyntaxIssue {
                        line: start_line,
                        column: start_col,
                        message: format!("unterminated {c} string"),
                    });
                }
            }
            '(' | '[' | '{' => stack.push((c, line, column)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _, _)) if open == expected => {}
                    Some((open, open_line, open_col)) => issues.push(SyntaxIssue {
                        line,
                        column,
                        message: format!(
                            "`{c}` does not close `{open}` opened at line {open_line}, column {open_col}"
                        ),
                    }),
                    None => issues.push(SyntaxIssue {
                        line,
                        column,
                        message: format!("unexpected `{c}`"),
                    }),
                }
            }
            _ => {}
        }
    }

    issues.extend(stack.into_iter().map(|(open, line, column)| SyntaxIssue {
        line,
        column,
        message: format!("`{open}` is never closed"),
    }));
    issues
}
