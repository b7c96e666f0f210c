//! Compiler diagnostics
//!
//! Every error renders as
//!
//! ```text
//! path:line:column: Error at 'lexeme': message
//!     let x = ;
//!             ^
//! ```
//!
//! with 1-based lines and columns and a caret underline as wide as the
//! offending token. `<repl>` stands in when there is no path. Type errors
//! are advisory: they are collected and reported but never fail compilation.

use erkao_core::{Token, TokenKind};
use std::fmt;

/// Exit codes for the host CLI. The core never calls `exit` itself.
pub const EXIT_OK: i32 = 0;
pub const EXIT_USAGE: i32 = 64;
pub const EXIT_ERROR: i32 = 65;
pub const EXIT_IO: i32 = 74;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Malformed token from the lexer; compilation halts before it begins.
    Lex,
    /// Unexpected token; the compiler resynchronises and keeps parsing.
    Parse,
    /// Advisory; never suppresses codegen.
    Type,
    /// Pool overflow, oversized jump, bad pattern, non-exhaustive match;
    /// aborts the pipeline.
    Compile,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub path: String,
    /// 0-indexed; rendered 1-based.
    pub line: usize,
    pub column: usize,
    pub lexeme: String,
    pub at_end: bool,
    pub message: String,
    pub source_line: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.at_end {
            write!(
                f,
                "{}:{}:{}: Error at end: {}",
                self.path,
                self.line + 1,
                self.column + 1,
                self.message
            )?;
        } else {
            write!(
                f,
                "{}:{}:{}: Error at '{}': {}",
                self.path,
                self.line + 1,
                self.column + 1,
                self.lexeme,
                self.message
            )?;
        }
        if let Some(source_line) = &self.source_line {
            let width = self.lexeme.chars().count().max(1);
            write!(
                f,
                "\n    {}\n    {}{}",
                source_line,
                " ".repeat(self.column),
                "^".repeat(width)
            )?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics for one compilation. Parse and compile errors
/// fail the pipeline; type errors only count.
#[derive(Debug)]
pub struct Reporter {
    path: String,
    lines: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    hard_errors: usize,
}

impl Reporter {
    pub fn new(source: &str, path: Option<&str>) -> Self {
        Reporter {
            path: path.unwrap_or("<repl>").to_string(),
            lines: source.lines().map(str::to_string).collect(),
            diagnostics: Vec::new(),
            hard_errors: 0,
        }
    }

    pub fn report(&mut self, kind: DiagnosticKind, token: &Token, message: impl Into<String>) {
        if kind != DiagnosticKind::Type {
            self.hard_errors += 1;
        }
        self.diagnostics.push(Diagnostic {
            kind,
            path: self.path.clone(),
            line: token.line,
            column: token.column,
            lexeme: token.lexeme.clone(),
            at_end: token.kind == TokenKind::Eof,
            message: message.into(),
            source_line: self.lines.get(token.line).cloned(),
        });
    }

    /// True when a parse/compile/lex error has been reported; type errors do
    /// not count.
    pub fn failed(&self) -> bool {
        self.hard_errors > 0
    }

    pub fn type_error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Type)
            .count()
    }
}

/// Returned when compilation fails; carries everything collected, type
/// diagnostics included.
#[derive(Debug)]
pub struct CompileFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_caret() {
        let source = "let x = ;";
        let mut reporter = Reporter::new(source, Some("main.ek"));
        let token = Token::new(TokenKind::Semicolon, ";", 0, 8);
        reporter.report(DiagnosticKind::Parse, &token, "Expect expression");
        let rendered = reporter.diagnostics[0].to_string();
        assert!(rendered.starts_with("main.ek:1:9: Error at ';': Expect expression"));
        assert!(rendered.contains("let x = ;"));
        assert!(rendered.ends_with("        ^"));
    }

    #[test]
    fn test_repl_path_and_end_token() {
        let mut reporter = Reporter::new("1 +", None);
        let token = Token::new(TokenKind::Eof, "", 0, 3);
        reporter.report(DiagnosticKind::Parse, &token, "Expect expression");
        let rendered = reporter.diagnostics[0].to_string();
        assert!(rendered.starts_with("<repl>:1:4: Error at end: Expect expression"));
    }

    #[test]
    fn test_type_errors_do_not_fail() {
        let mut reporter = Reporter::new("x", Some("t.ek"));
        let token = Token::new(TokenKind::Identifier, "x", 0, 0);
        reporter.report(DiagnosticKind::Type, &token, "Operand must be a number");
        assert!(!reporter.failed());
        assert_eq!(reporter.type_error_count(), 1);
        reporter.report(DiagnosticKind::Compile, &token, "Too many constants");
        assert!(reporter.failed());
    }
}
