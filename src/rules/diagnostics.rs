//! Diagnostics for rule-document parsing
//!
//! The parser reports through an optional `DiagnosticSink`. With a sink
//! attached, every problem in a document is collected in one pass; without
//! one, the first error is returned as a `SyntaxError` carrying full
//! source-position context.

use serde::Serialize;
use thiserror::Error;

/// How a reported problem (or a rule violation) should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ignore,
    Warning,
    Error,
    Exclusion,
    Info,
}

impl Severity {
    /// Parse a `severity` clause value. `Info` is engine-internal and has
    /// no rule-file spelling.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "ignore" => Some(Severity::Ignore),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "exclusion" => Some(Severity::Exclusion),
            _ => None,
        }
    }
}

/// One reported problem with its source position
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

/// Structured parse failure, thrown when no diagnostic sink is attached
#[derive(Debug, Clone, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize, column: usize, offset: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            offset,
        }
    }
}

/// Accumulating sink consumed by the parser and the expression compiler
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);

    /// True once anything has been reported; used to emit a synthetic
    /// "no errors found" message when a whole document parses clean.
    fn has_message(&self) -> bool;
}

/// Default sink: keeps every diagnostic in report order
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }
}

impl DiagnosticSink for DiagnosticLog {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn has_message(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}
