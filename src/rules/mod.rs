//! Rule-language front end: lexing, parsing and constraint compilation

pub mod diagnostics;
pub mod expr;
pub mod lexer;
pub mod model;
pub mod parser;

pub use diagnostics::{Diagnostic, DiagnosticLog, DiagnosticSink, Severity, SyntaxError};
pub use model::{Constraint, ConstraintKind, Rule, RuleDocument};
pub use parser::RuleParser;
