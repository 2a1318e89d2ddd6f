//! Rule-document parser
//!
//! Recursive-descent consumer of the token stream. Builds `Rule` and
//! `ComponentClassRule` objects, validates the document version, and
//! reports syntax errors without aborting the document: a bad form is
//! skipped to its matching close paren (bounded depth, explicit counter)
//! and parsing continues so a single bad rule never hides the rest.
//!
//! With a diagnostic sink attached every problem in the document is
//! collected in one pass; without one the first error is returned as a
//! `SyntaxError` with full position context.

use std::collections::HashMap;

use anyhow::Context;

use super::diagnostics::{Diagnostic, DiagnosticSink, Severity, SyntaxError};
use super::expr::{compile_value, ConditionExpr, ValueDomain};
use super::lexer::{Lexer, Token, TokenKind};
use super::model::{
    ComponentClassRule, Constraint, ConstraintKind, LayerSelector, Rule, RuleDocument, ValueSlot,
    ZoneConnectionMode, SUPPORTED_RULES_VERSION,
};
use crate::geometry::items::ItemTypeFlags;
use crate::geometry::layers::{LayerSet, LayerTable, RESCUE_LAYER};

/// Nesting deeper than this aborts error recovery instead of scanning the
/// rest of the document
const MAX_SKIP_DEPTH: usize = 64;

/// Parser for the rule-document text format
pub struct RuleParser<'t> {
    layers: &'t LayerTable,
}

impl<'t> RuleParser<'t> {
    pub fn new(layers: &'t LayerTable) -> Self {
        Self { layers }
    }

    /// Parse a rule document.
    ///
    /// With `sink` supplied, all diagnostics are accumulated and the
    /// (possibly partial) document is always returned. Without a sink the
    /// first error aborts with a `SyntaxError`.
    pub fn parse(
        &self,
        source: &str,
        sink: Option<&mut dyn DiagnosticSink>,
    ) -> Result<RuleDocument, SyntaxError> {
        let mut state = ParseState {
            lexer: Lexer::new(source),
            layers: self.layers,
            sink,
            doc: RuleDocument {
                version: SUPPORTED_RULES_VERSION,
                ..Default::default()
            },
            saw_version: false,
            warned_missing_version: false,
            kind_domains: HashMap::new(),
        };

        match state.parse_document() {
            Ok(()) => {}
            Err(err) => match state.sink.as_deref_mut() {
                Some(s) => s.report(Diagnostic {
                    message: err.message.clone(),
                    severity: Severity::Error,
                    line: err.line,
                    column: err.column,
                    offset: err.offset,
                }),
                None => return Err(err),
            },
        }

        if let Some(s) = state.sink.as_deref_mut() {
            if !s.has_message() {
                s.report(Diagnostic {
                    message: "no errors found".to_string(),
                    severity: Severity::Info,
                    line: 1,
                    column: 1,
                    offset: 0,
                });
            }
        }

        Ok(state.doc)
    }

    /// Parse a rule document from a file on disk
    pub fn parse_file(
        &self,
        path: impl AsRef<std::path::Path>,
        sink: Option<&mut dyn DiagnosticSink>,
    ) -> anyhow::Result<RuleDocument> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read rules file {}", path.display()))?;
        self.parse(&source, sink)
            .with_context(|| format!("failed to parse rules file {}", path.display()))
    }
}

struct ParseState<'src, 'env, 'snk> {
    lexer: Lexer<'src>,
    layers: &'env LayerTable,
    sink: Option<&'snk mut dyn DiagnosticSink>,
    doc: RuleDocument,
    saw_version: bool,
    warned_missing_version: bool,
    /// Value domain each constraint kind has resolved to so far, across
    /// the whole document
    kind_domains: HashMap<ConstraintKind, ValueDomain>,
}

impl<'src, 'env, 'snk> ParseState<'src, 'env, 'snk> {
    /// Report a problem. With a sink this always continues; without one an
    /// error-severity problem becomes the thrown `SyntaxError`.
    fn issue(&mut self, message: String, severity: Severity, at: &Token) -> Result<(), SyntaxError> {
        match self.sink.as_deref_mut() {
            Some(s) => {
                s.report(Diagnostic {
                    message,
                    severity,
                    line: at.line,
                    column: at.column,
                    offset: at.offset,
                });
                Ok(())
            }
            None if severity == Severity::Error => {
                Err(SyntaxError::new(message, at.line, at.column, at.offset))
            }
            None => Ok(()),
        }
    }

    /// A lexer error is recoverable: the lexer has already consumed the
    /// offending character, so the caller can report and keep scanning
    fn lex_issue(&mut self, err: SyntaxError) -> Result<(), SyntaxError> {
        match self.sink.as_deref_mut() {
            Some(s) => {
                s.report(Diagnostic {
                    message: err.message,
                    severity: Severity::Error,
                    line: err.line,
                    column: err.column,
                    offset: err.offset,
                });
                Ok(())
            }
            None => Err(err),
        }
    }

    /// `lexer.next()` with per-token recovery; None means the token was
    /// bad and has been reported
    fn next_token(&mut self) -> Result<Option<Token>, SyntaxError> {
        match self.lexer.next() {
            Ok(tok) => Ok(Some(tok)),
            Err(err) => {
                self.lex_issue(err)?;
                Ok(None)
            }
        }
    }

    /// Skip to the close paren matching an already-consumed open paren.
    /// Explicit depth counter; EOF inside yields "incomplete statement".
    fn skip_to_close(&mut self, from: &Token) -> Result<(), SyntaxError> {
        let mut depth = 1usize;
        loop {
            let tok = match self.next_token()? {
                Some(tok) => tok,
                None => continue,
            };
            match tok.kind {
                TokenKind::LParen => {
                    depth += 1;
                    if depth > MAX_SKIP_DEPTH {
                        return self.issue(
                            "statement nested too deeply".to_string(),
                            Severity::Error,
                            &tok,
                        );
                    }
                }
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                TokenKind::Eof => {
                    return self.issue(
                        "incomplete statement".to_string(),
                        Severity::Error,
                        from,
                    );
                }
                _ => {}
            }
        }
    }

    fn parse_document(&mut self) -> Result<(), SyntaxError> {
        loop {
            let tok = match self.next_token()? {
                Some(tok) => tok,
                None => continue,
            };
            match tok.kind {
                TokenKind::Eof => return Ok(()),
                TokenKind::LParen => {
                    let kw = match self.next_token()? {
                        Some(kw) => kw,
                        None => continue,
                    };
                    if kw.kind != TokenKind::Symbol {
                        self.issue(
                            "unrecognized item".to_string(),
                            Severity::Error,
                            &kw,
                        )?;
                        self.skip_to_close(&tok)?;
                        continue;
                    }
                    match kw.text.as_str() {
                        "version" => self.parse_version(&kw)?,
                        "rule" => {
                            self.require_version(&tok)?;
                            // A lexer error inside an operand aborts only
                            // this rule, never the rest of the document
                            match self.parse_rule(&tok) {
                                Ok(rule) => self.doc.rules.push(rule),
                                Err(err) => self.lex_issue(err)?,
                            }
                        }
                        "assign_component_class" => {
                            self.require_version(&tok)?;
                            match self.parse_class_assignment(&tok) {
                                Ok(Some(assignment)) => {
                                    self.doc.class_assignments.push(assignment)
                                }
                                Ok(None) => {}
                                Err(err) => self.lex_issue(err)?,
                            }
                        }
                        other => {
                            self.issue(
                                format!("unrecognized item '{}'", other),
                                Severity::Error,
                                &kw,
                            )?;
                            self.skip_to_close(&tok)?;
                        }
                    }
                }
                _ => {
                    self.issue(
                        format!("unrecognized item '{}'", tok.text),
                        Severity::Error,
                        &tok,
                    )?;
                }
            }
        }
    }

    /// Warn once if rules appear before any `(version N)` form
    fn require_version(&mut self, at: &Token) -> Result<(), SyntaxError> {
        if !self.saw_version && !self.warned_missing_version {
            self.warned_missing_version = true;
            self.issue(
                "missing version statement; assuming defaults".to_string(),
                Severity::Warning,
                at,
            )?;
        }
        Ok(())
    }

    fn parse_version(&mut self, kw: &Token) -> Result<(), SyntaxError> {
        let num = self.lexer.next()?;
        if num.kind != TokenKind::Number {
            self.issue(
                "expected version number".to_string(),
                Severity::Error,
                &num,
            )?;
            if num.kind != TokenKind::RParen {
                self.skip_to_close(kw)?;
            }
            return Ok(());
        }
        match num.text.parse::<u32>() {
            Ok(version) => {
                self.saw_version = true;
                self.doc.version = version;
                if version > SUPPORTED_RULES_VERSION {
                    self.doc.from_future = true;
                    self.issue(
                        format!(
                            "rule document version {} is newer than supported version {}; \
                             loading what can be loaded",
                            version, SUPPORTED_RULES_VERSION
                        ),
                        Severity::Warning,
                        &num,
                    )?;
                }
            }
            Err(_) => {
                self.issue(
                    format!("malformed version number '{}'", num.text),
                    Severity::Error,
                    &num,
                )?;
            }
        }
        self.expect_close(kw)
    }

    fn expect_close(&mut self, from: &Token) -> Result<(), SyntaxError> {
        let tok = self.lexer.next()?;
        match tok.kind {
            TokenKind::RParen => Ok(()),
            TokenKind::Eof => self.issue(
                "incomplete statement".to_string(),
                Severity::Error,
                from,
            ),
            _ => {
                self.issue(
                    format!("expected ')' but found '{}'", tok.text),
                    Severity::Error,
                    &tok,
                )?;
                if tok.kind == TokenKind::LParen {
                    // the stray form must be closed before the owner's paren
                    self.skip_to_close(&tok)?;
                }
                self.skip_to_close(from)
            }
        }
    }

    /// Check a quoted expression operand for `${...}` references that
    /// nothing here can resolve
    fn check_text_variables(&mut self, text: &str, at: &Token) -> Result<(), SyntaxError> {
        if text.contains("${") {
            self.issue(
                format!("unresolved text variable in '{}'", text),
                Severity::Warning,
                at,
            )?;
        }
        Ok(())
    }

    fn compile_condition(&mut self) -> Result<Option<ConditionExpr>, SyntaxError> {
        if self.lexer.peek()?.kind != TokenKind::QuotedString {
            let bad = self.lexer.peek()?.clone();
            self.issue(
                "expected quoted expression".to_string(),
                Severity::Error,
                &bad,
            )?;
            return Ok(None);
        }
        let operand = self.lexer.next()?;
        self.check_text_variables(&operand.text, &operand)?;
        match ConditionExpr::compile(&operand.text) {
            Ok(expr) => Ok(Some(expr)),
            Err(err) => {
                self.issue(
                    format!(
                        "when compiling '{}': {} (expression offset {})",
                        operand.text, err.message, err.offset
                    ),
                    Severity::Error,
                    &operand,
                )?;
                Ok(None)
            }
        }
    }

    fn parse_rule(&mut self, open: &Token) -> Result<Rule, SyntaxError> {
        let name_tok = self.lexer.next()?;
        let name = if name_tok.kind == TokenKind::QuotedString {
            name_tok.text.clone()
        } else {
            self.issue(
                "expected quoted rule name".to_string(),
                Severity::Error,
                &name_tok,
            )?;
            String::new()
        };

        let mut rule = Rule::new(&name, self.layers);
        let mut has_layer_clause = false;

        loop {
            let tok = match self.next_token()? {
                Some(tok) => tok,
                None => continue,
            };
            match tok.kind {
                TokenKind::RParen => break,
                TokenKind::Eof => {
                    self.issue(
                        "incomplete statement".to_string(),
                        Severity::Error,
                        open,
                    )?;
                    break;
                }
                TokenKind::LParen => {
                    let kw = match self.next_token()? {
                        Some(kw) => kw,
                        None => {
                            self.skip_to_close(&tok)?;
                            continue;
                        }
                    };
                    if kw.kind != TokenKind::Symbol {
                        self.issue(
                            "expected clause keyword".to_string(),
                            Severity::Error,
                            &kw,
                        )?;
                        self.skip_to_close(&tok)?;
                        continue;
                    }
                    match kw.text.as_str() {
                        "condition" => {
                            if let Some(expr) = self.compile_condition()? {
                                rule.condition = Some(expr);
                            }
                            self.expect_close(&tok)?;
                        }
                        "layer" => {
                            if has_layer_clause {
                                self.issue(
                                    format!("rule '{}' already has a layer clause", rule.name),
                                    Severity::Error,
                                    &kw,
                                )?;
                                self.skip_to_close(&tok)?;
                                continue;
                            }
                            has_layer_clause = true;
                            rule.layers = self.parse_layer_selector()?;
                            self.expect_close(&tok)?;
                        }
                        "severity" => {
                            if self.lexer.peek()?.kind == TokenKind::RParen {
                                let bad = self.lexer.peek()?.clone();
                                self.issue(
                                    "expected a severity value".to_string(),
                                    Severity::Error,
                                    &bad,
                                )?;
                                self.lexer.next()?;
                                continue;
                            }
                            let value = self.lexer.next()?;
                            match Severity::from_keyword(&value.text) {
                                Some(sev) if value.kind == TokenKind::Symbol => {
                                    rule.severity = Some(sev)
                                }
                                _ => {
                                    self.issue(
                                        format!(
                                            "unknown severity '{}'; expected ignore, warning, \
                                             error or exclusion",
                                            value.text
                                        ),
                                        Severity::Error,
                                        &value,
                                    )?;
                                }
                            }
                            self.expect_close(&tok)?;
                        }
                        "constraint" => {
                            if let Some(constraint) = self.parse_constraint(&tok, &mut rule)? {
                                rule.constraints.push(constraint);
                            }
                        }
                        other => {
                            self.issue(
                                format!("unrecognized clause '{}'", other),
                                Severity::Error,
                                &kw,
                            )?;
                            self.skip_to_close(&tok)?;
                        }
                    }
                }
                _ => {
                    self.issue(
                        format!("expected a clause but found '{}'", tok.text),
                        Severity::Error,
                        &tok,
                    )?;
                }
            }
        }

        for constraint in &mut rule.constraints {
            constraint.rule = rule.name.clone();
        }
        Ok(rule)
    }

    /// `outer` and `inner` map to the symbolic copper sets; anything else
    /// is matched against the layer table. No match resolves to the rescue
    /// layer so the selector is never empty.
    fn parse_layer_selector(&mut self) -> Result<LayerSelector, SyntaxError> {
        if self.lexer.peek()?.kind == TokenKind::RParen {
            let bad = self.lexer.peek()?.clone();
            self.issue("expected layer name".to_string(), Severity::Error, &bad)?;
            return Ok(LayerSelector {
                set: LayerSet::single(RESCUE_LAYER),
                source: String::new(),
            });
        }
        let tok = self.lexer.next()?;
        if tok.kind != TokenKind::Symbol && tok.kind != TokenKind::QuotedString {
            self.issue(
                "expected layer name".to_string(),
                Severity::Error,
                &tok,
            )?;
            return Ok(LayerSelector {
                set: LayerSet::single(RESCUE_LAYER),
                source: tok.text.clone(),
            });
        }
        let set = match tok.text.as_str() {
            "outer" => self.layers.outer(),
            "inner" => self.layers.inner(),
            name => self.layers.resolve(name),
        };
        if set.is_empty() {
            self.issue(
                format!("unknown layer '{}'", tok.text),
                Severity::Error,
                &tok,
            )?;
            return Ok(LayerSelector {
                set: LayerSet::single(RESCUE_LAYER),
                source: tok.text.clone(),
            });
        }
        Ok(LayerSelector {
            set,
            source: tok.text.clone(),
        })
    }

    fn parse_constraint(
        &mut self,
        open: &Token,
        rule: &mut Rule,
    ) -> Result<Option<Constraint>, SyntaxError> {
        let kind_tok = self.lexer.next()?;
        if kind_tok.kind != TokenKind::Symbol {
            self.issue(
                "expected constraint kind".to_string(),
                Severity::Error,
                &kind_tok,
            )?;
            self.skip_to_close(open)?;
            return Ok(None);
        }

        // Legacy spellings keep loading old rule files
        let spelled = kind_tok.text.as_str();
        let (keyword, deprecated) = match spelled {
            "hole" => ("hole_size", true),
            "annulus_width" => ("annular_width", true),
            other => (other, false),
        };
        if deprecated {
            self.issue(
                format!(
                    "the '{}' constraint is deprecated; please use '{}'",
                    spelled, keyword
                ),
                Severity::Warning,
                &kind_tok,
            )?;
        }

        let kind = match ConstraintKind::from_keyword(keyword) {
            Some(kind) => kind,
            None => {
                let valid: Vec<&str> =
                    ConstraintKind::ALL.iter().map(|k| k.keyword()).collect();
                self.issue(
                    format!(
                        "unrecognized constraint kind '{}'; valid kinds: {}",
                        spelled,
                        valid.join(", ")
                    ),
                    Severity::Error,
                    &kind_tok,
                )?;
                self.skip_to_close(open)?;
                return Ok(None);
            }
        };

        let duplicate = rule.has_constraint(kind);
        if duplicate {
            self.issue(
                format!(
                    "rule '{}' already has a '{}' constraint",
                    rule.name,
                    kind.keyword()
                ),
                Severity::Error,
                &kind_tok,
            )?;
        }

        let mut constraint = Constraint::new(kind);
        match kind {
            ConstraintKind::Disallow => self.parse_disallow_body(open, &mut constraint)?,
            ConstraintKind::ZoneConnection => {
                self.parse_zone_connection_body(open, &mut constraint)?
            }
            ConstraintKind::Assertion => self.parse_assertion_body(open, &mut constraint)?,
            ConstraintKind::MinResolvedSpokes => {
                self.parse_min_spokes_body(open, &mut constraint)?
            }
            _ => self.parse_value_body(open, &mut constraint)?,
        }

        // First constraint of a kind wins; later duplicates parse through
        // but are dropped
        Ok(if duplicate { None } else { Some(constraint) })
    }

    /// `(constraint disallow via zone ...)`: item-type keywords into flags
    fn parse_disallow_body(
        &mut self,
        open: &Token,
        constraint: &mut Constraint,
    ) -> Result<(), SyntaxError> {
        loop {
            let tok = self.lexer.next()?;
            match tok.kind {
                TokenKind::RParen => break,
                TokenKind::Eof => {
                    self.issue(
                        "incomplete statement".to_string(),
                        Severity::Error,
                        open,
                    )?;
                    break;
                }
                TokenKind::Symbol => match ItemTypeFlags::from_keyword(&tok.text) {
                    Some(flags) => constraint.disallow = constraint.disallow.union(flags),
                    None => {
                        self.issue(
                            format!("unknown item type '{}'", tok.text),
                            Severity::Error,
                            &tok,
                        )?;
                    }
                },
                _ => {
                    self.issue(
                        format!("expected an item type but found '{}'", tok.text),
                        Severity::Error,
                        &tok,
                    )?;
                }
            }
        }
        if constraint.disallow.is_empty() {
            self.issue(
                "disallow constraint lists no item types".to_string(),
                Severity::Error,
                open,
            )?;
        }
        Ok(())
    }

    /// `(constraint zone_connection solid|thermal_reliefs|none)`
    fn parse_zone_connection_body(
        &mut self,
        open: &Token,
        constraint: &mut Constraint,
    ) -> Result<(), SyntaxError> {
        let tok = self.lexer.next()?;
        match ZoneConnectionMode::from_keyword(&tok.text) {
            Some(mode) if tok.kind == TokenKind::Symbol => {
                constraint.zone_connection = Some(mode);
                self.expect_close(open)
            }
            _ => {
                self.issue(
                    format!(
                        "unknown zone connection '{}'; expected solid, thermal_reliefs or none",
                        tok.text
                    ),
                    Severity::Error,
                    &tok,
                )?;
                if tok.kind != TokenKind::RParen {
                    self.skip_to_close(open)?;
                }
                Ok(())
            }
        }
    }

    /// `(constraint assertion "<expr>")`
    fn parse_assertion_body(
        &mut self,
        open: &Token,
        constraint: &mut Constraint,
    ) -> Result<(), SyntaxError> {
        constraint.assertion = self.compile_condition()?;
        self.expect_close(open)
    }

    /// `(constraint min_resolved_spokes N)`
    fn parse_min_spokes_body(
        &mut self,
        open: &Token,
        constraint: &mut Constraint,
    ) -> Result<(), SyntaxError> {
        let tok = self.lexer.next()?;
        match tok.text.parse::<u32>() {
            Ok(n) if tok.kind == TokenKind::Number => {
                constraint.min_spokes = Some(n);
                self.expect_close(open)
            }
            _ => {
                self.issue(
                    format!("expected an integer spoke count, found '{}'", tok.text),
                    Severity::Error,
                    &tok,
                )?;
                if tok.kind != TokenKind::RParen {
                    self.skip_to_close(open)?;
                }
                Ok(())
            }
        }
    }

    /// Generic min/opt/max body, each sub-clause a unit-bearing numeric
    /// expression
    fn parse_value_body(
        &mut self,
        open: &Token,
        constraint: &mut Constraint,
    ) -> Result<(), SyntaxError> {
        loop {
            let tok = self.lexer.next()?;
            match tok.kind {
                TokenKind::RParen => return Ok(()),
                TokenKind::Eof => {
                    return self.issue(
                        "incomplete statement".to_string(),
                        Severity::Error,
                        open,
                    );
                }
                TokenKind::LParen => {
                    let slot_tok = self.lexer.next()?;
                    if slot_tok.kind != TokenKind::Symbol {
                        self.issue(
                            "expected min, opt or max".to_string(),
                            Severity::Error,
                            &slot_tok,
                        )?;
                        self.skip_to_close(&tok)?;
                        continue;
                    }
                    if slot_tok.text == "within_diff_pairs" {
                        constraint.within_diff_pairs = true;
                        self.expect_close(&tok)?;
                        continue;
                    }
                    let spelled = slot_tok.text.as_str();
                    let (slot_word, deprecated) = match spelled {
                        "optimal" => ("opt", true),
                        other => (other, false),
                    };
                    if deprecated {
                        self.issue(
                            format!(
                                "the '{}' clause is deprecated; please use '{}'",
                                spelled, slot_word
                            ),
                            Severity::Warning,
                            &slot_tok,
                        )?;
                    }
                    let slot = match ValueSlot::from_keyword(slot_word) {
                        Some(slot) => slot,
                        None => {
                            self.issue(
                                format!(
                                    "unrecognized value clause '{}'; expected min, opt or max",
                                    spelled
                                ),
                                Severity::Error,
                                &slot_tok,
                            )?;
                            self.skip_to_close(&tok)?;
                            continue;
                        }
                    };
                    self.parse_value_clause(&tok, constraint, slot)?;
                }
                _ => {
                    self.issue(
                        format!("expected a value clause but found '{}'", tok.text),
                        Severity::Error,
                        &tok,
                    )?;
                }
            }
        }
    }

    /// Collect the expression tokens up to the clause's closing paren and
    /// hand the text to the expression compiler. Parenthesized
    /// sub-expressions pass through to the compiler, so the clause ends at
    /// the first unbalanced ')'.
    fn parse_value_clause(
        &mut self,
        open: &Token,
        constraint: &mut Constraint,
        slot: ValueSlot,
    ) -> Result<(), SyntaxError> {
        let mut parts: Vec<String> = Vec::new();
        let mut anchor: Option<Token> = None;
        let mut depth = 0usize;
        loop {
            let tok = match self.next_token()? {
                Some(tok) => tok,
                None => continue,
            };
            match tok.kind {
                TokenKind::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    parts.push(")".to_string());
                }
                TokenKind::LParen => {
                    depth += 1;
                    parts.push("(".to_string());
                }
                TokenKind::Eof => {
                    return self.issue(
                        "incomplete statement".to_string(),
                        Severity::Error,
                        open,
                    );
                }
                _ => {
                    if anchor.is_none() {
                        anchor = Some(tok.clone());
                    }
                    parts.push(tok.text.clone());
                }
            }
        }
        let anchor = match anchor {
            Some(tok) => tok,
            None => {
                return self.issue(
                    "empty value clause".to_string(),
                    Severity::Error,
                    open,
                );
            }
        };
        let text = parts.join(" ");
        match compile_value(&text, constraint.kind.is_unitless()) {
            Ok(value) => {
                if let Err(message) = constraint.value.set(slot, value.value, value.domain) {
                    self.issue(message, Severity::Error, &anchor)?;
                } else if let Some(domain) = value.domain {
                    self.check_kind_domain(constraint.kind, domain, &anchor)?;
                }
            }
            Err(err) => {
                self.issue(
                    format!(
                        "when compiling '{}': {} (expression offset {})",
                        text, err.message, err.offset
                    ),
                    Severity::Error,
                    &anchor,
                )?;
            }
        }
        Ok(())
    }

    /// A constraint kind resolves to one value domain for the whole
    /// document; a `length` given in mm in one rule and in ns in another
    /// is an error even though each rule is self-consistent
    fn check_kind_domain(
        &mut self,
        kind: ConstraintKind,
        domain: ValueDomain,
        at: &Token,
    ) -> Result<(), SyntaxError> {
        match self.kind_domains.get(&kind) {
            Some(&prev) if prev != domain => self.issue(
                format!(
                    "'{}' constraint uses a {} value here but a {} value elsewhere \
                     in the document",
                    kind.keyword(),
                    domain.name(),
                    prev.name()
                ),
                Severity::Error,
                at,
            ),
            Some(_) => Ok(()),
            None => {
                self.kind_domains.insert(kind, domain);
                Ok(())
            }
        }
    }

    /// `(assign_component_class "<name>" (condition "<expr>"))`
    fn parse_class_assignment(
        &mut self,
        open: &Token,
    ) -> Result<Option<ComponentClassRule>, SyntaxError> {
        let name_tok = self.lexer.next()?;
        if name_tok.kind != TokenKind::QuotedString {
            self.issue(
                "expected quoted class name".to_string(),
                Severity::Error,
                &name_tok,
            )?;
            self.skip_to_close(open)?;
            return Ok(None);
        }
        let mut assignment = ComponentClassRule {
            class: name_tok.text.clone(),
            condition: None,
        };
        loop {
            let tok = self.lexer.next()?;
            match tok.kind {
                TokenKind::RParen => break,
                TokenKind::Eof => {
                    self.issue(
                        "incomplete statement".to_string(),
                        Severity::Error,
                        open,
                    )?;
                    break;
                }
                TokenKind::LParen => {
                    let kw = self.lexer.next()?;
                    if kw.kind == TokenKind::Symbol && kw.text == "condition" {
                        if let Some(expr) = self.compile_condition()? {
                            assignment.condition = Some(expr);
                        }
                        self.expect_close(&tok)?;
                    } else {
                        self.issue(
                            format!("unrecognized clause '{}'", kw.text),
                            Severity::Error,
                            &kw,
                        )?;
                        self.skip_to_close(&tok)?;
                    }
                }
                _ => {
                    self.issue(
                        format!("expected a clause but found '{}'", tok.text),
                        Severity::Error,
                        &tok,
                    )?;
                }
            }
        }
        Ok(Some(assignment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::diagnostics::DiagnosticLog;

    fn table() -> LayerTable {
        LayerTable::copper(&["F.Cu", "In1.Cu", "In2.Cu", "B.Cu"])
    }

    fn parse_ok(src: &str) -> (RuleDocument, DiagnosticLog) {
        let table = table();
        let parser = RuleParser::new(&table);
        let mut log = DiagnosticLog::new();
        let doc = parser.parse(src, Some(&mut log)).unwrap();
        (doc, log)
    }

    #[test]
    fn test_minimal_rule() {
        let (doc, log) = parse_ok("(version 7)(rule \"R1\" (constraint clearance (min 0.2mm)))");
        assert_eq!(doc.version, 7);
        assert!(!doc.from_future);
        assert_eq!(doc.rules.len(), 1);
        let rule = &doc.rules[0];
        assert_eq!(rule.name, "R1");
        assert_eq!(rule.constraints.len(), 1);
        let constraint = &rule.constraints[0];
        assert_eq!(constraint.kind, ConstraintKind::Clearance);
        assert!((constraint.value.min.unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(constraint.rule, "R1");
        // only the synthetic info message
        assert_eq!(log.error_count(), 0);
        assert_eq!(log.diagnostics.len(), 1);
        assert_eq!(log.diagnostics[0].severity, Severity::Info);
    }

    #[test]
    fn test_missing_version_warns_once() {
        let (doc, log) = parse_ok(
            "(rule \"R2\" (constraint disallow via))(rule \"R3\" (constraint disallow zone))",
        );
        assert_eq!(doc.rules.len(), 2);
        let warnings: Vec<_> = log
            .diagnostics
            .iter()
            .filter(|d| d.message.contains("missing version"))
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            doc.rules[0].constraints[0].disallow,
            ItemTypeFlags::ANY_VIA
        );
    }

    #[test]
    fn test_future_version_flag() {
        let (doc, log) = parse_ok("(version 99)(rule \"R\" (constraint clearance (min 1mm)))");
        assert!(doc.from_future);
        assert_eq!(doc.rules.len(), 1);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("newer than supported")));
    }

    #[test]
    fn test_duplicate_constraint_kept_first() {
        let (doc, log) = parse_ok(
            "(version 1)(rule \"R\" (constraint clearance (min 0.2mm)) \
             (constraint clearance (min 0.4mm)))",
        );
        let rule = &doc.rules[0];
        assert_eq!(rule.constraints.len(), 1);
        assert!((rule.constraints[0].value.min.unwrap() - 0.2).abs() < 1e-6);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("already has a 'clearance' constraint")));
    }

    #[test]
    fn test_duplicate_layer_clause() {
        let (doc, log) = parse_ok(
            "(version 1)(rule \"R\" (layer outer) (layer inner) (constraint clearance (min 0.1mm)))",
        );
        let rule = &doc.rules[0];
        // first clause kept: outer = F.Cu + B.Cu
        assert_eq!(rule.layers.set.len(), 2);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("already has a layer clause")));
    }

    #[test]
    fn test_layer_selectors() {
        let (doc, _) = parse_ok(
            "(version 1)\
             (rule \"A\" (layer outer) (constraint clearance (min 0.1mm)))\
             (rule \"B\" (layer inner) (constraint clearance (min 0.1mm)))\
             (rule \"C\" (layer In1.Cu) (constraint clearance (min 0.1mm)))\
             (rule \"D\" (layer In*.Cu) (constraint clearance (min 0.1mm)))",
        );
        assert_eq!(doc.rules[0].layers.set.len(), 2);
        assert_eq!(doc.rules[1].layers.set.len(), 2);
        assert_eq!(doc.rules[2].layers.set.len(), 1);
        assert_eq!(doc.rules[3].layers.set.len(), 2);
        assert_eq!(doc.rules[2].layers.source, "In1.Cu");
    }

    #[test]
    fn test_unknown_layer_rescue() {
        let (doc, log) = parse_ok(
            "(version 1)(rule \"R\" (layer Moon.Cu) (constraint clearance (min 0.1mm)))",
        );
        let rule = &doc.rules[0];
        assert!(!rule.layers.set.is_empty());
        assert!(rule.layers.set.contains(RESCUE_LAYER));
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unknown layer 'Moon.Cu'")));
    }

    #[test]
    fn test_idempotent_layer_resolution() {
        let src = "(version 1)(rule \"R\" (layer In*.Cu) (constraint clearance (min 0.1mm)))";
        let (doc1, _) = parse_ok(src);
        let (doc2, _) = parse_ok(src);
        assert_eq!(doc1.rules[0].layers.set, doc2.rules[0].layers.set);
    }

    #[test]
    fn test_unknown_constraint_kind_lists_valid() {
        let (doc, log) = parse_ok("(version 1)(rule \"R\" (constraint sparkle (min 1mm)))");
        assert!(doc.rules[0].constraints.is_empty());
        let msg = &log
            .diagnostics
            .iter()
            .find(|d| d.message.contains("unrecognized constraint kind"))
            .unwrap()
            .message;
        assert!(msg.contains("clearance"));
        assert!(msg.contains("assertion"));
        assert!(msg.contains("zone_connection"));
    }

    #[test]
    fn test_deprecated_constraint_remap() {
        let (doc, log) = parse_ok("(version 1)(rule \"R\" (constraint hole (min 0.3mm)))");
        assert_eq!(doc.rules[0].constraints[0].kind, ConstraintKind::HoleSize);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("deprecated") && d.severity == Severity::Warning));
    }

    #[test]
    fn test_deprecated_value_clause_remap() {
        let (doc, log) =
            parse_ok("(version 1)(rule \"R\" (constraint track_width (optimal 0.25mm)))");
        let c = &doc.rules[0].constraints[0];
        assert!((c.value.opt.unwrap() - 0.25).abs() < 1e-6);
        assert!(log.diagnostics.iter().any(|d| d.message.contains("deprecated")));
    }

    #[test]
    fn test_unitless_constraint_rejects_units() {
        let (doc, log) = parse_ok("(version 1)(rule \"R\" (constraint via_count (max 3mm)))");
        assert!(doc.rules[0].constraints[0].value.max.is_none());
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unit suffix not allowed")));
        let (doc, _) = parse_ok("(version 1)(rule \"R\" (constraint via_count (max 3)))");
        assert_eq!(doc.rules[0].constraints[0].value.max, Some(3.0));
    }

    #[test]
    fn test_mixed_domain_is_error() {
        let (_, log) = parse_ok(
            "(version 1)(rule \"R\" (constraint length (min 1mm) (max 2ns)))",
        );
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("mixes length and time")));
    }

    #[test]
    fn test_value_arithmetic_in_clause() {
        let (doc, log) = parse_ok(
            "(version 1)(rule \"R\" (constraint clearance (min 0.1mm + 0.1mm)))",
        );
        let c = &doc.rules[0].constraints[0];
        assert!((c.value.min.unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(log.error_count(), 0);
    }

    #[test]
    fn test_value_parenthesized_subexpression() {
        let (doc, log) = parse_ok(
            "(version 1)(rule \"R\" (constraint clearance (min (0.1mm + 0.05mm) * 2)))",
        );
        let c = &doc.rules[0].constraints[0];
        assert!((c.value.min.unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(log.error_count(), 0);
    }

    #[test]
    fn test_cross_rule_domain_mismatch() {
        let (doc, log) = parse_ok(
            "(version 1)\
             (rule \"A\" (constraint length (min 5mm)))\
             (rule \"B\" (constraint length (min 5ns)))",
        );
        assert_eq!(doc.rules.len(), 2);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("length value elsewhere")
                || d.message.contains("time value here")));
        assert_eq!(log.error_count(), 1);
    }

    #[test]
    fn test_lexer_error_keeps_later_rules() {
        // the bad character between the rules costs one diagnostic, not
        // the rest of the document
        let (doc, log) = parse_ok(
            "(version 9)(rule \"A\" (constraint clearance (min 0.2mm))) @ \
             (rule \"B\" (constraint clearance (min 0.2mm)))",
        );
        assert_eq!(doc.rules.len(), 2);
        assert_eq!(doc.rules[1].name, "B");
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unexpected character '@'")));
    }

    #[test]
    fn test_lexer_error_inside_rule_keeps_document() {
        let (doc, log) = parse_ok(
            "(version 9)(rule \"A\" (constraint clearance (min 0.2mm)) %)\
             (rule \"B\" (constraint clearance (min 0.3mm)))",
        );
        assert_eq!(doc.rules.len(), 2);
        assert!((doc.rules[1].constraints[0].value.min.unwrap() - 0.3).abs() < 1e-6);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unexpected character '%'")));
    }

    #[test]
    fn test_stray_form_in_clause_tail() {
        // the stray nested form is consumed with the clause; the next
        // clause still parses
        let (doc, log) = parse_ok(
            "(version 1)(rule \"R\" (severity warning (oops)) \
             (constraint clearance (min 0.1mm)))",
        );
        let rule = &doc.rules[0];
        assert_eq!(rule.severity, Some(Severity::Warning));
        assert_eq!(rule.constraints.len(), 1);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("expected ')'")));
        assert!(!log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unrecognized item")));
    }

    #[test]
    fn test_min_greater_than_max_is_accepted() {
        let (doc, log) = parse_ok(
            "(version 1)(rule \"R\" (constraint hole_size (min 0.1mm) (max 0.05mm)))",
        );
        let c = &doc.rules[0].constraints[0];
        assert!((c.value.min.unwrap() - 0.1).abs() < 1e-6);
        assert!((c.value.max.unwrap() - 0.05).abs() < 1e-6);
        assert_eq!(log.error_count(), 0);
    }

    #[test]
    fn test_zone_connection_modes() {
        let (doc, _) =
            parse_ok("(version 1)(rule \"R\" (constraint zone_connection thermal_reliefs))");
        assert_eq!(
            doc.rules[0].constraints[0].zone_connection,
            Some(ZoneConnectionMode::ThermalReliefs)
        );
    }

    #[test]
    fn test_assertion_constraint() {
        let (doc, _) = parse_ok(
            "(version 1)(rule \"R\" (constraint assertion \"A.NetClass == 'HV'\"))",
        );
        assert!(doc.rules[0].constraints[0].assertion.is_some());
    }

    #[test]
    fn test_min_resolved_spokes() {
        let (doc, _) =
            parse_ok("(version 1)(rule \"R\" (constraint min_resolved_spokes 2))");
        assert_eq!(doc.rules[0].constraints[0].min_spokes, Some(2));
    }

    #[test]
    fn test_unrecognized_item_recovery() {
        let (doc, log) = parse_ok(
            "(version 1)(banana \"X\" (weird (nested)))\
             (rule \"R\" (constraint clearance (min 0.1mm)))",
        );
        assert_eq!(doc.rules.len(), 1);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unrecognized item 'banana'")));
    }

    #[test]
    fn test_incomplete_statement() {
        let (doc, log) = parse_ok("(version 1)(rule \"R\" (constraint clearance (min 0.1mm)");
        // partially parsed rule is still retained
        assert_eq!(doc.rules.len(), 1);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("incomplete statement")));
    }

    #[test]
    fn test_unresolved_text_variable() {
        let (doc, log) = parse_ok(
            "(version 1)(rule \"R\" (condition \"A.NetClass == '${CLASS}'\") \
             (constraint clearance (min 0.1mm)))",
        );
        assert_eq!(doc.rules.len(), 1);
        assert!(log
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unresolved text variable")));
    }

    #[test]
    fn test_throw_without_sink() {
        let table = table();
        let parser = RuleParser::new(&table);
        let err = parser
            .parse("(version 1)(rule \"R\" (layer Moon.Cu))", None)
            .unwrap_err();
        assert!(err.message.contains("unknown layer"));
        assert_eq!(err.line, 1);
        assert!(err.column > 1);
    }

    #[test]
    fn test_missing_version_equivalence() {
        // P4: absent version differs from an explicit current version only
        // by the one extra diagnostic
        let with = "(version 9)(rule \"R\" (constraint clearance (min 0.2mm)))";
        let without = "(rule \"R\" (constraint clearance (min 0.2mm)))";
        let (doc_with, log_with) = parse_ok(with);
        let (doc_without, log_without) = parse_ok(without);
        assert_eq!(doc_with.rules.len(), doc_without.rules.len());
        assert_eq!(
            doc_with.rules[0].constraints[0].value.min,
            doc_without.rules[0].constraints[0].value.min
        );
        assert_eq!(log_with.error_count(), 0);
        assert_eq!(log_without.error_count(), 0);
        assert_eq!(
            log_without
                .diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Warning)
                .count(),
            1
        );
    }

    #[test]
    fn test_component_class_assignment() {
        let (doc, _) = parse_ok(
            "(version 1)(assign_component_class \"bulk_caps\" \
             (condition \"A.Reference == 'C*'\"))",
        );
        assert_eq!(doc.class_assignments.len(), 1);
        assert_eq!(doc.class_assignments[0].class, "bulk_caps");
        assert!(doc.class_assignments[0].condition.is_some());
    }

    #[test]
    fn test_condition_and_severity() {
        let (doc, _) = parse_ok(
            "(version 1)(rule \"R\" (condition \"A.NetClass == 'HV'\") (severity warning) \
             (constraint clearance (min 1mm)))",
        );
        let rule = &doc.rules[0];
        assert!(rule.condition.is_some());
        assert_eq!(rule.severity, Some(Severity::Warning));
    }
}
