//! Expression compiler for rule documents
//!
//! Two flavors share one grammar: boolean condition/assertion expressions
//! evaluated against one or two design items plus a layer, and numeric
//! value expressions with physical-unit suffixes that resolve to a
//! canonical scale at compile time.
//!
//! Lengths canonicalize to millimeters, times to nanoseconds. Evaluation
//! failures (missing attribute, type mismatch) degrade to `false` so one
//! malformed item never aborts a check pass.

use serde::Serialize;
use thiserror::Error;

use crate::geometry::items::{AttrValue, DesignItem};
use crate::geometry::layers::{wildcard_match, LayerId, LayerTable};

/// Which physical domain a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueDomain {
    Length,
    Time,
}

impl ValueDomain {
    pub fn name(self) -> &'static str {
        match self {
            ValueDomain::Length => "length",
            ValueDomain::Time => "time",
        }
    }
}

/// Unit suffix table: (suffix, scale to canonical, domain)
const UNITS: &[(&str, f32, ValueDomain)] = &[
    ("mm", 1.0, ValueDomain::Length),
    ("um", 1e-3, ValueDomain::Length),
    ("cm", 10.0, ValueDomain::Length),
    ("in", 25.4, ValueDomain::Length),
    ("mil", 0.0254, ValueDomain::Length),
    ("ps", 1e-3, ValueDomain::Time),
    ("ns", 1.0, ValueDomain::Time),
    ("us", 1e3, ValueDomain::Time),
];

/// Convert a canonical value back into the given unit (used by reports)
pub fn from_canonical(value: f32, unit: &str) -> Option<f32> {
    UNITS
        .iter()
        .find(|(suffix, _, _)| *suffix == unit)
        .map(|(_, scale, _)| value / scale)
}

/// Compile failure; `offset` is relative to the owning clause text
#[derive(Debug, Clone, Error)]
#[error("{message} (at offset {offset})")]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

impl ExprError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// A numeric value expression resolved at compile time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedValue {
    /// Canonical-scale value (mm for lengths, ns for times)
    pub value: f32,
    /// None for plain unitless numbers
    pub domain: Option<ValueDomain>,
}

/// Compile a numeric value expression, e.g. `0.2mm` or `2 * 0.1mm`.
///
/// `unitless` kinds reject any unit suffix.
pub fn compile_value(text: &str, unitless: bool) -> Result<ResolvedValue, ExprError> {
    let mut parser = ExprParser::new(text)?;
    let node = parser.parse_expression()?;
    parser.expect_end()?;
    let (value, domain) = fold_numeric(&node, text)?;
    if unitless && domain.is_some() {
        return Err(ExprError::new("unit suffix not allowed here", 0));
    }
    Ok(ResolvedValue { value, domain })
}

/// Two-item evaluation context for condition/assertion expressions
pub struct EvalContext<'a> {
    pub a: &'a dyn DesignItem,
    pub b: Option<&'a dyn DesignItem>,
    pub layer: Option<LayerId>,
    pub layers: &'a LayerTable,
}

/// A compiled condition or assertion expression
#[derive(Debug, Clone)]
pub struct ConditionExpr {
    pub source: String,
    root: Node,
}

impl ConditionExpr {
    /// Compile a boolean expression such as `A.NetClass == 'HV' && B.Type != 'Zone'`
    pub fn compile(text: &str) -> Result<Self, ExprError> {
        let mut parser = ExprParser::new(text)?;
        let root = parser.parse_expression()?;
        parser.expect_end()?;
        Ok(Self {
            source: text.to_string(),
            root,
        })
    }

    /// Evaluate against the context; anything that fails to resolve makes
    /// the whole expression false.
    pub fn evaluate(&self, ctx: &EvalContext) -> bool {
        matches!(eval(&self.root, ctx), Some(AttrValue::Flag(true)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone)]
enum Node {
    Number {
        value: f32,
        domain: Option<ValueDomain>,
        offset: usize,
    },
    Text(String),
    /// `A.<name>` or `B.<name>` attribute access
    Attribute {
        item_b: bool,
        name: String,
    },
    /// Bare `Layer`: the name of the layer under test
    LayerRef,
    Not(Box<Node>),
    Neg(Box<Node>),
    Bin {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
        offset: usize,
    },
}

/// Constant-fold a numeric tree, tracking the value domain
fn fold_numeric(node: &Node, source: &str) -> Result<(f32, Option<ValueDomain>), ExprError> {
    match node {
        Node::Number { value, domain, .. } => Ok((*value, *domain)),
        Node::Neg(inner) => {
            let (v, d) = fold_numeric(inner, source)?;
            Ok((-v, d))
        }
        Node::Bin {
            op,
            lhs,
            rhs,
            offset,
        } => {
            let (lv, ld) = fold_numeric(lhs, source)?;
            let (rv, rd) = fold_numeric(rhs, source)?;
            let domain = match (ld, rd) {
                (Some(a), Some(b)) if a != b => {
                    return Err(ExprError::new(
                        "cannot mix length and time values",
                        *offset,
                    ))
                }
                (Some(a), _) => Some(a),
                (_, d) => d,
            };
            let value = match op {
                BinOp::Add => lv + rv,
                BinOp::Sub => lv - rv,
                BinOp::Mul => lv * rv,
                BinOp::Div => lv / rv,
                _ => {
                    return Err(ExprError::new(
                        "boolean operator in a value expression",
                        *offset,
                    ))
                }
            };
            Ok((value, domain))
        }
        _ => Err(ExprError::new("expected a numeric expression", 0)),
    }
}

fn eval(node: &Node, ctx: &EvalContext) -> Option<AttrValue> {
    match node {
        Node::Number { value, .. } => Some(AttrValue::Number(*value)),
        Node::Text(s) => Some(AttrValue::Text(s.clone())),
        Node::Attribute { item_b, name } => {
            let item: &dyn DesignItem = if *item_b { ctx.b? } else { ctx.a };
            item.attribute(name)
        }
        Node::LayerRef => {
            let layer = ctx.layer?;
            Some(AttrValue::Text(ctx.layers.name(layer).to_string()))
        }
        Node::Not(inner) => match eval(inner, ctx)? {
            AttrValue::Flag(b) => Some(AttrValue::Flag(!b)),
            _ => None,
        },
        Node::Neg(inner) => match eval(inner, ctx)? {
            AttrValue::Number(n) => Some(AttrValue::Number(-n)),
            _ => None,
        },
        Node::Bin { op, lhs, rhs, .. } => match op {
            BinOp::Or => {
                // Short-circuit; an unevaluatable side counts as false
                let l = matches!(eval(lhs, ctx), Some(AttrValue::Flag(true)));
                if l {
                    return Some(AttrValue::Flag(true));
                }
                let r = matches!(eval(rhs, ctx), Some(AttrValue::Flag(true)));
                Some(AttrValue::Flag(r))
            }
            BinOp::And => {
                let l = matches!(eval(lhs, ctx), Some(AttrValue::Flag(true)));
                if !l {
                    return Some(AttrValue::Flag(false));
                }
                let r = matches!(eval(rhs, ctx), Some(AttrValue::Flag(true)));
                Some(AttrValue::Flag(r))
            }
            BinOp::Eq | BinOp::Ne => {
                let l = eval(lhs, ctx)?;
                let r = eval(rhs, ctx)?;
                let equal = match (&l, &r) {
                    (AttrValue::Number(a), AttrValue::Number(b)) => {
                        (a - b).abs() < f32::EPSILON * 4.0
                    }
                    // String equality is wildcard-aware: the right side is
                    // the pattern
                    (AttrValue::Text(a), AttrValue::Text(b)) => wildcard_match(b, a),
                    (AttrValue::Flag(a), AttrValue::Flag(b)) => a == b,
                    _ => return None,
                };
                Some(AttrValue::Flag(if *op == BinOp::Eq { equal } else { !equal }))
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let l = eval(lhs, ctx)?.as_number()?;
                let r = eval(rhs, ctx)?.as_number()?;
                let res = match op {
                    BinOp::Lt => l < r,
                    BinOp::Le => l <= r,
                    BinOp::Gt => l > r,
                    _ => l >= r,
                };
                Some(AttrValue::Flag(res))
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                let l = eval(lhs, ctx)?.as_number()?;
                let r = eval(rhs, ctx)?.as_number()?;
                let v = match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    _ => l / r,
                };
                Some(AttrValue::Number(v))
            }
        },
    }
}

// --- expression tokenizer + precedence-climbing parser ---

#[derive(Debug, Clone, PartialEq)]
enum ETok {
    Num { value: f32, domain: Option<ValueDomain> },
    Str(String),
    Ident(String),
    Op(BinOp),
    Not,
    LParen,
    RParen,
    Dot,
    End,
}

struct ExprParser<'a> {
    src: &'a str,
    pos: usize,
    tok: ETok,
    tok_offset: usize,
}

impl<'a> ExprParser<'a> {
    fn new(src: &'a str) -> Result<Self, ExprError> {
        let mut p = Self {
            src,
            pos: 0,
            tok: ETok::End,
            tok_offset: 0,
        };
        p.advance()?;
        Ok(p)
    }

    fn advance(&mut self) -> Result<(), ExprError> {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        self.tok_offset = self.pos;
        if self.pos >= bytes.len() {
            self.tok = ETok::End;
            return Ok(());
        }
        let rest = &self.src[self.pos..];
        let two = rest.get(..2).unwrap_or("");
        let (tok, len) = match two {
            "&&" => (ETok::Op(BinOp::And), 2),
            "||" => (ETok::Op(BinOp::Or), 2),
            "==" => (ETok::Op(BinOp::Eq), 2),
            "!=" => (ETok::Op(BinOp::Ne), 2),
            "<=" => (ETok::Op(BinOp::Le), 2),
            ">=" => (ETok::Op(BinOp::Ge), 2),
            _ => match rest.chars().next().unwrap() {
                '<' => (ETok::Op(BinOp::Lt), 1),
                '>' => (ETok::Op(BinOp::Gt), 1),
                '+' => (ETok::Op(BinOp::Add), 1),
                '-' => (ETok::Op(BinOp::Sub), 1),
                '*' => (ETok::Op(BinOp::Mul), 1),
                '/' => (ETok::Op(BinOp::Div), 1),
                '!' => (ETok::Not, 1),
                '(' => (ETok::LParen, 1),
                ')' => (ETok::RParen, 1),
                '.' if !rest[1..].starts_with(|c: char| c.is_ascii_digit()) => (ETok::Dot, 1),
                '\'' => {
                    let end = rest[1..].find('\'').ok_or_else(|| {
                        ExprError::new("unterminated string literal", self.tok_offset)
                    })?;
                    (ETok::Str(rest[1..1 + end].to_string()), end + 2)
                }
                c if c.is_ascii_digit() || c == '.' => self.lex_number(rest)?,
                c if c.is_alphabetic() || c == '_' => {
                    let len = rest
                        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                        .unwrap_or(rest.len());
                    (ETok::Ident(rest[..len].to_string()), len)
                }
                c => {
                    return Err(ExprError::new(
                        format!("unexpected character '{}'", c),
                        self.tok_offset,
                    ))
                }
            },
        };
        self.pos += len;
        self.tok = tok;
        Ok(())
    }

    fn lex_number(&self, rest: &str) -> Result<(ETok, usize), ExprError> {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let value: f32 = rest[..digits]
            .parse()
            .map_err(|_| ExprError::new(format!("malformed number '{}'", &rest[..digits]), self.tok_offset))?;
        // Optional unit suffix directly after the digits
        let suffix_len = rest[digits..]
            .find(|c: char| !c.is_alphabetic())
            .unwrap_or(rest.len() - digits);
        if suffix_len == 0 {
            return Ok((
                ETok::Num {
                    value,
                    domain: None,
                },
                digits,
            ));
        }
        let suffix = &rest[digits..digits + suffix_len];
        match UNITS.iter().find(|(s, _, _)| *s == suffix) {
            Some((_, scale, domain)) => Ok((
                ETok::Num {
                    value: value * scale,
                    domain: Some(*domain),
                },
                digits + suffix_len,
            )),
            None => Err(ExprError::new(
                format!("unknown unit '{}'", suffix),
                self.tok_offset + digits,
            )),
        }
    }

    fn expect_end(&self) -> Result<(), ExprError> {
        if self.tok == ETok::End {
            Ok(())
        } else {
            Err(ExprError::new("unexpected trailing input", self.tok_offset))
        }
    }

    fn parse_expression(&mut self) -> Result<Node, ExprError> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Node, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.tok {
                ETok::Op(op) if precedence(op) >= min_prec => op,
                _ => break,
            };
            let offset = self.tok_offset;
            self.advance()?;
            let rhs = self.parse_binary(precedence(op) + 1)?;
            lhs = Node::Bin {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                offset,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        match &self.tok {
            ETok::Not => {
                self.advance()?;
                Ok(Node::Not(Box::new(self.parse_unary()?)))
            }
            ETok::Op(BinOp::Sub) => {
                self.advance()?;
                Ok(Node::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        let offset = self.tok_offset;
        match self.tok.clone() {
            ETok::Num { value, domain } => {
                self.advance()?;
                Ok(Node::Number {
                    value,
                    domain,
                    offset,
                })
            }
            ETok::Str(s) => {
                self.advance()?;
                Ok(Node::Text(s))
            }
            ETok::LParen => {
                self.advance()?;
                let inner = self.parse_expression()?;
                if self.tok != ETok::RParen {
                    return Err(ExprError::new("expected ')'", self.tok_offset));
                }
                self.advance()?;
                Ok(inner)
            }
            ETok::Ident(name) => {
                self.advance()?;
                match name.as_str() {
                    "A" | "B" => {
                        if self.tok != ETok::Dot {
                            return Err(ExprError::new(
                                format!("expected '.' after '{}'", name),
                                self.tok_offset,
                            ));
                        }
                        self.advance()?;
                        let attr = match self.tok.clone() {
                            ETok::Ident(attr) => attr,
                            _ => {
                                return Err(ExprError::new(
                                    "expected attribute name",
                                    self.tok_offset,
                                ))
                            }
                        };
                        self.advance()?;
                        Ok(Node::Attribute {
                            item_b: name == "B",
                            name: attr,
                        })
                    }
                    "Layer" => Ok(Node::LayerRef),
                    "true" => Ok(Node::Number {
                        value: 1.0,
                        domain: None,
                        offset,
                    }),
                    other => Err(ExprError::new(
                        format!("unknown identifier '{}'", other),
                        offset,
                    )),
                }
            }
            _ => Err(ExprError::new("expected an expression", offset)),
        }
    }
}

fn precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 3,
        BinOp::Add | BinOp::Sub => 4,
        BinOp::Mul | BinOp::Div => 5,
    }
}
