//! Rule-document lexer
//!
//! Tokenizes the parenthesized rule language into a forward-only stream of
//! position-tagged tokens. No side effects; a malformed token surfaces as a
//! `SyntaxError` for the parser to turn into a diagnostic.

use super::diagnostics::SyntaxError;

/// Token types in a rule document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    /// Bare word: keywords, layer names, constraint kinds
    Symbol,
    /// `"`-delimited string: rule names, condition expressions
    QuotedString,
    /// Numeric literal, unit suffix not included
    Number,
    Eof,
}

/// A token with its text and source position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text; for quoted strings the content without the quotes
    pub text: String,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
    /// Byte offset into the source
    pub offset: usize,
}

impl Token {
    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

/// Forward-only tokenizer with single-token lookahead
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
    peeked: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            peeked: None,
        }
    }

    /// Look at the next token without consuming it
    pub fn peek(&mut self) -> Result<&Token, SyntaxError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lex()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    /// Consume and return the next token
    pub fn next(&mut self) -> Result<Token, SyntaxError> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.lex(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.source[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn current(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.current() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                // Line comment, KiCad-style
                Some('#') => {
                    while let Some(c) = self.current() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex(&mut self) -> Result<Token, SyntaxError> {
        self.skip_trivia();

        let (line, column, offset) = (self.line, self.column, self.pos);
        let make = |kind, text: String| Token {
            kind,
            text,
            line,
            column,
            offset,
        };

        let ch = match self.current() {
            Some(c) => c,
            None => return Ok(make(TokenKind::Eof, String::new())),
        };

        match ch {
            '(' => {
                self.bump();
                Ok(make(TokenKind::LParen, "(".into()))
            }
            ')' => {
                self.bump();
                Ok(make(TokenKind::RParen, ")".into()))
            }
            '"' => {
                self.bump();
                let mut text = String::new();
                loop {
                    match self.bump() {
                        Some('"') => break,
                        Some('\\') => match self.bump() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(c) => text.push(c),
                            None => {
                                return Err(SyntaxError::new(
                                    "unterminated string",
                                    line,
                                    column,
                                    offset,
                                ))
                            }
                        },
                        Some(c) => text.push(c),
                        None => {
                            return Err(SyntaxError::new(
                                "unterminated string",
                                line,
                                column,
                                offset,
                            ))
                        }
                    }
                }
                Ok(make(TokenKind::QuotedString, text))
            }
            // Arithmetic operator inside a value expression
            '/' => {
                self.bump();
                Ok(make(TokenKind::Symbol, "/".into()))
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let start = self.pos;
                self.bump();
                while let Some(c) = self.current() {
                    // Unit suffixes ride along on number tokens; the
                    // expression compiler splits them off.
                    if c.is_ascii_alphanumeric() || c == '.' {
                        self.bump();
                    } else {
                        break;
                    }
                }
                let text = self.source[start..self.pos].to_string();
                // A bare sign is an arithmetic operator, not a number
                if text == "-" || text == "+" {
                    return Ok(make(TokenKind::Symbol, text));
                }
                if text == "." {
                    return Err(SyntaxError::new(
                        "malformed number '.'".to_string(),
                        line,
                        column,
                        offset,
                    ));
                }
                Ok(make(TokenKind::Number, text))
            }
            c if is_symbol_start(c) => {
                let start = self.pos;
                self.bump();
                while let Some(c) = self.current() {
                    if is_symbol_continue(c) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                Ok(make(
                    TokenKind::Symbol,
                    self.source[start..self.pos].to_string(),
                ))
            }
            c => {
                // Consume the bad character so recovery can make progress
                self.bump();
                Err(SyntaxError::new(
                    format!("unexpected character '{}'", c),
                    line,
                    column,
                    offset,
                ))
            }
        }
    }

    /// Byte offset of the next unconsumed character (for error spans)
    pub fn offset(&self) -> usize {
        match &self.peeked {
            Some(tok) => tok.offset,
            None => self.pos.min(self.bytes.len()),
        }
    }
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '*' || c == '?' || c == '.'
}

fn is_symbol_continue(c: char) -> bool {
    is_symbol_start(c) || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lex = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lex.next().unwrap();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn test_basic_stream() {
        assert_eq!(
            kinds("(version 7)"),
            vec![
                TokenKind::LParen,
                TokenKind::Symbol,
                TokenKind::Number,
                TokenKind::RParen,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_quoted_string_content() {
        let mut lex = Lexer::new("(rule \"R 1\")");
        lex.next().unwrap();
        lex.next().unwrap();
        let tok = lex.next().unwrap();
        assert_eq!(tok.kind, TokenKind::QuotedString);
        assert_eq!(tok.text, "R 1");
    }

    #[test]
    fn test_number_with_unit_suffix() {
        let mut lex = Lexer::new("0.2mm");
        let tok = lex.next().unwrap();
        assert_eq!(tok.kind, TokenKind::Number);
        assert_eq!(tok.text, "0.2mm");
    }

    #[test]
    fn test_arithmetic_operators() {
        let mut lex = Lexer::new("0.1mm + 0.1mm / 2 - 3");
        assert_eq!(lex.next().unwrap().kind, TokenKind::Number);
        let plus = lex.next().unwrap();
        assert_eq!(plus.kind, TokenKind::Symbol);
        assert_eq!(plus.text, "+");
        assert_eq!(lex.next().unwrap().kind, TokenKind::Number);
        let slash = lex.next().unwrap();
        assert_eq!(slash.kind, TokenKind::Symbol);
        assert_eq!(slash.text, "/");
        assert_eq!(lex.next().unwrap().kind, TokenKind::Number);
        let minus = lex.next().unwrap();
        assert_eq!(minus.kind, TokenKind::Symbol);
        assert_eq!(minus.text, "-");
        assert_eq!(lex.next().unwrap().text, "3");
        // a sign glued to digits is still one number token
        let mut lex = Lexer::new("-3mm");
        let tok = lex.next().unwrap();
        assert_eq!(tok.kind, TokenKind::Number);
        assert_eq!(tok.text, "-3mm");
    }

    #[test]
    fn test_positions() {
        let mut lex = Lexer::new("(rule\n  \"R1\")");
        lex.next().unwrap(); // (
        lex.next().unwrap(); // rule
        let tok = lex.next().unwrap(); // "R1"
        assert_eq!(tok.line, 2);
        assert_eq!(tok.column, 3);
        assert_eq!(tok.offset, 8);
    }

    #[test]
    fn test_unterminated_string() {
        let mut lex = Lexer::new("\"oops");
        let err = lex.next().unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn test_comment_skipped() {
        assert_eq!(
            kinds("# header\n(version 1)"),
            vec![
                TokenKind::LParen,
                TokenKind::Symbol,
                TokenKind::Number,
                TokenKind::RParen,
                TokenKind::Eof
            ]
        );
    }
}
