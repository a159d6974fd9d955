//! Lexer for the textual IR form
//!
//! Converts source text into a token stream. Shaped types are lexed as one
//! token: `memref<4x5xf32>` becomes [`TokenKind::ShapedType`] holding the raw
//! body `4x5xf32`, which keeps `x`-separated dimensions out of the grammar.
//!
//! ## Example
//!
//! ```
//! use lumen_ir::lexer::{tokenize, TokenKind};
//!
//! let tokens = tokenize("%0 = \"lmhlo.copy\"").unwrap();
//! assert_eq!(tokens[0].kind, TokenKind::ValueId("0".to_string()));
//! assert_eq!(tokens[1].kind, TokenKind::Equal);
//! ```

use std::fmt;

use crate::ir::Location;
use crate::parser::ParseError;

/// Which shaped type a [`TokenKind::ShapedType`] token spells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapedKind {
    MemRef,
    Tensor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `%name`
    ValueId(String),
    /// `@name`
    SymbolRef(String),
    /// Keywords, attribute names, element types.
    BareId(String),
    String(String),
    Integer(i64),
    Float(f64),
    ShapedType { kind: ShapedKind, body: String },

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LAngle,
    RAngle,
    Comma,
    Colon,
    Equal,
    Arrow,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::ValueId(name) => write!(f, "'%{name}'"),
            TokenKind::SymbolRef(name) => write!(f, "'@{name}'"),
            TokenKind::BareId(name) => write!(f, "'{name}'"),
            TokenKind::String(s) => write!(f, "string {s:?}"),
            TokenKind::Integer(v) => write!(f, "integer {v}"),
            TokenKind::Float(v) => write!(f, "float {v}"),
            TokenKind::ShapedType { kind, body } => match kind {
                ShapedKind::MemRef => write!(f, "'memref<{body}>'"),
                ShapedKind::Tensor => write!(f, "'tensor<{body}>'"),
            },
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::LAngle => write!(f, "'<'"),
            TokenKind::RAngle => write!(f, "'>'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Equal => write!(f, "'='"),
            TokenKind::Arrow => write!(f, "'->'"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

/// Lexer state
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            position: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.position..].chars();
        chars.next();
        chars.next()
    }

    fn consume(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
        }
    }

    /// Skip whitespace and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.consume();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    while let Some(ch) = self.consume() {
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn read_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut result = String::new();
        while let Some(ch) = self.peek() {
            if !accept(ch) {
                break;
            }
            result.push(ch);
            self.consume();
        }
        result
    }

    fn read_string(&mut self, start: Location) -> Result<String, ParseError> {
        self.consume(); // opening quote
        let mut result = String::new();
        loop {
            match self.consume() {
                None | Some('\n') => return Err(ParseError::UnterminatedString { location: start }),
                Some('"') => return Ok(result),
                Some('\\') => match self.consume() {
                    Some('n') => result.push('\n'),
                    Some('t') => result.push('\t'),
                    Some('"') => result.push('"'),
                    Some('\\') => result.push('\\'),
                    _ => return Err(ParseError::UnterminatedString { location: start }),
                },
                Some(ch) => result.push(ch),
            }
        }
    }

    fn read_number(&mut self, start: Location) -> Result<TokenKind, ParseError> {
        let mut text = String::new();
        if self.peek() == Some('-') {
            self.consume();
            text.push('-');
        }

        if self.peek() == Some('0') && matches!(self.peek_second(), Some('x' | 'X')) {
            self.consume();
            self.consume();
            let digits = self.read_while(|c| c.is_ascii_hexdigit());
            let magnitude = u64::from_str_radix(&digits, 16).map_err(|_| ParseError::InvalidNumber {
                text: format!("{text}0x{digits}"),
                location: start,
            })?;
            let value = magnitude as i64;
            return Ok(TokenKind::Integer(if text.is_empty() { value } else { value.wrapping_neg() }));
        }

        text.push_str(&self.read_while(|c| c.is_ascii_digit()));
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.consume();
            text.push_str(&self.read_while(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let next = self.peek_second();
            if next.is_some_and(|c| c.is_ascii_digit() || c == '+' || c == '-') {
                is_float = true;
                text.push('e');
                self.consume();
                if matches!(self.peek(), Some('+' | '-')) {
                    text.push(self.consume().unwrap_or('+'));
                }
                text.push_str(&self.read_while(|c| c.is_ascii_digit()));
            }
        }

        let invalid = || ParseError::InvalidNumber {
            text: text.clone(),
            location: start,
        };
        if is_float {
            text.parse::<f64>().map(TokenKind::Float).map_err(|_| invalid())
        } else {
            text.parse::<i64>().map(TokenKind::Integer).map_err(|_| invalid())
        }
    }

    /// Raw body of `memref<...>` / `tensor<...>` up to the matching `>`.
    fn read_shaped_body(&mut self, start: Location) -> Result<String, ParseError> {
        self.consume(); // '<'
        let body = self.read_while(|c| c != '>' && c != '\n');
        if self.consume() != Some('>') {
            return Err(ParseError::UnexpectedEof {
                expected: "'>' closing shaped type".to_string(),
                location: start,
            });
        }
        Ok(body.trim().to_string())
    }

    /// Get next token
    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia();
        let location = self.location();

        let Some(ch) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                location,
            });
        };

        let punctuation = match ch {
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '{' => Some(TokenKind::LBrace),
            '}' => Some(TokenKind::RBrace),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            '<' => Some(TokenKind::LAngle),
            '>' => Some(TokenKind::RAngle),
            ',' => Some(TokenKind::Comma),
            ':' => Some(TokenKind::Colon),
            '=' => Some(TokenKind::Equal),
            _ => None,
        };
        if let Some(kind) = punctuation {
            self.consume();
            return Ok(Token { kind, location });
        }

        let kind = match ch {
            '-' if self.peek_second() == Some('>') => {
                self.consume();
                self.consume();
                TokenKind::Arrow
            }
            '-' if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => self.read_number(location)?,
            c if c.is_ascii_digit() => self.read_number(location)?,
            '"' => TokenKind::String(self.read_string(location)?),
            '%' => {
                self.consume();
                let name = self.read_while(is_suffix_char);
                if name.is_empty() {
                    return Err(ParseError::UnexpectedCharacter { ch: '%', location });
                }
                TokenKind::ValueId(name)
            }
            '@' => {
                self.consume();
                let name = if self.peek() == Some('"') {
                    self.read_string(location)?
                } else {
                    self.read_while(is_suffix_char)
                };
                if name.is_empty() {
                    return Err(ParseError::UnexpectedCharacter { ch: '@', location });
                }
                TokenKind::SymbolRef(name)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let word = self.read_while(is_suffix_char);
                let shaped = match word.as_str() {
                    "memref" => Some(ShapedKind::MemRef),
                    "tensor" => Some(ShapedKind::Tensor),
                    _ => None,
                };
                match shaped {
                    Some(kind) if self.peek() == Some('<') => TokenKind::ShapedType {
                        kind,
                        body: self.read_shaped_body(location)?,
                    },
                    _ => TokenKind::BareId(word),
                }
            }
            other => return Err(ParseError::UnexpectedCharacter { ch: other, location }),
        };

        Ok(Token { kind, location })
    }
}

fn is_suffix_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

/// Tokenize a complete input string; the last token is always [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenize_operation_header() {
        assert_eq!(
            kinds(r#"%r = "lmhlo.copy"(%arg0) : (memref<4xi8>) -> ()"#),
            vec![
                TokenKind::ValueId("r".into()),
                TokenKind::Equal,
                TokenKind::String("lmhlo.copy".into()),
                TokenKind::LParen,
                TokenKind::ValueId("arg0".into()),
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::LParen,
                TokenKind::ShapedType {
                    kind: ShapedKind::MemRef,
                    body: "4xi8".into()
                },
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn tokenize_numbers() {
        assert_eq!(
            kinds("-1 42 0xFF 1.5 -2.0e3 3e-2"),
            vec![
                TokenKind::Integer(-1),
                TokenKind::Integer(42),
                TokenKind::Integer(255),
                TokenKind::Float(1.5),
                TokenKind::Float(-2000.0),
                TokenKind::Float(0.03),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dotted_identifiers_and_symbols() {
        assert_eq!(
            kinds("lmhlo.params @main"),
            vec![
                TokenKind::BareId("lmhlo.params".into()),
                TokenKind::SymbolRef("main".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dense_keeps_angle_tokens() {
        assert_eq!(
            kinds("dense<[1, 2]> : tensor<2xindex>"),
            vec![
                TokenKind::BareId("dense".into()),
                TokenKind::LAngle,
                TokenKind::LBracket,
                TokenKind::Integer(1),
                TokenKind::Comma,
                TokenKind::Integer(2),
                TokenKind::RBracket,
                TokenKind::RAngle,
                TokenKind::Colon,
                TokenKind::ShapedType {
                    kind: ShapedKind::Tensor,
                    body: "2xindex".into()
                },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_locations_tracked() {
        let tokens = tokenize("// header\n  func").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::BareId("func".into()));
        assert_eq!(tokens[0].location, Location { line: 2, column: 3 });
    }

    #[test]
    fn rejects_unknown_characters_and_open_strings() {
        assert!(matches!(tokenize("#"), Err(ParseError::UnexpectedCharacter { ch: '#', .. })));
        assert!(matches!(tokenize("\"open"), Err(ParseError::UnterminatedString { .. })));
    }
}
