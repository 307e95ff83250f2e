//! jq tokens and lexer.
//!
//! Multi-character operators are tried ahead of their single-character
//! prefixes through an explicit `peek`/`peek2` dispatch, in the style of
//! `crate::lua::token::Lexer` rather than a table of regexes. A leading
//! `-` on a number is always tokenized as its own `Minus` token rather
//! than folded into the numeral, so unary minus is handled uniformly at
//! parse time. This lexer follows
//! that behavior directly by never consuming a sign as part of a number.

use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(SmolStr),
    Var(SmolStr),
    Int(i64),
    Float(f64),
    Str(SmolStr),

    CoalesceAssign, // //=
    Coalesce,       // //
    EqEq,
    Neq,
    Gte,
    Lte,
    PipeAssign, // |=
    Pipe,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    PlusAssign,
    Plus,
    MinusAssign,
    Minus,
    StarAssign,
    Star,
    SlashAssign,
    Slash,
    PercentAssign,
    Percent,
    Gt,
    Lt,
    LBrace,
    RBrace,
    Colon,
    Semicolon,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: u32,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Lexer<'a> {
        Lexer { src: src.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n')) {
            self.advance();
        }
    }

    pub fn next_token(&mut self) -> Result<Token, crate::vm::EngineError> {
        self.skip_trivia();
        let pos = self.pos as u32;
        let Some(c) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, pos });
        };

        if c.is_ascii_digit() {
            return self.read_number(pos);
        }
        if c == b'_' || c.is_ascii_alphabetic() {
            return Ok(self.read_ident(pos));
        }
        if c == b'$' {
            self.advance();
            let start = self.pos;
            while let Some(ch) = self.peek() {
                if ch == b'_' || ch.is_ascii_alphanumeric() {
                    self.advance();
                } else {
                    break;
                }
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
            return Ok(Token { kind: TokenKind::Var(SmolStr::new(text)), pos });
        }
        if c == b'"' || c == b'\'' {
            return self.read_string(pos);
        }

        self.advance();
        use TokenKind::*;
        let kind = match c {
            b'/' => match self.peek() {
                Some(b'/') => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        CoalesceAssign
                    } else {
                        Coalesce
                    }
                }
                Some(b'=') => {
                    self.advance();
                    SlashAssign
                }
                _ => Slash,
            },
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    EqEq
                } else {
                    return Err(crate::vm::EngineError::lexical(format!("unexpected character '=' at {pos}")));
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Neq
                } else {
                    return Err(crate::vm::EngineError::lexical(format!("unexpected character '!' at {pos}")));
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Gte
                } else {
                    Gt
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Lte
                } else {
                    Lt
                }
            }
            b'|' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    PipeAssign
                } else {
                    Pipe
                }
            }
            b'.' => Dot,
            b'[' => LBracket,
            b']' => RBracket,
            b'(' => LParen,
            b')' => RParen,
            b',' => Comma,
            b'+' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    PlusAssign
                } else {
                    Plus
                }
            }
            b'-' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    MinusAssign
                } else {
                    Minus
                }
            }
            b'*' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    StarAssign
                } else {
                    Star
                }
            }
            b'%' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    PercentAssign
                } else {
                    Percent
                }
            }
            b'{' => LBrace,
            b'}' => RBrace,
            b':' => Colon,
            b';' => Semicolon,
            other => {
                return Err(crate::vm::EngineError::lexical(format!(
                    "unexpected character '{}' at {pos}",
                    other as char
                )))
            }
        };
        Ok(Token { kind, pos })
    }

    fn read_ident(&mut self, pos: u32) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        Token { kind: TokenKind::Ident(SmolStr::new(text)), pos }
    }

    fn read_number(&mut self, pos: u32) -> Result<Token, crate::vm::EngineError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == b'.' && !is_float && self.peek2().map(|d| d.is_ascii_digit()).unwrap_or(false) {
                is_float = true;
                self.advance();
            } else if (c == b'e' || c == b'E') && matches!(self.peek2(), Some(b'0'..=b'9') | Some(b'+') | Some(b'-')) {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.advance();
                }
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let kind = if is_float {
            TokenKind::Float(
                text.parse()
                    .map_err(|_| crate::vm::EngineError::lexical(format!("invalid number at {pos}")))?,
            )
        } else {
            match text.parse::<i64>() {
                Ok(i) => TokenKind::Int(i),
                Err(_) => TokenKind::Float(
                    text.parse()
                        .map_err(|_| crate::vm::EngineError::lexical(format!("invalid number at {pos}")))?,
                ),
            }
        };
        Ok(Token { kind, pos })
    }

    /// Matches `"(?:\\.|[^"\\])*"` / the single-quoted equivalent: any
    /// backslash escapes the following character literally, with the
    /// common control escapes additionally decoded.
    fn read_string(&mut self, pos: u32) -> Result<Token, crate::vm::EngineError> {
        let quote = self.advance().unwrap();
        let mut out: Vec<u8> = Vec::new();
        loop {
            match self.advance() {
                None => return Err(crate::vm::EngineError::lexical(format!("unterminated string at {pos}"))),
                Some(c) if c == quote => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b'"') => out.push(b'"'),
                    Some(b'\'') => out.push(b'\''),
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'/') => out.push(b'/'),
                    Some(other) => out.push(other),
                    None => return Err(crate::vm::EngineError::lexical("unterminated string escape")),
                },
                Some(c) => out.push(c),
            }
        }
        let text = String::from_utf8_lossy(&out).into_owned();
        Ok(Token { kind: TokenKind::Str(SmolStr::new(text)), pos })
    }
}

#[cfg(test)]
mod token_tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn variables_are_distinguished_from_identifiers() {
        assert_eq!(kinds("$x"), vec![TokenKind::Var(SmolStr::new("x"))]);
        assert_eq!(kinds("x"), vec![TokenKind::Ident(SmolStr::new("x"))]);
    }

    #[test]
    fn coalesce_and_slash_are_disambiguated() {
        assert_eq!(kinds("/"), vec![TokenKind::Slash]);
        assert_eq!(kinds("//"), vec![TokenKind::Coalesce]);
        assert_eq!(kinds("//="), vec![TokenKind::CoalesceAssign]);
    }

    #[test]
    fn leading_minus_on_a_number_is_its_own_token() {
        assert_eq!(kinds("-1"), vec![TokenKind::Minus, TokenKind::Int(1)]);
    }

    #[test]
    fn a_dot_not_followed_by_a_digit_is_not_part_of_a_number() {
        assert_eq!(kinds("1.field"), vec![TokenKind::Int(1), TokenKind::Dot, TokenKind::Ident(SmolStr::new("field"))]);
    }

    #[test]
    fn bare_equals_is_a_lexical_error() {
        let mut lexer = Lexer::new("=");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(kinds(r#""a\tb""#), vec![TokenKind::Str(SmolStr::new("a\tb"))]);
    }
}
