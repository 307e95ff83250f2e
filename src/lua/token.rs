//! Lua tokens and the lexer.

use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(SmolStr),
    Int(i64),
    Float(f64),
    Str(SmolStr),

    // Keywords
    And, Break, Do, Else, Elseif, End, False, For, Function, Goto, If, In,
    Local, Nil, Not, Or, Repeat, Return, Then, True, Until, While,

    // Punctuation / operators
    Plus, Minus, Star, Slash, DSlash, Percent, Caret, Hash,
    Amp, Tilde, Pipe, Shl, Shr,
    Eq, NotEq, LtEq, GtEq, Lt, Gt, Assign,
    LParen, RParen, LBrace, RBrace, LBracket, RBracket,
    DColon, Semi, Colon, Comma, Dot, DDot, Ellipsis,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

fn keyword(s: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match s {
        "and" => And, "break" => Break, "do" => Do, "else" => Else,
        "elseif" => Elseif, "end" => End, "false" => False, "for" => For,
        "function" => Function, "goto" => Goto, "if" => If, "in" => In,
        "local" => Local, "nil" => Nil, "not" => Not, "or" => Or,
        "repeat" => Repeat, "return" => Return, "then" => Then, "true" => True,
        "until" => Until, "while" => While,
        _ => return None,
    })
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Lexer<'a> {
        Lexer { src: src.as_bytes(), pos: 0, line: 1, column: 1 }
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
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<(), crate::vm::EngineError> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                }
                Some(b'-') if self.peek2() == Some(b'-') => {
                    self.advance();
                    self.advance();
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, crate::vm::EngineError> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let Some(c) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, line, column });
        };

        if c.is_ascii_digit() || (c == b'.' && self.peek2().map(|d| d.is_ascii_digit()).unwrap_or(false)) {
            return self.read_number(line, column);
        }
        if c == b'_' || c.is_ascii_alphabetic() {
            return Ok(self.read_name(line, column));
        }
        if c == b'"' || c == b'\'' {
            return self.read_string(line, column);
        }

        self.advance();
        use TokenKind::*;
        let kind = match c {
            b'+' => Plus,
            b'-' => Minus,
            b'*' => Star,
            b'/' => {
                if self.peek() == Some(b'/') {
                    self.advance();
                    DSlash
                } else {
                    Slash
                }
            }
            b'%' => Percent,
            b'^' => Caret,
            b'#' => Hash,
            b'&' => Amp,
            b'~' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    NotEq
                } else {
                    Tilde
                }
            }
            b'|' => Pipe,
            b'<' => match self.peek() {
                Some(b'<') => {
                    self.advance();
                    Shl
                }
                Some(b'=') => {
                    self.advance();
                    LtEq
                }
                _ => Lt,
            },
            b'>' => match self.peek() {
                Some(b'>') => {
                    self.advance();
                    Shr
                }
                Some(b'=') => {
                    self.advance();
                    GtEq
                }
                _ => Gt,
            },
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    Eq
                } else {
                    Assign
                }
            }
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b';' => Semi,
            b':' => {
                if self.peek() == Some(b':') {
                    self.advance();
                    DColon
                } else {
                    Colon
                }
            }
            b',' => Comma,
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.advance();
                    if self.peek() == Some(b'.') {
                        self.advance();
                        Ellipsis
                    } else {
                        DDot
                    }
                } else {
                    Dot
                }
            }
            other => {
                return Err(crate::vm::EngineError::lexical(format!(
                    "unexpected character '{}' at {}:{}",
                    other as char, line, column
                )))
            }
        };
        Ok(Token { kind, line, column })
    }

    fn read_name(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let kind = keyword(text).unwrap_or_else(|| TokenKind::Name(SmolStr::new(text)));
        Token { kind, line, column }
    }

    fn read_number(&mut self, line: u32, column: u32) -> Result<Token, crate::vm::EngineError> {
        let start = self.pos;
        let mut is_float = false;
        if self.peek() == Some(b'0') && matches!(self.peek2(), Some(b'x') | Some(b'X')) {
            self.advance();
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    self.advance();
                } else {
                    break;
                }
            }
            let text = std::str::from_utf8(&self.src[start + 2..self.pos]).unwrap();
            let value = i64::from_str_radix(text, 16)
                .map_err(|_| crate::vm::EngineError::lexical(format!("invalid hex literal at {line}:{column}")))?;
            return Ok(Token { kind: TokenKind::Int(value), line, column });
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == b'.' && !is_float {
                is_float = true;
                self.advance();
            } else if (c == b'e' || c == b'E') && !matches!(self.peek2(), None) {
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
            TokenKind::Float(text.parse().map_err(|_| crate::vm::EngineError::lexical(format!("invalid number at {line}:{column}")))?)
        } else {
            match text.parse::<i64>() {
                Ok(i) => TokenKind::Int(i),
                Err(_) => TokenKind::Float(text.parse().map_err(|_| crate::vm::EngineError::lexical(format!("invalid number at {line}:{column}")))?),
            }
        };
        Ok(Token { kind, line, column })
    }

    fn read_string(&mut self, line: u32, column: u32) -> Result<Token, crate::vm::EngineError> {
        let quote = self.advance().unwrap();
        let mut out: Vec<u8> = Vec::new();
        loop {
            match self.advance() {
                None => return Err(crate::vm::EngineError::lexical(format!("unterminated string at {line}:{column}"))),
                Some(c) if c == quote => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b'a') => out.push(0x07),
                    Some(b'b') => out.push(0x08),
                    Some(b'f') => out.push(0x0c),
                    Some(b'v') => out.push(0x0b),
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'"') => out.push(b'"'),
                    Some(b'\'') => out.push(b'\''),
                    Some(b'\n') => out.push(b'\n'),
                    Some(other) => {
                        return Err(crate::vm::EngineError::lexical(format!(
                            "unknown escape '\\{}' at {}:{}",
                            other as char, line, column
                        )))
                    }
                    None => return Err(crate::vm::EngineError::lexical("unterminated string escape")),
                },
                Some(c) => out.push(c),
            }
        }
        let text = String::from_utf8_lossy(&out).into_owned();
        Ok(Token { kind: TokenKind::Str(SmolStr::new(text)), line, column })
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
    fn keywords_are_distinguished_from_identifiers() {
        assert_eq!(kinds("local x"), vec![TokenKind::Local, TokenKind::Name(SmolStr::new("x"))]);
    }

    #[test]
    fn line_comments_are_skipped() {
        assert_eq!(kinds("1 -- comment\n+ 2"), vec![TokenKind::Int(1), TokenKind::Plus, TokenKind::Int(2)]);
    }

    #[test]
    fn hex_integer_literals_parse() {
        assert_eq!(kinds("0xFF"), vec![TokenKind::Int(255)]);
    }

    #[test]
    fn float_literals_with_exponents_parse() {
        assert_eq!(kinds("1.5e2"), vec![TokenKind::Float(150.0)]);
    }

    #[test]
    fn string_escapes_are_decoded() {
        let toks = kinds(r#""a\nb""#);
        assert_eq!(toks, vec![TokenKind::Str(SmolStr::new("a\nb"))]);
    }

    #[test]
    fn two_character_operators_are_not_split() {
        assert_eq!(kinds("a~=b"), vec![
            TokenKind::Name(SmolStr::new("a")),
            TokenKind::NotEq,
            TokenKind::Name(SmolStr::new("b")),
        ]);
        assert_eq!(kinds(".."), vec![TokenKind::DDot]);
        assert_eq!(kinds("..."), vec![TokenKind::Ellipsis]);
    }

    #[test]
    fn unexpected_character_is_a_lexical_error() {
        let mut lexer = Lexer::new("@");
        assert!(lexer.next_token().is_err());
    }
}
