//! Hand-written lexer for the configuration language
//!
//! Identifiers may contain `-` and `::` (namespaced type names) and may end
//! in `*` (wildcard reference names), so the `-` and `*` operators must be
//! surrounded by whitespace to be read as arithmetic.

use crate::ast::Location;
use crate::error::{ParseError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),

    Colon,
    Comma,
    Pipe,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    RefStart,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    For,
    In,
    If,
    Else,
    End,
    And,
    Or,
    True,
    False,
    Null,

    Eof,
}

impl TokenKind {
    /// Whether a `-` or digit directly after this token starts a number
    /// rather than continuing an expression.
    fn allows_signed_number(&self) -> bool {
        !matches!(
            self,
            Self::Ident(_)
                | Self::Str(_)
                | Self::Int(_)
                | Self::Float(_)
                | Self::RBracket
                | Self::RBrace
                | Self::RParen
                | Self::True
                | Self::False
                | Self::Null
        )
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    file: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, file: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file,
        }
    }

    /// Lex the whole input, ending with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens: Vec<Token> = Vec::new();

        loop {
            self.skip_trivia();

            let location = self.location();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    location,
                });
                return Ok(tokens);
            };

            let prev_allows_sign = tokens
                .last()
                .map_or(true, |t| t.kind.allows_signed_number());

            let kind = if c == '"' {
                self.lex_string()?
            } else if c.is_ascii_digit() || (c == '-' && prev_allows_sign && self.peek_digit_at(1))
            {
                self.lex_number()?
            } else if c.is_alphabetic() || c == '_' {
                self.lex_ident()
            } else {
                self.lex_symbol()?
            };

            tokens.push(Token { kind, location });
        }
    }

    fn location(&self) -> Location {
        Location::new(self.file, self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn peek_digit_at(&self, offset: usize) -> bool {
        self.peek_at(offset).is_some_and(|c| c.is_ascii_digit())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;

        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn lex_string(&mut self) -> Result<TokenKind> {
        let start = self.location();
        self.bump();

        let mut out = String::new();

        loop {
            match self.bump() {
                None => return Err(ParseError::new("unterminated string", start)),
                Some('"') => return Ok(TokenKind::Str(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    // Keep the backslash so the interpolation splitter can
                    // tell an escaped "$(" from a real one.
                    Some('$') => out.push_str("\\$"),
                    Some(c) => {
                        return Err(ParseError::new(
                            format!("unknown escape sequence '\\{c}'"),
                            self.location(),
                        ));
                    }
                    None => return Err(ParseError::new("unterminated string", start)),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind> {
        let start = self.location();
        let mut raw = String::new();

        if self.peek() == Some('-') {
            raw.push('-');
            self.bump();
        }

        let mut float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                raw.push(c);
                self.bump();
            } else if c == '.' && !float && self.peek_digit_at(1) {
                float = true;
                raw.push(c);
                self.bump();
            } else {
                break;
            }
        }

        if float {
            raw.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| ParseError::new(format!("invalid number '{raw}'"), start))
        } else {
            raw.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| ParseError::new(format!("invalid number '{raw}'"), start))
        }
    }

    fn lex_ident(&mut self) -> TokenKind {
        let mut out = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                out.push(c);
                self.bump();
            } else if c == '-' && self.peek_at(1).is_some_and(|n| n.is_alphanumeric() || n == '*')
            {
                out.push(c);
                self.bump();
            } else if c == ':' && self.peek_at(1) == Some(':') {
                out.push_str("::");
                self.bump();
                self.bump();
            } else if c == '*' {
                out.push(c);
                self.bump();
                break;
            } else {
                break;
            }
        }

        match out.as_str() {
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Ident(out),
        }
    }

    fn lex_symbol(&mut self) -> Result<TokenKind> {
        let location = self.location();
        let c = self.bump().expect("symbol start");

        let kind = match c {
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '|' => TokenKind::Pipe,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '$' if self.peek() == Some('(') => {
                self.bump();
                TokenKind::RefStart
            }
            '=' if self.peek() == Some('=') => {
                self.bump();
                TokenKind::EqEq
            }
            '!' if self.peek() == Some('=') => {
                self.bump();
                TokenKind::NotEq
            }
            '<' if self.peek() == Some('=') => {
                self.bump();
                TokenKind::Le
            }
            '<' => TokenKind::Lt,
            '>' if self.peek() == Some('=') => {
                self.bump();
                TokenKind::Ge
            }
            '>' => TokenKind::Gt,
            _ => {
                return Err(ParseError::new(format!("unexpected character '{c}'"), location));
            }
        };

        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, "test.strato")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_idents_and_types() {
        assert_eq!(
            kinds("cloud::network sub-name web-*"),
            vec![
                TokenKind::Ident("cloud::network".into()),
                TokenKind::Ident("sub-name".into()),
                TokenKind::Ident("web-*".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        // A leading '-' only starts a number where an expression starts;
        // after a value it reads as subtraction.
        assert_eq!(
            kinds("x: -2 3.5 1 - 2"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Colon,
                TokenKind::Int(-2),
                TokenKind::Float(3.5),
                TokenKind::Int(1),
                TokenKind::Minus,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_comments() {
        assert_eq!(
            kinds("\"a b\" # trailing\n\"c\\nd\""),
            vec![
                TokenKind::Str("a b".into()),
                TokenKind::Str("c\nd".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_reference_start() {
        assert_eq!(
            kinds("$(region)"),
            vec![
                TokenKind::RefStart,
                TokenKind::Ident("region".into()),
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("== != <= >= < >"),
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let result = Lexer::new("\"oops", "t.strato").tokenize();
        assert!(result.is_err());
    }
}
