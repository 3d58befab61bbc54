//! Preprocessing tokens
//!
//! Tokens are produced by the lexer in `hdrbind-parser` and flow through
//! macro expansion, the declaration parser and the constant evaluator.

use std::fmt;

/// Token category with its spelling
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Identifier or keyword
    Ident(String),
    /// Preprocessing number, kept as written (`0x1FL`, `1.5e3`)
    Number(String),
    /// String literal including quotes and any encoding prefix
    Str(String),
    /// Character literal including quotes and any encoding prefix
    Char(String),
    /// Punctuator
    Punct(&'static str),
    /// Any other single character
    Other(char),
}

/// A token with the physical line it started on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, line: u32) -> Self {
        Self { kind, line }
    }

    pub fn ident(name: impl Into<String>, line: u32) -> Self {
        Self::new(TokenKind::Ident(name.into()), line)
    }

    pub fn number(raw: impl Into<String>, line: u32) -> Self {
        Self::new(TokenKind::Number(raw.into()), line)
    }

    pub fn punct(p: &'static str, line: u32) -> Self {
        Self::new(TokenKind::Punct(p), line)
    }

    /// Identifier text, if this is an identifier
    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.as_ident() == Some(name)
    }

    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    /// Source spelling of the token
    pub fn spelling(&self) -> String {
        self.kind.to_string()
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) | TokenKind::Number(s) | TokenKind::Str(s) | TokenKind::Char(s) => {
                f.write_str(s)
            }
            TokenKind::Punct(p) => f.write_str(p),
            TokenKind::Other(c) => write!(f, "{}", c),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

/// Join token spellings with single spaces
pub fn spell_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(Token::spelling)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compare two token sequences by spelling only, ignoring line numbers
pub fn same_spelling(a: &[Token], b: &[Token]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.kind == y.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spell_tokens() {
        let tokens = vec![
            Token::punct("(", 1),
            Token::ident("A", 1),
            Token::punct("|", 1),
            Token::number("0x10", 1),
            Token::punct(")", 1),
        ];
        assert_eq!(spell_tokens(&tokens), "( A | 0x10 )");
    }

    #[test]
    fn test_same_spelling_ignores_lines() {
        let a = vec![Token::number("1", 3)];
        let b = vec![Token::number("1", 40)];
        assert!(same_spelling(&a, &b));
        assert!(!same_spelling(&a, &[Token::number("2", 3)]));
    }
}
