//! C Constant Expressions
//!
//! A precedence-climbing parser for the integer expression subset of C. It is
//! shared by `#if` evaluation and by the constant evaluator, which walk the
//! resulting [`Expr`] with their own arithmetic rules.

use hdrbind_core::{Token, TokenKind};
use thiserror::Error;

/// Errors produced while parsing or evaluating an expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),

    #[error("unsupported expression: {0}")]
    Unsupported(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid literal `{0}`")]
    InvalidLiteral(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    fn from_punct(p: &str) -> Option<(BinaryOp, u8)> {
        let op = match p {
            "*" => (BinaryOp::Mul, 10),
            "/" => (BinaryOp::Div, 10),
            "%" => (BinaryOp::Rem, 10),
            "+" => (BinaryOp::Add, 9),
            "-" => (BinaryOp::Sub, 9),
            "<<" => (BinaryOp::Shl, 8),
            ">>" => (BinaryOp::Shr, 8),
            "<" => (BinaryOp::Lt, 7),
            ">" => (BinaryOp::Gt, 7),
            "<=" => (BinaryOp::Le, 7),
            ">=" => (BinaryOp::Ge, 7),
            "==" => (BinaryOp::Eq, 6),
            "!=" => (BinaryOp::Ne, 6),
            "&" => (BinaryOp::BitAnd, 5),
            "^" => (BinaryOp::BitXor, 4),
            "|" => (BinaryOp::BitOr, 3),
            "&&" => (BinaryOp::And, 2),
            "||" => (BinaryOp::Or, 1),
            _ => return None,
        };
        Some(op)
    }

    /// Comparison and logical operators always yield `int`
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::Le
                | BinaryOp::Ge
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::And
                | BinaryOp::Or
        )
    }
}

/// Target of a cast: the type words and whether it is a pointer type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastType {
    pub words: Vec<String>,
    pub pointer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(String),
    Char(String),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Cast(CastType, Box<Expr>),
}

/// Keywords that can start a type name inside a cast
const TYPE_KEYWORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "const",
    "_Bool", "__int8", "__int16", "__int32", "__int64", "struct", "enum", "union",
];

/// Parse a full expression; `is_type_name` reports typedef names usable in casts
pub fn parse_expr(tokens: &[Token], is_type_name: &dyn Fn(&str) -> bool) -> Result<Expr, ExprError> {
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        is_type_name,
    };
    let expr = parser.ternary()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ExprError::UnexpectedToken(tok.spelling())),
    }
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    is_type_name: &'a dyn Fn(&str) -> bool,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'a Token, ExprError> {
        let tok = self.tokens.get(self.pos).ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprError> {
        let tok = self.next()?;
        if tok.is_punct(punct) {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken(tok.spelling()))
        }
    }

    fn ternary(&mut self) -> Result<Expr, ExprError> {
        let cond = self.binary(1)?;
        if self.peek().map_or(false, |t| t.is_punct("?")) {
            self.pos += 1;
            let then = self.ternary()?;
            self.expect(":")?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let (op, prec) = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Punct(p)) => match BinaryOp::from_punct(p) {
                    Some(found) => found,
                    None => break,
                },
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let tok = self.next()?;
        let op = match &tok.kind {
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Punct("~") => Some(UnaryOp::BitNot),
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            return Ok(Expr::Unary(op, Box::new(self.unary()?)));
        }

        match &tok.kind {
            TokenKind::Punct("(") => {
                if let Some(cast) = self.try_cast() {
                    let operand = self.unary()?;
                    return Ok(Expr::Cast(cast, Box::new(operand)));
                }
                let inner = self.ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            TokenKind::Number(raw) => Ok(Expr::Number(raw.clone())),
            TokenKind::Char(raw) => Ok(Expr::Char(raw.clone())),
            TokenKind::Ident(name) if name == "sizeof" => {
                Err(ExprError::Unsupported("sizeof".to_string()))
            }
            TokenKind::Ident(name) => {
                if self.peek().map_or(false, |t| t.is_punct("(")) {
                    return Err(ExprError::Unsupported(format!("call to {}", name)));
                }
                Ok(Expr::Ident(name.clone()))
            }
            TokenKind::Str(_) => Err(ExprError::Unsupported("string literal".to_string())),
            _ => Err(ExprError::UnexpectedToken(tok.spelling())),
        }
    }

    /// After `(`, consume `type-words *... )` if that is what follows
    fn try_cast(&mut self) -> Option<CastType> {
        let mut words = Vec::new();
        let mut pointer = false;
        let mut i = self.pos;

        while let Some(tok) = self.tokens.get(i) {
            match &tok.kind {
                TokenKind::Ident(word) if !pointer => {
                    let known = TYPE_KEYWORDS.contains(&word.as_str()) || (self.is_type_name)(word);
                    let after_tag = words
                        .last()
                        .map_or(false, |w: &String| matches!(w.as_str(), "struct" | "enum" | "union"));
                    if !known && !after_tag {
                        return None;
                    }
                    words.push(word.clone());
                }
                TokenKind::Ident(word) if word == "const" => {}
                TokenKind::Punct("*") => pointer = true,
                TokenKind::Punct(")") => break,
                _ => return None,
            }
            i += 1;
        }

        if words.is_empty() || self.tokens.get(i).map_or(true, |t| !t.is_punct(")")) {
            return None;
        }
        // `(T)` at the end of the input is a parenthesized name, not a cast
        self.tokens.get(i + 1)?;
        self.pos = i + 1;
        Some(CastType { words, pointer })
    }
}

/// Numeric base a literal was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notation {
    Decimal,
    Hex,
    Octal,
    Binary,
}

/// Decoded integer literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntLiteral {
    pub value: u128,
    pub notation: Notation,
    pub unsigned: bool,
    /// Minimum width forced by the suffix: 32 for `l`, 64 for `ll`/`i64`
    pub min_bits: u32,
}

/// Decode an integer literal such as `0x1FUL`, `0755`, `10i64`
pub fn parse_int_literal(raw: &str) -> Option<IntLiteral> {
    let lower = raw.to_ascii_lowercase();
    let (notation, body) = if let Some(rest) = lower.strip_prefix("0x") {
        (Notation::Hex, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (Notation::Binary, rest)
    } else if lower.len() > 1 && lower.starts_with('0') && lower.as_bytes()[1].is_ascii_digit() {
        (Notation::Octal, &lower[1..])
    } else {
        (Notation::Decimal, lower.as_str())
    };

    let radix = match notation {
        Notation::Hex => 16,
        Notation::Octal => 8,
        Notation::Binary => 2,
        Notation::Decimal => 10,
    };
    let digits_end = body
        .find(|c: char| !c.is_digit(radix) && c != '\'')
        .unwrap_or(body.len());
    let (digits, suffix) = body.split_at(digits_end);
    let digits: String = digits.chars().filter(|&c| c != '\'').collect();
    if digits.is_empty() && notation != Notation::Octal {
        return None;
    }

    let (unsigned, min_bits) = match suffix {
        "" => (false, 0),
        "u" => (true, 0),
        "l" => (false, 32),
        "ul" | "lu" => (true, 32),
        "ll" | "i64" => (false, 64),
        "ull" | "llu" | "ui64" => (true, 64),
        "i32" | "i16" | "i8" => (false, 0),
        "ui32" | "ui16" | "ui8" => (true, 0),
        _ => return None,
    };

    let value = if digits.is_empty() {
        0
    } else {
        u128::from_str_radix(&digits, radix).ok()?
    };

    Some(IntLiteral {
        value,
        notation,
        unsigned,
        min_bits,
    })
}

/// Value of a character literal such as `'a'`, `L'\n'` or `'\x41'`
pub fn char_literal_value(raw: &str) -> Option<i64> {
    let start = raw.find('\'')?;
    let inner = raw[start + 1..].strip_suffix('\'')?;
    let chars: Vec<char> = inner.chars().collect();
    let mut values = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '\\' {
            values.push(chars[i] as i64);
            i += 1;
            continue;
        }
        let esc = *chars.get(i + 1)?;
        i += 2;
        let value = match esc {
            'n' => 10,
            't' => 9,
            'r' => 13,
            'a' => 7,
            'b' => 8,
            'f' => 12,
            'v' => 11,
            '\\' | '\'' | '"' | '?' => esc as i64,
            'x' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let hex: String = chars[start..i].iter().collect();
                i64::from_str_radix(&hex, 16).ok()?
            }
            '0'..='7' => {
                let start = i - 1;
                while i < chars.len() && i - start < 3 && chars[i].is_digit(8) {
                    i += 1;
                }
                let oct: String = chars[start..i].iter().collect();
                i64::from_str_radix(&oct, 8).ok()?
            }
            _ => return None,
        };
        values.push(value);
    }

    match values.as_slice() {
        [] => None,
        [single] => Some(*single),
        multi => Some(multi.iter().fold(0i64, |acc, v| (acc << 8) | (v & 0xFF))),
    }
}

/// `#if` operand: `intmax_t`, or `uintmax_t` once an unsigned operand is involved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PpInt {
    value: i128,
    unsigned: bool,
}

impl PpInt {
    fn signed(value: i128) -> Self {
        Self::new(value, false)
    }

    /// Wrap `value` to 64 bits of the given signedness
    fn new(value: i128, unsigned: bool) -> Self {
        let value = if unsigned {
            value as u64 as i128
        } else {
            value as i64 as i128
        };
        Self { value, unsigned }
    }

    fn truth(flag: bool) -> Self {
        Self::signed(flag as i128)
    }
}

/// Evaluate an `#if` expression with `intmax_t` and `uintmax_t` arithmetic.
///
/// Identifiers still present after macro expansion evaluate to `0`. The
/// result keeps the low 64 bits of the value.
pub fn eval_condition(expr: &Expr) -> Result<i64, ExprError> {
    eval_pp(expr).map(|v| v.value as i64)
}

fn eval_pp(expr: &Expr) -> Result<PpInt, ExprError> {
    match expr {
        Expr::Number(raw) => {
            let lit = parse_int_literal(raw).ok_or_else(|| ExprError::InvalidLiteral(raw.clone()))?;
            let unsigned = lit.unsigned || lit.value > i64::MAX as u128;
            Ok(PpInt::new(lit.value as u64 as i128, unsigned))
        }
        Expr::Char(raw) => char_literal_value(raw)
            .map(|v| PpInt::signed(v as i128))
            .ok_or_else(|| ExprError::InvalidLiteral(raw.clone())),
        Expr::Ident(_) => Ok(PpInt::signed(0)),
        Expr::Unary(op, inner) => {
            let v = eval_pp(inner)?;
            Ok(match op {
                UnaryOp::Neg => PpInt::new(v.value.wrapping_neg(), v.unsigned),
                UnaryOp::Plus => v,
                UnaryOp::BitNot => PpInt::new(!v.value, v.unsigned),
                UnaryOp::Not => PpInt::truth(v.value == 0),
            })
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            Ok(PpInt::truth(eval_pp(lhs)?.value != 0 && eval_pp(rhs)?.value != 0))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            Ok(PpInt::truth(eval_pp(lhs)?.value != 0 || eval_pp(rhs)?.value != 0))
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval_pp(lhs)?;
            let r = eval_pp(rhs)?;
            let unsigned = l.unsigned || r.unsigned;
            // both operands converted to the common type
            let a = PpInt::new(l.value, unsigned).value;
            let b = PpInt::new(r.value, unsigned).value;
            let shift = (r.value & 63) as u32;
            let value = match op {
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(ExprError::DivisionByZero),
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                // shifts keep the type of the left operand
                BinaryOp::Shl => return Ok(PpInt::new(l.value << shift, l.unsigned)),
                BinaryOp::Shr => return Ok(PpInt::new(l.value >> shift, l.unsigned)),
                BinaryOp::Lt => return Ok(PpInt::truth(a < b)),
                BinaryOp::Gt => return Ok(PpInt::truth(a > b)),
                BinaryOp::Le => return Ok(PpInt::truth(a <= b)),
                BinaryOp::Ge => return Ok(PpInt::truth(a >= b)),
                BinaryOp::Eq => return Ok(PpInt::truth(a == b)),
                BinaryOp::Ne => return Ok(PpInt::truth(a != b)),
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitXor => a ^ b,
                BinaryOp::BitOr => a | b,
                BinaryOp::And => return Ok(PpInt::truth(a != 0 && b != 0)),
                BinaryOp::Or => return Ok(PpInt::truth(a != 0 || b != 0)),
            };
            Ok(PpInt::new(value, unsigned))
        }
        Expr::Ternary(cond, then, otherwise) => {
            if eval_pp(cond)?.value != 0 {
                eval_pp(then)
            } else {
                eval_pp(otherwise)
            }
        }
        Expr::Cast(..) => Err(ExprError::Unsupported("cast in #if".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn no_types(_: &str) -> bool {
        false
    }

    fn eval(src: &str) -> Result<i64, ExprError> {
        let expr = parse_expr(&tokenize(src, 1), &no_types)?;
        eval_condition(&expr)
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), 7);
        assert_eq!(eval("(1 + 2) * 3").unwrap(), 9);
        assert_eq!(eval("1 << 4 | 1").unwrap(), 17);
        assert_eq!(eval("2 > 1 && 3 == 3").unwrap(), 1);
        assert_eq!(eval("0 ? 5 : 1 ? 6 : 7").unwrap(), 6);
    }

    #[test]
    fn test_unknown_identifier_is_zero() {
        assert_eq!(eval("UNKNOWN + 1").unwrap(), 1);
        assert_eq!(eval("!UNKNOWN").unwrap(), 1);
    }

    #[test]
    fn test_unsigned_comparisons_keep_full_width() {
        assert_eq!(eval("0xFFFFFFFFFFFFFFFF > 0").unwrap(), 1);
        assert_eq!(eval("18446744073709551615 == 0xFFFFFFFFFFFFFFFF").unwrap(), 1);
        // -1 converts to the largest unsigned value
        assert_eq!(eval("-1 < 0u").unwrap(), 0);
        assert_eq!(eval("-1 < 0").unwrap(), 1);
        assert_eq!(eval("0x8000000000000000 >> 63").unwrap(), 1);
        assert_eq!(eval("-8 >> 1").unwrap(), -4);
        assert_eq!(eval("0u - 1 > 0").unwrap(), 1);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval("1 / 0"), Err(ExprError::DivisionByZero));
        // short-circuit skips the division
        assert_eq!(eval("0 && 1 / 0").unwrap(), 0);
    }

    #[test]
    fn test_literals() {
        let lit = parse_int_literal("0xFFFFFFFFUL").unwrap();
        assert_eq!(lit.value, 0xFFFF_FFFF);
        assert_eq!(lit.notation, Notation::Hex);
        assert!(lit.unsigned);
        assert_eq!(lit.min_bits, 32);

        assert_eq!(parse_int_literal("0755").unwrap().value, 0o755);
        assert_eq!(parse_int_literal("0").unwrap().value, 0);
        assert_eq!(parse_int_literal("10i64").unwrap().min_bits, 64);
        assert_eq!(parse_int_literal("0b101").unwrap().value, 5);
        assert!(parse_int_literal("1.5").is_none());
        assert!(parse_int_literal("12abc").is_none());
    }

    #[test]
    fn test_char_literals() {
        assert_eq!(char_literal_value("'a'"), Some(97));
        assert_eq!(char_literal_value("L'\\n'"), Some(10));
        assert_eq!(char_literal_value("'\\x41'"), Some(65));
        assert_eq!(char_literal_value("'\\0'"), Some(0));
        assert_eq!(char_literal_value("'ab'"), Some(0x6162));
    }

    #[test]
    fn test_cast_needs_type_name() {
        let is_type = |name: &str| name == "DWORD";
        let expr = parse_expr(&tokenize("(DWORD)-1", 1), &is_type).unwrap();
        assert!(matches!(expr, Expr::Cast(ref c, _) if c.words == vec!["DWORD"] && !c.pointer));

        // without the type name this is a subtraction
        let expr = parse_expr(&tokenize("(X)-1", 1), &is_type).unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::Sub, _, _)));

        let expr = parse_expr(&tokenize("(void *)0", 1), &is_type).unwrap();
        assert!(matches!(expr, Expr::Cast(ref c, _) if c.pointer));
    }

    #[test]
    fn test_unsupported_forms() {
        assert!(matches!(eval("sizeof(int)"), Err(ExprError::Unsupported(_))));
        assert!(matches!(eval("f(1)"), Err(ExprError::Unsupported(_))));
        assert!(matches!(eval("1 +"), Err(ExprError::UnexpectedEnd)));
    }
}
