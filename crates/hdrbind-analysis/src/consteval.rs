//! Constant Evaluator
//!
//! Evaluates object-like macro bodies and enumerator values as C integer
//! constant expressions. Every result carries the C type the expression would
//! have, starting from a configurable `int` and widening the way C literal
//! typing and the usual arithmetic conversions do.
//!
//! The notation a literal was written in is kept next to the value. Emission
//! prints decimal regardless.

use crate::typemap::integer_type;
use hdrbind_core::{ArchProfile, DeclKind, IntType, Namespace, Primitive, Token, TypeRef};
use hdrbind_index::SymbolIndex;
use hdrbind_parser::decl::primitive_type;
use hdrbind_parser::expr::{
    char_literal_value, parse_expr, parse_int_literal, BinaryOp, CastType, Expr, UnaryOp,
};
use hdrbind_parser::preprocessor::MacroEnv;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

pub use hdrbind_parser::expr::Notation;

/// Literal typing order from the default `int` upward
const LITERAL_LADDER: [IntType; 4] = [IntType::I32, IntType::U32, IntType::I64, IntType::U64];

/// An evaluated integer constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluated {
    pub value: i128,
    pub ty: IntType,
    /// Base of the leftmost literal in the expression
    pub notation: Notation,
}

impl Evaluated {
    fn int(value: i128) -> Self {
        Self {
            value,
            ty: IntType::I32,
            notation: Notation::Decimal,
        }
    }

    /// Rust literal for the value
    pub fn literal(&self) -> String {
        self.value.to_string()
    }
}

/// Why a constant has no value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Unevaluated(pub String);

impl Unevaluated {
    fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub type Evaluation = Result<Evaluated, Unevaluated>;

/// Evaluates constants against a frozen index.
///
/// Named constants and enumerators are memoized, so each body is evaluated at
/// most once per evaluator. References that loop back to a constant under
/// evaluation are `Unevaluated`.
pub struct ConstantEvaluator<'a> {
    index: &'a SymbolIndex,
    profile: &'a ArchProfile,
    default_int: IntType,
    macros: Option<&'a MacroEnv>,
    enumerators: HashMap<String, Vec<Token>>,
    memo: HashMap<String, Evaluation>,
    in_progress: HashSet<String>,
}

impl<'a> ConstantEvaluator<'a> {
    pub fn new(index: &'a SymbolIndex, profile: &'a ArchProfile, default_int: IntType) -> Self {
        let mut enumerators = HashMap::new();
        for header in index.headers() {
            for decl in index.declarations_in(header) {
                if let DeclKind::Enum(def) = &decl.kind {
                    for variant in &def.variants {
                        enumerators
                            .entry(variant.name.clone())
                            .or_insert_with(|| variant.value.clone());
                    }
                }
            }
        }

        Self {
            index,
            profile,
            default_int,
            macros: None,
            enumerators,
            memo: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Expand bodies with the final macro environment before evaluating, so
    /// constants written with function-like macros still get a value
    pub fn with_macros(mut self, macros: &'a MacroEnv) -> Self {
        self.macros = Some(macros);
        self
    }

    /// Value of a named constant or enumerator
    pub fn evaluate_symbol(&mut self, name: &str) -> Evaluation {
        if let Some(done) = self.memo.get(name) {
            return done.clone();
        }
        if !self.in_progress.insert(name.to_string()) {
            return Err(Unevaluated::new(format!("`{}` refers to itself", name)));
        }

        let body = match self.index.lookup(name, Namespace::Ordinary).map(|d| &d.kind) {
            Some(DeclKind::Constant(tokens)) => Some(tokens.clone()),
            _ => self.enumerators.get(name).cloned(),
        };
        let result = match body {
            Some(tokens) => self.evaluate(&tokens),
            None => Err(Unevaluated::new(format!("unknown identifier `{}`", name))),
        };

        self.in_progress.remove(name);
        if let Err(reason) = &result {
            debug!("{} not evaluated: {}", name, reason);
        }
        self.memo.insert(name.to_string(), result.clone());
        result
    }

    /// Value of a token sequence
    pub fn evaluate(&mut self, tokens: &[Token]) -> Evaluation {
        let expanded;
        let tokens = match self.macros {
            Some(env) => {
                expanded = env.expand(tokens).tokens;
                expanded.as_slice()
            }
            None => tokens,
        };
        if tokens.is_empty() {
            return Err(Unevaluated::new("empty body"));
        }

        let index = self.index;
        let is_type_name = |name: &str| {
            Primitive::from_builtin_name(name).is_some()
                || matches!(
                    index.lookup(name, Namespace::Ordinary).map(|d| &d.kind),
                    Some(DeclKind::Typedef(_))
                )
        };
        let expr = parse_expr(tokens, &is_type_name).map_err(|e| Unevaluated::new(e.to_string()))?;
        self.eval(&expr)
    }

    fn eval(&mut self, expr: &Expr) -> Evaluation {
        match expr {
            Expr::Number(raw) => self.literal(raw),
            Expr::Char(raw) => char_literal_value(raw)
                .map(|v| Evaluated {
                    ty: self.default_int,
                    ..Evaluated::int(v as i128)
                })
                .ok_or_else(|| Unevaluated::new(format!("invalid character literal {}", raw))),
            Expr::Ident(name) => self.evaluate_symbol(name),
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                let ty = promote(v.ty);
                let value = match op {
                    UnaryOp::Plus => v.value,
                    UnaryOp::Neg => -v.value,
                    UnaryOp::BitNot => !v.value,
                    UnaryOp::Not => return Ok(Evaluated::int((v.value == 0) as i128)),
                };
                Ok(Evaluated {
                    value: ty.wrap(value),
                    ty,
                    notation: v.notation,
                })
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs),
            Expr::Ternary(cond, then, otherwise) => {
                if self.eval(cond)?.value != 0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Cast(cast, inner) => {
                let ty = self.cast_target(cast)?;
                let v = self.eval(inner)?;
                Ok(Evaluated {
                    value: ty.wrap(v.value),
                    ty,
                    notation: v.notation,
                })
            }
        }
    }

    fn literal(&self, raw: &str) -> Evaluation {
        let lit = parse_int_literal(raw)
            .ok_or_else(|| Unevaluated::new(format!("`{}` is not an integer literal", raw)))?;
        let value = i128::try_from(lit.value)
            .map_err(|_| Unevaluated::new(format!("literal `{}` is too large", raw)))?;

        // Decimal literals only become unsigned through a suffix
        let may_be_unsigned = lit.unsigned || lit.notation != Notation::Decimal;
        let start = LITERAL_LADDER
            .iter()
            .position(|ty| *ty == self.default_int)
            .unwrap_or(0);
        let ty = LITERAL_LADDER[start..]
            .iter()
            .copied()
            .find(|ty| {
                (ty.is_signed() || may_be_unsigned)
                    && !(lit.unsigned && ty.is_signed())
                    && ty.bits() >= lit.min_bits
                    && ty.fits(value)
            })
            .or_else(|| IntType::U64.fits(value).then_some(IntType::U64))
            .ok_or_else(|| Unevaluated::new(format!("literal `{}` is too large", raw)))?;

        Ok(Evaluated {
            value,
            ty,
            notation: lit.notation,
        })
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Evaluation {
        let l = self.eval(lhs)?;
        match op {
            BinaryOp::And if l.value == 0 => return Ok(Evaluated::int(0)),
            BinaryOp::Or if l.value != 0 => return Ok(Evaluated::int(1)),
            _ => {}
        }
        let r = self.eval(rhs)?;

        let ty = common_type(promote(l.ty), promote(r.ty));
        let (a, b) = (ty.wrap(l.value), ty.wrap(r.value));
        let value = match op {
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                return Err(Unevaluated::new("division by zero"))
            }
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::BitOr => a | b,
            BinaryOp::Lt => return Ok(Evaluated::int((a < b) as i128)),
            BinaryOp::Gt => return Ok(Evaluated::int((a > b) as i128)),
            BinaryOp::Le => return Ok(Evaluated::int((a <= b) as i128)),
            BinaryOp::Ge => return Ok(Evaluated::int((a >= b) as i128)),
            BinaryOp::Eq => return Ok(Evaluated::int((a == b) as i128)),
            BinaryOp::Ne => return Ok(Evaluated::int((a != b) as i128)),
            BinaryOp::And | BinaryOp::Or => return Ok(Evaluated::int((r.value != 0) as i128)),
            BinaryOp::Shl | BinaryOp::Shr => return shift(op, l, r),
        };

        Ok(Evaluated {
            value: ty.wrap(value),
            ty,
            notation: l.notation,
        })
    }

    /// Integer type named by a cast, following typedefs
    fn cast_target(&self, cast: &CastType) -> Result<IntType, Unevaluated> {
        if cast.pointer {
            return Err(Unevaluated::new("pointer cast"));
        }
        let words: Vec<&str> = cast
            .words
            .iter()
            .map(String::as_str)
            .filter(|w| !matches!(*w, "const" | "volatile"))
            .collect();

        let ty = match primitive_type(&words) {
            Some(ty) => ty,
            None => match words.as_slice() {
                ["enum", _] => return Ok(IntType::I32),
                [name] => TypeRef::named(*name, Namespace::Ordinary),
                _ => {
                    return Err(Unevaluated::new(format!(
                        "cast to `{}`",
                        cast.words.join(" ")
                    )))
                }
            },
        };

        match self.index.resolve_alias(&ty) {
            TypeRef::Primitive(prim) => integer_type(self.profile, *prim)
                .ok_or_else(|| Unevaluated::new("floating-point cast")),
            TypeRef::Named { name, namespace } => {
                if let Some(prim) = Primitive::from_builtin_name(name) {
                    return integer_type(self.profile, prim)
                        .ok_or_else(|| Unevaluated::new("floating-point cast"));
                }
                match self.index.lookup(name, *namespace).map(|d| &d.kind) {
                    Some(DeclKind::Enum(_)) => Ok(IntType::I32),
                    _ => Err(Unevaluated::new(format!("cast to `{}`", name))),
                }
            }
            TypeRef::Pointer { .. } => Err(Unevaluated::new("pointer cast")),
            _ => Err(Unevaluated::new(format!("cast to `{}`", cast.words.join(" ")))),
        }
    }
}

/// Shifts take the promoted type of the left operand
fn shift(op: BinaryOp, l: Evaluated, r: Evaluated) -> Evaluation {
    let ty = promote(l.ty);
    if r.value < 0 || r.value >= ty.bits() as i128 {
        return Err(Unevaluated::new(format!("shift by {} out of range", r.value)));
    }
    let value = match op {
        BinaryOp::Shl => ((l.value as u128) << r.value) as i128,
        _ => l.value >> r.value,
    };
    Ok(Evaluated {
        value: ty.wrap(value),
        ty,
        notation: l.notation,
    })
}

/// Integer promotion: anything narrower than `int` becomes `int`
fn promote(ty: IntType) -> IntType {
    if ty.bits() < 32 {
        IntType::I32
    } else {
        ty
    }
}

/// Usual arithmetic conversions on promoted types
fn common_type(a: IntType, b: IntType) -> IntType {
    if a == b {
        return a;
    }
    if a.is_signed() == b.is_signed() {
        return if a.bits() >= b.bits() { a } else { b };
    }
    let (signed, unsigned) = if a.is_signed() { (a, b) } else { (b, a) };
    if unsigned.bits() >= signed.bits() {
        unsigned
    } else {
        signed
    }
}
