//! Declaration and type model
//!
//! The intermediate representation produced by the declaration parser,
//! aggregated by the symbol table and consumed by the type mapper and the
//! module emitter.

use crate::location::Location;
use crate::token::{same_spelling, Token};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// C primitive types, before architecture-specific width selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Bool,
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    LongDouble,
    WChar,
    Char16,
    Char32,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    SizeT,
    SSizeT,
    PtrDiff,
    IntPtr,
    UIntPtr,
}

impl Primitive {
    /// Type names a compiler or its base headers treat as built in
    pub fn from_builtin_name(name: &str) -> Option<Primitive> {
        let prim = match name {
            "_Bool" | "bool" => Primitive::Bool,
            "wchar_t" => Primitive::WChar,
            "char16_t" => Primitive::Char16,
            "char32_t" => Primitive::Char32,
            "int8_t" | "__int8" => Primitive::Int8,
            "int16_t" | "__int16" => Primitive::Int16,
            "int32_t" | "__int32" => Primitive::Int32,
            "int64_t" | "__int64" => Primitive::Int64,
            "uint8_t" => Primitive::UInt8,
            "uint16_t" => Primitive::UInt16,
            "uint32_t" => Primitive::UInt32,
            "uint64_t" => Primitive::UInt64,
            "size_t" => Primitive::SizeT,
            "ssize_t" => Primitive::SSizeT,
            "ptrdiff_t" => Primitive::PtrDiff,
            "intptr_t" => Primitive::IntPtr,
            "uintptr_t" => Primitive::UIntPtr,
            _ => return None,
        };
        Some(prim)
    }

    /// Unsigned counterpart for `unsigned __int64` and friends
    pub fn to_unsigned(self) -> Primitive {
        match self {
            Primitive::Char | Primitive::SChar | Primitive::Int8 => Primitive::UInt8,
            Primitive::Short | Primitive::Int16 => Primitive::UInt16,
            Primitive::Int | Primitive::Int32 => Primitive::UInt32,
            Primitive::Long => Primitive::ULong,
            Primitive::LongLong => Primitive::ULongLong,
            Primitive::Int64 => Primitive::UInt64,
            other => other,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            Primitive::Float | Primitive::Double | Primitive::LongDouble
        )
    }
}

/// Integer type of an evaluated constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl IntType {
    pub fn from_width(bits: u32, signed: bool) -> IntType {
        match (bits, signed) {
            (8, true) => IntType::I8,
            (8, false) => IntType::U8,
            (16, true) => IntType::I16,
            (16, false) => IntType::U16,
            (32, true) => IntType::I32,
            (32, false) => IntType::U32,
            (_, true) => IntType::I64,
            (_, false) => IntType::U64,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            IntType::I8 | IntType::U8 => 8,
            IntType::I16 | IntType::U16 => 16,
            IntType::I32 | IntType::U32 => 32,
            IntType::I64 | IntType::U64 => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntType::I8 | IntType::I16 | IntType::I32 | IntType::I64)
    }

    pub fn min_value(self) -> i128 {
        if self.is_signed() {
            -(1i128 << (self.bits() - 1))
        } else {
            0
        }
    }

    pub fn max_value(self) -> i128 {
        if self.is_signed() {
            (1i128 << (self.bits() - 1)) - 1
        } else {
            (1i128 << self.bits()) - 1
        }
    }

    pub fn fits(self, value: i128) -> bool {
        value >= self.min_value() && value <= self.max_value()
    }

    /// Reduce a value modulo this type's width, as a C conversion does
    pub fn wrap(self, value: i128) -> i128 {
        let bits = self.bits();
        let modulus = 1i128 << bits;
        let low = value.rem_euclid(modulus);
        if self.is_signed() && low >= modulus / 2 {
            low - modulus
        } else {
            low
        }
    }

    pub fn rust_name(self) -> &'static str {
        match self {
            IntType::I8 => "i8",
            IntType::U8 => "u8",
            IntType::I16 => "i16",
            IntType::U16 => "u16",
            IntType::I32 => "i32",
            IntType::U32 => "u32",
            IntType::I64 => "i64",
            IntType::U64 => "u64",
        }
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rust_name())
    }
}

/// C has separate name spaces for struct/enum/union tags and everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    Tag,
    Ordinary,
}

/// Key of a symbol in the global symbol space
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey {
    pub namespace: Namespace,
    pub name: String,
}

impl SymbolKey {
    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            namespace: Namespace::Tag,
            name: name.into(),
        }
    }

    pub fn ordinary(name: impl Into<String>) -> Self {
        Self {
            namespace: Namespace::Ordinary,
            name: name.into(),
        }
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace {
            Namespace::Tag => write!(f, "tag {}", self.name),
            Namespace::Ordinary => f.write_str(&self.name),
        }
    }
}

/// Calling convention of a function or function pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CallConv {
    #[default]
    C,
    Stdcall,
    Fastcall,
}

/// A reference to a C type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Void,
    Primitive(Primitive),
    /// Pointer; `is_const` qualifies the pointee
    Pointer { pointee: Box<TypeRef>, is_const: bool },
    /// Fixed-size array; `None` for `[]`
    Array { element: Box<TypeRef>, len: Option<u64> },
    /// Function type, normally seen behind a pointer
    Function(Box<FunctionSig>),
    /// Reference to a struct, enum, union or typedef by name
    Named { name: String, namespace: Namespace },
    /// Construct the model cannot express
    Unsupported(String),
}

impl TypeRef {
    pub fn pointer(pointee: TypeRef, is_const: bool) -> TypeRef {
        TypeRef::Pointer {
            pointee: Box::new(pointee),
            is_const,
        }
    }

    pub fn named(name: impl Into<String>, namespace: Namespace) -> TypeRef {
        TypeRef::Named {
            name: name.into(),
            namespace,
        }
    }

    /// Visit every named reference, reporting whether it sits behind a pointer
    pub fn visit_named<F: FnMut(&str, Namespace, bool)>(&self, f: &mut F) {
        self.visit_named_inner(false, f);
    }

    fn visit_named_inner<F: FnMut(&str, Namespace, bool)>(&self, indirect: bool, f: &mut F) {
        match self {
            TypeRef::Named { name, namespace } => f(name, *namespace, indirect),
            TypeRef::Pointer { pointee, .. } => pointee.visit_named_inner(true, f),
            TypeRef::Array { element, .. } => element.visit_named_inner(indirect, f),
            TypeRef::Function(sig) => sig.visit_named_inner(indirect, f),
            TypeRef::Void | TypeRef::Primitive(_) | TypeRef::Unsupported(_) => {}
        }
    }
}

/// Function parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Option<String>,
    pub ty: TypeRef,
}

/// Function signature, shared by prototypes and function pointer types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    pub ret: TypeRef,
    pub params: Vec<Param>,
    pub variadic: bool,
    pub call_conv: CallConv,
}

impl FunctionSig {
    pub fn visit_named<F: FnMut(&str, Namespace, bool)>(&self, f: &mut F) {
        self.visit_named_inner(false, f);
    }

    fn visit_named_inner<F: FnMut(&str, Namespace, bool)>(&self, indirect: bool, f: &mut F) {
        self.ret.visit_named_inner(indirect, f);
        for param in &self.params {
            param.ty.visit_named_inner(indirect, f);
        }
    }
}

/// Struct field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
    /// Note carried into the generated code (bitfield layout and similar)
    pub comment: Option<String>,
}

/// Struct body; `fields` is `None` for an opaque (forward-declared) struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub fields: Option<Vec<Field>>,
}

impl StructDef {
    pub fn is_opaque(&self) -> bool {
        self.fields.is_none()
    }
}

/// Enumerator with its value expression
///
/// Implicit values are normalized by the parser to `0` or `PREV + 1`, so the
/// token list is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariant {
    pub name: String,
    pub value: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub variants: Vec<EnumVariant>,
}

/// Declaration body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    Struct(StructDef),
    Enum(EnumDef),
    Function(FunctionSig),
    Typedef(TypeRef),
    /// Object-like macro or anonymous enumerator, with its raw body
    Constant(Vec<Token>),
    /// `extern` global variable
    Variable(TypeRef),
    /// Recognized but untranslatable construct, e.g. `union`
    Unsupported { construct: String },
}

impl DeclKind {
    pub fn label(&self) -> &'static str {
        match self {
            DeclKind::Struct(_) => "struct",
            DeclKind::Enum(_) => "enum",
            DeclKind::Function(_) => "function",
            DeclKind::Typedef(_) => "typedef",
            DeclKind::Constant(_) => "constant",
            DeclKind::Variable(_) => "variable",
            DeclKind::Unsupported { .. } => "unsupported",
        }
    }

    /// Structural equality that ignores token line numbers
    pub fn is_equivalent(&self, other: &DeclKind) -> bool {
        match (self, other) {
            (DeclKind::Constant(a), DeclKind::Constant(b)) => same_spelling(a, b),
            (DeclKind::Enum(a), DeclKind::Enum(b)) => {
                a.variants.len() == b.variants.len()
                    && a.variants.iter().zip(&b.variants).all(|(x, y)| {
                        x.name == y.name && same_spelling(&x.value, &y.value)
                    })
            }
            _ => self == other,
        }
    }

    /// Visit every named type reference in this declaration
    pub fn visit_named<F: FnMut(&str, Namespace, bool)>(&self, f: &mut F) {
        match self {
            DeclKind::Struct(def) => {
                for field in def.fields.iter().flatten() {
                    field.ty.visit_named(f);
                }
            }
            DeclKind::Function(sig) => sig.visit_named(f),
            DeclKind::Typedef(ty) | DeclKind::Variable(ty) => ty.visit_named(f),
            DeclKind::Enum(_) | DeclKind::Constant(_) | DeclKind::Unsupported { .. } => {}
        }
    }
}

/// One named C construct extracted from a header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub namespace: Namespace,
    /// Defining header
    pub header: PathBuf,
    pub location: Location,
    pub kind: DeclKind,
}

impl Declaration {
    pub fn key(&self) -> SymbolKey {
        SymbolKey {
            namespace: self.namespace,
            name: self.name.clone(),
        }
    }

    pub fn is_opaque_struct(&self) -> bool {
        matches!(&self.kind, DeclKind::Struct(def) if def.is_opaque())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_type_wrap() {
        assert_eq!(IntType::U32.wrap(-1), 0xFFFF_FFFF);
        assert_eq!(IntType::I32.wrap(0x8000_0000), -0x8000_0000);
        assert_eq!(IntType::I8.wrap(300), 44);
        assert!(IntType::I32.fits(15));
        assert!(!IntType::I32.fits(0x1_0000_0000));
    }

    #[test]
    fn test_visit_named_tracks_indirection() {
        let ty = TypeRef::Function(Box::new(FunctionSig {
            ret: TypeRef::named("RESULT", Namespace::Ordinary),
            params: vec![Param {
                name: Some("p".into()),
                ty: TypeRef::pointer(TypeRef::named("_NODE", Namespace::Tag), false),
            }],
            variadic: false,
            call_conv: CallConv::C,
        }));

        let mut seen = Vec::new();
        ty.visit_named(&mut |name, ns, indirect| seen.push((name.to_string(), ns, indirect)));
        assert_eq!(
            seen,
            vec![
                ("RESULT".to_string(), Namespace::Ordinary, false),
                ("_NODE".to_string(), Namespace::Tag, true),
            ]
        );
    }

    #[test]
    fn test_constant_equivalence_ignores_lines() {
        let a = DeclKind::Constant(vec![Token::number("4", 10)]);
        let b = DeclKind::Constant(vec![Token::number("4", 99)]);
        assert!(a.is_equivalent(&b));
        assert_ne!(a, b);
    }
}
