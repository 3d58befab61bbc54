//! Type Mapper
//!
//! Spells C types from the declaration model as Rust types for one
//! architecture profile. Named types are checked against the frozen symbol
//! index and spelled through a [`NameResolver`], which the emitter implements
//! because it owns identifier and module naming.
//!
//! Anything without a faithful Rust rendering becomes [`Unsupported`]. Behind
//! a pointer such a type degrades to `c_void`; by value the caller decides how
//! to surface it.

use hdrbind_core::{
    ArchProfile, Architecture, CallConv, DeclKind, FunctionSig, IntType, Namespace, Primitive,
    TypeRef,
};
use hdrbind_index::SymbolIndex;
use thiserror::Error;

/// Rust spelling of `void` behind a pointer
pub const C_VOID: &str = "::core::ffi::c_void";

/// Nesting deeper than this is treated as a typedef cycle
const MAX_DEPTH: usize = 64;

/// A type with no Rust rendering
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported type: {0}")]
pub struct Unsupported(pub String);

/// Emitted name of a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPath {
    pub ident: String,
    /// Module that defines the item
    pub module: String,
}

/// Names emitted items
pub trait NameResolver: Sync {
    /// Identifier and owning module of a symbol, or `None` when nothing is
    /// emitted for it
    fn item_path(&self, name: &str, namespace: Namespace) -> Option<ItemPath>;
}

/// Integer type of an integral primitive under a profile
pub fn integer_type(profile: &ArchProfile, prim: Primitive) -> Option<IntType> {
    let ty = match prim {
        Primitive::Bool | Primitive::UChar | Primitive::UInt8 => IntType::U8,
        Primitive::Char | Primitive::SChar | Primitive::Int8 => IntType::I8,
        Primitive::Short | Primitive::Int16 => IntType::I16,
        Primitive::UShort | Primitive::UInt16 | Primitive::Char16 => IntType::U16,
        Primitive::Int | Primitive::Int32 => IntType::I32,
        Primitive::UInt | Primitive::UInt32 | Primitive::Char32 => IntType::U32,
        Primitive::Long => IntType::from_width(profile.long_width, true),
        Primitive::ULong => IntType::from_width(profile.long_width, false),
        Primitive::LongLong | Primitive::Int64 => IntType::I64,
        Primitive::ULongLong | Primitive::UInt64 => IntType::U64,
        Primitive::SizeT | Primitive::UIntPtr => IntType::from_width(profile.pointer_width, false),
        Primitive::SSizeT | Primitive::PtrDiff | Primitive::IntPtr => {
            IntType::from_width(profile.pointer_width, true)
        }
        Primitive::WChar => match profile.wchar {
            Primitive::WChar => IntType::U16,
            other => return integer_type(profile, other),
        },
        Primitive::Float | Primitive::Double | Primitive::LongDouble => return None,
    };
    Some(ty)
}

/// Maps types for one profile
pub struct TypeMapper<'a> {
    profile: &'a ArchProfile,
    index: &'a SymbolIndex,
    names: &'a dyn NameResolver,
}

impl<'a> TypeMapper<'a> {
    pub fn new(profile: &'a ArchProfile, index: &'a SymbolIndex, names: &'a dyn NameResolver) -> Self {
        Self {
            profile,
            index,
            names,
        }
    }

    pub fn profile(&self) -> &ArchProfile {
        self.profile
    }

    /// Rust spelling of a value type as seen from `module`
    pub fn map_type(&self, ty: &TypeRef, module: &str) -> Result<String, Unsupported> {
        self.map_value(ty, module, 0)
    }

    /// Return type of a function; `None` for `void` or an alias of it
    pub fn map_return(&self, ty: &TypeRef, module: &str) -> Result<Option<String>, Unsupported> {
        if self.is_void(ty) {
            return Ok(None);
        }
        self.map_value(ty, module, 0).map(Some)
    }

    /// Right-hand side of `pub type NAME = ...;`. An alias of `void` names `c_void`.
    pub fn map_alias(&self, target: &TypeRef, module: &str) -> Result<String, Unsupported> {
        if self.is_void(target) {
            return Ok(C_VOID.to_string());
        }
        self.map_value(target, module, 0)
    }

    fn is_void(&self, ty: &TypeRef) -> bool {
        matches!(self.index.resolve_alias(ty), TypeRef::Void)
    }

    /// Parameter types of a signature, in order
    pub fn map_params(&self, sig: &FunctionSig, module: &str) -> Result<Vec<String>, Unsupported> {
        sig.params
            .iter()
            .map(|p| self.map_value(&p.ty, module, 0))
            .collect()
    }

    /// ABI string for `extern` blocks and function pointer types
    pub fn abi(&self, sig: &FunctionSig) -> &'static str {
        if sig.variadic {
            return "C";
        }
        match sig.call_conv {
            CallConv::C => "C",
            CallConv::Stdcall => "system",
            CallConv::Fastcall if self.profile.arch == Architecture::X86 => "fastcall",
            CallConv::Fastcall => "system",
        }
    }

    pub fn map_primitive(&self, prim: Primitive) -> Result<&'static str, Unsupported> {
        let name = match prim {
            Primitive::Bool => "bool",
            Primitive::Float => "f32",
            Primitive::Double => "f64",
            Primitive::LongDouble => match self.profile.long_double_width {
                Some(64) => "f64",
                _ => return Err(Unsupported("long double".to_string())),
            },
            Primitive::SizeT | Primitive::UIntPtr => "usize",
            Primitive::SSizeT | Primitive::PtrDiff | Primitive::IntPtr => "isize",
            other => match integer_type(self.profile, other) {
                Some(ty) => ty.rust_name(),
                None => return Err(Unsupported(format!("{:?}", other))),
            },
        };
        Ok(name)
    }

    fn map_value(&self, ty: &TypeRef, module: &str, depth: usize) -> Result<String, Unsupported> {
        if depth > MAX_DEPTH {
            return Err(Unsupported("cyclic type".to_string()));
        }
        match ty {
            TypeRef::Void => Err(Unsupported("void value".to_string())),
            TypeRef::Primitive(prim) => self.map_primitive(*prim).map(str::to_string),
            TypeRef::Pointer { pointee, is_const } => {
                Ok(self.map_pointer(pointee, *is_const, module, depth))
            }
            TypeRef::Array { element, len } => {
                let element = self.map_value(element, module, depth + 1)?;
                Ok(format!("[{}; {}]", element, len.unwrap_or(0)))
            }
            TypeRef::Function(sig) => self.map_fn_pointer(sig, module, depth + 1),
            TypeRef::Named { name, namespace } => self.map_named(name, *namespace, module, depth),
            TypeRef::Unsupported(what) => Err(Unsupported(what.clone())),
        }
    }

    /// Pointers never fail: an unmappable pointee becomes `c_void`
    fn map_pointer(&self, pointee: &TypeRef, is_const: bool, module: &str, depth: usize) -> String {
        if let TypeRef::Function(sig) = self.index.resolve_alias(pointee) {
            if let Ok(fn_ptr) = self.map_fn_pointer(sig, module, depth + 1) {
                return fn_ptr;
            }
        }

        let target = match pointee {
            _ if self.is_void(pointee) => C_VOID.to_string(),
            other => self
                .map_value(other, module, depth + 1)
                .unwrap_or_else(|_| C_VOID.to_string()),
        };
        let mutability = if is_const { "*const" } else { "*mut" };
        format!("{} {}", mutability, target)
    }

    fn map_fn_pointer(&self, sig: &FunctionSig, module: &str, depth: usize) -> Result<String, Unsupported> {
        let mut params = sig
            .params
            .iter()
            .map(|p| self.map_value(&p.ty, module, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        if sig.variadic {
            params.push("...".to_string());
        }

        let ret = if self.is_void(&sig.ret) {
            String::new()
        } else {
            format!(" -> {}", self.map_value(&sig.ret, module, depth + 1)?)
        };

        Ok(format!(
            "Option<unsafe extern \"{}\" fn({}){}>",
            self.abi(sig),
            params.join(", "),
            ret
        ))
    }

    fn map_named(&self, name: &str, namespace: Namespace, module: &str, depth: usize) -> Result<String, Unsupported> {
        let decl = self
            .index
            .lookup(name, namespace)
            .ok_or_else(|| Unsupported(format!("unknown type `{}`", name)))?;

        match &decl.kind {
            DeclKind::Struct(_) | DeclKind::Enum(_) => {}
            // An alias is only usable when its target is
            DeclKind::Typedef(target) => {
                self.map_value(target, module, depth + 1)?;
            }
            DeclKind::Unsupported { construct } => {
                return Err(Unsupported(format!("{} {}", construct, name)))
            }
            other => {
                return Err(Unsupported(format!(
                    "`{}` is a {}, not a type",
                    name,
                    other.label()
                )))
            }
        }

        let path = self
            .names
            .item_path(name, namespace)
            .ok_or_else(|| Unsupported(format!("`{}` is not emitted", name)))?;
        Ok(qualify(&path, module))
    }
}

/// Path of an item as written from inside `module`
pub fn qualify(path: &ItemPath, module: &str) -> String {
    if path.module == module {
        path.ident.clone()
    } else {
        format!("super::{}::{}", path.module, path.ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdrbind_core::config::DuplicatePolicy;
    use hdrbind_core::{Declaration, Location, Param, StructDef};
    use hdrbind_index::SymbolTable;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};

    /// Every symbol is emitted under its own name in its header's stem
    struct StemNames<'a>(&'a SymbolIndex);

    impl NameResolver for StemNames<'_> {
        fn item_path(&self, name: &str, namespace: Namespace) -> Option<ItemPath> {
            let decl = self.0.lookup(name, namespace)?;
            let module = Path::new(&decl.header).file_stem()?.to_str()?.to_string();
            Some(ItemPath {
                ident: name.to_string(),
                module,
            })
        }
    }

    fn decl(name: &str, namespace: Namespace, header: &str, kind: DeclKind) -> Declaration {
        Declaration {
            name: name.to_string(),
            namespace,
            header: PathBuf::from(header),
            location: Location::new(header, 1),
            kind,
        }
    }

    fn index() -> SymbolIndex {
        let mut table = SymbolTable::new(DuplicatePolicy::FirstWins);
        let decls = vec![
            decl(
                "DWORD",
                Namespace::Ordinary,
                "minwindef.h",
                DeclKind::Typedef(TypeRef::Primitive(Primitive::ULong)),
            ),
            decl(
                "_POINT",
                Namespace::Tag,
                "windef.h",
                DeclKind::Struct(StructDef { fields: Some(vec![]) }),
            ),
            decl(
                "_LARGE_INTEGER",
                Namespace::Tag,
                "winnt.h",
                DeclKind::Unsupported {
                    construct: "union".to_string(),
                },
            ),
            decl(
                "LARGE_INTEGER",
                Namespace::Ordinary,
                "winnt.h",
                DeclKind::Typedef(TypeRef::named("_LARGE_INTEGER", Namespace::Tag)),
            ),
            decl(
                "VOID",
                Namespace::Ordinary,
                "winnt.h",
                DeclKind::Typedef(TypeRef::Void),
            ),
            decl(
                "TIMERPROC",
                Namespace::Ordinary,
                "winuser.h",
                DeclKind::Typedef(TypeRef::Function(Box::new(FunctionSig {
                    ret: TypeRef::Void,
                    params: vec![Param {
                        name: None,
                        ty: TypeRef::named("DWORD", Namespace::Ordinary),
                    }],
                    variadic: false,
                    call_conv: CallConv::Stdcall,
                }))),
            ),
        ];
        for d in decls {
            table.insert(d).unwrap();
        }
        table.finalize()
    }

    fn map(arch: Architecture, ty: &TypeRef, module: &str) -> Result<String, Unsupported> {
        let index = index();
        let names = StemNames(&index);
        let profile = arch.profile();
        let mapper = TypeMapper::new(&profile, &index, &names);
        mapper.map_type(ty, module)
    }

    #[test]
    fn test_long_width_follows_profile() {
        let long = TypeRef::Primitive(Primitive::Long);
        let int32 = TypeRef::Primitive(Primitive::Int32);

        assert_eq!(map(Architecture::X86_64, &long, "m").unwrap(), "i32");
        assert_eq!(map(Architecture::X86_64Gnu, &long, "m").unwrap(), "i64");
        assert_eq!(map(Architecture::X86_64, &int32, "m").unwrap(), "i32");
        assert_eq!(map(Architecture::X86_64Gnu, &int32, "m").unwrap(), "i32");
    }

    #[test]
    fn test_platform_dependent_primitives() {
        let wchar = TypeRef::Primitive(Primitive::WChar);
        assert_eq!(map(Architecture::X86_64, &wchar, "m").unwrap(), "u16");
        assert_eq!(map(Architecture::X86_64Gnu, &wchar, "m").unwrap(), "i32");

        let long_double = TypeRef::Primitive(Primitive::LongDouble);
        assert_eq!(map(Architecture::X86, &long_double, "m").unwrap(), "f64");
        assert!(map(Architecture::X86_64Gnu, &long_double, "m").is_err());

        let size = TypeRef::Primitive(Primitive::SizeT);
        assert_eq!(map(Architecture::X86, &size, "m").unwrap(), "usize");
    }

    #[test]
    fn test_pointers_and_arrays() {
        let lpcstr = TypeRef::pointer(TypeRef::Primitive(Primitive::Char), true);
        assert_eq!(map(Architecture::X86_64, &lpcstr, "m").unwrap(), "*const i8");

        let handle = TypeRef::pointer(TypeRef::Void, false);
        assert_eq!(
            map(Architecture::X86_64, &handle, "m").unwrap(),
            "*mut ::core::ffi::c_void"
        );

        let flexible = TypeRef::Array {
            element: Box::new(TypeRef::Primitive(Primitive::UChar)),
            len: None,
        };
        assert_eq!(map(Architecture::X86_64, &flexible, "m").unwrap(), "[u8; 0]");

        assert!(map(Architecture::X86_64, &TypeRef::Void, "m").is_err());
    }

    #[test]
    fn test_named_types_qualified_across_modules() {
        let dword = TypeRef::named("DWORD", Namespace::Ordinary);
        assert_eq!(map(Architecture::X86_64, &dword, "minwindef").unwrap(), "DWORD");
        assert_eq!(
            map(Architecture::X86_64, &dword, "fileapi").unwrap(),
            "super::minwindef::DWORD"
        );

        let point = TypeRef::named("_POINT", Namespace::Tag);
        assert_eq!(map(Architecture::X86_64, &point, "windef").unwrap(), "_POINT");
    }

    #[test]
    fn test_unions_degrade_behind_pointer() {
        let by_value = TypeRef::named("LARGE_INTEGER", Namespace::Ordinary);
        let err = map(Architecture::X86_64, &by_value, "winnt").unwrap_err();
        assert_eq!(err.0, "union _LARGE_INTEGER");

        let pointer = TypeRef::pointer(by_value, false);
        assert_eq!(
            map(Architecture::X86_64, &pointer, "winnt").unwrap(),
            "*mut ::core::ffi::c_void"
        );

        let unknown = TypeRef::named("NOT_DECLARED", Namespace::Ordinary);
        assert!(map(Architecture::X86_64, &unknown, "m").is_err());

        let void_alias = TypeRef::pointer(TypeRef::named("VOID", Namespace::Ordinary), false);
        assert_eq!(
            map(Architecture::X86_64, &void_alias, "m").unwrap(),
            "*mut ::core::ffi::c_void"
        );
    }

    #[test]
    fn test_void_alias_returns_nothing() {
        let index = index();
        let names = StemNames(&index);
        let profile = Architecture::X86_64.profile();
        let mapper = TypeMapper::new(&profile, &index, &names);
        let void_alias = TypeRef::named("VOID", Namespace::Ordinary);

        assert_eq!(mapper.map_return(&void_alias, "winbase").unwrap(), None);
        assert_eq!(mapper.map_alias(&TypeRef::Void, "winnt").unwrap(), C_VOID);
        assert!(mapper.map_type(&void_alias, "winbase").is_err());

        let callback = TypeRef::pointer(
            TypeRef::Function(Box::new(FunctionSig {
                ret: void_alias,
                params: vec![],
                variadic: false,
                call_conv: CallConv::C,
            })),
            false,
        );
        assert_eq!(
            mapper.map_type(&callback, "winbase").unwrap(),
            "Option<unsafe extern \"C\" fn()>"
        );
    }

    #[test]
    fn test_function_pointers() {
        let sig = FunctionSig {
            ret: TypeRef::Primitive(Primitive::Int),
            params: vec![Param {
                name: Some("format".into()),
                ty: TypeRef::pointer(TypeRef::Primitive(Primitive::Char), true),
            }],
            variadic: true,
            call_conv: CallConv::Stdcall,
        };
        let printf = TypeRef::pointer(TypeRef::Function(Box::new(sig)), false);
        assert_eq!(
            map(Architecture::X86_64, &printf, "m").unwrap(),
            "Option<unsafe extern \"C\" fn(*const i8, ...) -> i32>"
        );

        // Pointer to a typedef of a function type
        let timer = TypeRef::pointer(TypeRef::named("TIMERPROC", Namespace::Ordinary), false);
        assert_eq!(
            map(Architecture::X86_64, &timer, "winuser").unwrap(),
            "Option<unsafe extern \"system\" fn(super::minwindef::DWORD)>"
        );
    }
}
