//! Module Emitter
//!
//! Renders the frozen symbol index as a Rust crate: one module per header
//! that owns declarations, an aggregator `lib.rs` shaped by the namespace
//! policy, and a manifest. Output depends only on the index and the
//! configuration, so identical inputs give byte-identical files.
//!
//! Constants are evaluated up front on one thread; modules are then rendered
//! on the rayon pool with their order preserved.

use crate::manifest::Manifest;
use crate::namespace::policy_for;
use crate::naming::{escape_ident, is_tag_alias, ModuleNames, NameTable};
use hdrbind_analysis::{ConstantEvaluator, Evaluation, TypeMapper, Unsupported};
use hdrbind_core::{
    ArchProfile, Config, DeclKind, Declaration, Diagnostic, DiagnosticKind, Diagnostics, EnumDef,
    Error, FunctionSig, IntType, Result, StructDef, Token,
};
use hdrbind_index::SymbolIndex;
use hdrbind_parser::decl::is_annotation_body;
use hdrbind_parser::preprocessor::MacroEnv;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lints the generated modules opt out of, since names follow the C headers
const MODULE_ALLOWS: &str =
    "#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals, dead_code)]";

/// One generated module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputModule {
    pub name: String,
    /// Header the module was generated from
    pub header: PathBuf,
    /// Number of Rust items emitted
    pub items: usize,
    pub source: String,
}

/// A complete generated crate
#[derive(Debug, Clone)]
pub struct EmittedCrate {
    /// Modules in header dependency order
    pub modules: Vec<OutputModule>,
    /// Contents of `src/lib.rs`
    pub aggregator: String,
    /// Contents of `Cargo.toml`
    pub manifest: String,
    pub diagnostics: Diagnostics,
}

impl EmittedCrate {
    pub fn module(&self, name: &str) -> Option<&OutputModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Write `Cargo.toml`, `src/lib.rs` and one `src/<module>.rs` per module
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let src = dir.join("src");
        fs::create_dir_all(&src).map_err(|e| Error::fatal_io(&src, e))?;

        write_file(&dir.join("Cargo.toml"), &self.manifest)?;
        write_file(&src.join("lib.rs"), &self.aggregator)?;
        for module in &self.modules {
            write_file(&src.join(format!("{}.rs", module.name)), &module.source)?;
        }

        info!(
            "Wrote {} modules to {}",
            self.modules.len(),
            dir.display()
        );
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| Error::fatal_io(path, e))
}

/// Renders a [`SymbolIndex`] into an [`EmittedCrate`]
pub struct Emitter<'a> {
    index: &'a SymbolIndex,
    profile: &'a ArchProfile,
    config: &'a Config,
    macros: Option<&'a MacroEnv>,
    entry: String,
}

impl<'a> Emitter<'a> {
    pub fn new(index: &'a SymbolIndex, profile: &'a ArchProfile, config: &'a Config) -> Self {
        Self {
            index,
            profile,
            config,
            macros: None,
            entry: "headers".to_string(),
        }
    }

    /// Final macro environment, used to expand constant bodies
    pub fn with_macros(mut self, macros: &'a MacroEnv) -> Self {
        self.macros = Some(macros);
        self
    }

    /// Entry header name shown in the crate docs
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn emit(&self) -> EmittedCrate {
        let mut module_names = ModuleNames::new();
        let jobs: Vec<(PathBuf, String)> = self
            .index
            .headers()
            .filter(|h| self.index.declarations_in(h).next().is_some())
            .map(|h| (h.to_path_buf(), module_names.assign(h)))
            .collect();

        let names = NameTable::build(self.index, &module_names);
        let (values, mut diagnostics) = self.evaluate_constants();
        let mapper = TypeMapper::new(self.profile, self.index, &names);

        let render = |(header, module): &(PathBuf, String)| {
            ModuleWriter {
                mapper: &mapper,
                names: &names,
                values: &values,
                module,
                diagnostics: Diagnostics::new(),
            }
            .render(self.index, header, self.profile.name())
        };
        let rendered: Vec<(OutputModule, Diagnostics)> = if self.config.emit.parallel {
            jobs.par_iter().map(render).collect()
        } else {
            jobs.iter().map(render).collect()
        };

        let mut modules = Vec::with_capacity(rendered.len());
        for (module, module_diagnostics) in rendered {
            diagnostics.extend(module_diagnostics);
            modules.push(module);
        }

        let aggregator = self.render_aggregator(&modules);
        let manifest = Manifest::new(&self.config.emit, &self.entry, self.profile.name()).render();

        info!(
            "Emitted {} modules ({} items)",
            modules.len(),
            modules.iter().map(|m| m.items).sum::<usize>()
        );

        EmittedCrate {
            modules,
            aggregator,
            manifest,
            diagnostics,
        }
    }

    /// Evaluate every constant and enumerator once, in header order
    fn evaluate_constants(&self) -> (HashMap<String, Evaluation>, Diagnostics) {
        let mut evaluator =
            ConstantEvaluator::new(self.index, self.profile, self.config.constants.default_int);
        if let Some(macros) = self.macros {
            evaluator = evaluator.with_macros(macros);
        }

        let mut values = HashMap::new();
        let mut diagnostics = Diagnostics::new();
        let mut evaluate = |name: &str, decl: &Declaration, diagnostics: &mut Diagnostics| {
            let result = evaluator.evaluate_symbol(name);
            if let Err(reason) = &result {
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::UnevaluatedConstant,
                        format!("{} not emitted: {}", name, reason),
                    )
                    .at(decl.location.clone())
                    .for_symbol(name),
                );
            }
            values.insert(name.to_string(), result);
        };

        for header in self.index.headers() {
            for decl in self.index.declarations_in(header) {
                match &decl.kind {
                    DeclKind::Constant(tokens) if self.is_annotation(tokens) => {
                        debug!("{} names an annotation, not a constant", decl.name);
                    }
                    DeclKind::Constant(_) => evaluate(&decl.name, decl, &mut diagnostics),
                    DeclKind::Enum(def) => {
                        for variant in &def.variants {
                            evaluate(&variant.name, decl, &mut diagnostics);
                        }
                    }
                    _ => {}
                }
            }
        }
        (values, diagnostics)
    }

    /// Macro body such as `WINAPI` that expands only to declaration keywords
    fn is_annotation(&self, tokens: &[Token]) -> bool {
        match self.macros {
            Some(env) => is_annotation_body(&env.expand(tokens).tokens, &self.config.parser),
            None => is_annotation_body(tokens, &self.config.parser),
        }
    }

    fn render_aggregator(&self, modules: &[OutputModule]) -> String {
        let policy = policy_for(self.config.emit.namespace);
        let names: Vec<String> = modules.iter().map(|m| m.name.clone()).collect();

        let mut out = format!(
            "//! Rust bindings for `{}`.\n\
             //!\n\
             //! Generated by hdrbind for {} with the {} namespace policy. Do not edit.\n",
            self.entry,
            self.profile.name(),
            policy.name()
        );
        let lines = policy.aggregate(&names);
        if !lines.is_empty() {
            out.push('\n');
        }
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// Smallest representation holding every enumerator value
pub fn enum_repr(values: &[i128]) -> IntType {
    [IntType::I32, IntType::U32, IntType::I64]
        .into_iter()
        .find(|ty| values.iter().all(|v| ty.fits(*v)))
        .unwrap_or(IntType::U64)
}

/// Renders the items of one header
struct ModuleWriter<'w> {
    mapper: &'w TypeMapper<'w>,
    names: &'w NameTable,
    values: &'w HashMap<String, Evaluation>,
    module: &'w str,
    diagnostics: Diagnostics,
}

impl ModuleWriter<'_> {
    fn render(mut self, index: &SymbolIndex, header: &Path, arch: &str) -> (OutputModule, Diagnostics) {
        let file_name = header
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut source = format!(
            "//! Bindings for `{}`.\n\
             //!\n\
             //! Generated by hdrbind for {}. Do not edit.\n\
             \n\
             {}\n",
            file_name, arch, MODULE_ALLOWS
        );

        let mut items = 0;
        for decl in index.declarations_in(header) {
            let (text, counted) = self.item(decl);
            if let Some(text) = text {
                source.push('\n');
                source.push_str(&text);
                if counted {
                    items += 1;
                }
            }
        }

        debug!("Rendered module {} ({} items)", self.module, items);
        let module = OutputModule {
            name: self.module.to_string(),
            header: header.to_path_buf(),
            items,
            source,
        };
        (module, self.diagnostics)
    }

    /// Text for one declaration and whether it is a real item
    fn item(&mut self, decl: &Declaration) -> (Option<String>, bool) {
        if let DeclKind::Unsupported { construct } = &decl.kind {
            return (
                Some(format!("// hdrbind: unsupported {} {}\n", construct, decl.name)),
                false,
            );
        }
        if is_tag_alias(&decl.name, &decl.kind) {
            return (None, false);
        }
        let Some(ident) = self.names.get(&decl.key()).map(|p| p.ident.clone()) else {
            return (None, false);
        };

        let rendered = match &decl.kind {
            DeclKind::Struct(def) => Ok(self.struct_item(decl, def, &ident)),
            DeclKind::Enum(def) => Ok(self.enum_item(def, &ident)),
            DeclKind::Typedef(target) => self
                .mapper
                .map_alias(target, self.module)
                .map(|ty| format!("pub type {} = {};\n", ident, ty)),
            DeclKind::Function(sig) => self.function_item(sig, &ident),
            DeclKind::Variable(ty) => self.mapper.map_type(ty, self.module).map(|ty| {
                format!("extern \"C\" {{\n    pub static mut {}: {};\n}}\n", ident, ty)
            }),
            DeclKind::Constant(_) => match self.values.get(&decl.name) {
                Some(Ok(value)) => Ok(format!(
                    "pub const {}: {} = {};\n",
                    ident,
                    value.ty,
                    value.literal()
                )),
                // Already reported by the evaluator
                _ => return (None, false),
            },
            DeclKind::Unsupported { .. } => return (None, false),
        };

        match rendered {
            Ok(text) => (Some(text), true),
            Err(Unsupported(reason)) => {
                self.unsupported(decl, &reason);
                let stub = format!(
                    "// hdrbind: {} {} omitted ({})\n",
                    decl.kind.label(),
                    decl.name,
                    reason
                );
                (Some(stub), false)
            }
        }
    }

    fn struct_item(&mut self, decl: &Declaration, def: &StructDef, ident: &str) -> String {
        let Some(fields) = &def.fields else {
            return format!("#[repr(C)]\npub struct {} {{\n    _opaque: [u8; 0],\n}}\n", ident);
        };

        let mut body = String::new();
        let mut omitted = String::new();
        for field in fields {
            match self.mapper.map_type(&field.ty, self.module) {
                Ok(ty) => {
                    if let Some(comment) = &field.comment {
                        body.push_str(&format!("    /// {}\n", comment));
                    }
                    body.push_str(&format!("    pub {}: {},\n", escape_ident(&field.name), ty));
                }
                Err(Unsupported(reason)) => {
                    self.unsupported(decl, &format!("field {}: {}", field.name, reason));
                    omitted.push_str(&format!(
                        "    // hdrbind: field {} omitted ({})\n",
                        field.name, reason
                    ));
                }
            }
        }

        // missing fields leave the layout unknown
        if !omitted.is_empty() {
            return format!(
                "/// Incomplete layout: fields with unsupported types, emitted opaque.\n\
                 #[repr(C)]\npub struct {} {{\n    _opaque: [u8; 0],\n{}}}\n",
                ident, omitted
            );
        }
        format!(
            "#[repr(C)]\n#[derive(Clone, Copy)]\npub struct {} {{\n{}}}\n",
            ident, body
        )
    }

    fn enum_item(&self, def: &EnumDef, ident: &str) -> String {
        let mut consts = Vec::new();
        let mut skipped = Vec::new();
        for variant in &def.variants {
            match self.values.get(&variant.name) {
                Some(Ok(value)) => consts.push((escape_ident(&variant.name), value.value)),
                Some(Err(reason)) => skipped.push(format!(
                    "    // hdrbind: {} not evaluated ({})\n",
                    variant.name, reason
                )),
                None => skipped.push(format!("    // hdrbind: {} not evaluated\n", variant.name)),
            }
        }

        let values: Vec<i128> = consts.iter().map(|(_, v)| *v).collect();
        let repr = enum_repr(&values);
        let mut out = format!(
            "#[repr(transparent)]\n\
             #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]\n\
             pub struct {}(pub {});\n",
            ident, repr
        );
        if consts.is_empty() && skipped.is_empty() {
            return out;
        }

        out.push_str(&format!("\nimpl {} {{\n", ident));
        for (name, value) in &consts {
            out.push_str(&format!("    pub const {}: Self = Self({});\n", name, value));
        }
        for line in &skipped {
            out.push_str(line);
        }
        out.push_str("}\n");
        out
    }

    fn function_item(&self, sig: &FunctionSig, ident: &str) -> std::result::Result<String, Unsupported> {
        let types = self.mapper.map_params(sig, self.module)?;
        let ret = self.mapper.map_return(&sig.ret, self.module)?;

        let mut params: Vec<String> = sig
            .params
            .iter()
            .zip(types)
            .enumerate()
            .map(|(i, (param, ty))| {
                let name = param
                    .name
                    .as_deref()
                    .map(escape_ident)
                    .unwrap_or_else(|| format!("arg{}", i));
                format!("{}: {}", name, ty)
            })
            .collect();
        if sig.variadic {
            params.push("...".to_string());
        }
        let ret = ret.map(|r| format!(" -> {}", r)).unwrap_or_default();

        Ok(format!(
            "extern \"{}\" {{\n    pub fn {}({}){};\n}}\n",
            self.mapper.abi(sig),
            ident,
            params.join(", "),
            ret
        ))
    }

    fn unsupported(&mut self, decl: &Declaration, reason: &str) {
        self.diagnostics.push(
            Diagnostic::warning(
                DiagnosticKind::UnsupportedType,
                format!("{} {}: {}", decl.kind.label(), decl.name, reason),
            )
            .at(decl.location.clone())
            .for_symbol(decl.name.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdrbind_core::config::DuplicatePolicy;
    use hdrbind_core::{
        CallConv, EnumVariant, Field, Location, Namespace, Param, Primitive, Token, TypeRef,
    };
    use hdrbind_index::SymbolTable;
    use pretty_assertions::assert_eq;

    const HEADER: &str = "/sdk/winbase.h";

    fn decl(name: &str, namespace: Namespace, kind: DeclKind) -> Declaration {
        Declaration {
            name: name.to_string(),
            namespace,
            header: PathBuf::from(HEADER),
            location: Location::new(HEADER, 1),
            kind,
        }
    }

    fn number(raw: &str) -> Vec<Token> {
        vec![Token::number(raw, 1)]
    }

    fn emit(decls: Vec<Declaration>, config: &Config) -> EmittedCrate {
        let mut table = SymbolTable::new(config.symbols.duplicate_policy);
        for d in decls {
            table.insert(d).unwrap();
        }
        let index = table.finalize();
        let profile = config.profile().unwrap();
        Emitter::new(&index, &profile, config)
            .with_entry("winbase.h")
            .emit()
    }

    #[test]
    fn test_enum_repr_widening() {
        assert_eq!(enum_repr(&[0, 1, -1]), IntType::I32);
        assert_eq!(enum_repr(&[0, 0xFFFF_FFFF]), IntType::U32);
        assert_eq!(enum_repr(&[-1, 0xFFFF_FFFF]), IntType::I64);
        assert_eq!(enum_repr(&[u64::MAX as i128]), IntType::U64);
        assert_eq!(enum_repr(&[]), IntType::I32);
    }

    #[test]
    fn test_module_items() {
        let config = Config::default();
        let decls = vec![
            decl("MAX_PATH", Namespace::Ordinary, DeclKind::Constant(number("260"))),
            decl(
                "_POINT",
                Namespace::Tag,
                DeclKind::Struct(StructDef {
                    fields: Some(vec![
                        Field {
                            name: "x".into(),
                            ty: TypeRef::Primitive(Primitive::Long),
                            comment: None,
                        },
                        Field {
                            name: "type".into(),
                            ty: TypeRef::Primitive(Primitive::Long),
                            comment: None,
                        },
                    ]),
                }),
            ),
            decl(
                "POINT",
                Namespace::Ordinary,
                DeclKind::Typedef(TypeRef::named("_POINT", Namespace::Tag)),
            ),
            decl("_HKEY", Namespace::Tag, DeclKind::Struct(StructDef { fields: None })),
            decl(
                "_MODE",
                Namespace::Tag,
                DeclKind::Enum(EnumDef {
                    variants: vec![
                        EnumVariant {
                            name: "MODE_READ".into(),
                            value: number("1"),
                        },
                        EnumVariant {
                            name: "MODE_ALL".into(),
                            value: number("0xFFFFFFFF"),
                        },
                    ],
                }),
            ),
            decl(
                "Sleep",
                Namespace::Ordinary,
                DeclKind::Function(FunctionSig {
                    ret: TypeRef::Void,
                    params: vec![Param {
                        name: Some("dwMilliseconds".into()),
                        ty: TypeRef::Primitive(Primitive::ULong),
                    }],
                    variadic: false,
                    call_conv: CallConv::Stdcall,
                }),
            ),
            decl(
                "g_count",
                Namespace::Ordinary,
                DeclKind::Variable(TypeRef::Primitive(Primitive::Int)),
            ),
        ];

        let krate = emit(decls, &config);
        assert_eq!(krate.modules.len(), 1);
        let module = &krate.modules[0];
        assert_eq!(module.name, "winbase");
        assert_eq!(module.items, 7);
        assert_eq!(
            module.source,
            "//! Bindings for `winbase.h`.
//!
//! Generated by hdrbind for x86-64. Do not edit.

#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals, dead_code)]

pub const MAX_PATH: i32 = 260;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct _POINT {
    pub x: i32,
    pub r#type: i32,
}

pub type POINT = _POINT;

#[repr(C)]
pub struct _HKEY {
    _opaque: [u8; 0],
}

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct _MODE(pub u32);

impl _MODE {
    pub const MODE_READ: Self = Self(1);
    pub const MODE_ALL: Self = Self(4294967295);
}

extern \"system\" {
    pub fn Sleep(dwMilliseconds: u32);
}

extern \"C\" {
    pub static mut g_count: i32;
}
"
        );
        assert!(krate.diagnostics.is_empty());
    }

    #[test]
    fn test_unsupported_constructs_are_visible() {
        let config = Config::default();
        let decls = vec![
            decl(
                "_LARGE_INTEGER",
                Namespace::Tag,
                DeclKind::Unsupported {
                    construct: "union".into(),
                },
            ),
            decl(
                "_FILE_INFO",
                Namespace::Tag,
                DeclKind::Struct(StructDef {
                    fields: Some(vec![
                        Field {
                            name: "Size".into(),
                            ty: TypeRef::named("_LARGE_INTEGER", Namespace::Tag),
                            comment: None,
                        },
                        Field {
                            name: "Flags".into(),
                            ty: TypeRef::Primitive(Primitive::UInt),
                            comment: Some("bitfield a:3, b:5".into()),
                        },
                    ]),
                }),
            ),
            decl(
                "GetFileSizeEx",
                Namespace::Ordinary,
                DeclKind::Function(FunctionSig {
                    ret: TypeRef::Primitive(Primitive::Int),
                    params: vec![Param {
                        name: None,
                        ty: TypeRef::named("_LARGE_INTEGER", Namespace::Tag),
                    }],
                    variadic: false,
                    call_conv: CallConv::C,
                }),
            ),
            decl(
                "BAD_CONST",
                Namespace::Ordinary,
                DeclKind::Constant(vec![Token::new(
                    hdrbind_core::TokenKind::Str("\"text\"".into()),
                    1,
                )]),
            ),
        ];

        let krate = emit(decls, &config);
        let source = &krate.modules[0].source;
        assert!(source.contains("// hdrbind: unsupported union _LARGE_INTEGER\n"));
        assert!(source.contains("/// Incomplete layout"));
        assert!(source.contains("    // hdrbind: field Size omitted (union _LARGE_INTEGER)\n"));
        assert!(source.contains(
            "#[repr(C)]\npub struct _FILE_INFO {\n    _opaque: [u8; 0],\n    // hdrbind: field Size omitted"
        ));
        assert!(!source.contains("pub Flags"));
        assert!(!source.contains("#[derive(Clone, Copy)]\npub struct _FILE_INFO"));
        assert!(source.contains("// hdrbind: function GetFileSizeEx omitted (union _LARGE_INTEGER)\n"));
        assert!(!source.contains("BAD_CONST"));
        assert_eq!(krate.modules[0].items, 1);

        assert_eq!(krate.diagnostics.count(DiagnosticKind::UnsupportedType), 2);
        assert_eq!(krate.diagnostics.count(DiagnosticKind::UnevaluatedConstant), 1);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let decls = || {
            (0..20)
                .map(|i| {
                    let mut d = decl(
                        &format!("VALUE_{}", i),
                        Namespace::Ordinary,
                        DeclKind::Constant(number(&i.to_string())),
                    );
                    d.header = PathBuf::from(format!("/sdk/h{}.h", i % 5));
                    d
                })
                .collect::<Vec<_>>()
        };

        let parallel = emit(decls(), &Config::default());
        let mut config = Config::default();
        config.emit.parallel = false;
        let sequential = emit(decls(), &config);

        assert_eq!(parallel.modules, sequential.modules);
        assert_eq!(parallel.aggregator, sequential.aggregator);
        let names: Vec<_> = parallel.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["h0", "h1", "h2", "h3", "h4"]);
    }
}
