//! Declaration Parser
//!
//! Parses the declaration subset of C that appears in preprocessed headers:
//! typedefs, struct, union and enum definitions, function prototypes and
//! extern variables. The expanded tokens are first cleaned of annotations
//! and calling conventions, rendered back to text and parsed with
//! tree-sitter-c. The syntax tree is then walked into `Declaration`s.
//!
//! Inline function bodies are skipped. A statement tree-sitter could not
//! parse is skipped and reported as malformed; complete statements inside
//! an error region are still read.
//!
//! Tag definitions are reported in the tag namespace. An anonymous struct or
//! enum given a name by `typedef` is reported under that name in the
//! ordinary namespace, without a separate typedef.

use crate::expr::{eval_condition, parse_expr, Expr};
use crate::ParseResult;
use hdrbind_core::config::ParserConfig;
use hdrbind_core::token::spell_tokens;
use hdrbind_core::{
    CallConv, DeclKind, Declaration, Diagnostic, DiagnosticKind, Diagnostics, EnumDef,
    EnumVariant, Field, FunctionSig, Location, Namespace, Param, Primitive, StructDef, Token,
    TokenKind, TypeRef,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser as TSParser, Tree};

/// SAL annotations such as `_In_`, `_Out_writes_(n)`, `_Success_(expr)`
static SAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^_[A-Z][A-Za-z0-9_]*_$").expect("SAL regex is valid"));

/// Words followed by a parenthesized group that carries no type information
const ATTRIBUTE_WORDS: &[&str] = &[
    "__declspec", "__attribute__", "__pragma", "_Pragma", "__asm", "__asm__", "alignas",
    "_Alignas",
];

const INLINE_WORDS: &[&str] = &["inline", "__inline", "_inline", "__inline__"];

const PRIMITIVE_WORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "__signed",
    "_Bool", "__int8", "__int16", "__int32", "__int64",
];

/// Words left in a declaration that name no type
const QUALIFIER_WORDS: &[&str] = &[
    "const", "volatile", "restrict", "inline", "extern", "static", "register",
];

const STATIC_ASSERT_WORDS: &[&str] = &["_Static_assert", "static_assert"];

fn call_conv(word: &str) -> Option<CallConv> {
    match word {
        "__stdcall" | "_stdcall" => Some(CallConv::Stdcall),
        "__fastcall" | "_fastcall" => Some(CallConv::Fastcall),
        "__cdecl" | "_cdecl" | "__vectorcall" | "__thiscall" | "__clrcall" => Some(CallConv::C),
        _ => None,
    }
}

#[derive(Debug, Error)]
enum DeclError {
    #[error("syntax error in `{0}`")]
    Syntax(String),

    #[error("{0}")]
    Invalid(String),
}

type PResult<T> = std::result::Result<T, DeclError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    None,
    Typedef,
    Extern,
    Static,
}

/// A tagged type defined without a tag
#[derive(Debug)]
enum AnonBody {
    Struct(Vec<Field>),
    Enum(Vec<EnumVariant>),
    Union,
}

/// Declaration specifiers of one statement, field or parameter
#[derive(Debug)]
struct DeclSpec {
    storage: Storage,
    base: Option<TypeRef>,
    is_const: bool,
    inline: bool,
    /// Calling convention written among the specifiers, used by the first function
    call_conv: Option<CallConv>,
    /// Anonymous body still waiting for a name
    anon: Option<AnonBody>,
    /// The base is an anonymous member type defined in place
    anonymous_member: bool,
    line: u32,
}

/// Consecutive bitfields sharing one storage unit
#[derive(Debug, Default)]
struct BitfieldRun {
    ty: Option<TypeRef>,
    capacity: u32,
    used: u32,
    members: Vec<String>,
    count: usize,
}

impl BitfieldRun {
    fn add(&mut self, name: Option<&str>, ty: TypeRef, width: u32, fields: &mut Vec<Field>) {
        if width == 0 {
            self.flush(fields);
            return;
        }
        let fits = self.ty.as_ref() == Some(&ty) && self.used + width <= self.capacity;
        if !fits {
            self.flush(fields);
            self.capacity = storage_bits(&ty);
            self.ty = Some(ty);
        }
        self.used += width;
        self.members
            .push(format!("{}:{}", name.unwrap_or("_"), width));
    }

    fn flush(&mut self, fields: &mut Vec<Field>) {
        if let Some(ty) = self.ty.take() {
            self.count += 1;
            fields.push(Field {
                name: format!("_bitfield_{}", self.count),
                ty,
                comment: Some(format!("bitfield {}", self.members.join(", "))),
            });
            self.members.clear();
            self.used = 0;
        }
    }
}

/// Storage unit size of a bitfield's declared type; typedef names count as 32 bits
fn storage_bits(ty: &TypeRef) -> u32 {
    match ty {
        TypeRef::Primitive(p) => match p {
            Primitive::Bool
            | Primitive::Char
            | Primitive::SChar
            | Primitive::UChar
            | Primitive::Int8
            | Primitive::UInt8 => 8,
            Primitive::Short | Primitive::UShort | Primitive::Int16 | Primitive::UInt16 => 16,
            Primitive::LongLong | Primitive::ULongLong | Primitive::Int64 | Primitive::UInt64 => 64,
            _ => 32,
        },
        _ => 32,
    }
}
/// Combine primitive type words such as `unsigned long long`
fn combine_primitive(words: &[&str]) -> PResult<TypeRef> {
    let has = |w: &str| words.contains(&w);
    let longs = words.iter().filter(|w| **w == "long").count();
    let unsigned = has("unsigned");
    let signed = has("signed") || has("__signed");

    if has("void") {
        return Ok(TypeRef::Void);
    }
    let prim = if has("_Bool") {
        Primitive::Bool
    } else if has("float") {
        Primitive::Float
    } else if has("double") {
        if longs > 0 {
            Primitive::LongDouble
        } else {
            Primitive::Double
        }
    } else if has("char") {
        if unsigned {
            Primitive::UChar
        } else if signed {
            Primitive::SChar
        } else {
            Primitive::Char
        }
    } else if has("__int8") {
        if unsigned { Primitive::UInt8 } else { Primitive::Int8 }
    } else if has("__int16") {
        if unsigned { Primitive::UInt16 } else { Primitive::Int16 }
    } else if has("__int32") {
        if unsigned { Primitive::UInt32 } else { Primitive::Int32 }
    } else if has("__int64") {
        if unsigned { Primitive::UInt64 } else { Primitive::Int64 }
    } else if has("short") {
        if unsigned { Primitive::UShort } else { Primitive::Short }
    } else if longs >= 2 {
        if unsigned { Primitive::ULongLong } else { Primitive::LongLong }
    } else if longs == 1 {
        if unsigned { Primitive::ULong } else { Primitive::Long }
    } else if has("int") || unsigned || signed {
        if unsigned { Primitive::UInt } else { Primitive::Int }
    } else {
        return Err(DeclError::Invalid(format!(
            "invalid type `{}`",
            words.join(" ")
        )));
    };
    Ok(TypeRef::Primitive(prim))
}

/// Type named by primitive keywords, e.g. `unsigned long`; `None` if invalid
pub fn primitive_type(words: &[&str]) -> Option<TypeRef> {
    combine_primitive(words).ok()
}

/// Value of an integer expression made only of literals
fn literal_value(tokens: &[Token]) -> Option<i64> {
    fn has_names(expr: &Expr) -> bool {
        match expr {
            Expr::Number(_) | Expr::Char(_) => false,
            Expr::Ident(_) | Expr::Cast(..) => true,
            Expr::Unary(_, inner) => has_names(inner),
            Expr::Binary(_, lhs, rhs) => has_names(lhs) || has_names(rhs),
            Expr::Ternary(c, a, b) => has_names(c) || has_names(a) || has_names(b),
        }
    }

    let expr = parse_expr(tokens, &|_: &str| false).ok()?;
    if has_names(&expr) {
        return None;
    }
    eval_condition(&expr).ok()
}

/// Expanded tokens with annotations removed, rendered back to C text.
///
/// Each kept token remembers its byte span so tree nodes map back to the
/// original tokens and their lines. Calling conventions are removed from
/// the text and recorded at the offset of the token that followed them.
#[derive(Debug, Default)]
struct Rendered {
    text: String,
    tokens: Vec<Token>,
    spans: Vec<(usize, usize)>,
    call_convs: Vec<(usize, CallConv)>,
}

impl Rendered {
    fn new(tokens: &[Token], config: &ParserConfig) -> Self {
        let ignored: HashSet<&str> = config.ignored_qualifiers.iter().map(String::as_str).collect();
        let mut out = Rendered::default();
        let mut pending_cc = None;
        let mut depth = 0usize;
        let mut extern_blocks: Vec<usize> = Vec::new();
        let mut i = 0;

        while let Some(tok) = tokens.get(i) {
            i += 1;
            if let Some(word) = tok.as_ident() {
                if ATTRIBUTE_WORDS.contains(&word)
                    || (config.skip_sal_annotations && SAL_RE.is_match(word))
                {
                    i = skip_parens(tokens, i);
                    continue;
                }
                if STATIC_ASSERT_WORDS.contains(&word) {
                    i = skip_parens(tokens, i);
                    if tokens.get(i).map_or(false, |t| t.is_punct(";")) {
                        i += 1;
                    }
                    continue;
                }
                if ignored.contains(word) || word == "__extension__" {
                    continue;
                }
                if let Some(cc) = call_conv(word) {
                    pending_cc = Some(cc);
                    continue;
                }
                if word == "extern" && matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::Str(_))) {
                    // extern "C" { ... } keeps only its contents
                    if tokens.get(i + 1).map_or(false, |t| t.is_punct("{")) {
                        extern_blocks.push(depth);
                        i += 2;
                        continue;
                    }
                    out.push(tok, "extern", &mut pending_cc);
                    i += 1;
                    continue;
                }
                if INLINE_WORDS.contains(&word) {
                    out.push(tok, "inline", &mut pending_cc);
                    continue;
                }
            } else if tok.is_punct("{") {
                depth += 1;
            } else if tok.is_punct("}") {
                if extern_blocks.last() == Some(&depth) {
                    extern_blocks.pop();
                    continue;
                }
                depth = depth.saturating_sub(1);
            }
            out.push(tok, &tok.spelling(), &mut pending_cc);
        }
        out
    }

    fn push(&mut self, tok: &Token, spelling: &str, pending_cc: &mut Option<CallConv>) {
        match self.tokens.last() {
            Some(prev) if prev.line != tok.line => self.text.push('\n'),
            Some(_) => self.text.push(' '),
            None => {}
        }
        let start = self.text.len();
        self.text.push_str(spelling);
        self.spans.push((start, self.text.len()));
        self.tokens.push(tok.clone());
        if let Some(cc) = pending_cc.take() {
            self.call_convs.push((start, cc));
        }
    }

    /// Kept tokens inside a node
    fn tokens_in(&self, node: Node) -> &[Token] {
        let first = self.spans.partition_point(|s| s.0 < node.start_byte());
        let last = self.spans.partition_point(|s| s.0 < node.end_byte());
        &self.tokens[first..last.max(first)]
    }

    fn line(&self, node: Node) -> u32 {
        let first = self.spans.partition_point(|s| s.0 < node.start_byte());
        self.tokens
            .get(first)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.line)
    }

    fn text(&self, node: Node) -> &str {
        self.text.get(node.byte_range()).unwrap_or("")
    }

    /// Last calling convention recorded in `start..=end`
    fn call_conv_between(&self, start: usize, end: usize) -> Option<CallConv> {
        self.call_convs
            .iter()
            .rev()
            .find(|(offset, _)| (start..=end).contains(offset))
            .map(|(_, cc)| *cc)
    }
}

/// Index just past a parenthesized group starting at `i`, or `i` if there is none
fn skip_parens(tokens: &[Token], i: usize) -> usize {
    if !tokens.get(i).map_or(false, |t| t.is_punct("(")) {
        return i;
    }
    let mut depth = 0usize;
    for (offset, tok) in tokens[i..].iter().enumerate() {
        if tok.is_punct("(") {
            depth += 1;
        } else if tok.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                return i + offset + 1;
            }
        }
    }
    tokens.len()
}

fn is_declarator_name(kind: &str) -> bool {
    matches!(
        kind,
        "identifier" | "field_identifier" | "type_identifier" | "primitive_type"
    )
}

/// Declarator kind without its `abstract_` prefix or field/type variant suffix
fn declarator_kind(kind: &str) -> &str {
    let kind = kind.trim_start_matches("abstract_");
    for base in ["pointer", "function", "array", "parenthesized", "attributed"] {
        if kind.starts_with(base) && kind.ends_with("declarator") {
            return base;
        }
    }
    kind
}

fn c_parser() -> std::result::Result<TSParser, String> {
    let mut parser = TSParser::new();
    parser
        .set_language(&tree_sitter_c::LANGUAGE.into())
        .map_err(|e| format!("failed to load the C grammar: {}", e))?;
    Ok(parser)
}

/// Walks one header's syntax tree into declarations
pub struct DeclarationParser<'a> {
    source: Rendered,
    header: &'a Path,
    declarations: Vec<Declaration>,
    diagnostics: Diagnostics,
    /// Tags declared or being defined in this header
    known_tags: HashSet<String>,
    anon_count: usize,
}

impl<'a> DeclarationParser<'a> {
    pub fn new(tokens: &[Token], header: &'a Path, config: &ParserConfig) -> Self {
        Self {
            source: Rendered::new(tokens, config),
            header,
            declarations: Vec::new(),
            diagnostics: Diagnostics::new(),
            known_tags: HashSet::new(),
            anon_count: 0,
        }
    }

    /// Parse every top-level statement
    pub fn parse(mut self) -> ParseResult {
        match self.tree() {
            Ok(tree) => self.items(tree.root_node()),
            Err(message) => {
                warn!("{}: {}", self.header.display(), message);
                self.diagnostics.push(
                    Diagnostic::warning(DiagnosticKind::MalformedDeclaration, message)
                        .at(self.location(0)),
                );
            }
        }

        debug!(
            "Parsed {} declarations from {}",
            self.declarations.len(),
            self.header.display()
        );
        ParseResult {
            header: self.header.to_path_buf(),
            declarations: self.declarations,
            diagnostics: self.diagnostics,
        }
    }

    fn tree(&self) -> std::result::Result<Tree, String> {
        c_parser()?
            .parse(&self.source.text, None)
            .ok_or_else(|| format!("failed to parse {}", self.header.display()))
    }

    /// Top-level items of the translation unit or of a recovered region
    fn items(&mut self, parent: Node) {
        let mut cursor = parent.walk();
        let children: Vec<Node> = parent.named_children(&mut cursor).collect();
        for node in children {
            match node.kind() {
                "function_definition" => {
                    debug!("Skipping inline definition at line {}", self.source.line(node));
                }
                "linkage_specification" => {
                    if let Some(body) = node.child_by_field_name("body") {
                        self.items(body);
                    }
                }
                "declaration_list" => self.items(node),
                "comment" => {}
                "ERROR" => {
                    self.malformed(node, DeclError::Syntax(self.snippet(node)));
                    self.salvage(node);
                }
                _ => {
                    if let Err(e) = self.statement(node) {
                        self.malformed(node, e);
                    }
                }
            }
        }
    }

    /// Complete statements inside an error region
    fn salvage(&mut self, region: Node) {
        let mut cursor = region.walk();
        let children: Vec<Node> = region.named_children(&mut cursor).collect();
        for node in children {
            match node.kind() {
                "declaration" | "type_definition" if !node.has_error() => {
                    if let Err(e) = self.statement(node) {
                        self.malformed(node, e);
                    }
                }
                "ERROR" => self.salvage(node),
                _ => {}
            }
        }
    }

    fn malformed(&mut self, node: Node, error: DeclError) {
        self.diagnostics.push(
            Diagnostic::warning(
                DiagnosticKind::MalformedDeclaration,
                format!("{}; declaration skipped", error),
            )
            .at(self.location(self.source.line(node))),
        );
    }

    /// First line of a node's text, shortened
    fn snippet(&self, node: Node) -> String {
        let line = self.source.text(node).lines().next().unwrap_or("");
        match line.char_indices().nth(60) {
            Some((end, _)) => format!("{}...", &line[..end]),
            None => line.to_string(),
        }
    }

    fn location(&self, line: u32) -> Location {
        Location::in_header(self.header, line)
    }

    fn push(&mut self, name: String, namespace: Namespace, line: u32, kind: DeclKind) {
        self.declarations.push(Declaration {
            name,
            namespace,
            header: self.header.to_path_buf(),
            location: self.location(line),
            kind,
        });
    }

    fn push_union(&mut self, name: String, namespace: Namespace, line: u32) -> TypeRef {
        self.diagnostics.push(
            Diagnostic::warning(
                DiagnosticKind::UnsupportedDeclaration,
                format!("union {} is not translated", name),
            )
            .at(self.location(line))
            .for_symbol(name.clone()),
        );
        let marker = TypeRef::Unsupported(format!("union {}", name));
        self.push(
            name,
            namespace,
            line,
            DeclKind::Unsupported {
                construct: "union".to_string(),
            },
        );
        marker
    }

    fn next_anon(&mut self) -> usize {
        self.anon_count += 1;
        self.anon_count
    }

    // ---- statements ----

    fn statement(&mut self, node: Node) -> PResult<()> {
        if node.has_error() {
            return Err(DeclError::Syntax(self.snippet(node)));
        }
        match node.kind() {
            "declaration" | "type_definition" => {}
            "struct_specifier" | "union_specifier" | "enum_specifier" => {
                // `struct TAG;` or a definition without declarators
                let mut spec = self.empty_spec(node);
                self.type_specifier(node, None, &mut spec)?;
                if let Some(body) = spec.anon.take() {
                    self.resolve_anon(body, None, spec.line);
                }
                return Ok(());
            }
            _ => return Err(DeclError::Syntax(self.snippet(node))),
        }

        let mut cursor = node.walk();
        let declarators: Vec<Node> = node.children_by_field_name("declarator", &mut cursor).collect();
        let specifiers_end = declarators.first().map_or(node.end_byte(), |d| d.start_byte());
        let mut spec = self.specifiers(node, None, specifiers_end)?;
        if node.kind() == "type_definition" {
            spec.storage = Storage::Typedef;
        }

        if declarators.is_empty() {
            if let Some(body) = spec.anon.take() {
                self.resolve_anon(body, None, spec.line);
            }
            return Ok(());
        }

        let mut base = spec.base.clone();
        for declarator in declarators {
            let (target, initialized) = match declarator.kind() {
                "init_declarator" => (declarator.child_by_field_name("declarator"), true),
                _ => (Some(declarator), false),
            };
            let mut emit = !initialized;

            if let Some(body) = spec.anon.take() {
                let typedef_name = match (target, spec.storage) {
                    (Some(t), Storage::Typedef) if is_declarator_name(t.kind()) => {
                        Some(self.source.text(t).to_string())
                    }
                    _ => None,
                };
                emit &= typedef_name.is_none();
                let named = typedef_name.map(|n| (n, Namespace::Ordinary));
                base = Some(self.resolve_anon(body, named, spec.line));
            }
            let base_ty = base
                .clone()
                .ok_or_else(|| DeclError::Invalid("missing type specifier".to_string()))?;

            let mut spec_cc = spec.call_conv;
            let (name, ty) = self.declarator(target, base_ty, spec.is_const, &mut spec_cc, false)?;
            if emit {
                self.declare(&spec, name, ty)?;
            }
        }
        Ok(())
    }

    fn declare(&mut self, spec: &DeclSpec, name: Option<String>, ty: TypeRef) -> PResult<()> {
        let name = name.ok_or_else(|| DeclError::Invalid("declaration without a name".to_string()))?;
        let kind = match (spec.storage, ty) {
            (Storage::Typedef, ty) => DeclKind::Typedef(ty),
            (Storage::Static, _) => {
                debug!("Skipping static {}", name);
                return Ok(());
            }
            (_, TypeRef::Function(_)) if spec.inline => {
                debug!("Skipping inline prototype {}", name);
                return Ok(());
            }
            (_, TypeRef::Function(sig)) => DeclKind::Function(*sig),
            (_, ty) => DeclKind::Variable(ty),
        };
        self.push(name, Namespace::Ordinary, spec.line, kind);
        Ok(())
    }

    /// Give an anonymous body a name, or fall back to a synthetic one
    fn resolve_anon(
        &mut self,
        body: AnonBody,
        name: Option<(String, Namespace)>,
        line: u32,
    ) -> TypeRef {
        match body {
            AnonBody::Struct(fields) => {
                let (name, namespace) = match name {
                    Some(named) => named,
                    None => (format!("__anon{}", self.next_anon()), Namespace::Tag),
                };
                self.push(
                    name.clone(),
                    namespace,
                    line,
                    DeclKind::Struct(StructDef {
                        fields: Some(fields),
                    }),
                );
                TypeRef::named(name, namespace)
            }
            AnonBody::Enum(variants) => match name {
                Some((name, namespace)) => {
                    self.push(name.clone(), namespace, line, DeclKind::Enum(EnumDef { variants }));
                    TypeRef::named(name, namespace)
                }
                None => {
                    for variant in variants {
                        self.push(
                            variant.name,
                            Namespace::Ordinary,
                            line,
                            DeclKind::Constant(variant.value),
                        );
                    }
                    TypeRef::Primitive(Primitive::Int)
                }
            },
            AnonBody::Union => match name {
                Some((name, namespace)) => self.push_union(name, namespace, line),
                None => TypeRef::Unsupported("anonymous union".to_string()),
            },
        }
    }

    // ---- specifiers ----

    fn empty_spec(&self, node: Node) -> DeclSpec {
        DeclSpec {
            storage: Storage::None,
            base: None,
            is_const: false,
            inline: false,
            call_conv: None,
            anon: None,
            anonymous_member: false,
            line: self.source.line(node),
        }
    }

    /// Read the specifiers of a declaration, field or parameter. Inside a
    /// record `owner` names anonymous member types after the enclosing struct.
    /// A calling convention counts as a specifier if it sits before `specifiers_end`.
    fn specifiers(&mut self, node: Node, owner: Option<&str>, specifiers_end: usize) -> PResult<DeclSpec> {
        let mut spec = self.empty_spec(node);
        spec.call_conv = self
            .source
            .call_conv_between(node.start_byte(), specifiers_end);

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match (child.kind(), self.source.text(child)) {
                ("storage_class_specifier", "extern") => spec.storage = Storage::Extern,
                ("storage_class_specifier", "static") => spec.storage = Storage::Static,
                ("storage_class_specifier", word) if INLINE_WORDS.contains(&word) => {
                    spec.inline = true
                }
                ("type_qualifier", "const") => spec.is_const = true,
                _ => {}
            }
        }

        let ty = node
            .child_by_field_name("type")
            .ok_or_else(|| DeclError::Invalid("missing type specifier".to_string()))?;
        self.type_specifier(ty, owner, &mut spec)?;
        Ok(spec)
    }

    fn type_specifier(&mut self, node: Node, owner: Option<&str>, spec: &mut DeclSpec) -> PResult<()> {
        match node.kind() {
            "primitive_type" | "sized_type_specifier" | "type_identifier" => {
                spec.base = Some(simple_type(self.source.text(node))?);
                Ok(())
            }
            "struct_specifier" => self.tagged("struct", node, owner, spec),
            "union_specifier" => self.tagged("union", node, owner, spec),
            "enum_specifier" => self.tagged("enum", node, owner, spec),
            _ => Err(DeclError::Invalid(format!(
                "unsupported type `{}`",
                self.snippet(node)
            ))),
        }
    }

    /// Handle a `struct`, `union` or `enum` specifier
    fn tagged(&mut self, keyword: &str, node: Node, owner: Option<&str>, spec: &mut DeclSpec) -> PResult<()> {
        let line = self.source.line(node);
        let name = node
            .child_by_field_name("name")
            .map(|n| self.source.text(n).to_string());
        let body = match node.child_by_field_name("body") {
            Some(body) => body,
            None => {
                let name = name.ok_or_else(|| {
                    DeclError::Invalid(format!("{} without a tag or body", keyword))
                })?;
                spec.base = Some(self.tag_reference(keyword, name, line));
                return Ok(());
            }
        };

        let anon = match (keyword, name) {
            ("union", Some(name)) => {
                spec.base = Some(self.push_union(name, Namespace::Tag, line));
                return Ok(());
            }
            ("union", None) => AnonBody::Union,
            ("enum", Some(name)) => {
                let variants = self.enum_body(body)?;
                self.push(name.clone(), Namespace::Tag, line, DeclKind::Enum(EnumDef { variants }));
                spec.base = Some(TypeRef::named(name, Namespace::Tag));
                return Ok(());
            }
            ("enum", None) => AnonBody::Enum(self.enum_body(body)?),
            (_, Some(name)) => {
                self.known_tags.insert(name.clone());
                let fields = self.struct_body(body, &name)?;
                self.push(
                    name.clone(),
                    Namespace::Tag,
                    line,
                    DeclKind::Struct(StructDef {
                        fields: Some(fields),
                    }),
                );
                spec.base = Some(TypeRef::named(name, Namespace::Tag));
                return Ok(());
            }
            (_, None) => {
                let nested_owner = owner.unwrap_or("Anonymous").to_string();
                AnonBody::Struct(self.struct_body(body, &nested_owner)?)
            }
        };

        match owner {
            // anonymous member types are named after their record right away
            Some(owner) => {
                let name = match anon {
                    AnonBody::Struct(_) => Some((
                        format!("{}__anon{}", owner, self.next_anon()),
                        Namespace::Tag,
                    )),
                    _ => None,
                };
                spec.base = Some(self.resolve_anon(anon, name, line));
                spec.anonymous_member = true;
            }
            None => {
                spec.base = Some(TypeRef::Primitive(Primitive::Int));
                spec.anon = Some(anon);
            }
        }
        Ok(())
    }

    /// A tag used without a body. A struct tag not yet seen in this header
    /// is declared opaque.
    fn tag_reference(&mut self, keyword: &str, name: String, line: u32) -> TypeRef {
        match keyword {
            "union" => TypeRef::Unsupported(format!("union {}", name)),
            "struct" => {
                if self.known_tags.insert(name.clone()) {
                    self.push(
                        name.clone(),
                        Namespace::Tag,
                        line,
                        DeclKind::Struct(StructDef { fields: None }),
                    );
                }
                TypeRef::named(name, Namespace::Tag)
            }
            _ => TypeRef::named(name, Namespace::Tag),
        }
    }

    fn struct_body(&mut self, body: Node, owner: &str) -> PResult<Vec<Field>> {
        let mut fields = Vec::new();
        let mut bits = BitfieldRun::default();
        let mut anon_members = 0usize;

        let mut cursor = body.walk();
        let members: Vec<Node> = body.named_children(&mut cursor).collect();
        for member in members {
            if member.kind() != "field_declaration" {
                continue;
            }
            let mut member_cursor = member.walk();
            let declarators: Vec<Node> = member
                .children_by_field_name("declarator", &mut member_cursor)
                .collect();
            let widths: Vec<Node> = member
                .named_children(&mut member_cursor)
                .filter(|c| c.kind() == "bitfield_clause")
                .collect();
            let specifiers_end = declarators.first().map_or(member.end_byte(), |d| d.start_byte());
            let spec = self.specifiers(member, Some(owner), specifiers_end)?;
            let base = spec
                .base
                .clone()
                .ok_or_else(|| DeclError::Invalid("field without a type".to_string()))?;

            if declarators.is_empty() {
                match widths.first() {
                    // unnamed bitfield padding
                    Some(width) => bits.add(None, base, self.bitfield_width(*width)?, &mut fields),
                    None if spec.anonymous_member => {
                        bits.flush(&mut fields);
                        anon_members += 1;
                        fields.push(Field {
                            name: format!("anon{}", anon_members),
                            ty: base,
                            comment: None,
                        });
                    }
                    None => {}
                }
                continue;
            }

            for (idx, declarator) in declarators.iter().enumerate() {
                let next_start = declarators
                    .get(idx + 1)
                    .map_or(member.end_byte(), |d| d.start_byte());
                let width = widths
                    .iter()
                    .find(|w| w.start_byte() >= declarator.end_byte() && w.start_byte() < next_start);

                let mut spec_cc = spec.call_conv;
                let (name, ty) =
                    self.declarator(Some(*declarator), base.clone(), spec.is_const, &mut spec_cc, false)?;
                match width {
                    Some(width) => {
                        let width = self.bitfield_width(*width)?;
                        bits.add(name.as_deref(), ty, width, &mut fields);
                    }
                    None => {
                        bits.flush(&mut fields);
                        let name = name
                            .ok_or_else(|| DeclError::Invalid("field without a name".to_string()))?;
                        fields.push(Field {
                            name,
                            ty,
                            comment: None,
                        });
                    }
                }
            }
        }

        bits.flush(&mut fields);
        Ok(fields)
    }

    fn bitfield_width(&self, clause: Node) -> PResult<u32> {
        let tokens = self.source.tokens_in(clause);
        let tokens = match tokens.split_first() {
            Some((colon, rest)) if colon.is_punct(":") => rest,
            _ => tokens,
        };
        literal_value(tokens)
            .and_then(|w| u32::try_from(w).ok())
            .ok_or_else(|| DeclError::Invalid(format!("bitfield width `{}`", spell_tokens(tokens))))
    }

    /// Enumerators with implicit values rewritten as `0` or `PREV + 1`
    fn enum_body(&mut self, body: Node) -> PResult<Vec<EnumVariant>> {
        let mut variants: Vec<EnumVariant> = Vec::new();
        let mut cursor = body.walk();
        for enumerator in body.named_children(&mut cursor) {
            if enumerator.kind() != "enumerator" {
                continue;
            }
            let name_node = enumerator
                .child_by_field_name("name")
                .ok_or_else(|| DeclError::Invalid("enumerator without a name".to_string()))?;
            let name = self.source.text(name_node).to_string();
            let line = self.source.line(enumerator);

            let value = match enumerator.child_by_field_name("value") {
                Some(value) => self.source.tokens_in(value).to_vec(),
                None => match variants.last() {
                    Some(prev) => vec![
                        Token::ident(prev.name.clone(), line),
                        Token::punct("+", line),
                        Token::number("1", line),
                    ],
                    None => vec![Token::number("0", line)],
                },
            };
            if value.is_empty() {
                return Err(DeclError::Invalid(format!("enumerator {} has no value", name)));
            }
            variants.push(EnumVariant { name, value });
        }
        Ok(variants)
    }

    // ---- declarators ----

    /// Apply a declarator to `ty` from the outside in, returning the declared
    /// name and type. `pending_const` qualifies the next pointee; `decay`
    /// turns an outermost array into a pointer.
    fn declarator(
        &mut self,
        node: Option<Node>,
        ty: TypeRef,
        pending_const: bool,
        spec_cc: &mut Option<CallConv>,
        decay: bool,
    ) -> PResult<(Option<String>, TypeRef)> {
        let node = match node {
            Some(node) => node,
            None => return Ok((None, ty)),
        };
        let inner = node.child_by_field_name("declarator");

        match declarator_kind(node.kind()) {
            kind if is_declarator_name(kind) => Ok((Some(self.source.text(node).to_string()), ty)),
            "pointer" => {
                let mut cursor = node.walk();
                let const_self = node
                    .named_children(&mut cursor)
                    .any(|c| c.kind() == "type_qualifier" && self.source.text(c) == "const");
                let pointer = TypeRef::pointer(ty, pending_const);
                self.declarator(inner, pointer, const_self, spec_cc, false)
            }
            "array" if decay => {
                let pointer = TypeRef::pointer(ty, pending_const);
                self.declarator(inner, pointer, false, spec_cc, false)
            }
            "array" => {
                let array = match node.child_by_field_name("size") {
                    None => TypeRef::Array {
                        element: Box::new(ty),
                        len: None,
                    },
                    Some(size) => {
                        let tokens = self.source.tokens_in(size);
                        match literal_value(tokens) {
                            Some(n) if n >= 0 => TypeRef::Array {
                                element: Box::new(ty),
                                len: Some(n as u64),
                            },
                            _ => TypeRef::Unsupported(format!(
                                "array length `{}`",
                                spell_tokens(tokens)
                            )),
                        }
                    }
                };
                self.declarator(inner, array, pending_const, spec_cc, false)
            }
            "function" => {
                let params = node
                    .child_by_field_name("parameters")
                    .ok_or_else(|| DeclError::Invalid("function without parameters".to_string()))?;
                let (params, variadic) = self.params(params)?;
                // `(__stdcall *name)` names the convention inside the parentheses
                let grouped_cc = inner
                    .filter(|d| declarator_kind(d.kind()) == "parenthesized")
                    .and_then(|d| {
                        let mut cursor = d.walk();
                        let content = d.named_children(&mut cursor).next()?;
                        self.source.call_conv_between(d.start_byte(), content.start_byte())
                    });
                let cc = grouped_cc.or_else(|| spec_cc.take()).unwrap_or_default();
                let function = TypeRef::Function(Box::new(FunctionSig {
                    ret: ty,
                    params,
                    variadic,
                    call_conv: cc,
                }));
                self.declarator(inner, function, false, spec_cc, false)
            }
            "parenthesized" | "attributed" => {
                let content = match inner {
                    Some(inner) => Some(inner),
                    None => {
                        let mut cursor = node.walk();
                        let first = node.named_children(&mut cursor).next();
                        first
                    }
                };
                self.declarator(content, ty, pending_const, spec_cc, decay)
            }
            _ => Err(DeclError::Invalid(format!(
                "unsupported declarator `{}`",
                self.snippet(node)
            ))),
        }
    }

    fn params(&mut self, list: Node) -> PResult<(Vec<Param>, bool)> {
        let mut params = Vec::new();
        let mut variadic = false;

        let mut cursor = list.walk();
        let children: Vec<Node> = list.children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "variadic_parameter" | "..." => variadic = true,
                "parameter_declaration" => {
                    let declarator = child.child_by_field_name("declarator");
                    let specifiers_end = declarator.map_or(child.end_byte(), |d| d.start_byte());
                    let mut spec = self.specifiers(child, None, specifiers_end)?;
                    if let Some(body) = spec.anon.take() {
                        spec.base = Some(self.resolve_anon(body, None, spec.line));
                    }
                    let base = spec
                        .base
                        .clone()
                        .ok_or_else(|| DeclError::Invalid("parameter without a type".to_string()))?;

                    let mut spec_cc = spec.call_conv;
                    let (name, ty) = self.declarator(declarator, base, spec.is_const, &mut spec_cc, true)?;
                    let ty = match ty {
                        func @ TypeRef::Function(_) => TypeRef::pointer(func, false),
                        ty => ty,
                    };
                    params.push(Param { name, ty });
                }
                _ => {}
            }
        }

        // `(void)` declares no parameters
        if let [Param { name: None, ty: TypeRef::Void }] = params.as_slice() {
            params.clear();
        }
        Ok((params, variadic))
    }
}

/// Type named by a primitive specifier or a single type name
fn simple_type(text: &str) -> PResult<TypeRef> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if !words.is_empty() && words.iter().all(|w| PRIMITIVE_WORDS.contains(w)) {
        return combine_primitive(&words);
    }
    match words.as_slice() {
        [word] => Ok(match Primitive::from_builtin_name(word) {
            Some(prim) => TypeRef::Primitive(prim),
            None => TypeRef::named(*word, Namespace::Ordinary),
        }),
        _ => Err(DeclError::Invalid(format!("invalid type `{}`", text))),
    }
}

/// Whether a macro body only spells qualifiers, calling conventions or
/// attributes, e.g. `__stdcall` or `__declspec(dllimport)`
pub fn is_annotation_body(tokens: &[Token], config: &ParserConfig) -> bool {
    !tokens.is_empty()
        && Rendered::new(tokens, config)
            .tokens
            .iter()
            .all(|t| t.as_ident().map_or(false, |w| QUALIFIER_WORDS.contains(&w)))
}

/// Parse the declarations in one header's expanded tokens
pub fn parse_declarations(tokens: &[Token], header: &Path, config: &ParserConfig) -> ParseResult {
    DeclarationParser::new(tokens, header, config).parse()
}
