//! Identifier and module naming
//!
//! Every emitted name goes through here: Rust keywords are escaped, header
//! stems become unique module names, and tag/ordinary name clashes are
//! settled before any module is rendered.

use hdrbind_analysis::{ItemPath, NameResolver};
use hdrbind_core::{DeclKind, Namespace, SymbolKey, TypeRef};
use hdrbind_index::SymbolIndex;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Strict and reserved keywords of Rust 2021 and later
static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn",
        "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref",
        "return", "self", "Self", "static", "struct", "super", "trait", "true", "type",
        "unsafe", "use", "where", "while", "async", "await", "dyn", "abstract", "become",
        "box", "do", "final", "macro", "override", "priv", "typeof", "unsized", "virtual",
        "yield", "try", "gen",
    ]
    .into_iter()
    .collect()
});

/// Keywords that cannot be raw identifiers
const NON_RAW: &[&str] = &["self", "Self", "super", "crate"];

/// Module names taken by the generated crate itself
const RESERVED_MODULES: &[&str] = &["lib", "main"];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(name)
}

/// Make a C identifier usable as a Rust identifier
pub fn escape_ident(name: &str) -> String {
    if NON_RAW.contains(&name) {
        format!("{}_", name)
    } else if is_keyword(name) {
        format!("r#{}", name)
    } else {
        name.to_string()
    }
}

/// Module name for a header stem: lowercase, `_` for anything that is not an
/// identifier character, `_h` after keywords
pub fn module_name(stem: &str) -> String {
    let mut name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if name == "_" || is_keyword(&name) || RESERVED_MODULES.contains(&name.as_str()) {
        name.push_str("_h");
    }
    name
}

/// Hands out module names, suffixing `_2`, `_3` on collisions
#[derive(Debug, Default)]
pub struct ModuleNames {
    taken: HashSet<String>,
    by_header: HashMap<PathBuf, String>,
}

impl ModuleNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module name of a header, assigning one on first request
    pub fn assign(&mut self, header: &Path) -> String {
        if let Some(name) = self.by_header.get(header) {
            return name.clone();
        }

        let stem = header
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = module_name(&stem);
        let mut name = base.clone();
        let mut n = 2;
        while self.taken.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }

        self.taken.insert(name.clone());
        self.by_header.insert(header.to_path_buf(), name.clone());
        name
    }

    pub fn get(&self, header: &Path) -> Option<&str> {
        self.by_header.get(header).map(String::as_str)
    }
}

/// Emitted identifier and module of every symbol in the index
#[derive(Debug, Default)]
pub struct NameTable {
    paths: HashMap<SymbolKey, ItemPath>,
}

impl NameTable {
    /// Name every declaration of every header that has a module
    pub fn build(index: &SymbolIndex, modules: &ModuleNames) -> Self {
        let mut paths = HashMap::new();

        // Tags first, so that `typedef struct X X` can point at the tag
        for header in index.headers() {
            let Some(module) = modules.get(header) else {
                continue;
            };
            for decl in index.declarations_in(header) {
                if decl.namespace != Namespace::Tag {
                    continue;
                }
                let prefix = match &decl.kind {
                    DeclKind::Struct(_) => "struct_",
                    DeclKind::Enum(_) => "enum_",
                    _ => continue,
                };
                let ident = if clashes_with_ordinary(index, &decl.name) {
                    format!("{}{}", prefix, decl.name)
                } else {
                    escape_ident(&decl.name)
                };
                paths.insert(
                    decl.key(),
                    ItemPath {
                        ident,
                        module: module.to_string(),
                    },
                );
            }
        }

        for header in index.headers() {
            let Some(module) = modules.get(header) else {
                continue;
            };
            for decl in index.declarations_in(header) {
                if decl.namespace != Namespace::Ordinary {
                    continue;
                }
                let path = match &decl.kind {
                    DeclKind::Unsupported { .. } => continue,
                    kind if is_tag_alias(&decl.name, kind) => {
                        match paths.get(&SymbolKey::tag(decl.name.clone())) {
                            Some(tag) => tag.clone(),
                            None => continue,
                        }
                    }
                    _ => ItemPath {
                        ident: escape_ident(&decl.name),
                        module: module.to_string(),
                    },
                };
                paths.insert(decl.key(), path);
            }
        }

        Self { paths }
    }

    pub fn get(&self, key: &SymbolKey) -> Option<&ItemPath> {
        self.paths.get(key)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl NameResolver for NameTable {
    fn item_path(&self, name: &str, namespace: Namespace) -> Option<ItemPath> {
        self.paths
            .get(&SymbolKey {
                namespace,
                name: name.to_string(),
            })
            .cloned()
    }
}

/// `typedef struct X X;` style alias, which needs no item of its own
pub fn is_tag_alias(name: &str, kind: &DeclKind) -> bool {
    matches!(
        kind,
        DeclKind::Typedef(TypeRef::Named { name: target, namespace: Namespace::Tag }) if target == name
    )
}

/// An ordinary symbol other than a same-named tag alias shares the name
fn clashes_with_ordinary(index: &SymbolIndex, name: &str) -> bool {
    index
        .lookup(name, Namespace::Ordinary)
        .map_or(false, |d| !is_tag_alias(name, &d.kind))
}
