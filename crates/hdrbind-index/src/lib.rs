//! hdrbind Index
//!
//! The global symbol space shared by every header of a run. Declarations are
//! aggregated into a [`SymbolTable`], which settles redeclarations, and then
//! frozen into a read-only [`SymbolIndex`] once all headers are parsed.
//! Freezing resolves every named type reference across headers.

mod resolve;
mod table;

pub use resolve::UnresolvedRef;
pub use table::{InsertOutcome, SymbolTable};

use hdrbind_core::{DeclKind, Declaration, Diagnostics, Namespace, SymbolKey, TypeRef};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Typedef chains longer than this are treated as cyclic
const MAX_ALIAS_DEPTH: usize = 64;

/// Frozen symbol index
#[derive(Debug, Default)]
pub struct SymbolIndex {
    symbols: HashMap<SymbolKey, Declaration>,
    header_order: Vec<PathBuf>,
    by_header: HashMap<PathBuf, Vec<SymbolKey>>,
    dependencies: BTreeMap<PathBuf, Vec<PathBuf>>,
    unresolved: Vec<UnresolvedRef>,
    diagnostics: Diagnostics,
}

impl SymbolIndex {
    /// Get a declaration by key
    pub fn get(&self, key: &SymbolKey) -> Option<&Declaration> {
        self.symbols.get(key)
    }

    /// Get a declaration by name and namespace
    pub fn lookup(&self, name: &str, namespace: Namespace) -> Option<&Declaration> {
        self.symbols.get(&SymbolKey {
            namespace,
            name: name.to_string(),
        })
    }

    pub fn contains(&self, key: &SymbolKey) -> bool {
        self.symbols.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Headers in registration (dependency) order
    pub fn headers(&self) -> impl Iterator<Item = &Path> {
        self.header_order.iter().map(PathBuf::as_path)
    }

    /// Declarations owned by a header, in first-appearance order
    pub fn declarations_in<'a>(&'a self, header: &Path) -> impl Iterator<Item = &'a Declaration> {
        self.by_header
            .get(header)
            .into_iter()
            .flatten()
            .filter_map(move |key| self.symbols.get(key))
    }

    /// Header that owns a symbol
    pub fn owner_of(&self, key: &SymbolKey) -> Option<&Path> {
        self.symbols.get(key).map(|d| d.header.as_path())
    }

    /// Headers directly included by `header`
    pub fn dependencies(&self, header: &Path) -> &[PathBuf] {
        self.dependencies
            .get(header)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn unresolved(&self) -> &[UnresolvedRef] {
        &self.unresolved
    }

    /// Diagnostics recorded while building and freezing the index
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Follow ordinary-namespace typedefs until a non-alias type.
    ///
    /// Unknown names and cyclic chains stop at the last named reference.
    pub fn resolve_alias<'a>(&'a self, ty: &'a TypeRef) -> &'a TypeRef {
        let mut current = ty;
        for _ in 0..MAX_ALIAS_DEPTH {
            let next = match current {
                TypeRef::Named {
                    name,
                    namespace: Namespace::Ordinary,
                } => match self.lookup(name, Namespace::Ordinary).map(|d| &d.kind) {
                    Some(DeclKind::Typedef(target)) => target,
                    _ => return current,
                },
                _ => return current,
            };
            current = next;
        }
        current
    }
}
