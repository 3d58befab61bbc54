//! Symbol table builder
//!
//! Aggregates declarations from every parsed header into one global symbol
//! space, settling redeclarations as they arrive.

use crate::resolve::resolve_references;
use crate::SymbolIndex;
use hdrbind_core::config::DuplicatePolicy;
use hdrbind_core::{
    DeclKind, Declaration, Diagnostic, DiagnosticKind, Diagnostics, Error, Result, SymbolKey,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of a single insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    /// A complete struct replaced an opaque forward declaration
    Upgraded,
    /// Opaque or identical redeclaration
    Ignored,
    /// Conflicting redeclaration dropped under first-wins
    KeptFirst,
    /// Conflicting redeclaration replaced the earlier one under last-wins
    Replaced,
}

/// Mutable symbol table, frozen into a [`SymbolIndex`] by [`SymbolTable::finalize`]
#[derive(Debug, Default)]
pub struct SymbolTable {
    policy: DuplicatePolicy,
    symbols: HashMap<SymbolKey, Declaration>,
    /// Headers in registration order
    header_order: Vec<PathBuf>,
    /// Keys owned by each header, in first-appearance order
    by_header: HashMap<PathBuf, Vec<SymbolKey>>,
    dependencies: BTreeMap<PathBuf, Vec<PathBuf>>,
    diagnostics: Diagnostics,
}

impl SymbolTable {
    /// Create a new empty table
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Register a header so it keeps its place in the module order even
    /// before it contributes a declaration
    pub fn add_header(&mut self, header: &Path) {
        if !self.by_header.contains_key(header) {
            self.by_header.insert(header.to_path_buf(), Vec::new());
            self.header_order.push(header.to_path_buf());
        }
    }

    /// Record that `includer` includes `included`
    pub fn add_dependency(&mut self, includer: &Path, included: &Path) {
        let edges = self.dependencies.entry(includer.to_path_buf()).or_default();
        if !edges.iter().any(|p| p == included) {
            edges.push(included.to_path_buf());
        }
    }

    /// Insert a declaration.
    ///
    /// Rules, in order: a complete struct upgrades an opaque one and takes
    /// ownership; an opaque redeclaration is ignored; an identical
    /// redeclaration is ignored; anything else goes through the duplicate
    /// policy. Only the `error` policy can fail.
    pub fn insert(&mut self, decl: Declaration) -> Result<InsertOutcome> {
        let key = decl.key();
        self.add_header(&decl.header);

        if !self.symbols.contains_key(&key) {
            self.attach(&decl.header, key.clone());
            self.symbols.insert(key, decl);
            return Ok(InsertOutcome::Added);
        }
        let existing = &self.symbols[&key];

        let complete_struct = matches!(&decl.kind, DeclKind::Struct(def) if !def.is_opaque());
        if existing.is_opaque_struct() && complete_struct {
            debug!(
                "Opaque {} completed by {}",
                key,
                decl.header.display()
            );
            self.replace(key, decl);
            return Ok(InsertOutcome::Upgraded);
        }
        if decl.is_opaque_struct() || existing.kind.is_equivalent(&decl.kind) {
            return Ok(InsertOutcome::Ignored);
        }

        let first = existing.location.to_string();
        let second = decl.location.to_string();
        match self.policy {
            DuplicatePolicy::Error => Err(Error::DuplicateSymbol {
                name: key.name,
                first,
                second,
            }),
            DuplicatePolicy::FirstWins => {
                self.diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::DuplicateSymbol,
                        format!(
                            "{} {} redeclared differently at {}; keeping {}",
                            decl.kind.label(),
                            key,
                            second,
                            first
                        ),
                    )
                    .at(decl.location.clone())
                    .for_symbol(key.name.clone()),
                );
                Ok(InsertOutcome::KeptFirst)
            }
            DuplicatePolicy::LastWins => {
                self.diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::DuplicateSymbol,
                        format!(
                            "{} {} redeclared differently at {}; replacing {}",
                            decl.kind.label(),
                            key,
                            second,
                            first
                        ),
                    )
                    .at(decl.location.clone())
                    .for_symbol(key.name.clone()),
                );
                self.replace(key, decl);
                Ok(InsertOutcome::Replaced)
            }
        }
    }

    /// Insert every declaration of a header, stopping at the first fatal error
    pub fn insert_all(&mut self, decls: impl IntoIterator<Item = Declaration>) -> Result<()> {
        for decl in decls {
            self.insert(decl)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Freeze the table and resolve every named type reference
    pub fn finalize(self) -> SymbolIndex {
        let mut index = SymbolIndex {
            symbols: self.symbols,
            header_order: self.header_order,
            by_header: self.by_header,
            dependencies: self.dependencies,
            unresolved: Vec::new(),
            diagnostics: self.diagnostics,
        };

        let unresolved = resolve_references(&index);
        for reference in &unresolved {
            if let Some(decl) = index.get(&reference.symbol) {
                let diagnostic = Diagnostic::warning(
                    DiagnosticKind::UnresolvedReference,
                    format!("{} refers to unknown {}", reference.symbol, reference.target),
                )
                .at(decl.location.clone())
                .for_symbol(reference.symbol.name.clone());
                index.diagnostics.push(diagnostic);
            }
        }
        index.unresolved = unresolved;

        info!(
            "Symbol index: {} symbols in {} headers, {} unresolved references",
            index.len(),
            index.header_order.len(),
            index.unresolved.len()
        );
        index
    }

    /// Replace a symbol, moving it to the new declaration's header
    fn replace(&mut self, key: SymbolKey, decl: Declaration) {
        if let Some(old) = self.symbols.get(&key) {
            if old.header != decl.header {
                if let Some(keys) = self.by_header.get_mut(&old.header) {
                    keys.retain(|k| k != &key);
                }
                self.attach(&decl.header, key.clone());
            }
        }
        self.symbols.insert(key, decl);
    }

    fn attach(&mut self, header: &Path, key: SymbolKey) {
        self.add_header(header);
        if let Some(keys) = self.by_header.get_mut(header) {
            keys.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdrbind_core::{Location, Namespace, Primitive, StructDef, Token, TypeRef};
    use pretty_assertions::assert_eq;

    fn decl(name: &str, ns: Namespace, header: &str, line: u32, kind: DeclKind) -> Declaration {
        Declaration {
            name: name.to_string(),
            namespace: ns,
            header: PathBuf::from(header),
            location: Location::new(header, line),
            kind,
        }
    }

    fn opaque(name: &str, header: &str) -> Declaration {
        decl(name, Namespace::Tag, header, 1, DeclKind::Struct(StructDef { fields: None }))
    }

    fn complete(name: &str, header: &str) -> Declaration {
        decl(
            name,
            Namespace::Tag,
            header,
            2,
            DeclKind::Struct(StructDef {
                fields: Some(vec![hdrbind_core::Field {
                    name: "x".into(),
                    ty: TypeRef::Primitive(Primitive::Int),
                    comment: None,
                }]),
            }),
        )
    }

    fn typedef(name: &str, header: &str, prim: Primitive) -> Declaration {
        decl(name, Namespace::Ordinary, header, 3, DeclKind::Typedef(TypeRef::Primitive(prim)))
    }

    #[test]
    fn test_opaque_upgrade_moves_ownership() {
        let mut table = SymbolTable::new(DuplicatePolicy::FirstWins);
        assert_eq!(table.insert(opaque("_NODE", "a.h")).unwrap(), InsertOutcome::Added);
        assert_eq!(table.insert(complete("_NODE", "b.h")).unwrap(), InsertOutcome::Upgraded);
        assert_eq!(table.insert(opaque("_NODE", "c.h")).unwrap(), InsertOutcome::Ignored);

        let index = table.finalize();
        let key = SymbolKey::tag("_NODE");
        assert!(!index.get(&key).unwrap().is_opaque_struct());
        assert_eq!(index.owner_of(&key), Some(Path::new("b.h")));
        assert_eq!(index.declarations_in(Path::new("a.h")).count(), 0);
        assert_eq!(index.declarations_in(Path::new("b.h")).count(), 1);
        assert!(index.diagnostics().is_empty());
    }

    #[test]
    fn test_identical_redeclaration_is_silent() {
        let mut table = SymbolTable::new(DuplicatePolicy::FirstWins);
        table.insert(typedef("DWORD", "a.h", Primitive::ULong)).unwrap();
        let again = typedef("DWORD", "b.h", Primitive::ULong);
        assert_eq!(table.insert(again).unwrap(), InsertOutcome::Ignored);

        let constant = |line| {
            decl(
                "MAX_PATH",
                Namespace::Ordinary,
                "a.h",
                line,
                DeclKind::Constant(vec![Token::number("260", line)]),
            )
        };
        table.insert(constant(5)).unwrap();
        assert_eq!(table.insert(constant(9)).unwrap(), InsertOutcome::Ignored);

        let index = table.finalize();
        assert!(index.diagnostics().is_empty());
    }

    #[test]
    fn test_first_wins_warns() {
        let mut table = SymbolTable::new(DuplicatePolicy::FirstWins);
        table.insert(typedef("WORD", "a.h", Primitive::UShort)).unwrap();
        assert_eq!(
            table.insert(typedef("WORD", "b.h", Primitive::UInt)).unwrap(),
            InsertOutcome::KeptFirst
        );

        let index = table.finalize();
        let key = SymbolKey::ordinary("WORD");
        assert_eq!(index.owner_of(&key), Some(Path::new("a.h")));
        assert_eq!(index.diagnostics().count(DiagnosticKind::DuplicateSymbol), 1);
    }

    #[test]
    fn test_last_wins_replaces_and_moves() {
        let mut table = SymbolTable::new(DuplicatePolicy::LastWins);
        table.insert(typedef("WORD", "a.h", Primitive::UShort)).unwrap();
        table.insert(typedef("WORD", "b.h", Primitive::UInt)).unwrap();

        let index = table.finalize();
        let key = SymbolKey::ordinary("WORD");
        assert_eq!(index.owner_of(&key), Some(Path::new("b.h")));
        assert_eq!(
            index.get(&key).unwrap().kind,
            DeclKind::Typedef(TypeRef::Primitive(Primitive::UInt))
        );
        assert_eq!(index.diagnostics().count(DiagnosticKind::DuplicateSymbol), 1);
    }

    #[test]
    fn test_error_policy_is_fatal() {
        let mut table = SymbolTable::new(DuplicatePolicy::Error);
        table.insert(typedef("WORD", "a.h", Primitive::UShort)).unwrap();
        let err = table.insert(typedef("WORD", "b.h", Primitive::UInt)).unwrap_err();
        assert!(matches!(err, Error::DuplicateSymbol { ref name, .. } if name == "WORD"));
    }

    #[test]
    fn test_namespaces_are_separate() {
        let mut table = SymbolTable::new(DuplicatePolicy::Error);
        table.insert(complete("POINT", "a.h")).unwrap();
        table
            .insert(decl(
                "POINT",
                Namespace::Ordinary,
                "a.h",
                4,
                DeclKind::Typedef(TypeRef::named("POINT", Namespace::Tag)),
            ))
            .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_header_order_and_dependencies() {
        let mut table = SymbolTable::new(DuplicatePolicy::FirstWins);
        table.add_header(Path::new("base.h"));
        table.add_header(Path::new("empty.h"));
        table.insert(typedef("B", "top.h", Primitive::Int)).unwrap();
        table.insert(typedef("A", "base.h", Primitive::Int)).unwrap();
        table.add_dependency(Path::new("top.h"), Path::new("base.h"));
        table.add_dependency(Path::new("top.h"), Path::new("base.h"));

        let index = table.finalize();
        let headers: Vec<_> = index.headers().collect();
        assert_eq!(
            headers,
            vec![Path::new("base.h"), Path::new("empty.h"), Path::new("top.h")]
        );
        assert_eq!(index.dependencies(Path::new("top.h")), &[PathBuf::from("base.h")]);
    }
}
