//! Cross-header reference resolution

use crate::SymbolIndex;
use hdrbind_core::SymbolKey;
use serde::Serialize;
use std::collections::BTreeSet;

/// A named type that no header declares
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UnresolvedRef {
    /// Declaration holding the reference
    pub symbol: SymbolKey,
    /// Missing target
    pub target: SymbolKey,
}

/// Walk every type reference once, in module order, reporting each missing
/// target once per referencing symbol. Constant bodies are not visited.
pub(crate) fn resolve_references(index: &SymbolIndex) -> Vec<UnresolvedRef> {
    let mut seen = BTreeSet::new();
    let mut unresolved = Vec::new();

    for header in index.headers() {
        for decl in index.declarations_in(header) {
            decl.kind.visit_named(&mut |name, namespace, _| {
                let target = SymbolKey {
                    namespace,
                    name: name.to_string(),
                };
                if index.contains(&target) {
                    return;
                }
                let reference = UnresolvedRef {
                    symbol: decl.key(),
                    target,
                };
                if seen.insert(reference.clone()) {
                    unresolved.push(reference);
                }
            });
        }
    }
    unresolved
}

#[cfg(test)]
mod tests {
    use crate::SymbolTable;
    use hdrbind_core::config::DuplicatePolicy;
    use hdrbind_core::{
        DeclKind, Declaration, DiagnosticKind, FunctionSig, Location, Namespace, Param,
        StructDef, SymbolKey, TypeRef,
    };
    use std::path::PathBuf;

    fn decl(name: &str, ns: Namespace, header: &str, kind: DeclKind) -> Declaration {
        Declaration {
            name: name.to_string(),
            namespace: ns,
            header: PathBuf::from(header),
            location: Location::new(header, 1),
            kind,
        }
    }

    #[test]
    fn test_forward_reference_across_headers_resolves() {
        let mut table = SymbolTable::new(DuplicatePolicy::FirstWins);
        // a.h uses a typedef that only b.h, parsed later, defines
        table
            .insert(decl(
                "PDATA",
                Namespace::Ordinary,
                "a.h",
                DeclKind::Typedef(TypeRef::pointer(TypeRef::named("DATA", Namespace::Ordinary), false)),
            ))
            .unwrap();
        table
            .insert(decl(
                "DATA",
                Namespace::Ordinary,
                "b.h",
                DeclKind::Struct(StructDef { fields: Some(vec![]) }),
            ))
            .unwrap();

        let index = table.finalize();
        assert!(index.unresolved().is_empty());
        assert_eq!(index.diagnostics().count(DiagnosticKind::UnresolvedReference), 0);
    }

    #[test]
    fn test_missing_target_reported_once_per_symbol() {
        let missing = TypeRef::named("HMISSING", Namespace::Ordinary);
        let sig = FunctionSig {
            ret: missing.clone(),
            params: vec![
                Param { name: Some("a".into()), ty: missing.clone() },
                Param { name: Some("b".into()), ty: TypeRef::pointer(missing.clone(), true) },
            ],
            variadic: false,
            call_conv: Default::default(),
        };

        let mut table = SymbolTable::new(DuplicatePolicy::FirstWins);
        table
            .insert(decl("Use1", Namespace::Ordinary, "a.h", DeclKind::Function(sig)))
            .unwrap();
        table
            .insert(decl("Use2", Namespace::Ordinary, "a.h", DeclKind::Variable(missing)))
            .unwrap();

        let index = table.finalize();
        let unresolved = index.unresolved();
        assert_eq!(unresolved.len(), 2);
        assert_eq!(unresolved[0].symbol, SymbolKey::ordinary("Use1"));
        assert_eq!(unresolved[0].target, SymbolKey::ordinary("HMISSING"));
        assert_eq!(index.diagnostics().count(DiagnosticKind::UnresolvedReference), 2);
    }

    #[test]
    fn test_tag_and_ordinary_lookups_differ() {
        let mut table = SymbolTable::new(DuplicatePolicy::FirstWins);
        table
            .insert(decl(
                "_POINT",
                Namespace::Tag,
                "a.h",
                DeclKind::Struct(StructDef { fields: Some(vec![]) }),
            ))
            .unwrap();
        table
            .insert(decl(
                "PPOINT",
                Namespace::Ordinary,
                "a.h",
                DeclKind::Typedef(TypeRef::pointer(TypeRef::named("_POINT", Namespace::Ordinary), false)),
            ))
            .unwrap();

        let index = table.finalize();
        assert_eq!(index.unresolved().len(), 1);
        assert_eq!(index.unresolved()[0].target, SymbolKey::ordinary("_POINT"));
    }
}
