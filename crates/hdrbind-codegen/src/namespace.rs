//! Namespace policies
//!
//! Decide how the aggregator `lib.rs` exposes per-header modules.

use hdrbind_core::config::NamespaceMode;

/// How the generated crate root exposes its modules
pub trait NamespacePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Crate root lines for the given modules, in order
    fn aggregate(&self, modules: &[String]) -> Vec<String>;
}

/// Re-exports every module's items at the crate root, the way C sees one
/// global namespace. Two modules defining the same name make that name
/// ambiguous at the root; it stays reachable through its module.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatNamespace;

impl NamespacePolicy for FlatNamespace {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn aggregate(&self, modules: &[String]) -> Vec<String> {
        let mut lines: Vec<String> = modules.iter().map(|m| format!("pub mod {};", m)).collect();
        if !modules.is_empty() {
            lines.push(String::new());
        }
        lines.extend(modules.iter().map(|m| format!("pub use {}::*;", m)));
        lines
    }
}

/// Keeps items qualified by their header module
#[derive(Debug, Clone, Copy, Default)]
pub struct PerHeaderNamespace;

impl NamespacePolicy for PerHeaderNamespace {
    fn name(&self) -> &'static str {
        "per-header"
    }

    fn aggregate(&self, modules: &[String]) -> Vec<String> {
        modules.iter().map(|m| format!("pub mod {};", m)).collect()
    }
}

/// Policy selected by configuration
pub fn policy_for(mode: NamespaceMode) -> Box<dyn NamespacePolicy> {
    match mode {
        NamespaceMode::Flat => Box::new(FlatNamespace),
        NamespaceMode::PerHeader => Box::new(PerHeaderNamespace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn modules() -> Vec<String> {
        vec!["minwindef".to_string(), "fileapi".to_string()]
    }

    #[test]
    fn test_flat_reexports_every_module() {
        assert_eq!(
            FlatNamespace.aggregate(&modules()),
            vec![
                "pub mod minwindef;",
                "pub mod fileapi;",
                "",
                "pub use minwindef::*;",
                "pub use fileapi::*;",
            ]
        );
    }

    #[test]
    fn test_per_header_only_declares_modules() {
        let policy = policy_for(NamespaceMode::PerHeader);
        assert_eq!(policy.name(), "per-header");
        assert_eq!(
            policy.aggregate(&modules()),
            vec!["pub mod minwindef;", "pub mod fileapi;"]
        );
    }
}
