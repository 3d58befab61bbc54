//! Collected non-fatal diagnostics
//!
//! Every issue that degrades part of a run is recorded here as well as logged,
//! so tooling can compare diagnostics between runs.

use crate::location::Location;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Category of a non-fatal issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A non-entry header could not be found or read
    HeaderReadFailure,
    /// A macro expanded into itself
    MacroCycle,
    /// A header included itself directly or transitively
    IncludeCycle,
    /// A construct was recognized but cannot be translated (unions)
    UnsupportedDeclaration,
    /// Two headers declared the same symbol differently
    DuplicateSymbol,
    /// A named type does not exist in the final symbol table
    UnresolvedReference,
    /// A constant body is outside the evaluable subset
    UnevaluatedConstant,
    MalformedDirective,
    MalformedDeclaration,
    /// `#error` in an active region
    ErrorDirective,
    /// `#if` expression outside the evaluable subset
    UnsupportedCondition,
    /// A type could not be mapped and was replaced by a marker
    UnsupportedType,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::HeaderReadFailure => "header-read-failure",
            DiagnosticKind::MacroCycle => "macro-cycle",
            DiagnosticKind::IncludeCycle => "include-cycle",
            DiagnosticKind::UnsupportedDeclaration => "unsupported-declaration",
            DiagnosticKind::DuplicateSymbol => "duplicate-symbol",
            DiagnosticKind::UnresolvedReference => "unresolved-reference",
            DiagnosticKind::UnevaluatedConstant => "unevaluated-constant",
            DiagnosticKind::MalformedDirective => "malformed-directive",
            DiagnosticKind::MalformedDeclaration => "malformed-declaration",
            DiagnosticKind::ErrorDirective => "error-directive",
            DiagnosticKind::UnsupportedCondition => "unsupported-condition",
            DiagnosticKind::UnsupportedType => "unsupported-type",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A single non-fatal issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
    /// Symbol the issue is about, when there is one
    pub symbol: Option<String>,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            location: None,
            symbol: None,
        }
    }

    pub fn info(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            ..Self::warning(kind, message)
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn for_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{}: ", loc)?;
        }
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Ordered diagnostic sink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a diagnostic
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => warn!("{}", diagnostic),
            Severity::Info => info!("{}", diagnostic),
        }
        self.items.push(diagnostic);
    }

    /// Append already-logged diagnostics from another sink
    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_in_order() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning(DiagnosticKind::IncludeCycle, "a.h -> b.h -> a.h"));
        diags.push(
            Diagnostic::info(DiagnosticKind::UnevaluatedConstant, "FOO")
                .at(Location::new("a.h", 3))
                .for_symbol("FOO"),
        );

        assert_eq!(diags.len(), 2);
        assert_eq!(diags.count(DiagnosticKind::IncludeCycle), 1);
        let last = diags.iter().last().unwrap();
        assert_eq!(last.to_string(), "a.h:3: [unevaluated-constant] FOO");
    }

    #[test]
    fn test_serializes_as_list() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning(DiagnosticKind::MacroCycle, "A"));
        let json = serde_json::to_value(&diags).unwrap();
        assert_eq!(json[0]["kind"], "macro_cycle");
        assert_eq!(json[0]["severity"], "warning");
    }
}
