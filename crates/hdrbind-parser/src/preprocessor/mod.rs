//! C Preprocessor
//!
//! Walks the include graph depth-first from an entry header, evaluating
//! conditionals and expanding macros with one environment shared by every
//! header. Each header yields a [`HeaderUnit`]: its expanded text tokens
//! and the object-like macros it defined. Units are produced in dependency
//! order (included before includer).

pub mod conditional;
pub mod directive;
pub mod graph;
pub mod headers;
pub mod macros;

pub use conditional::ConditionalStack;
pub use directive::IncludeSpec;
pub use graph::{HeaderNode, HeaderState, IncludeGraph};
pub use headers::{HeaderResolver, SdkIncludeScan, SearchPathProvider, StaticSearchPaths};
pub use macros::{Macro, MacroEnv};

use crate::lexer::{logical_lines, tokenize};
use directive::DirectiveLine;
use hdrbind_core::{
    ArchProfile, Diagnostic, DiagnosticKind, Diagnostics, Error, Location, Result, Token,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Object-like macro with a non-empty body, a candidate constant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroConstant {
    pub name: String,
    pub tokens: Vec<Token>,
    pub line: u32,
}

/// Preprocessed form of one header
#[derive(Debug, Clone)]
pub struct HeaderUnit {
    pub path: PathBuf,
    /// Directly included headers
    pub includes: Vec<PathBuf>,
    /// Expanded text of active regions
    pub tokens: Vec<Token>,
    pub constants: Vec<MacroConstant>,
}

/// Result of preprocessing a whole translation unit
#[derive(Debug)]
pub struct PreprocessOutput {
    /// Headers in dependency order
    pub units: Vec<HeaderUnit>,
    /// Final state of the macro environment
    pub macros: MacroEnv,
    pub diagnostics: Diagnostics,
}

/// Read a header as text, tolerating a BOM and non-UTF-8 bytes
fn read_header(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_string())
}

/// Per-header scratch state
struct HeaderScope {
    path: PathBuf,
    cond: ConditionalStack,
    pending: Vec<Token>,
    tokens: Vec<Token>,
    constants: Vec<MacroConstant>,
}

impl HeaderScope {
    fn location(&self, line: u32) -> Location {
        Location::in_header(&self.path, line)
    }
}

/// Depth-first preprocessor over an include graph
pub struct Preprocessor {
    resolver: HeaderResolver,
    env: MacroEnv,
    graph: IncludeGraph,
    units: Vec<HeaderUnit>,
    diagnostics: Diagnostics,
}

impl Preprocessor {
    /// Create a preprocessor seeded with the profile's predefined macros
    pub fn new(resolver: HeaderResolver, profile: &ArchProfile) -> Self {
        Self {
            resolver,
            env: MacroEnv::from_profile(profile),
            graph: IncludeGraph::new(),
            units: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Preprocess from the entry header. Failing to read it is fatal.
    pub fn run(mut self, entry: &Path) -> Result<PreprocessOutput> {
        let path = entry
            .canonicalize()
            .map_err(|e| Error::fatal_io(entry, e))?;
        let source = read_header(&path).map_err(|e| Error::fatal_io(&path, e))?;

        info!("Preprocessing {}", path.display());
        self.process(&path, &source);
        info!(
            "Preprocessed {} headers, {} macros defined",
            self.units.len(),
            self.env.len()
        );

        Ok(PreprocessOutput {
            units: self.units,
            macros: self.env,
            diagnostics: self.diagnostics,
        })
    }

    fn process(&mut self, path: &Path, source: &str) {
        debug!("Entering {}", path.display());
        self.graph.enter(path);

        let mut scope = HeaderScope {
            path: path.to_path_buf(),
            cond: ConditionalStack::new(),
            pending: Vec::new(),
            tokens: Vec::new(),
            constants: Vec::new(),
        };

        for line in logical_lines(source) {
            match directive::parse_line(&line.text) {
                Some(directive) => self.directive(&mut scope, &directive, line.line),
                None => {
                    if scope.cond.is_active() {
                        scope.pending.extend(tokenize(&line.text, line.line));
                    }
                }
            }
        }

        self.flush(&mut scope);
        for open_line in scope.cond.drain_unterminated() {
            self.warn(
                DiagnosticKind::MalformedDirective,
                "unterminated conditional",
                scope.location(open_line),
            );
        }

        self.graph.finish(path);
        let includes = self
            .graph
            .node(path)
            .map(|n| n.includes.clone())
            .unwrap_or_default();
        debug!("Finished {}", path.display());
        self.units.push(HeaderUnit {
            path: scope.path,
            includes,
            tokens: scope.tokens,
            constants: scope.constants,
        });
    }

    fn directive(&mut self, scope: &mut HeaderScope, directive: &DirectiveLine, line: u32) {
        let loc = scope.location(line);
        match directive.name.as_str() {
            "if" => {
                let value = scope.cond.is_active() && self.eval_if(&directive.rest, &loc);
                scope.cond.push_if(value, line);
            }
            "ifdef" | "ifndef" => {
                let value = scope.cond.is_active() && {
                    let defined = match tokenize(&directive.rest, line).first().and_then(Token::as_ident) {
                        Some(name) => self.env.is_defined(name),
                        None => {
                            self.warn(
                                DiagnosticKind::MalformedDirective,
                                format!("#{} without a macro name", directive.name),
                                loc.clone(),
                            );
                            false
                        }
                    };
                    defined == (directive.name == "ifdef")
                };
                scope.cond.push_if(value, line);
            }
            "elif" => {
                let value = scope.cond.wants_condition() && self.eval_if(&directive.rest, &loc);
                if let Err(e) = scope.cond.elif(value) {
                    self.warn(DiagnosticKind::MalformedDirective, e.to_string(), loc);
                }
            }
            "else" => {
                if let Err(e) = scope.cond.else_branch() {
                    self.warn(DiagnosticKind::MalformedDirective, e.to_string(), loc);
                }
            }
            "endif" => {
                if let Err(e) = scope.cond.endif() {
                    self.warn(DiagnosticKind::MalformedDirective, e.to_string(), loc);
                }
            }
            _ if !scope.cond.is_active() => {}
            name => {
                // text before a directive sees the macro state before it
                self.flush(scope);
                match name {
                    "define" => self.define(scope, &directive.rest, line),
                    "undef" => {
                        if let Some(name) = directive.rest.split_whitespace().next() {
                            self.env.undefine(name);
                            scope.constants.retain(|c| c.name != name);
                        }
                    }
                    "include" | "include_next" | "import" => {
                        self.include(scope, &directive.rest, &loc)
                    }
                    "error" => self.warn(
                        DiagnosticKind::ErrorDirective,
                        format!("#error {}", directive.rest),
                        loc,
                    ),
                    "pragma" | "warning" | "line" | "ident" | "" => {
                        debug!("Ignoring #{} {} at {}", name, directive.rest, loc);
                    }
                    other => self.warn(
                        DiagnosticKind::MalformedDirective,
                        format!("unknown directive #{}", other),
                        loc,
                    ),
                }
            }
        }
    }

    fn eval_if(&mut self, rest: &str, loc: &Location) -> bool {
        let outcome = self.env.evaluate_condition(&tokenize(rest, loc.line));
        for name in outcome.cycles {
            self.warn(
                DiagnosticKind::MacroCycle,
                format!("macro {} expands into itself", name),
                loc.clone(),
            );
        }
        match outcome.value {
            Ok(value) => value,
            Err(e) => {
                self.warn(
                    DiagnosticKind::UnsupportedCondition,
                    format!("#if {}: {}; treated as false", rest, e),
                    loc.clone(),
                );
                false
            }
        }
    }

    fn define(&mut self, scope: &mut HeaderScope, rest: &str, line: u32) {
        let spec = match directive::parse_define(rest, line) {
            Some(spec) => spec,
            None => {
                self.warn(
                    DiagnosticKind::MalformedDirective,
                    format!("malformed #define {}", rest),
                    scope.location(line),
                );
                return;
            }
        };

        let constant = (spec.params.is_none() && !spec.body.is_empty()).then(|| MacroConstant {
            name: spec.name.clone(),
            tokens: spec.body.clone(),
            line,
        });
        let mac = Macro {
            name: spec.name,
            params: spec.params,
            variadic: spec.variadic,
            body: spec.body,
            header: Some(scope.path.clone()),
            line,
        };

        if self.env.define(mac) {
            if let Some(constant) = constant {
                scope.constants.retain(|c| c.name != constant.name);
                scope.constants.push(constant);
            }
        }
    }

    fn include(&mut self, scope: &mut HeaderScope, rest: &str, loc: &Location) {
        let spec = match directive::parse_include(rest, loc.line) {
            Some(IncludeSpec::Computed(tokens)) => {
                let expansion = self.env.expand(&tokens);
                directive::include_from_tokens(&expansion.tokens)
            }
            other => other,
        };
        let spec = match spec {
            Some(spec) => spec,
            None => {
                self.warn(
                    DiagnosticKind::MalformedDirective,
                    format!("malformed #include {}", rest),
                    loc.clone(),
                );
                return;
            }
        };
        let name = spec.path().unwrap_or(rest).to_string();

        let resolved = match self.resolver.resolve(&spec, &scope.path) {
            Some(path) => path,
            None => {
                self.warn(
                    DiagnosticKind::HeaderReadFailure,
                    format!("cannot find header {}; skipped", name),
                    loc.clone(),
                );
                return;
            }
        };
        let canonical = match resolved.canonicalize() {
            Ok(path) => path,
            Err(e) => {
                self.warn(
                    DiagnosticKind::HeaderReadFailure,
                    format!("cannot access {}: {}; skipped", resolved.display(), e),
                    loc.clone(),
                );
                return;
            }
        };

        self.graph.add_edge(&scope.path, &canonical);
        match self.graph.state(&canonical) {
            HeaderState::Done => debug!("Already processed {}", canonical.display()),
            HeaderState::InProgress => {
                let cycle = self
                    .graph
                    .cycle_through(&canonical)
                    .iter()
                    .map(|p| file_label(p))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                self.warn(
                    DiagnosticKind::IncludeCycle,
                    format!("include cycle {}; re-entry skipped", cycle),
                    loc.clone(),
                );
            }
            HeaderState::Unvisited => match read_header(&canonical) {
                Ok(source) => self.process(&canonical, &source),
                Err(e) => self.warn(
                    DiagnosticKind::HeaderReadFailure,
                    format!("cannot read {}: {}; skipped", canonical.display(), e),
                    loc.clone(),
                ),
            },
        }
    }

    /// Expand buffered text lines into the header's token stream
    fn flush(&mut self, scope: &mut HeaderScope) {
        if scope.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut scope.pending);
        let expansion = self.env.expand(&pending);
        for name in expansion.cycles {
            let line = pending
                .iter()
                .find(|t| t.is_ident(&name))
                .map_or(pending[0].line, |t| t.line);
            self.warn(
                DiagnosticKind::MacroCycle,
                format!("macro {} expands into itself; left unexpanded", name),
                scope.location(line),
            );
        }
        scope.tokens.extend(expansion.tokens);
    }

    fn warn(&mut self, kind: DiagnosticKind, message: impl Into<String>, loc: Location) {
        self.diagnostics.push(Diagnostic::warning(kind, message).at(loc));
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
