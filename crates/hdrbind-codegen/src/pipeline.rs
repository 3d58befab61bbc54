//! Pipeline
//!
//! Drives one run end to end: search path discovery, preprocessing and
//! parsing of the entry header, aggregation into the symbol table, freezing,
//! and emission. Only run-fatal conditions are errors; everything else ends
//! up in the [`RunReport`].

use crate::emitter::{EmittedCrate, Emitter};
use globset::{Glob, GlobSet, GlobSetBuilder};
use hdrbind_core::config::NamespaceMode;
use hdrbind_core::{Config, DiagnosticKind, Diagnostics, Error, Result};
use hdrbind_index::{SymbolTable, UnresolvedRef};
use hdrbind_parser::parse_translation_unit;
use hdrbind_parser::preprocessor::{
    HeaderResolver, SdkIncludeScan, SearchPathProvider, StaticSearchPaths,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Search paths from a configuration: the explicit list, then the SDK scan
pub struct ConfiguredSearchPaths<'a> {
    config: &'a Config,
}

impl<'a> ConfiguredSearchPaths<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

impl SearchPathProvider for ConfiguredSearchPaths<'_> {
    fn provide_search_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = StaticSearchPaths::new(self.config.search_paths.clone())
            .provide_search_paths()?;
        if let Some(root) = &self.config.sdk_root {
            paths.extend(SdkIncludeScan::new(root.clone()).provide_search_paths()?);
        }
        Ok(paths)
    }
}

/// Per-header summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderReport {
    pub path: PathBuf,
    /// Headers it includes directly
    pub includes: Vec<PathBuf>,
    /// Declarations the header defined
    pub declarations: usize,
    /// Module generated for it, if any
    pub module: Option<String>,
    /// Items in that module
    pub items: usize,
    /// Matched `exclude_headers`
    pub excluded: bool,
}

/// Machine-readable summary of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub entry: PathBuf,
    pub arch: String,
    pub namespace: NamespaceMode,
    /// Headers in dependency order
    pub headers: Vec<HeaderReport>,
    /// Symbols in the final index
    pub symbols: usize,
    pub unresolved: Vec<UnresolvedRef>,
    pub diagnostics: Diagnostics,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Other(e.to_string()))
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.count(kind)
    }

    pub fn header(&self, file_name: &str) -> Option<&HeaderReport> {
        self.headers
            .iter()
            .find(|h| h.path.file_name().map_or(false, |n| n == file_name))
    }
}

/// Everything a run produces
#[derive(Debug)]
pub struct RunOutput {
    pub bindings: EmittedCrate,
    pub report: RunReport,
}

/// One configured generation run
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run with the search paths the configuration names
    pub fn run(&self, entry: &Path) -> Result<RunOutput> {
        self.run_with(entry, &ConfiguredSearchPaths::new(&self.config))
    }

    /// Run with search paths from `provider`
    pub fn run_with(&self, entry: &Path, provider: &dyn SearchPathProvider) -> Result<RunOutput> {
        let profile = self.config.profile()?;
        let resolver = HeaderResolver::from_provider(provider)?;
        let excludes = build_globset(&self.config.parser.exclude_headers)?;

        info!(
            "Generating bindings for {} ({})",
            entry.display(),
            profile.name()
        );

        let unit = parse_translation_unit(
            entry,
            resolver,
            &profile,
            &self.config.parser,
            self.config.emit.parallel,
        )?;
        let mut diagnostics = unit.diagnostics;

        let mut table = SymbolTable::new(self.config.symbols.duplicate_policy);
        let mut headers = Vec::with_capacity(unit.headers.len());
        for header in unit.headers {
            let excluded = is_excluded(&excludes, &header.path);
            headers.push(HeaderReport {
                path: header.path.clone(),
                includes: Vec::new(),
                declarations: header.declarations.len(),
                module: None,
                items: 0,
                excluded,
            });
            if excluded {
                debug!("Excluding {}", header.path.display());
                continue;
            }

            table.add_header(&header.path);
            for included in &header.includes {
                table.add_dependency(&header.path, included);
            }
            for decl in header.declarations {
                table.insert(decl)?;
            }
        }

        let index = table.finalize();
        diagnostics.extend(index.diagnostics().clone());

        let entry_name = entry
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.display().to_string());
        let bindings = Emitter::new(&index, &profile, &self.config)
            .with_macros(&unit.macros)
            .with_entry(entry_name)
            .emit();
        diagnostics.extend(bindings.diagnostics.clone());

        for report in &mut headers {
            report.includes = index.dependencies(&report.path).to_vec();
            if let Some(module) = bindings.modules.iter().find(|m| m.header == report.path) {
                report.module = Some(module.name.clone());
                report.items = module.items;
            }
        }

        let report = RunReport {
            entry: entry.to_path_buf(),
            arch: profile.name().to_string(),
            namespace: self.config.emit.namespace,
            headers,
            symbols: index.len(),
            unresolved: index.unresolved().to_vec(),
            diagnostics,
        };
        info!(
            "Run finished: {} headers, {} symbols, {} diagnostics",
            report.headers.len(),
            report.symbols,
            report.diagnostics.len()
        );

        Ok(RunOutput { bindings, report })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid exclude pattern {}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid exclude patterns: {}", e)))
}

/// Patterns match either the full path or the file name
fn is_excluded(excludes: &GlobSet, path: &Path) -> bool {
    excludes.is_match(path) || path.file_name().map_or(false, |name| excludes.is_match(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclude_patterns() {
        let set = build_globset(&["winnt.h".to_string(), "**/shared/*.h".to_string()]).unwrap();
        assert!(is_excluded(&set, Path::new("/sdk/um/winnt.h")));
        assert!(is_excluded(&set, Path::new("/sdk/shared/minwindef.h")));
        assert!(!is_excluded(&set, Path::new("/sdk/um/fileapi.h")));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = build_globset(&["[".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_search_paths_are_fatal() {
        let pipeline = Pipeline::new(Config::default());
        let err = pipeline.run(Path::new("missing.h")).unwrap_err();
        assert!(matches!(err, Error::NoSearchPaths));
    }
}
