//! hdrbind Parser
//!
//! Turns a C header and everything it includes into per-header declaration
//! lists.
//!
//! ## Modules
//!
//! - `lexer` - Logical lines and preprocessing tokens
//! - `expr` - Integer constant expressions for `#if` and array bounds
//! - `preprocessor` - Include resolution, conditionals and macro expansion
//! - `decl` - Declaration parser over expanded tokens using tree-sitter-c
//! - `parallel` - Parallel per-header parsing using rayon

pub mod decl;
pub mod expr;
pub mod lexer;
pub mod parallel;
pub mod preprocessor;

use hdrbind_core::config::ParserConfig;
use hdrbind_core::{ArchProfile, Declaration, Diagnostics, Result};
use parallel::ParallelParser;
use preprocessor::{HeaderResolver, MacroEnv, Preprocessor};
use std::path::{Path, PathBuf};

/// Declarations parsed from one token stream
#[derive(Debug, Default, Clone)]
pub struct ParseResult {
    pub header: PathBuf,
    pub declarations: Vec<Declaration>,
    /// Parse errors (non-fatal)
    pub diagnostics: Diagnostics,
}

/// Declarations a header defines, with its direct includes
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub path: PathBuf,
    pub includes: Vec<PathBuf>,
    /// Declarations in source order
    pub declarations: Vec<Declaration>,
}

/// Everything parsed from one entry header
#[derive(Debug)]
pub struct TranslationUnit {
    /// Headers in dependency order
    pub headers: Vec<ParsedHeader>,
    pub macros: MacroEnv,
    pub diagnostics: Diagnostics,
}

/// Preprocess `entry` and parse the declarations of every reached header.
///
/// Only an unreadable entry header is an error; every other problem is
/// recorded in the returned diagnostics.
pub fn parse_translation_unit(
    entry: &Path,
    resolver: HeaderResolver,
    profile: &ArchProfile,
    config: &ParserConfig,
    parallel: bool,
) -> Result<TranslationUnit> {
    let output = Preprocessor::new(resolver, profile).run(entry)?;

    let mut parser = ParallelParser::new(config);
    if !parallel {
        parser = parser.sequential();
    }

    let mut diagnostics = output.diagnostics;
    let mut headers = Vec::with_capacity(output.units.len());
    for (header, header_diagnostics) in parser.parse_units(&output.units) {
        diagnostics.extend(header_diagnostics);
        headers.push(header);
    }

    Ok(TranslationUnit {
        headers,
        macros: output.macros,
        diagnostics,
    })
}

#[cfg(test)]
mod tests;
