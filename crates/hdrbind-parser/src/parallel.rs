//! Parallel declaration parsing using rayon
//!
//! Preprocessing is inherently sequential because every header shares one
//! macro environment. Once each header's tokens are expanded, the headers are
//! independent and are parsed in parallel. Output order always follows the
//! input order.

use crate::decl::parse_declarations;
use crate::preprocessor::HeaderUnit;
use crate::ParsedHeader;
use hdrbind_core::config::ParserConfig;
use hdrbind_core::{DeclKind, Declaration, Diagnostics, Location, Namespace};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Declaration parser over preprocessed headers
pub struct ParallelParser<'c> {
    config: &'c ParserConfig,
    parallel: bool,
}

impl<'c> ParallelParser<'c> {
    /// Create a parallel parser
    pub fn new(config: &'c ParserConfig) -> Self {
        Self {
            config,
            parallel: true,
        }
    }

    /// Parse on the calling thread only
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Parse every unit, returning headers and their diagnostics in input order
    pub fn parse_units(&self, units: &[HeaderUnit]) -> Vec<(ParsedHeader, Diagnostics)> {
        let total = units.len();
        let processed = AtomicUsize::new(0);

        let parse_one = |unit: &HeaderUnit| {
            let parsed = self.parse_unit(unit);
            let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
            if current % 50 == 0 || current == total {
                debug!("Parsed {}/{} headers", current, total);
            }
            parsed
        };

        let results: Vec<_> = if self.parallel {
            units.par_iter().map(parse_one).collect()
        } else {
            units.iter().map(parse_one).collect()
        };

        info!(
            "Parsed {} declarations from {} headers",
            results.iter().map(|(h, _)| h.declarations.len()).sum::<usize>(),
            total
        );
        results
    }

    /// Parse one unit and merge in its macro constants, ordered by line
    pub fn parse_unit(&self, unit: &HeaderUnit) -> (ParsedHeader, Diagnostics) {
        let result = parse_declarations(&unit.tokens, &unit.path, self.config);

        let mut declarations = result.declarations;
        declarations.extend(unit.constants.iter().map(|c| Declaration {
            name: c.name.clone(),
            namespace: Namespace::Ordinary,
            header: unit.path.clone(),
            location: Location::in_header(&unit.path, c.line),
            kind: DeclKind::Constant(c.tokens.clone()),
        }));
        declarations.sort_by_key(|d| d.location.line);

        (
            ParsedHeader {
                path: unit.path.clone(),
                includes: unit.includes.clone(),
                declarations,
            },
            result.diagnostics,
        )
    }
}
