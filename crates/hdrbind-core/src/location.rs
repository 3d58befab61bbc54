//! Source code location types

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Represents a location in a header file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// File path
    pub file: String,
    /// Line (1-based)
    pub line: u32,
}

impl Location {
    /// Create a new location
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Create a location from a header path
    pub fn in_header(path: &Path, line: u32) -> Self {
        Self::new(path.display().to_string(), line)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
