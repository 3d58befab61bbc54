//! Configuration types

use crate::arch::{ArchProfile, Architecture, MacroDefinition};
use crate::error::{Error, Result};
use crate::types::IntType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// hdrbind configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target architecture name (`x86`, `x86-64`, `arm64`, `x86-64-gnu`)
    pub arch: String,

    /// Extra predefined macros, `NAME` or `NAME=VALUE`
    pub defines: Vec<String>,

    /// Include search directories, searched in order
    pub search_paths: Vec<PathBuf>,

    /// Windows Kits root to scan for include directories
    pub sdk_root: Option<PathBuf>,

    /// Parser configuration
    pub parser: ParserConfig,

    /// Symbol table configuration
    pub symbols: SymbolConfig,

    /// Constant evaluation configuration
    pub constants: ConstantConfig,

    /// Emission configuration
    pub emit: EmitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            arch: Architecture::default().name().to_string(),
            defines: vec![],
            search_paths: vec![],
            sdk_root: None,
            parser: ParserConfig::default(),
            symbols: SymbolConfig::default(),
            constants: ConstantConfig::default(),
            emit: EmitConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Resolve the architecture profile including extra defines
    pub fn profile(&self) -> Result<ArchProfile> {
        let arch: Architecture = self.arch.parse()?;
        let defines = self
            .defines
            .iter()
            .map(|d| MacroDefinition::parse(d))
            .collect::<Result<Vec<_>>>()?;
        Ok(arch.profile().with_defines(defines))
    }
}

/// Parser configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Identifiers dropped wherever they appear in a declaration
    pub ignored_qualifiers: Vec<String>,

    /// Drop SAL annotations such as `_In_` and `_Out_writes_(n)`
    pub skip_sal_annotations: bool,

    /// Glob patterns of headers that are preprocessed but emit nothing
    pub exclude_headers: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            ignored_qualifiers: [
                "volatile",
                "__restrict",
                "restrict",
                "__unaligned",
                "__ptr32",
                "__ptr64",
                "__forceinline",
                "DECLSPEC_IMPORT",
                "DECLSPEC_NORETURN",
                "DECLSPEC_ALLOCATOR",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            skip_sal_annotations: true,
            exclude_headers: vec![],
        }
    }
}

/// What to do when two headers declare the same symbol differently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the first registration, warn about later ones
    #[default]
    FirstWins,
    /// Replace with the latest registration, warn
    LastWins,
    /// Abort the run
    Error,
}

/// Symbol table configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    pub duplicate_policy: DuplicatePolicy,
}

/// Constant evaluation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantConfig {
    /// Type of an unsuffixed literal that fits it
    pub default_int: IntType,
}

impl Default for ConstantConfig {
    fn default() -> Self {
        Self {
            default_int: IntType::I32,
        }
    }
}

/// How the aggregator module exposes per-header modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamespaceMode {
    /// Re-export every symbol into one namespace
    #[default]
    Flat,
    /// Keep symbols qualified by their header module
    PerHeader,
}

/// Emission configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitConfig {
    pub namespace: NamespaceMode,

    /// Package name written to the generated manifest
    pub crate_name: String,

    /// Package version written to the generated manifest
    pub crate_version: String,

    /// Render modules on the rayon thread pool
    pub parallel: bool,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            namespace: NamespaceMode::Flat,
            crate_name: "bindings".to_string(),
            crate_version: "0.1.0".to_string(),
            parallel: true,
        }
    }
}
