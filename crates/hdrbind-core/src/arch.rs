//! Architecture profiles
//!
//! A profile fixes pointer and `long` widths and the macros a compiler for
//! that target predefines, so `#ifdef _WIN64` style guards in platform
//! headers take the same branch they would under the real toolchain.

use crate::error::{Error, Result};
use crate::types::Primitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported target architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Architecture {
    /// 32-bit Windows (ILP32)
    X86,
    /// 64-bit Windows (LLP64)
    #[default]
    X86_64,
    /// 64-bit ARM Windows (LLP64)
    Arm64,
    /// 64-bit GNU/Linux (LP64)
    X86_64Gnu,
}

impl Architecture {
    pub fn all() -> &'static [Architecture] {
        &[
            Architecture::X86,
            Architecture::X86_64,
            Architecture::Arm64,
            Architecture::X86_64Gnu,
        ]
    }

    /// Name used in configuration and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86-64",
            Architecture::Arm64 => "arm64",
            Architecture::X86_64Gnu => "x86-64-gnu",
        }
    }

    /// Get architecture-specific predefined macros
    pub fn predefined_macros(&self) -> Vec<MacroDefinition> {
        match self {
            Architecture::X86 => vec![
                MacroDefinition::defined("_WIN32"),
                MacroDefinition::with_value("_M_IX86", "600"),
                MacroDefinition::defined("_X86_"),
                MacroDefinition::with_value("_MSC_VER", "1900"),
            ],
            Architecture::X86_64 => vec![
                MacroDefinition::defined("_WIN32"),
                MacroDefinition::defined("_WIN64"),
                MacroDefinition::with_value("_M_X64", "100"),
                MacroDefinition::with_value("_M_AMD64", "100"),
                MacroDefinition::defined("_AMD64_"),
                MacroDefinition::with_value("_MSC_VER", "1900"),
            ],
            Architecture::Arm64 => vec![
                MacroDefinition::defined("_WIN32"),
                MacroDefinition::defined("_WIN64"),
                MacroDefinition::defined("_M_ARM64"),
                MacroDefinition::defined("_ARM64_"),
                MacroDefinition::with_value("_MSC_VER", "1900"),
            ],
            Architecture::X86_64Gnu => vec![
                MacroDefinition::defined("__x86_64__"),
                MacroDefinition::defined("__amd64__"),
                MacroDefinition::with_value("__LP64__", "1"),
                MacroDefinition::with_value("__GNUC__", "12"),
            ],
        }
    }

    /// Build the full profile for this architecture
    pub fn profile(&self) -> ArchProfile {
        let (pointer_width, long_width) = match self {
            Architecture::X86 => (32, 32),
            Architecture::X86_64 | Architecture::Arm64 => (64, 32),
            Architecture::X86_64Gnu => (64, 64),
        };
        let msvc = !matches!(self, Architecture::X86_64Gnu);
        ArchProfile {
            arch: *self,
            pointer_width,
            long_width,
            wchar: if msvc { Primitive::UInt16 } else { Primitive::Int32 },
            long_double_width: if msvc { Some(64) } else { None },
            predefined: self.predefined_macros(),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "x86" | "i386" | "i686" | "win32" => Ok(Architecture::X86),
            "x86-64" | "x86_64" | "x64" | "amd64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            "x86-64-gnu" | "x86_64-linux-gnu" => Ok(Architecture::X86_64Gnu),
            _ => Err(Error::UnknownArchitecture(s.to_string())),
        }
    }
}

/// A predefined macro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroDefinition {
    pub name: String,
    pub value: String,
}

impl MacroDefinition {
    /// Create a macro that is simply defined (expands to `1`)
    pub fn defined(name: &str) -> Self {
        Self::with_value(name, "1")
    }

    /// Create a macro with a specific value
    pub fn with_value(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Parse a `-D` style definition: `NAME` or `NAME=VALUE`
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, value) = match spec.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (spec.trim(), "1"),
        };
        let valid = name
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::Config(format!("invalid macro definition: {}", spec)));
        }
        Ok(Self::with_value(name, value))
    }
}

/// Immutable per-run target description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchProfile {
    pub arch: Architecture,
    /// Pointer width in bits
    pub pointer_width: u32,
    /// Width of C `long` in bits
    pub long_width: u32,
    /// Representation of `wchar_t`
    pub wchar: Primitive,
    /// Width of `long double` when it can be expressed, else `None`
    pub long_double_width: Option<u32>,
    /// Macros defined before any header is read
    pub predefined: Vec<MacroDefinition>,
}

impl ArchProfile {
    pub fn name(&self) -> &'static str {
        self.arch.name()
    }

    /// Add extra predefined macros, replacing same-named profile macros
    pub fn with_defines(mut self, defines: impl IntoIterator<Item = MacroDefinition>) -> Self {
        for def in defines {
            self.predefined.retain(|m| m.name != def.name);
            self.predefined.push(def);
        }
        self
    }
}

impl Default for ArchProfile {
    fn default() -> Self {
        Architecture::default().profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_architecture() {
        assert_eq!("x86-64".parse::<Architecture>().unwrap(), Architecture::X86_64);
        assert_eq!("AMD64".parse::<Architecture>().unwrap(), Architecture::X86_64);
        assert_eq!("x86".parse::<Architecture>().unwrap(), Architecture::X86);
        assert!(matches!(
            "sparc".parse::<Architecture>(),
            Err(Error::UnknownArchitecture(_))
        ));
    }

    #[test]
    fn test_profile_widths() {
        let win64 = Architecture::X86_64.profile();
        assert_eq!(win64.pointer_width, 64);
        assert_eq!(win64.long_width, 32);

        let gnu = Architecture::X86_64Gnu.profile();
        assert_eq!(gnu.long_width, 64);

        let win32 = Architecture::X86.profile();
        assert_eq!(win32.pointer_width, 32);
    }

    #[test]
    fn test_win64_markers() {
        let names: Vec<_> = Architecture::X86_64
            .predefined_macros()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert!(names.contains(&"_WIN64".to_string()));
        assert!(names.contains(&"_M_AMD64".to_string()));
    }

    #[test]
    fn test_with_defines_overrides() {
        let profile = Architecture::X86_64.profile().with_defines(vec![
            MacroDefinition::parse("_MSC_VER=1930").unwrap(),
            MacroDefinition::parse("UNICODE").unwrap(),
        ]);
        let msc: Vec<_> = profile
            .predefined
            .iter()
            .filter(|m| m.name == "_MSC_VER")
            .collect();
        assert_eq!(msc.len(), 1);
        assert_eq!(msc[0].value, "1930");
        assert!(profile.predefined.iter().any(|m| m.name == "UNICODE" && m.value == "1"));
    }

    #[test]
    fn test_invalid_define() {
        assert!(MacroDefinition::parse("1BAD=2").is_err());
    }
}
