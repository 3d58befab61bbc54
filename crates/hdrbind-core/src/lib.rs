//! hdrbind Core
//!
//! Core types and interfaces shared by every stage of the hdrbind
//! header-to-bindings pipeline.

pub mod arch;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod location;
pub mod token;
pub mod types;

pub use arch::{ArchProfile, Architecture, MacroDefinition};
pub use config::Config;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use error::{Error, Result};
pub use location::Location;
pub use token::{Token, TokenKind};
pub use types::*;
