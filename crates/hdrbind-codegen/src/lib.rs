//! hdrbind Codegen
//!
//! Turns the frozen symbol index into a Rust bindings crate and drives whole
//! runs through [`Pipeline`].
//!
//! ## Modules
//!
//! - `naming` - Keyword escaping, module names and tag name clashes
//! - `namespace` - How the crate root exposes per-header modules
//! - `emitter` - Module rendering on the rayon pool
//! - `manifest` - `Cargo.toml` of the generated crate
//! - `pipeline` - Parse, aggregate, freeze, emit and report

pub mod emitter;
pub mod manifest;
pub mod namespace;
pub mod naming;
pub mod pipeline;

pub use emitter::{EmittedCrate, Emitter, OutputModule};
pub use namespace::{FlatNamespace, NamespacePolicy, PerHeaderNamespace};
pub use pipeline::{ConfiguredSearchPaths, HeaderReport, Pipeline, RunOutput, RunReport};
