//! hdrbind Analysis
//!
//! Semantic passes over the frozen symbol index:
//! - Type mapping from the C type model to Rust type syntax
//! - Integer constant evaluation with C typing rules

pub mod consteval;
pub mod typemap;

pub use consteval::{ConstantEvaluator, Evaluated, Evaluation, Notation, Unevaluated};
pub use typemap::{integer_type, qualify, ItemPath, NameResolver, TypeMapper, Unsupported, C_VOID};
