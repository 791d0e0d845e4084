#![allow(clippy::result_large_err)]
//! formulary-core: the formula language.
//!
//! Turns formula source text into an [`Expression`] tree and extracts the
//! references an expression makes without evaluating it.
//!
//! # Public API
//!
//! - [`parse()`] -- formula text to [`Expression`]
//! - [`parse_template()`] -- text with `${...}` interpolations to [`Template`]
//! - [`ParseError`] -- malformed input, with character position
//! - [`deps`] -- structural dependency extraction

pub mod ast;
pub mod deps;
pub mod error;
pub mod lexer;
pub mod parser;

// ── Convenience re-exports ───────────────────────────────────────────

pub use ast::{BinaryOp, Expression, Literal, Template, TemplatePart, UnaryOp};
pub use deps::{
    collect_referenced_entity_ids, collect_self_properties, collect_traversals,
    dependency_paths, Traversal, TraversalRoot,
};
pub use error::ParseError;
pub use parser::{parse, parse_template, MAX_NESTING};
