//! Structural code pattern matcher for JavaScript and TypeScript.
//!
//! Patterns are written in the target language's own syntax, with
//! `$UPPERCASE` metavariables binding the text they cover and `$$$`
//! ellipsis tokens absorbing runs of children. Rules compose patterns with
//! kind/regex/nth-child producers and relational filters (`inside`, `has`,
//! `follows`, `precedes`, `not`), compiled from a flat bytecode stream and
//! evaluated in a single pass per source.
//!
//! The crate is built to run embedded — including inside a WebAssembly
//! sandbox: matching performs no heap allocation, every capacity is fixed,
//! and all shared state lives in an explicit [`Engine`] value (the ABI
//! layer keeps one per thread).

pub mod abi;
pub mod algebra;
pub mod codec;
pub mod engine;
pub mod language;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod rules;
pub mod tree;
pub mod walk;

pub use engine::Engine;
pub use language::Lang;
pub use logging::init_logger;
pub use models::{Binding, Bindings, ByteRange, Match, MatchList, Point, Range};
pub use rules::{DecodeError, RuleSet, Severity};
pub use tree::ParsedTree;
