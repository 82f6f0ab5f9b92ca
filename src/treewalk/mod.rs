//! The tree-walking evaluator: a second, simpler front end and runtime for the same surface
//! language the bytecode compiler and VM implement, sharing only the scanner and token types.
//!
//! `ast` — the parsed tree, each expression tagged with a small id for the resolver's side
//! table. `parser` — recursive-descent, mirroring `compiler.rs`'s grammar. `resolver` —
//! static scope-distance analysis, the tree-walker's analogue of locals/upvalues resolution.
//! `environment` — the runtime scope chain. `value`/`interpreter` — the runtime values and
//! the evaluator that walks the tree against them.

pub mod ast;
pub mod environment;
pub mod interpreter;
pub mod parser;
pub mod resolver;
pub mod value;

pub use interpreter::{Interpreter, TreeWalkError};
