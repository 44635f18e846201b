//! Semantic analysis and compile-time evaluation for the Sable language.
//!
//! The front end parses source into the resolved AST in [`ast`]; the
//! loader half in [`loader`] wires modules, overloads, and the
//! primitives module; the [`analyzer`] propagates abstract (type,
//! tempness) values; the [`evaluator`] executes the same AST with full
//! value semantics; and [`invoketables`] memoizes every specialized
//! invocation for the code generator to consume.

// Core data model
pub mod ast;
pub mod error;
pub mod objects;
pub mod span;
pub mod types;

// Target layout (stand-in for the codegen backend's data layout)
pub mod layout;

// Name resolution
pub mod env;

// Pattern/unification kernel
pub mod patterns;

// Overload resolution and the invocation cache
pub mod invoketables;
pub mod matchinvoke;

// The two-mode executor
pub mod analyzer;
pub mod analyzer_ops;
pub mod evaluator;
pub mod evaluator_ops;

// Support passes
pub mod intrinsics;
pub mod lambdas;
pub mod literals;
pub mod loader;
pub mod primops;
pub mod printer;

// Process-wide compiler state
pub mod state;

pub use error::{CompileError, Diagnostic};
pub use state::CompilerState;
