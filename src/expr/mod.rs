//! Config expression mini-language: syntax tree, parser and interpreter.
//!
//! Expressions are parsed once at load time and evaluated against explicit bindings; nothing is
//! ever evaluated as host source text.

pub mod ast;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod term;

pub use ast::{Expression, Lambda};
pub use interpreter::{call_with_data, intrinsic, Interpreter, INTRINSICS};
pub use lexer::SyntaxError;
pub use parser::parse_expression;
pub use term::{value_truthy, Callable, Closure, EvalError, Namespace, NativeFunction, Term};
