//! zephyr-core: an embeddable, dynamically-typed scripting runtime.
//!
//! The pipeline has three stages: a [`compiler`] that lowers a
//! host-supplied AST ([`ast`]) to compact stack bytecode, a serializable
//! bytecode container ([`vm::Bytecode`]), and a stack [`vm::VM`] that
//! executes it over the boxed [`values`] object model. The [`api`] module
//! is the embedding surface: bind host values, compile, run with
//! cancellation, read results back.

pub mod api;
pub mod ast;
pub mod compiler;
pub mod errors;
pub mod source;
pub mod token;
pub mod values;
pub mod vm;
