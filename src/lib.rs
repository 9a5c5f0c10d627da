//! Zephyr - an embeddable, dynamically-typed scripting language
//!
//! # Overview
//!
//! Zephyr is a small scripting language for hosting user-defined logic
//! inside Rust applications: a single-pass compiler lowers a parsed
//! program to compact stack bytecode, and a register-free virtual machine
//! executes it over a uniform boxed value model. Common use cases include:
//!
//! - configuration and automation scripts
//! - data transformations and mappings
//! - business rules evaluated with resource budgets and cancellation
//!
//! # Quick Start
//!
//! ```
//! use zephyr::api::{Context, Script};
//! use zephyr::ast;
//! use zephyr::token::Token;
//!
//! // Programs arrive as ASTs from a parser; here, `out := a + b`.
//! let program = ast::File {
//!     stmts: vec![ast::Stmt::Assign(ast::AssignStmt {
//!         lhs: vec![ast::Expr::Ident(ast::Ident { name: "out".into(), name_pos: 1 })],
//!         rhs: vec![ast::Expr::BinaryExpr(ast::BinaryExpr {
//!             lhs: Box::new(ast::Expr::Ident(ast::Ident { name: "a".into(), name_pos: 8 })),
//!             rhs: Box::new(ast::Expr::Ident(ast::Ident { name: "b".into(), name_pos: 12 })),
//!             token: Token::Add,
//!             token_pos: 10,
//!         })],
//!         token: Token::Define,
//!         token_pos: 5,
//!     })],
//! };
//!
//! let mut script = Script::new(program);
//! script.add("a", 19i64);
//! script.add("b", 23i64);
//!
//! let compiled = script.run_context(&Context::background()).unwrap();
//! assert_eq!(compiled.get("out").unwrap().int(), 42);
//! ```
//!
//! # Resource control
//!
//! Runs take a [`api::Context`] for cancellation and deadlines, and an
//! allocation budget (`Script::set_max_allocs`) bounds how many composite
//! values one execution may create.

pub use zephyr_core::api;
pub use zephyr_core::ast;
pub use zephyr_core::compiler;
pub use zephyr_core::errors;
pub use zephyr_core::source;
pub use zephyr_core::token;
pub use zephyr_core::values;
pub use zephyr_core::vm;

pub use zephyr_core::api::{Compiled, Context, Script, Variable, eval};
pub use zephyr_core::errors::Error;
pub use zephyr_core::values::Value;
