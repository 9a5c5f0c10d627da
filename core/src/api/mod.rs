//! Host embedding surface: scripts, compiled programs, variables,
//! cancellation and one-shot evaluation.

mod context;
mod eval;
mod script;
mod variable;

pub use context::Context;
pub use eval::eval;
pub use script::{Compiled, Script};
pub use variable::Variable;
