//! Bytecode: the instruction set, the serializable container, the
//! interpreter and its builtin table.

pub mod builtins;
pub mod bytecode;
mod frame;
pub mod instruction_set;
mod runtime;

pub use bytecode::{BYTECODE_MAGIC, BYTECODE_VERSION, Bytecode};
pub use instruction_set::Opcode;
pub use runtime::{AbortHandle, GLOBALS_SIZE, MAX_FRAMES, STACK_SIZE, VM};
