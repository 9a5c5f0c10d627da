//! Callable value kinds: compiled script functions, closures, and the two
//! flavors of native functions (interned builtins and host-registered
//! functions).

use core::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::errors::RuntimeError;
use crate::source::Pos;
use crate::values::Value;

/// The signature shared by all native functions.
pub type NativeFn = fn(&[Value]) -> Result<Value, RuntimeError>;

/// A function lowered to bytecode by the compiler.
///
/// Immutable once built; shared between the constant pool, closures, and
/// call frames through `Rc`.
#[derive(Clone, Default)]
pub struct CompiledFunction {
    /// Packed instruction stream (see `vm::instruction_set`).
    pub instructions: Vec<u8>,
    /// Local slots to reserve on call, parameters included.
    pub num_locals: usize,
    pub num_parameters: usize,
    /// When set, the last parameter collects surplus arguments.
    pub variadic: bool,
    /// Instruction offset → source position of the originating node.
    pub source_map: HashMap<usize, Pos>,
}

impl PartialEq for CompiledFunction {
    fn eq(&self, other: &Self) -> bool {
        self.instructions == other.instructions
            && self.num_locals == other.num_locals
            && self.num_parameters == other.num_parameters
            && self.variadic == other.variadic
            && self.source_map == other.source_map
    }
}

impl fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("instructions", &self.instructions.len())
            .field("num_locals", &self.num_locals)
            .field("num_parameters", &self.num_parameters)
            .field("variadic", &self.variadic)
            .finish()
    }
}

impl CompiledFunction {
    /// The source position recorded for the instruction at `offset`.
    pub fn source_pos(&self, offset: usize) -> Pos {
        self.source_map.get(&offset).copied().unwrap_or(0)
    }
}

/// A compiled function bound to its captured free-variable cells.
///
/// Each cell is shared storage: other closures (and, while it is still
/// live, the defining frame) may alias the same cell, and writes through
/// any alias are visible to all of them.
#[derive(Clone)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Rc<core::cell::RefCell<Value>>>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("func", &self.func)
            .field("free", &self.free.len())
            .finish()
    }
}

/// One of the interpreter's interned native builtins.
///
/// The builtin table (`vm::builtins`) is indexed by `GetBuiltin` operands,
/// so both the set and the order are part of the bytecode ABI.
pub struct BuiltinFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction")
            .field("name", &self.name)
            .finish()
    }
}

/// A host-registered native function.
///
/// `module` names the builtin module the function was registered under, if
/// any; it is what makes the function re-bindable when bytecode referencing
/// it is decoded on another host. Functions without a module attribution
/// cannot be serialized.
pub struct UserFunction {
    pub name: String,
    pub module: Option<String>,
    pub func: Box<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>,
}

impl UserFunction {
    pub fn new(name: impl Into<String>, func: NativeFn) -> Self {
        UserFunction {
            name: name.into(),
            module: None,
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserFunction")
            .field("name", &self.name)
            .field("module", &self.module)
            .finish()
    }
}
