//! Per-call bookkeeping.

use core::cell::RefCell;
use std::rc::Rc;

use crate::values::{CompiledFunction, Value};

/// One activation record. `base_pointer` indexes the value stack where
/// this call's locals begin; `free` holds the closure's captured cells
/// (empty for plain functions).
pub struct Frame {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Rc<RefCell<Value>>>,
    pub ip: usize,
    pub base_pointer: usize,
}
