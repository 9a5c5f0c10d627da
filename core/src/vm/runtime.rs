//! The bytecode interpreter.
//!
//! A single-threaded stack machine: one contiguous value stack, a bounded
//! frame stack, and a globals array owned by the caller for the duration
//! of a run. Execution proceeds instruction by instruction until the main
//! function's `Suspend`, a runtime error, or cancellation.
//!
//! Cancellation is polled between instructions: the cheap atomic flag on
//! every dispatch, the deadline clock on a 1024-instruction cadence. A
//! separate [`AbortHandle`] lets the host stop a run from another thread
//! even without a context.

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use crate::api::Context;
use crate::errors::{Error, RuntimeError};
use crate::source::SourceFileSet;
use crate::token::Token;
use crate::values::ops;
use crate::values::{Closure, CompiledFunction, Value, ValueMap};
use crate::vm::builtins::builtin_functions;
use crate::vm::bytecode::Bytecode;
use crate::vm::frame::Frame;
use crate::vm::instruction_set::Opcode;

/// Value-stack depth.
pub const STACK_SIZE: usize = 2048;
/// Call-frame depth.
pub const MAX_FRAMES: usize = 1024;
/// Size of the globals array.
pub const GLOBALS_SIZE: usize = 1024;

/// A thread-safe handle that stops a running VM at its next dispatch.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// The virtual machine. One instance executes one program at a time and is
/// not safe to share between threads; run several programs in parallel by
/// giving each its own VM (bytecode may be shared).
pub struct VM {
    constants: Vec<Value>,
    file_set: SourceFileSet,
    main_function: Rc<CompiledFunction>,
    stack: Vec<Value>,
    sp: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    /// Byte offset of the instruction being executed, for error positions.
    ip: usize,
    max_allocs: i64,
    allocs: i64,
    ticks: u64,
    abort: Arc<AtomicBool>,
}

impl VM {
    /// Create a VM over `bytecode`. `globals` may carry pre-bound host
    /// variables; it is padded to `GLOBALS_SIZE`. `max_allocs` bounds the
    /// number of composite values one run may materialize; -1 disables
    /// the budget.
    pub fn new(bytecode: &Bytecode, globals: Option<Vec<Value>>, max_allocs: i64) -> VM {
        let mut globals = globals.unwrap_or_default();
        globals.resize(GLOBALS_SIZE, Value::Undefined);
        VM {
            constants: bytecode.constants.clone(),
            file_set: bytecode.file_set.clone(),
            main_function: bytecode.main_function.clone(),
            stack: vec![Value::Undefined; STACK_SIZE],
            sp: 0,
            globals,
            frames: Vec::with_capacity(64),
            ip: 0,
            max_allocs,
            allocs: 0,
            ticks: 0,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle other threads can use to stop this VM.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: self.abort.clone(),
        }
    }

    /// Take the globals back out (after a run, to read results).
    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    /// Execute the program to completion.
    pub fn run(&mut self, ctx: &Context) -> Result<(), Error> {
        trace!(
            target: "zephyr::vm",
            constants = self.constants.len(),
            max_allocs = self.max_allocs,
            "run"
        );
        self.sp = 0;
        self.ip = 0;
        self.ticks = 0;
        self.allocs = self.max_allocs + 1;
        self.frames.clear();
        self.frames.push(Frame {
            func: self.main_function.clone(),
            free: Vec::new(),
            ip: 0,
            base_pointer: 0,
        });

        self.run_loop(ctx).map_err(|err| {
            let pos = self
                .frames
                .last()
                .map(|frame| frame.func.source_pos(self.ip))
                .unwrap_or(0);
            self.frames.clear();
            self.sp = 0;
            Error::Runtime {
                err,
                pos: self.file_set.position(pos),
            }
        })
    }

    fn run_loop(&mut self, ctx: &Context) -> Result<(), RuntimeError> {
        loop {
            if self.abort.load(Ordering::Acquire) {
                return Err(RuntimeError::Aborted {
                    cause: "aborted".to_string(),
                });
            }
            self.ticks = self.ticks.wrapping_add(1);
            if self.ticks & 1023 == 0 {
                ctx.poll_deadline();
            }
            if ctx.is_cancelled() {
                return Err(RuntimeError::Aborted { cause: ctx.cause() });
            }

            let frame = self.frames.last_mut().expect("no active frame");
            let Some(&op_byte) = frame.func.instructions.get(frame.ip) else {
                return Err(RuntimeError::UnknownOpcode {
                    opcode: 0,
                    ip: frame.ip,
                });
            };
            self.ip = frame.ip;
            frame.ip += 1;
            let Some(opcode) = Opcode::from_byte(op_byte) else {
                return Err(RuntimeError::UnknownOpcode {
                    opcode: op_byte,
                    ip: self.ip,
                });
            };

            match opcode {
                Opcode::Constant => {
                    let idx = self.read_u16();
                    let value = self
                        .constants
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| RuntimeError::custom("constant index out of range"))?;
                    self.push(value)?;
                }
                Opcode::Null => {
                    self.push(Value::Undefined)?;
                }
                Opcode::True => {
                    self.push(Value::TRUE)?;
                }
                Opcode::False => {
                    self.push(Value::FALSE)?;
                }
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::BinaryOp => {
                    let tag = self.read_u8();
                    let token = Token::from_op_tag(tag as u8)
                        .ok_or(RuntimeError::InvalidOperator)?;
                    let rhs = self.pop();
                    let lhs = self.pop();
                    match ops::binary_op(&lhs, token, &rhs) {
                        Ok(value) => {
                            // concatenations and merges materialize new
                            // composites and count against the budget
                            if matches!(
                                value,
                                Value::String(_)
                                    | Value::Bytes(_)
                                    | Value::Array(_)
                                    | Value::ImmutableArray(_)
                                    | Value::Map(_)
                                    | Value::ImmutableMap(_)
                            ) {
                                self.count_alloc()?;
                            }
                            self.push(value)?;
                        }
                        Err(RuntimeError::InvalidOperator) => {
                            return Err(RuntimeError::custom(format!(
                                "invalid operation: {} {} {}",
                                lhs.type_name(),
                                token,
                                rhs.type_name()
                            )));
                        }
                        Err(err) => return Err(err),
                    }
                }
                Opcode::Equal => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.push(Value::Bool(lhs.equals(&rhs)))?;
                }
                Opcode::NotEqual => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.push(Value::Bool(!lhs.equals(&rhs)))?;
                }
                Opcode::LNot => {
                    let operand = self.pop();
                    self.push(Value::Bool(operand.is_falsy()))?;
                }
                Opcode::Minus => {
                    let operand = self.pop();
                    match ops::negate(&operand) {
                        Ok(value) => self.push(value)?,
                        Err(_) => {
                            return Err(RuntimeError::custom(format!(
                                "invalid operation: -{}",
                                operand.type_name()
                            )));
                        }
                    }
                }
                Opcode::BComplement => {
                    let operand = self.pop();
                    match ops::complement(&operand) {
                        Ok(value) => self.push(value)?,
                        Err(_) => {
                            return Err(RuntimeError::custom(format!(
                                "invalid operation: ^{}",
                                operand.type_name()
                            )));
                        }
                    }
                }
                Opcode::Jump => {
                    let target = self.read_u16();
                    self.frames.last_mut().unwrap().ip = target;
                }
                Opcode::JumpFalsy => {
                    let target = self.read_u16();
                    let condition = self.pop();
                    if condition.is_falsy() {
                        self.frames.last_mut().unwrap().ip = target;
                    }
                }
                Opcode::AndJump => {
                    let target = self.read_u16();
                    if self.stack[self.sp - 1].is_falsy() {
                        self.frames.last_mut().unwrap().ip = target;
                    } else {
                        self.pop();
                    }
                }
                Opcode::OrJump => {
                    let target = self.read_u16();
                    if self.stack[self.sp - 1].is_falsy() {
                        self.pop();
                    } else {
                        self.frames.last_mut().unwrap().ip = target;
                    }
                }
                Opcode::GetGlobal => {
                    let idx = self.read_u16();
                    self.push(self.globals[idx].clone())?;
                }
                Opcode::SetGlobal => {
                    let idx = self.read_u16();
                    self.globals[idx] = self.pop();
                }
                Opcode::Array => {
                    let count = self.read_u16();
                    self.count_alloc()?;
                    let items = self.stack[self.sp - count..self.sp].to_vec();
                    self.sp -= count;
                    self.push(Value::array(items))?;
                }
                Opcode::Map => {
                    let count = self.read_u16();
                    self.count_alloc()?;
                    let mut entries = ValueMap::with_capacity(count / 2);
                    for i in (self.sp - count..self.sp).step_by(2) {
                        let key = self.stack[i]
                            .map_key()
                            .ok_or(RuntimeError::InvalidIndexType)?;
                        entries.insert(key, self.stack[i + 1].clone());
                    }
                    self.sp -= count;
                    self.push(Value::map(entries))?;
                }
                Opcode::Index => {
                    let index = self.pop();
                    let left = self.pop();
                    let value = left.index_get(&index)?;
                    self.push(value)?;
                }
                Opcode::SliceIndex => {
                    self.exec_slice()?;
                }
                Opcode::Call => {
                    let num_args = self.read_u8();
                    let spread = self.read_u8();
                    self.exec_call(num_args, spread)?;
                }
                Opcode::Return => {
                    let has_value = self.read_u8();
                    let ret = if has_value == 1 {
                        self.pop()
                    } else {
                        Value::Undefined
                    };
                    let frame = self.frames.pop().expect("return without frame");
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.sp = frame.base_pointer;
                    self.stack[self.sp - 1] = ret;
                }
                Opcode::GetLocal => {
                    let idx = self.read_u8();
                    let bp = self.frames.last().unwrap().base_pointer;
                    let value = match &self.stack[bp + idx] {
                        Value::Cell(cell) => cell.borrow().clone(),
                        other => other.clone(),
                    };
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let idx = self.read_u8();
                    let value = self.pop();
                    let bp = self.frames.last().unwrap().base_pointer;
                    match &self.stack[bp + idx] {
                        Value::Cell(cell) => {
                            *cell.borrow_mut() = value;
                        }
                        _ => {
                            self.stack[bp + idx] = value;
                        }
                    }
                }
                Opcode::DefineLocal => {
                    let idx = self.read_u8();
                    let value = self.pop();
                    let bp = self.frames.last().unwrap().base_pointer;
                    self.stack[bp + idx] = value;
                }
                Opcode::GetLocalPtr => {
                    let idx = self.read_u8();
                    let bp = self.frames.last().unwrap().base_pointer;
                    let cell = match &self.stack[bp + idx] {
                        Value::Cell(cell) => cell.clone(),
                        other => {
                            let cell = Value::cell(other.clone());
                            self.stack[bp + idx] = Value::Cell(cell.clone());
                            cell
                        }
                    };
                    self.push(Value::Cell(cell))?;
                }
                Opcode::GetFree => {
                    let idx = self.read_u8();
                    let value = self.frames.last().unwrap().free[idx].borrow().clone();
                    self.push(value)?;
                }
                Opcode::SetFree => {
                    let idx = self.read_u8();
                    let value = self.pop();
                    *self.frames.last().unwrap().free[idx].borrow_mut() = value;
                }
                Opcode::GetFreePtr => {
                    let idx = self.read_u8();
                    let cell = self.frames.last().unwrap().free[idx].clone();
                    self.push(Value::Cell(cell))?;
                }
                Opcode::GetBuiltin => {
                    let idx = self.read_u8();
                    self.push(Value::Builtin(&builtin_functions()[idx]))?;
                }
                Opcode::Closure => {
                    let const_idx = self.read_u16();
                    let num_free = self.read_u8();
                    let func = match self.constants.get(const_idx) {
                        Some(Value::CompiledFunction(func)) => func.clone(),
                        Some(other) => {
                            return Err(RuntimeError::custom(format!(
                                "not a function: {}",
                                other.type_name()
                            )));
                        }
                        None => {
                            return Err(RuntimeError::custom("constant index out of range"));
                        }
                    };
                    self.count_alloc()?;
                    let mut free = Vec::with_capacity(num_free);
                    for i in self.sp - num_free..self.sp {
                        match &self.stack[i] {
                            Value::Cell(cell) => free.push(cell.clone()),
                            other => {
                                return Err(RuntimeError::custom(format!(
                                    "invalid capture: {}",
                                    other.type_name()
                                )));
                            }
                        }
                    }
                    self.sp -= num_free;
                    self.push(Value::Closure(Rc::new(Closure { func, free })))?;
                }
                Opcode::IteratorInit => {
                    let value = self.pop();
                    let Some(iterator) = value.iterate() else {
                        return Err(RuntimeError::custom(format!(
                            "not iterable: {}",
                            value.type_name()
                        )));
                    };
                    self.count_alloc()?;
                    self.push(Value::Iterator(Rc::new(core::cell::RefCell::new(iterator))))?;
                }
                Opcode::IteratorNext => {
                    let value = self.pop();
                    let Value::Iterator(iterator) = value else {
                        return Err(RuntimeError::custom("not an iterator"));
                    };
                    let advanced = iterator.borrow_mut().next();
                    self.push(Value::Bool(advanced))?;
                }
                Opcode::IteratorKey => {
                    let value = self.pop();
                    let Value::Iterator(iterator) = value else {
                        return Err(RuntimeError::custom("not an iterator"));
                    };
                    let key = iterator.borrow().key();
                    self.push(key)?;
                }
                Opcode::IteratorValue => {
                    let value = self.pop();
                    let Value::Iterator(iterator) = value else {
                        return Err(RuntimeError::custom("not an iterator"));
                    };
                    let current = iterator.borrow().value();
                    self.push(current)?;
                }
                Opcode::Error => {
                    let value = self.pop();
                    self.count_alloc()?;
                    self.push(Value::error(value))?;
                }
                Opcode::Immutable => {
                    let value = self.pop();
                    let frozen = match value {
                        Value::Array(items) => {
                            Value::immutable_array(items.borrow().clone())
                        }
                        Value::Map(entries) => {
                            Value::immutable_map(entries.borrow().clone())
                        }
                        other => other,
                    };
                    self.push(frozen)?;
                }
                Opcode::Suspend => {
                    return Ok(());
                }
                Opcode::SetSelGlobal => {
                    let global_idx = self.read_u16();
                    let num_sel = self.read_u8();
                    let (value, selectors) = self.pop_selectors(num_sel);
                    let root = self.globals[global_idx].clone();
                    index_assign(&root, value, &selectors)?;
                }
                Opcode::SetSelLocal => {
                    let local_idx = self.read_u8();
                    let num_sel = self.read_u8();
                    let (value, selectors) = self.pop_selectors(num_sel);
                    let bp = self.frames.last().unwrap().base_pointer;
                    let root = match &self.stack[bp + local_idx] {
                        Value::Cell(cell) => cell.borrow().clone(),
                        other => other.clone(),
                    };
                    index_assign(&root, value, &selectors)?;
                }
                Opcode::SetSelFree => {
                    let free_idx = self.read_u8();
                    let num_sel = self.read_u8();
                    let (value, selectors) = self.pop_selectors(num_sel);
                    let root = self.frames.last().unwrap().free[free_idx].borrow().clone();
                    index_assign(&root, value, &selectors)?;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Instruction helpers
    // ------------------------------------------------------------------

    fn read_u8(&mut self) -> usize {
        let frame = self.frames.last_mut().unwrap();
        let value = frame.func.instructions[frame.ip] as usize;
        frame.ip += 1;
        value
    }

    fn read_u16(&mut self) -> usize {
        let frame = self.frames.last_mut().unwrap();
        let instructions = &frame.func.instructions;
        let value = u16::from_be_bytes([instructions[frame.ip], instructions[frame.ip + 1]]);
        frame.ip += 2;
        value as usize
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.sp -= 1;
        core::mem::replace(&mut self.stack[self.sp], Value::Undefined)
    }

    fn count_alloc(&mut self) -> Result<(), RuntimeError> {
        self.allocs -= 1;
        if self.allocs == 0 {
            return Err(RuntimeError::AllocLimit);
        }
        Ok(())
    }

    /// Pop the RHS value plus `num_sel` selector values for an index
    /// assignment; selectors come back in stack order (deepest last).
    fn pop_selectors(&mut self, num_sel: usize) -> (Value, Vec<Value>) {
        let selectors = self.stack[self.sp - num_sel..self.sp].to_vec();
        let value = self.stack[self.sp - num_sel - 1].clone();
        self.sp -= num_sel + 1;
        (value, selectors)
    }

    // ------------------------------------------------------------------
    // Compound operations
    // ------------------------------------------------------------------

    fn exec_slice(&mut self) -> Result<(), RuntimeError> {
        let high = self.pop();
        let low = self.pop();
        let left = self.pop();

        let low_idx = match low {
            Value::Undefined => None,
            Value::Int(v) => Some(v),
            _ => return Err(RuntimeError::InvalidIndexType),
        };
        let high_idx = match high {
            Value::Undefined => None,
            Value::Int(v) => Some(v),
            _ => return Err(RuntimeError::InvalidIndexType),
        };

        let check = |len: usize| -> Result<(usize, usize), RuntimeError> {
            let n = len as i64;
            let low = low_idx.unwrap_or(0);
            let high = high_idx.unwrap_or(n);
            if low > high {
                return Err(RuntimeError::InvalidSliceIndex);
            }
            if low < 0 || low > n || high < 0 || high > n {
                return Err(RuntimeError::IndexOutOfBounds);
            }
            Ok((low as usize, high as usize))
        };

        let value = match &left {
            Value::Array(items) => {
                let items = items.borrow();
                let (low, high) = check(items.len())?;
                self.count_alloc()?;
                Value::array(items[low..high].to_vec())
            }
            Value::ImmutableArray(items) => {
                let (low, high) = check(items.len())?;
                self.count_alloc()?;
                Value::array(items[low..high].to_vec())
            }
            Value::String(s) => {
                let (low, high) = check(s.len())?;
                self.count_alloc()?;
                let sliced = s
                    .as_str()
                    .get(low..high)
                    .ok_or(RuntimeError::InvalidSliceIndex)?;
                Value::string(sliced)
            }
            Value::Bytes(bytes) => {
                let bytes = bytes.borrow();
                let (low, high) = check(bytes.len())?;
                self.count_alloc()?;
                Value::bytes(bytes[low..high].to_vec())
            }
            _ => return Err(RuntimeError::NotIndexable),
        };
        self.push(value)
    }

    fn exec_call(&mut self, num_args: usize, spread: usize) -> Result<(), RuntimeError> {
        let mut num_args = num_args;
        if spread == 1 {
            self.sp -= 1;
            let spread_value = core::mem::replace(&mut self.stack[self.sp], Value::Undefined);
            let items: Vec<Value> = match &spread_value {
                Value::Array(items) => items.borrow().clone(),
                Value::ImmutableArray(items) => items.as_ref().clone(),
                other => {
                    return Err(RuntimeError::custom(format!(
                        "not an array: {}",
                        other.type_name()
                    )));
                }
            };
            num_args += items.len();
            num_args -= 1;
            for item in items {
                self.push(item)?;
            }
        }

        let callee = self.stack[self.sp - 1 - num_args].clone();
        match &callee {
            Value::Closure(closure) => {
                self.call_compiled(closure.func.clone(), closure.free.clone(), num_args)
            }
            Value::CompiledFunction(func) => {
                self.call_compiled(func.clone(), Vec::new(), num_args)
            }
            Value::Builtin(builtin) => {
                let builtin = *builtin;
                let name = callee.type_name();
                self.call_native(|args| (builtin.func)(args), num_args, &name)
            }
            Value::UserFunction(func) => {
                let func = func.clone();
                let name = callee.type_name();
                self.call_native(move |args| (func.func)(args), num_args, &name)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call_compiled(
        &mut self,
        func: Rc<CompiledFunction>,
        free: Vec<Rc<core::cell::RefCell<Value>>>,
        mut num_args: usize,
    ) -> Result<(), RuntimeError> {
        if func.variadic && func.num_parameters > 0 {
            // roll surplus positional arguments into the trailing array
            // parameter
            let real_args = func.num_parameters - 1;
            if num_args >= real_args {
                let var_count = num_args - real_args;
                let start = self.sp - var_count;
                let var_args: Vec<Value> = self.stack[start..self.sp].to_vec();
                self.count_alloc()?;
                self.stack[start] = Value::array(var_args);
                for slot in &mut self.stack[start + 1..self.sp] {
                    *slot = Value::Undefined;
                }
                self.sp = start + 1;
                num_args = real_args + 1;
            }
        }
        if num_args != func.num_parameters {
            if func.variadic {
                return Err(RuntimeError::WrongNumArgumentsAtLeast {
                    want: func.num_parameters.saturating_sub(1),
                    got: num_args,
                });
            }
            return Err(RuntimeError::WrongNumArgumentsWant {
                want: func.num_parameters,
                got: num_args,
            });
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }

        let base_pointer = self.sp - num_args;
        let new_sp = base_pointer + func.num_locals;
        if new_sp >= STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        for slot in &mut self.stack[self.sp..new_sp] {
            *slot = Value::Undefined;
        }
        self.sp = new_sp;
        self.frames.push(Frame {
            func,
            free,
            ip: 0,
            base_pointer,
        });
        Ok(())
    }

    fn call_native(
        &mut self,
        call: impl FnOnce(&[Value]) -> Result<Value, RuntimeError>,
        num_args: usize,
        callee_name: &str,
    ) -> Result<(), RuntimeError> {
        let args: Vec<Value> = self.stack[self.sp - num_args..self.sp].to_vec();
        let result = call(&args);
        // drop the arguments and the callee slot
        for slot in &mut self.stack[self.sp - num_args - 1..self.sp] {
            *slot = Value::Undefined;
        }
        self.sp -= num_args + 1;
        match result {
            Ok(value) => self.push(value),
            Err(RuntimeError::WrongNumArguments) => Err(RuntimeError::custom(format!(
                "wrong number of arguments in call to '{}'",
                callee_name
            ))),
            Err(RuntimeError::InvalidArgumentType {
                name,
                expected,
                found,
            }) => Err(RuntimeError::custom(format!(
                "invalid type for argument '{}' in call to '{}': expected {}, found {}",
                name, callee_name, expected, found
            ))),
            Err(err) => Err(err),
        }
    }
}

/// Navigate `selectors` (deepest-first at the tail) from `root` and store
/// `value` at the final position.
fn index_assign(root: &Value, value: Value, selectors: &[Value]) -> Result<(), RuntimeError> {
    let mut target = root.clone();
    for selector in selectors[1..].iter().rev() {
        target = target.index_get(selector)?;
    }
    target.index_set(&selectors[0], value)
}
