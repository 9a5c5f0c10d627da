//! The boxed runtime value.
//!
//! Every value a script can observe is a [`Value`]. Scalars are stored
//! inline; composites are reference-counted with interior mutability, so
//! that bindings share structure the way the language requires (two
//! variables naming one array see each other's writes). The variant set is
//! closed: scripts cannot define new types.

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use ecow::EcoString;
use hashbrown::HashMap;

use crate::errors::RuntimeError;
use crate::values::function::{BuiltinFunction, Closure, CompiledFunction, UserFunction};
use crate::values::iterator::{
    ArrayIterator, BytesIterator, MapIterator, StringIterator, ValueIterator,
};

/// Longest representable string, in bytes.
pub const MAX_STRING_LEN: usize = 2_147_483_647;
/// Longest representable byte sequence.
pub const MAX_BYTES_LEN: usize = 2_147_483_647;

/// Map storage: string keys, unspecified order.
pub type ValueMap = HashMap<EcoString, Value>;

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    String(EcoString),
    Bytes(Rc<RefCell<Vec<u8>>>),
    Array(Rc<RefCell<Vec<Value>>>),
    ImmutableArray(Rc<Vec<Value>>),
    Map(Rc<RefCell<ValueMap>>),
    ImmutableMap(Rc<ValueMap>),
    Time(DateTime<Utc>),
    /// A script-level error produced by `error(x)`. Flows as an ordinary
    /// value; equality is identity.
    Error(Rc<Value>),
    Undefined,
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(&'static BuiltinFunction),
    UserFunction(Rc<UserFunction>),
    Iterator(Rc<RefCell<ValueIterator>>),
    /// Hidden one-slot indirection used for closure capture. Created by
    /// `GetLocalPtr`, stored back into the local slot, and never exposed
    /// to scripts; every read path dereferences it.
    Cell(Rc<RefCell<Value>>),
}

impl Value {
    pub const TRUE: Value = Value::Bool(true);
    pub const FALSE: Value = Value::Bool(false);

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    pub fn string(s: impl Into<EcoString>) -> Value {
        Value::String(s.into())
    }

    pub fn bytes(b: Vec<u8>) -> Value {
        Value::Bytes(Rc::new(RefCell::new(b)))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn immutable_array(items: Vec<Value>) -> Value {
        Value::ImmutableArray(Rc::new(items))
    }

    pub fn map(entries: ValueMap) -> Value {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn immutable_map(entries: ValueMap) -> Value {
        Value::ImmutableMap(Rc::new(entries))
    }

    pub fn error(inner: Value) -> Value {
        Value::Error(Rc::new(inner))
    }

    pub fn cell(inner: Value) -> Rc<RefCell<Value>> {
        Rc::new(RefCell::new(inner))
    }

    // ------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------

    pub fn type_name(&self) -> String {
        match self {
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Char(_) => "char".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::Array(_) => "array".to_string(),
            Value::ImmutableArray(_) => "immutable-array".to_string(),
            Value::Map(_) => "map".to_string(),
            Value::ImmutableMap(_) => "immutable-map".to_string(),
            Value::Time(_) => "time".to_string(),
            Value::Error(_) => "error".to_string(),
            Value::Undefined => "undefined".to_string(),
            Value::CompiledFunction(_) => "compiled-function".to_string(),
            Value::Closure(_) => "compiled-function".to_string(),
            Value::Builtin(b) => format!("builtin-function:{}", b.name),
            Value::UserFunction(u) => format!("user-function:{}", u.name),
            Value::Iterator(it) => it.borrow().type_name().to_string(),
            Value::Cell(c) => c.borrow().type_name(),
        }
    }

    /// The falsy set is closed: int 0, empty string/bytes/array/map,
    /// undefined, errors, and spent-able iterators. Floats, chars and
    /// times are never falsy.
    pub fn is_falsy(&self) -> bool {
        match self {
            Value::Int(v) => *v == 0,
            Value::Float(_) => false,
            Value::Bool(v) => !*v,
            Value::Char(_) => false,
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.borrow().is_empty(),
            Value::Array(a) => a.borrow().is_empty(),
            Value::ImmutableArray(a) => a.is_empty(),
            Value::Map(m) => m.borrow().is_empty(),
            Value::ImmutableMap(m) => m.is_empty(),
            Value::Time(_) => false,
            Value::Error(_) => true,
            Value::Undefined => true,
            Value::CompiledFunction(_)
            | Value::Closure(_)
            | Value::Builtin(_)
            | Value::UserFunction(_) => false,
            Value::Iterator(_) => true,
            Value::Cell(c) => c.borrow().is_falsy(),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::CompiledFunction(_)
                | Value::Closure(_)
                | Value::Builtin(_)
                | Value::UserFunction(_)
        )
    }

    pub fn is_iterable(&self) -> bool {
        matches!(
            self,
            Value::Array(_)
                | Value::ImmutableArray(_)
                | Value::Map(_)
                | Value::ImmutableMap(_)
                | Value::String(_)
                | Value::Bytes(_)
        )
    }

    // ------------------------------------------------------------------
    // Equality
    // ------------------------------------------------------------------

    /// Language-level equality. Cross-type comparisons are false except
    /// int/float numeric equality and string/char (the char's UTF-8
    /// encoding equals the string). Errors, functions and iterators
    /// compare by identity.
    pub fn equals(&self, other: &Value) -> bool {
        if let Value::Cell(c) = self {
            return c.borrow().equals(other);
        }
        if let Value::Cell(c) = other {
            return self.equals(&c.borrow());
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Char(a), Value::String(b)) | (Value::String(b), Value::Char(a)) => {
                let mut buf = [0u8; 4];
                let encoded: &str = a.encode_utf8(&mut buf);
                encoded == b.as_str()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || arrays_equal(&a.borrow(), &b.borrow())
            }
            (Value::ImmutableArray(a), Value::ImmutableArray(b)) => {
                Rc::ptr_eq(a, b) || arrays_equal(a, b)
            }
            (Value::Map(a), Value::Map(b)) => {
                Rc::ptr_eq(a, b) || maps_equal(&a.borrow(), &b.borrow())
            }
            (Value::ImmutableMap(a), Value::ImmutableMap(b)) => {
                Rc::ptr_eq(a, b) || maps_equal(a, b)
            }
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            (Value::Undefined, Value::Undefined) => true,
            (Value::CompiledFunction(a), Value::CompiledFunction(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => core::ptr::eq(*a, *b),
            (Value::UserFunction(a), Value::UserFunction(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Copying
    // ------------------------------------------------------------------

    /// Deep copy, as exposed by the `copy` builtin. Copying an immutable
    /// composite yields a mutable one.
    pub fn copy_value(&self) -> Value {
        match self {
            Value::Bytes(b) => Value::bytes(b.borrow().clone()),
            Value::Array(a) => {
                Value::array(a.borrow().iter().map(Value::copy_value).collect())
            }
            Value::ImmutableArray(a) => {
                Value::array(a.iter().map(Value::copy_value).collect())
            }
            Value::Map(m) => Value::map(
                m.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.copy_value()))
                    .collect(),
            ),
            Value::ImmutableMap(m) => Value::map(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.copy_value()))
                    .collect(),
            ),
            Value::Error(inner) => Value::error(inner.copy_value()),
            Value::Cell(c) => c.borrow().copy_value(),
            other => other.clone(),
        }
    }

    /// Number of values transitively reachable from this one, counting
    /// this one. Compiled functions count as one.
    pub fn count_objects(&self) -> usize {
        match self {
            Value::Array(a) => {
                1 + a.borrow().iter().map(Value::count_objects).sum::<usize>()
            }
            Value::ImmutableArray(a) => {
                1 + a.iter().map(Value::count_objects).sum::<usize>()
            }
            Value::Map(m) => {
                1 + m.borrow().values().map(Value::count_objects).sum::<usize>()
            }
            Value::ImmutableMap(m) => {
                1 + m.values().map(Value::count_objects).sum::<usize>()
            }
            Value::Error(inner) => 1 + inner.count_objects(),
            Value::Cell(c) => c.borrow().count_objects(),
            _ => 1,
        }
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    /// Coerce a value into a map key. Strings use their raw content, any
    /// other value its printable form; `Undefined` is not a key.
    pub fn map_key(&self) -> Option<EcoString> {
        match self {
            Value::Undefined => None,
            Value::String(s) => Some(s.clone()),
            Value::Cell(c) => c.borrow().map_key(),
            other => Some(EcoString::from(other.to_string())),
        }
    }

    /// Indexed read. Arrays and strings take int indexes (runes for
    /// strings) and fail out of bounds; maps yield `Undefined` for a
    /// missing key; `undefined[x]` is `undefined`.
    pub fn index_get(&self, index: &Value) -> Result<Value, RuntimeError> {
        match self {
            Value::Array(a) => index_array(&a.borrow(), index),
            Value::ImmutableArray(a) => index_array(a, index),
            Value::Map(m) => {
                let key = index.map_key().ok_or(RuntimeError::InvalidIndexType)?;
                Ok(m.borrow().get(&key).cloned().unwrap_or(Value::Undefined))
            }
            Value::ImmutableMap(m) => {
                let key = index.map_key().ok_or(RuntimeError::InvalidIndexType)?;
                Ok(m.get(&key).cloned().unwrap_or(Value::Undefined))
            }
            Value::String(s) => {
                let idx = match index {
                    Value::Int(i) => *i,
                    _ => return Err(RuntimeError::InvalidIndexType),
                };
                if idx < 0 {
                    return Err(RuntimeError::IndexOutOfBounds);
                }
                s.chars()
                    .nth(idx as usize)
                    .map(Value::Char)
                    .ok_or(RuntimeError::IndexOutOfBounds)
            }
            Value::Bytes(b) => {
                let idx = match index {
                    Value::Int(i) => *i,
                    _ => return Err(RuntimeError::InvalidIndexType),
                };
                let bytes = b.borrow();
                if idx < 0 || idx as usize >= bytes.len() {
                    return Err(RuntimeError::IndexOutOfBounds);
                }
                Ok(Value::Int(bytes[idx as usize] as i64))
            }
            Value::Error(inner) => match index {
                Value::String(s) if s == "value" => Ok((**inner).clone()),
                _ => Err(RuntimeError::custom("invalid index on error")),
            },
            Value::Undefined => Ok(Value::Undefined),
            Value::Cell(c) => c.borrow().index_get(index),
            _ => Err(RuntimeError::NotIndexable),
        }
    }

    /// Indexed write. Only arrays, maps and bytes are assignable.
    pub fn index_set(&self, index: &Value, value: Value) -> Result<(), RuntimeError> {
        match self {
            Value::Array(a) => {
                let idx = match index {
                    Value::Int(i) => *i,
                    _ => return Err(RuntimeError::InvalidIndexType),
                };
                let mut items = a.borrow_mut();
                if idx < 0 || idx as usize >= items.len() {
                    return Err(RuntimeError::IndexOutOfBounds);
                }
                items[idx as usize] = value;
                Ok(())
            }
            Value::Map(m) => {
                let key = index.map_key().ok_or(RuntimeError::InvalidIndexType)?;
                m.borrow_mut().insert(key, value);
                Ok(())
            }
            Value::Bytes(b) => {
                let idx = match index {
                    Value::Int(i) => *i,
                    _ => return Err(RuntimeError::InvalidIndexType),
                };
                let byte = match value {
                    Value::Int(v) => v as u8,
                    _ => return Err(RuntimeError::InvalidIndexValueType),
                };
                let mut bytes = b.borrow_mut();
                if idx < 0 || idx as usize >= bytes.len() {
                    return Err(RuntimeError::IndexOutOfBounds);
                }
                bytes[idx as usize] = byte;
                Ok(())
            }
            Value::Cell(c) => c.borrow().index_set(index, value),
            _ => Err(RuntimeError::NotIndexAssignable),
        }
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Construct an iterator over this value, if it is iterable.
    pub fn iterate(&self) -> Option<ValueIterator> {
        match self {
            Value::Array(a) => Some(ValueIterator::Array(ArrayIterator::new(
                a.borrow().clone(),
            ))),
            Value::ImmutableArray(a) => {
                Some(ValueIterator::Array(ArrayIterator::new(a.as_ref().clone())))
            }
            Value::Map(m) => Some(ValueIterator::Map(MapIterator::new(
                m.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ))),
            Value::ImmutableMap(m) => Some(ValueIterator::Map(MapIterator::new(
                m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ))),
            Value::String(s) => Some(ValueIterator::String(StringIterator::new(s.as_str()))),
            Value::Bytes(b) => Some(ValueIterator::Bytes(BytesIterator::new(b.borrow().clone()))),
            Value::Cell(c) => c.borrow().iterate(),
            _ => None,
        }
    }
}

fn arrays_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
}

fn maps_equal(a: &ValueMap, b: &ValueMap) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.get(k).is_some_and(|other| v.equals(other)))
}

fn index_array(items: &[Value], index: &Value) -> Result<Value, RuntimeError> {
    let idx = match index {
        Value::Int(i) => *i,
        _ => return Err(RuntimeError::InvalidIndexType),
    };
    if idx < 0 || idx as usize >= items.len() {
        return Err(RuntimeError::IndexOutOfBounds);
    }
    Ok(items[idx as usize].clone())
}

// ============================================================================
// Printable form
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut seen = Vec::new();
        fmt_value(self, f, &mut seen)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Recursive printer; `seen` carries the composite pointers on the current
/// path so self-referential structures print as `[...]` / `{...}` instead
/// of recursing forever.
fn fmt_value(value: &Value, f: &mut fmt::Formatter<'_>, seen: &mut Vec<usize>) -> fmt::Result {
    match value {
        Value::Int(v) => write!(f, "{}", v),
        Value::Float(v) => write!(f, "{}", v),
        Value::Bool(v) => write!(f, "{}", v),
        Value::Char(v) => write!(f, "{}", v),
        Value::String(v) => write!(f, "{:?}", v.as_str()),
        Value::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(&v.borrow())),
        Value::Array(a) => {
            let ptr = Rc::as_ptr(a) as usize;
            if seen.contains(&ptr) {
                return f.write_str("[...]");
            }
            seen.push(ptr);
            let result = fmt_array(&a.borrow(), f, seen);
            seen.pop();
            result
        }
        Value::ImmutableArray(a) => {
            let ptr = Rc::as_ptr(a) as usize;
            if seen.contains(&ptr) {
                return f.write_str("[...]");
            }
            seen.push(ptr);
            let result = fmt_array(a, f, seen);
            seen.pop();
            result
        }
        Value::Map(m) => {
            let ptr = Rc::as_ptr(m) as usize;
            if seen.contains(&ptr) {
                return f.write_str("{...}");
            }
            seen.push(ptr);
            let result = fmt_map(&m.borrow(), f, seen);
            seen.pop();
            result
        }
        Value::ImmutableMap(m) => {
            let ptr = Rc::as_ptr(m) as usize;
            if seen.contains(&ptr) {
                return f.write_str("{...}");
            }
            seen.push(ptr);
            let result = fmt_map(m, f, seen);
            seen.pop();
            result
        }
        Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
        Value::Error(inner) => match &**inner {
            Value::Undefined => f.write_str("error"),
            other => {
                f.write_str("error: ")?;
                fmt_value(other, f, seen)
            }
        },
        Value::Undefined => f.write_str("<undefined>"),
        Value::CompiledFunction(_) => f.write_str("<compiled-function>"),
        Value::Closure(_) => f.write_str("<closure>"),
        Value::Builtin(_) => f.write_str("<builtin-function>"),
        Value::UserFunction(_) => f.write_str("<user-function>"),
        Value::Iterator(it) => f.write_str(&it.borrow().display_name()),
        Value::Cell(c) => fmt_value(&c.borrow(), f, seen),
    }
}

fn fmt_array(items: &[Value], f: &mut fmt::Formatter<'_>, seen: &mut Vec<usize>) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        fmt_value(item, f, seen)?;
    }
    f.write_str("]")
}

fn fmt_map(entries: &ValueMap, f: &mut fmt::Formatter<'_>, seen: &mut Vec<usize>) -> fmt::Result {
    // sorted for a deterministic printable form; iteration order of the
    // map itself stays unspecified
    let mut keys: Vec<&EcoString> = entries.keys().collect();
    keys.sort();
    f.write_str("{")?;
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}: ", key)?;
        fmt_value(&entries[key], f, seen)?;
    }
    f.write_str("}")
}
