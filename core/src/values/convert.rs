//! Conversions between values, and between host types and values.
//!
//! The `to_*` helpers implement the coercions used by the conversion
//! builtins (`string`, `int`, `float`, `char`, `bytes`, `time`, `bool`);
//! a `None` means the value has no sensible conversion and the builtin
//! falls back to its default argument. The `From` impls are the host-side
//! entry point: anything an embedder binds with `Script::add` goes through
//! them.

use chrono::{DateTime, TimeZone, Utc};
use ecow::EcoString;
use hashbrown::HashMap;

use crate::values::value::{Value, ValueMap};

/// String form: raw content for strings, the printable form otherwise.
/// `Undefined` has no string form.
pub fn to_string_value(value: &Value) -> Option<EcoString> {
    match value {
        Value::Undefined => None,
        Value::String(s) => Some(s.clone()),
        Value::Cell(c) => to_string_value(&c.borrow()),
        other => Some(EcoString::from(other.to_string())),
    }
}

pub fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::Float(v) => Some(*v as i64),
        Value::Char(c) => Some(*c as u32 as i64),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Cell(c) => to_int(&c.borrow()),
        _ => None,
    }
}

pub fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Cell(c) => to_float(&c.borrow()),
        _ => None,
    }
}

/// Truthiness; defined for every value.
pub fn to_bool(value: &Value) -> bool {
    !value.is_falsy()
}

pub fn to_char(value: &Value) -> Option<char> {
    match value {
        Value::Char(c) => Some(*c),
        Value::Int(v) => u32::try_from(*v).ok().and_then(char::from_u32),
        Value::String(s) => s.chars().next(),
        Value::Cell(c) => to_char(&c.borrow()),
        _ => None,
    }
}

pub fn to_byte_slice(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(b) => Some(b.borrow().clone()),
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Cell(c) => to_byte_slice(&c.borrow()),
        _ => None,
    }
}

/// Time form; integers are unix seconds.
pub fn to_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Time(t) => Some(*t),
        Value::Int(v) => Utc.timestamp_opt(*v, 0).single(),
        Value::Cell(c) => to_time(&c.borrow()),
        _ => None,
    }
}

// ============================================================================
// Host → value
// ============================================================================

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Value {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Value {
        Value::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(EcoString::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::String(EcoString::from(v))
    }
}

impl From<EcoString> for Value {
    fn from(v: EcoString) -> Value {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::array(v)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Value {
        let entries: ValueMap = v
            .into_iter()
            .map(|(k, v)| (EcoString::from(k), v))
            .collect();
        Value::map(entries)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Value {
        Value::Time(v)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Value {
        Value::Undefined
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Value {
        match v {
            Some(v) => v.into(),
            None => Value::Undefined,
        }
    }
}

#[cfg(test)]
mod convert_test {
    use super::*;

    #[test]
    fn string_coercion() {
        assert_eq!(to_string_value(&Value::Int(7)).unwrap(), "7");
        assert_eq!(to_string_value(&Value::from("abc")).unwrap(), "abc");
        assert_eq!(to_string_value(&Value::Bool(true)).unwrap(), "true");
        assert!(to_string_value(&Value::Undefined).is_none());
    }

    #[test]
    fn int_coercion() {
        assert_eq!(to_int(&Value::Int(42)), Some(42));
        assert_eq!(to_int(&Value::Float(1.9)), Some(1));
        assert_eq!(to_int(&Value::Bool(true)), Some(1));
        assert_eq!(to_int(&Value::from("52")), Some(52));
        assert_eq!(to_int(&Value::from("x")), None);
        assert_eq!(to_int(&Value::Undefined), None);
    }

    #[test]
    fn char_coercion() {
        assert_eq!(to_char(&Value::Int(65)), Some('A'));
        assert_eq!(to_char(&Value::Char('z')), Some('z'));
        assert_eq!(to_char(&Value::Int(-1)), None);
    }

    #[test]
    fn host_conversions() {
        assert!(Value::from(5i64).equals(&Value::Int(5)));
        assert!(Value::from(2.5).equals(&Value::Float(2.5)));
        assert!(Value::from("hi").equals(&Value::string("hi")));
        assert!(Value::from(()).equals(&Value::Undefined));
        assert!(Value::from(Some(3i64)).equals(&Value::Int(3)));
        assert!(Value::from(None::<i64>).equals(&Value::Undefined));
    }
}
