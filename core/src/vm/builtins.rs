//! The interned native builtins.
//!
//! `GetBuiltin` operands index this table, so the set and the order are
//! part of the bytecode ABI: appending is fine, reordering is a format
//! break. Every builtin validates its own arguments and returns a value
//! or a `RuntimeError`; none may panic on script input.

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::errors::RuntimeError;
use crate::values::convert;
use crate::values::format::format_values;
use crate::values::{BuiltinFunction, Value, MAX_BYTES_LEN, MAX_STRING_LEN};

/// The builtin table, in ABI order.
pub fn builtin_functions() -> &'static [BuiltinFunction] {
    &BUILTINS
}

static BUILTIN_INDEX: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    BUILTINS
        .iter()
        .enumerate()
        .map(|(index, builtin)| (builtin.name, index))
        .collect()
});

/// Look up a builtin by name (used by the decoder to re-bind references).
pub fn builtin_by_name(name: &str) -> Option<&'static BuiltinFunction> {
    BUILTIN_INDEX.get(name).map(|&index| &BUILTINS[index])
}

static BUILTINS: [BuiltinFunction; 34] = [
    BuiltinFunction { name: "len", func: builtin_len },
    BuiltinFunction { name: "copy", func: builtin_copy },
    BuiltinFunction { name: "append", func: builtin_append },
    BuiltinFunction { name: "delete", func: builtin_delete },
    BuiltinFunction { name: "splice", func: builtin_splice },
    BuiltinFunction { name: "string", func: builtin_string },
    BuiltinFunction { name: "int", func: builtin_int },
    BuiltinFunction { name: "bool", func: builtin_bool },
    BuiltinFunction { name: "float", func: builtin_float },
    BuiltinFunction { name: "char", func: builtin_char },
    BuiltinFunction { name: "bytes", func: builtin_bytes },
    BuiltinFunction { name: "time", func: builtin_time },
    BuiltinFunction { name: "is_string", func: builtin_is_string },
    BuiltinFunction { name: "is_int", func: builtin_is_int },
    BuiltinFunction { name: "is_bool", func: builtin_is_bool },
    BuiltinFunction { name: "is_float", func: builtin_is_float },
    BuiltinFunction { name: "is_char", func: builtin_is_char },
    BuiltinFunction { name: "is_bytes", func: builtin_is_bytes },
    BuiltinFunction { name: "is_error", func: builtin_is_error },
    BuiltinFunction { name: "is_undefined", func: builtin_is_undefined },
    BuiltinFunction { name: "is_function", func: builtin_is_function },
    BuiltinFunction { name: "is_callable", func: builtin_is_callable },
    BuiltinFunction { name: "is_array", func: builtin_is_array },
    BuiltinFunction { name: "is_immutable_array", func: builtin_is_immutable_array },
    BuiltinFunction { name: "is_map", func: builtin_is_map },
    BuiltinFunction { name: "is_immutable_map", func: builtin_is_immutable_map },
    BuiltinFunction { name: "is_iterable", func: builtin_is_iterable },
    BuiltinFunction { name: "is_time", func: builtin_is_time },
    BuiltinFunction { name: "type_name", func: builtin_type_name },
    BuiltinFunction { name: "format", func: builtin_format },
    BuiltinFunction { name: "range", func: builtin_range },
    BuiltinFunction { name: "printf", func: builtin_printf },
    BuiltinFunction { name: "println", func: builtin_println },
    BuiltinFunction { name: "sprint", func: builtin_sprint },
];

fn invalid_arg(name: &'static str, expected: &'static str, found: &Value) -> RuntimeError {
    RuntimeError::InvalidArgumentType {
        name,
        expected,
        found: found.type_name(),
    }
}

fn builtin_len(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(RuntimeError::WrongNumArguments);
    }
    let len = match &args[0] {
        Value::String(s) => s.len(),
        Value::Bytes(b) => b.borrow().len(),
        Value::Array(a) => a.borrow().len(),
        Value::ImmutableArray(a) => a.len(),
        Value::Map(m) => m.borrow().len(),
        Value::ImmutableMap(m) => m.len(),
        other => {
            return Err(invalid_arg(
                "first",
                "string/array/immutable-array/map/immutable-map/bytes",
                other,
            ));
        }
    };
    Ok(Value::Int(len as i64))
}

fn builtin_copy(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(RuntimeError::WrongNumArguments);
    }
    Ok(args[0].copy_value())
}

fn builtin_append(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(RuntimeError::WrongNumArguments);
    }
    let rest = args[1..].to_vec();
    match &args[0] {
        Value::Array(a) => {
            let mut items = a.borrow().clone();
            items.extend(rest);
            Ok(Value::array(items))
        }
        Value::ImmutableArray(a) => {
            let mut items = a.as_ref().clone();
            items.extend(rest);
            Ok(Value::array(items))
        }
        Value::Undefined => Ok(Value::array(rest)),
        other => Err(invalid_arg("first", "array", other)),
    }
}

fn builtin_delete(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(RuntimeError::WrongNumArguments);
    }
    match &args[0] {
        Value::Map(m) => match &args[1] {
            Value::String(key) => {
                m.borrow_mut().remove(key);
                Ok(Value::Undefined)
            }
            other => Err(invalid_arg("second", "string", other)),
        },
        other => Err(invalid_arg("first", "map", other)),
    }
}

fn builtin_splice(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(RuntimeError::WrongNumArguments);
    }
    let array = match &args[0] {
        Value::Array(a) => a,
        other => return Err(invalid_arg("first", "array", other)),
    };
    let array_len = array.borrow().len();

    let start = match args.get(1) {
        Some(Value::Int(v)) => {
            if *v < 0 || *v as usize > array_len {
                return Err(RuntimeError::IndexOutOfBounds);
            }
            *v as usize
        }
        Some(other) => return Err(invalid_arg("second", "int", other)),
        None => 0,
    };
    let mut count = match args.get(2) {
        Some(Value::Int(v)) => {
            if *v < 0 {
                return Err(RuntimeError::IndexOutOfBounds);
            }
            *v as usize
        }
        Some(other) => return Err(invalid_arg("third", "int", other)),
        None => array_len,
    };
    if start + count > array_len {
        count = array_len - start;
    }

    let inserted = args[3..].to_vec();
    let deleted: Vec<Value> = {
        let mut items = array.borrow_mut();
        items.splice(start..start + count, inserted).collect()
    };
    Ok(Value::array(deleted))
}

fn builtin_string(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::WrongNumArguments);
    }
    if matches!(args[0], Value::String(_)) {
        return Ok(args[0].clone());
    }
    match convert::to_string_value(&args[0]) {
        Some(s) => {
            if s.len() > MAX_STRING_LEN {
                return Err(RuntimeError::StringLimit);
            }
            Ok(Value::String(s))
        }
        None => Ok(args.get(1).cloned().unwrap_or(Value::Undefined)),
    }
}

fn builtin_int(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::WrongNumArguments);
    }
    if matches!(args[0], Value::Int(_)) {
        return Ok(args[0].clone());
    }
    match convert::to_int(&args[0]) {
        Some(v) => Ok(Value::Int(v)),
        None => Ok(args.get(1).cloned().unwrap_or(Value::Undefined)),
    }
}

fn builtin_bool(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(RuntimeError::WrongNumArguments);
    }
    if matches!(args[0], Value::Bool(_)) {
        return Ok(args[0].clone());
    }
    Ok(Value::Bool(convert::to_bool(&args[0])))
}

fn builtin_float(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::WrongNumArguments);
    }
    if matches!(args[0], Value::Float(_)) {
        return Ok(args[0].clone());
    }
    match convert::to_float(&args[0]) {
        Some(v) => Ok(Value::Float(v)),
        None => Ok(args.get(1).cloned().unwrap_or(Value::Undefined)),
    }
}

fn builtin_char(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::WrongNumArguments);
    }
    if matches!(args[0], Value::Char(_)) {
        return Ok(args[0].clone());
    }
    match convert::to_char(&args[0]) {
        Some(c) => Ok(Value::Char(c)),
        None => Ok(args.get(1).cloned().unwrap_or(Value::Undefined)),
    }
}

fn builtin_bytes(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::WrongNumArguments);
    }
    // bytes(N) allocates N zero bytes
    if let Value::Int(n) = args[0] {
        if n < 0 || n as usize > MAX_BYTES_LEN {
            return Err(RuntimeError::BytesLimit);
        }
        return Ok(Value::bytes(vec![0u8; n as usize]));
    }
    match convert::to_byte_slice(&args[0]) {
        Some(b) => {
            if b.len() > MAX_BYTES_LEN {
                return Err(RuntimeError::BytesLimit);
            }
            Ok(Value::bytes(b))
        }
        None => Ok(args.get(1).cloned().unwrap_or(Value::Undefined)),
    }
}

fn builtin_time(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RuntimeError::WrongNumArguments);
    }
    if matches!(args[0], Value::Time(_)) {
        return Ok(args[0].clone());
    }
    match convert::to_time(&args[0]) {
        Some(t) => Ok(Value::Time(t)),
        None => Ok(args.get(1).cloned().unwrap_or(Value::Undefined)),
    }
}

fn type_check(args: &[Value], pred: fn(&Value) -> bool) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(RuntimeError::WrongNumArguments);
    }
    Ok(Value::Bool(pred(&args[0])))
}

fn builtin_is_string(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::String(_)))
}

fn builtin_is_int(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Int(_)))
}

fn builtin_is_bool(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Bool(_)))
}

fn builtin_is_float(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Float(_)))
}

fn builtin_is_char(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Char(_)))
}

fn builtin_is_bytes(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Bytes(_)))
}

fn builtin_is_error(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Error(_)))
}

fn builtin_is_undefined(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Undefined))
}

fn builtin_is_function(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| {
        matches!(
            v,
            Value::CompiledFunction(_) | Value::Closure(_) | Value::UserFunction(_)
        )
    })
}

fn builtin_is_callable(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, Value::is_callable)
}

fn builtin_is_array(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Array(_)))
}

fn builtin_is_immutable_array(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::ImmutableArray(_)))
}

fn builtin_is_map(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Map(_)))
}

fn builtin_is_immutable_map(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::ImmutableMap(_)))
}

fn builtin_is_iterable(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, Value::is_iterable)
}

fn builtin_is_time(args: &[Value]) -> Result<Value, RuntimeError> {
    type_check(args, |v| matches!(v, Value::Time(_)))
}

fn builtin_type_name(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(RuntimeError::WrongNumArguments);
    }
    Ok(Value::string(args[0].type_name()))
}

fn builtin_format(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(RuntimeError::WrongNumArguments);
    }
    let spec = match &args[0] {
        Value::String(s) => s,
        other => return Err(invalid_arg("format", "string", other)),
    };
    if args.len() == 1 {
        // okay to return 'format' directly as String is immutable
        return Ok(args[0].clone());
    }
    let out = format_values(spec.as_str(), &args[1..])?;
    if out.len() > MAX_STRING_LEN {
        return Err(RuntimeError::StringLimit);
    }
    Ok(Value::string(out))
}

fn builtin_range(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(RuntimeError::WrongNumArguments);
    }
    let start = match &args[0] {
        Value::Int(v) => *v,
        other => return Err(invalid_arg("start", "int", other)),
    };
    let stop = match &args[1] {
        Value::Int(v) => *v,
        other => return Err(invalid_arg("stop", "int", other)),
    };
    let step = match args.get(2) {
        Some(Value::Int(v)) => *v,
        Some(other) => return Err(invalid_arg("step", "int", other)),
        None => 1,
    };
    if step <= 0 {
        return Err(RuntimeError::InvalidRangeStep);
    }

    let mut items = Vec::new();
    if start <= stop {
        let mut i = start;
        while i < stop {
            items.push(Value::Int(i));
            i += step;
        }
    } else {
        let mut i = start;
        while i > stop {
            items.push(Value::Int(i));
            i -= step;
        }
    }
    Ok(Value::array(items))
}

fn builtin_printf(args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(RuntimeError::WrongNumArguments);
    }
    let spec = match &args[0] {
        Value::String(s) => s,
        other => return Err(invalid_arg("format", "string", other)),
    };
    if args.len() == 1 {
        print!("{}", spec);
    } else {
        print!("{}", format_values(spec.as_str(), &args[1..])?);
    }
    Ok(Value::Undefined)
}

fn builtin_println(args: &[Value]) -> Result<Value, RuntimeError> {
    println!("{}", join_printable(args));
    Ok(Value::Undefined)
}

fn builtin_sprint(args: &[Value]) -> Result<Value, RuntimeError> {
    let out = join_printable(args);
    if out.len() > MAX_STRING_LEN {
        return Err(RuntimeError::StringLimit);
    }
    Ok(Value::string(out))
}

/// Space-joined display of values; strings print raw, everything else in
/// its printable form.
fn join_printable(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match arg {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
    }
    out
}
