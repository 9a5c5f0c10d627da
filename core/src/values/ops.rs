//! Binary-operator dispatch over values.
//!
//! The single entry point [`binary_op`] implements the language's operator
//! table: integer/float arithmetic with int→float promotion, bitwise ops,
//! ordered comparisons, string/char/bytes concatenation, array
//! concatenation, immutable-map merge, and time arithmetic. Unsupported
//! combinations report `invalid operator`; the VM attaches the source
//! position.

use chrono::Duration;

use crate::errors::RuntimeError;
use crate::token::Token;
use crate::values::value::{MAX_BYTES_LEN, MAX_STRING_LEN, Value, ValueMap};

/// Apply `lhs op rhs`, producing a new value.
pub fn binary_op(lhs: &Value, op: Token, rhs: &Value) -> Result<Value, RuntimeError> {
    if let Value::Cell(c) = lhs {
        let inner = c.borrow().clone();
        return binary_op(&inner, op, rhs);
    }
    if let Value::Cell(c) = rhs {
        let inner = c.borrow().clone();
        return binary_op(lhs, op, &inner);
    }
    match (lhs, rhs) {
        (Value::Int(l), Value::Int(r)) => int_op(*l, op, *r),
        (Value::Int(l), Value::Float(r)) => float_op(*l as f64, op, *r),
        (Value::Int(l), Value::Char(r)) => int_char_op(*l, op, *r),
        (Value::Float(l), Value::Float(r)) => float_op(*l, op, *r),
        (Value::Float(l), Value::Int(r)) => float_op(*l, op, *r as f64),
        (Value::Char(l), Value::Char(r)) => char_op(*l, op, *r),
        (Value::Char(l), Value::Int(r)) => char_int_op(*l, op, *r),
        (Value::String(l), _) => string_op(l.as_str(), op, rhs),
        (Value::Bytes(l), Value::Bytes(r)) => bytes_op(&l.borrow(), op, &r.borrow()),
        (Value::Array(l), Value::Array(r)) => {
            array_concat(op, &l.borrow(), &r.borrow()).map(Value::array)
        }
        (Value::Array(l), Value::ImmutableArray(r)) => {
            array_concat(op, &l.borrow(), r).map(Value::array)
        }
        (Value::ImmutableArray(l), Value::ImmutableArray(r)) => {
            array_concat(op, l, r).map(Value::immutable_array)
        }
        (Value::ImmutableArray(l), Value::Array(r)) => {
            array_concat(op, l, &r.borrow()).map(Value::array)
        }
        (Value::ImmutableMap(l), Value::ImmutableMap(r)) => map_merge(op, l, r),
        (Value::Time(l), Value::Int(r)) => time_int_op(*l, op, *r),
        (Value::Time(l), Value::Time(r)) => time_op(*l, op, *r),
        _ => Err(RuntimeError::InvalidOperator),
    }
}

fn int_op(l: i64, op: Token, r: i64) -> Result<Value, RuntimeError> {
    let v = match op {
        Token::Add => Value::Int(l.wrapping_add(r)),
        Token::Sub => Value::Int(l.wrapping_sub(r)),
        Token::Mul => Value::Int(l.wrapping_mul(r)),
        Token::Quo => {
            if r == 0 {
                return Err(RuntimeError::ZeroDivisor);
            }
            Value::Int(l.wrapping_div(r))
        }
        Token::Rem => {
            if r == 0 {
                return Err(RuntimeError::ZeroDivisor);
            }
            Value::Int(l.wrapping_rem(r))
        }
        Token::And => Value::Int(l & r),
        Token::Or => Value::Int(l | r),
        Token::Xor => Value::Int(l ^ r),
        Token::AndNot => Value::Int(l & !r),
        Token::Shl => Value::Int(shift_left(l, r)?),
        Token::Shr => Value::Int(shift_right(l, r)?),
        Token::Less => Value::Bool(l < r),
        Token::Greater => Value::Bool(l > r),
        Token::LessEq => Value::Bool(l <= r),
        Token::GreaterEq => Value::Bool(l >= r),
        _ => return Err(RuntimeError::InvalidOperator),
    };
    Ok(v)
}

// Shifts by 64 or more drain the value instead of wrapping the count.
fn shift_left(l: i64, r: i64) -> Result<i64, RuntimeError> {
    if r < 0 {
        return Err(RuntimeError::InvalidOperator);
    }
    Ok(if r >= 64 { 0 } else { l << r })
}

fn shift_right(l: i64, r: i64) -> Result<i64, RuntimeError> {
    if r < 0 {
        return Err(RuntimeError::InvalidOperator);
    }
    Ok(if r >= 64 {
        if l < 0 { -1 } else { 0 }
    } else {
        l >> r
    })
}

fn float_op(l: f64, op: Token, r: f64) -> Result<Value, RuntimeError> {
    let v = match op {
        Token::Add => Value::Float(l + r),
        Token::Sub => Value::Float(l - r),
        Token::Mul => Value::Float(l * r),
        // IEEE-754: division by zero yields an infinity or NaN
        Token::Quo => Value::Float(l / r),
        Token::Less => Value::Bool(l < r),
        Token::Greater => Value::Bool(l > r),
        Token::LessEq => Value::Bool(l <= r),
        Token::GreaterEq => Value::Bool(l >= r),
        _ => return Err(RuntimeError::InvalidOperator),
    };
    Ok(v)
}

fn char_op(l: char, op: Token, r: char) -> Result<Value, RuntimeError> {
    let (l, r) = (l as u32 as i64, r as u32 as i64);
    let v = match op {
        Token::Add => char_value(l + r)?,
        Token::Sub => Value::Int(l - r),
        Token::Less => Value::Bool(l < r),
        Token::Greater => Value::Bool(l > r),
        Token::LessEq => Value::Bool(l <= r),
        Token::GreaterEq => Value::Bool(l >= r),
        _ => return Err(RuntimeError::InvalidOperator),
    };
    Ok(v)
}

fn char_int_op(l: char, op: Token, r: i64) -> Result<Value, RuntimeError> {
    let l = l as u32 as i64;
    match op {
        Token::Add => char_value(l + r),
        Token::Sub => char_value(l - r),
        _ => Err(RuntimeError::InvalidOperator),
    }
}

fn int_char_op(l: i64, op: Token, r: char) -> Result<Value, RuntimeError> {
    match op {
        Token::Add => char_value(l + r as u32 as i64),
        _ => Err(RuntimeError::InvalidOperator),
    }
}

fn char_value(code: i64) -> Result<Value, RuntimeError> {
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(Value::Char)
        .ok_or(RuntimeError::InvalidOperator)
}

// `string + x` concatenates for any x: other strings by content, chars
// by their encoding, everything else in its printable form.
fn string_op(l: &str, op: Token, rhs: &Value) -> Result<Value, RuntimeError> {
    if op != Token::Add {
        return Err(RuntimeError::InvalidOperator);
    }
    let rhs_str = match rhs {
        Value::String(r) => r.as_str().to_string(),
        other => other.to_string(),
    };
    if l.len() + rhs_str.len() > MAX_STRING_LEN {
        return Err(RuntimeError::StringLimit);
    }
    let mut out = ecow::EcoString::from(l);
    out.push_str(&rhs_str);
    Ok(Value::String(out))
}

fn bytes_op(l: &[u8], op: Token, r: &[u8]) -> Result<Value, RuntimeError> {
    if op != Token::Add {
        return Err(RuntimeError::InvalidOperator);
    }
    if l.len() + r.len() > MAX_BYTES_LEN {
        return Err(RuntimeError::BytesLimit);
    }
    let mut out = Vec::with_capacity(l.len() + r.len());
    out.extend_from_slice(l);
    out.extend_from_slice(r);
    Ok(Value::bytes(out))
}

fn array_concat(op: Token, l: &[Value], r: &[Value]) -> Result<Vec<Value>, RuntimeError> {
    if op != Token::Add {
        return Err(RuntimeError::InvalidOperator);
    }
    let mut out = Vec::with_capacity(l.len() + r.len());
    out.extend_from_slice(l);
    out.extend_from_slice(r);
    Ok(out)
}

fn map_merge(op: Token, l: &ValueMap, r: &ValueMap) -> Result<Value, RuntimeError> {
    if op != Token::Add {
        return Err(RuntimeError::InvalidOperator);
    }
    let mut out = l.clone();
    for (k, v) in r {
        out.insert(k.clone(), v.clone());
    }
    Ok(Value::immutable_map(out))
}

fn time_int_op(l: chrono::DateTime<chrono::Utc>, op: Token, r: i64) -> Result<Value, RuntimeError> {
    let delta = Duration::nanoseconds(r);
    match op {
        Token::Add => Ok(Value::Time(l + delta)),
        Token::Sub => Ok(Value::Time(l - delta)),
        _ => Err(RuntimeError::InvalidOperator),
    }
}

fn time_op(
    l: chrono::DateTime<chrono::Utc>,
    op: Token,
    r: chrono::DateTime<chrono::Utc>,
) -> Result<Value, RuntimeError> {
    let v = match op {
        Token::Sub => Value::Int((l - r).num_nanoseconds().unwrap_or(i64::MAX)),
        Token::Less => Value::Bool(l < r),
        Token::Greater => Value::Bool(l > r),
        Token::LessEq => Value::Bool(l <= r),
        Token::GreaterEq => Value::Bool(l >= r),
        _ => return Err(RuntimeError::InvalidOperator),
    };
    Ok(v)
}

/// Unary minus.
pub fn negate(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
        Value::Float(v) => Ok(Value::Float(-v)),
        Value::Cell(c) => negate(&c.borrow()),
        _ => Err(RuntimeError::InvalidOperator),
    }
}

/// Bitwise complement.
pub fn complement(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Int(v) => Ok(Value::Int(!v)),
        Value::Cell(c) => complement(&c.borrow()),
        _ => Err(RuntimeError::InvalidOperator),
    }
}
