//! Directive-based formatting for the `format`, `printf` and `sprint`
//! builtins.
//!
//! Supported directives: `%v` (printable form), `%s` (string form,
//! unquoted), `%q` (quoted string), `%d` (decimal int), `%b` `%o` `%x`
//! `%X` (integer bases), `%f` `%e` `%g` (float forms), `%t` (bool), `%c`
//! (char), `%%` (literal percent). Width/precision flags are not part of
//! the language.

use core::fmt::Write;

use crate::errors::RuntimeError;
use crate::values::convert;
use crate::values::value::Value;

/// Render `spec` with `args` substituted for its directives.
///
/// A directive without a matching argument is an error; surplus arguments
/// are ignored.
pub fn format_values(spec: &str, args: &[Value]) -> Result<String, RuntimeError> {
    let mut out = String::with_capacity(spec.len());
    let mut chars = spec.chars();
    let mut next_arg = 0usize;

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let verb = chars
            .next()
            .ok_or_else(|| RuntimeError::custom("format: trailing '%'"))?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = args.get(next_arg).ok_or_else(|| {
            RuntimeError::custom(format!("format: not enough arguments for '%{}'", verb))
        })?;
        next_arg += 1;
        write_directive(&mut out, verb, arg)?;
    }
    Ok(out)
}

fn write_directive(out: &mut String, verb: char, arg: &Value) -> Result<(), RuntimeError> {
    match verb {
        'v' => {
            let _ = write!(out, "{}", arg);
        }
        's' => match convert::to_string_value(arg) {
            Some(s) => out.push_str(&s),
            None => out.push_str("<undefined>"),
        },
        'q' => {
            let s = convert::to_string_value(arg).unwrap_or_default();
            let _ = write!(out, "{:?}", s.as_str());
        }
        'd' => {
            let v = expect_int(verb, arg)?;
            let _ = write!(out, "{}", v);
        }
        'b' => {
            let v = expect_int(verb, arg)?;
            let _ = write!(out, "{:b}", v);
        }
        'o' => {
            let v = expect_int(verb, arg)?;
            let _ = write!(out, "{:o}", v);
        }
        'x' => {
            let v = expect_int(verb, arg)?;
            let _ = write!(out, "{:x}", v);
        }
        'X' => {
            let v = expect_int(verb, arg)?;
            let _ = write!(out, "{:X}", v);
        }
        'f' => {
            let v = expect_float(verb, arg)?;
            let _ = write!(out, "{:.6}", v);
        }
        'e' => {
            let v = expect_float(verb, arg)?;
            let _ = write!(out, "{:e}", v);
        }
        'g' => {
            let v = expect_float(verb, arg)?;
            let _ = write!(out, "{}", v);
        }
        't' => {
            let _ = write!(out, "{}", convert::to_bool(arg));
        }
        'c' => {
            let c = convert::to_char(arg).ok_or_else(|| {
                RuntimeError::custom(format!("format: '%c' got {}", arg.type_name()))
            })?;
            out.push(c);
        }
        other => {
            return Err(RuntimeError::custom(format!(
                "format: unknown directive '%{}'",
                other
            )));
        }
    }
    Ok(())
}

fn expect_int(verb: char, arg: &Value) -> Result<i64, RuntimeError> {
    convert::to_int(arg)
        .ok_or_else(|| RuntimeError::custom(format!("format: '%{}' got {}", verb, arg.type_name())))
}

fn expect_float(verb: char, arg: &Value) -> Result<f64, RuntimeError> {
    convert::to_float(arg)
        .ok_or_else(|| RuntimeError::custom(format!("format: '%{}' got {}", verb, arg.type_name())))
}

#[cfg(test)]
mod format_test {
    use super::*;

    #[test]
    fn basic_directives() {
        let out = format_values(
            "%d + %d = %d",
            &[Value::Int(1), Value::Int(2), Value::Int(3)],
        )
        .unwrap();
        assert_eq!(out, "1 + 2 = 3");

        let out = format_values("%s/%q", &[Value::from("a"), Value::from("b")]).unwrap();
        assert_eq!(out, "a/\"b\"");

        let out = format_values("%v", &[Value::from("a")]).unwrap();
        assert_eq!(out, "\"a\"");

        let out = format_values("%x!", &[Value::Int(255)]).unwrap();
        assert_eq!(out, "ff!");

        let out = format_values("100%%", &[]).unwrap();
        assert_eq!(out, "100%");
    }

    #[test]
    fn missing_argument_is_an_error() {
        assert!(format_values("%d %d", &[Value::Int(1)]).is_err());
        assert!(format_values("%", &[]).is_err());
    }

    #[test]
    fn type_mismatch_is_an_error() {
        assert!(format_values("%d", &[Value::array(vec![])]).is_err());
    }
}
