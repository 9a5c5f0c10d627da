//! The object model: boxed values, operators, iterators and conversions.

pub mod convert;
pub mod format;
mod function;
mod iterator;
pub mod ops;
mod value;

pub use function::{BuiltinFunction, Closure, CompiledFunction, NativeFn, UserFunction};
pub use iterator::{ArrayIterator, BytesIterator, MapIterator, StringIterator, ValueIterator};
pub use value::{MAX_BYTES_LEN, MAX_STRING_LEN, Value, ValueMap};

#[cfg(test)]
mod value_test;
