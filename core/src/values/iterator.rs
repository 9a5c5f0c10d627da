//! Iterator values backing `for … in` loops.
//!
//! Iterators are opaque, single-pass, and non-restartable. Each one
//! snapshots its source at construction time, so the traversal of one
//! iterator instance is stable even if the underlying composite is
//! mutated mid-loop. Map iteration order is unspecified but fixed per
//! instance.

use ecow::EcoString;

use crate::values::Value;

/// The state machine behind an iterator value.
///
/// `next` advances and reports whether a current element exists; `key` and
/// `value` read the current element and yield `Undefined` before the first
/// successful `next`.
#[derive(Clone, Debug)]
pub enum ValueIterator {
    Array(ArrayIterator),
    String(StringIterator),
    Map(MapIterator),
    Bytes(BytesIterator),
}

impl ValueIterator {
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueIterator::Array(_) => "array-iterator",
            ValueIterator::String(_) => "string-iterator",
            ValueIterator::Map(_) => "map-iterator",
            ValueIterator::Bytes(_) => "bytes-iterator",
        }
    }

    /// The printable form, e.g. `<array-iterator>`.
    pub fn display_name(&self) -> String {
        format!("<{}>", self.type_name())
    }

    pub fn next(&mut self) -> bool {
        match self {
            ValueIterator::Array(it) => it.next(),
            ValueIterator::String(it) => it.next(),
            ValueIterator::Map(it) => it.next(),
            ValueIterator::Bytes(it) => it.next(),
        }
    }

    pub fn key(&self) -> Value {
        match self {
            ValueIterator::Array(it) => it.key(),
            ValueIterator::String(it) => it.key(),
            ValueIterator::Map(it) => it.key(),
            ValueIterator::Bytes(it) => it.key(),
        }
    }

    pub fn value(&self) -> Value {
        match self {
            ValueIterator::Array(it) => it.value(),
            ValueIterator::String(it) => it.value(),
            ValueIterator::Map(it) => it.value(),
            ValueIterator::Bytes(it) => it.value(),
        }
    }
}

/// Yields 0-based int keys and the element values.
#[derive(Clone, Debug)]
pub struct ArrayIterator {
    items: Vec<Value>,
    current: Option<usize>,
}

impl ArrayIterator {
    pub fn new(items: Vec<Value>) -> Self {
        ArrayIterator {
            items,
            current: None,
        }
    }

    fn next(&mut self) -> bool {
        let next = self.current.map_or(0, |i| i + 1);
        if next < self.items.len() {
            self.current = Some(next);
            true
        } else {
            // park past the end so repeated `next` stays false
            self.current = Some(self.items.len());
            false
        }
    }

    fn key(&self) -> Value {
        match self.current {
            Some(i) if i < self.items.len() => Value::Int(i as i64),
            _ => Value::Undefined,
        }
    }

    fn value(&self) -> Value {
        match self.current {
            Some(i) if i < self.items.len() => self.items[i].clone(),
            _ => Value::Undefined,
        }
    }
}

/// Yields byte-offset int keys and char values, one rune per step.
#[derive(Clone, Debug)]
pub struct StringIterator {
    runes: Vec<(usize, char)>,
    current: Option<usize>,
}

impl StringIterator {
    pub fn new(s: &str) -> Self {
        StringIterator {
            runes: s.char_indices().collect(),
            current: None,
        }
    }

    fn next(&mut self) -> bool {
        let next = self.current.map_or(0, |i| i + 1);
        if next < self.runes.len() {
            self.current = Some(next);
            true
        } else {
            self.current = Some(self.runes.len());
            false
        }
    }

    fn key(&self) -> Value {
        match self.current {
            Some(i) if i < self.runes.len() => Value::Int(self.runes[i].0 as i64),
            _ => Value::Undefined,
        }
    }

    fn value(&self) -> Value {
        match self.current {
            Some(i) if i < self.runes.len() => Value::Char(self.runes[i].1),
            _ => Value::Undefined,
        }
    }
}

/// Yields string keys and the mapped values.
#[derive(Clone, Debug)]
pub struct MapIterator {
    entries: Vec<(EcoString, Value)>,
    current: Option<usize>,
}

impl MapIterator {
    pub fn new(entries: Vec<(EcoString, Value)>) -> Self {
        MapIterator {
            entries,
            current: None,
        }
    }

    fn next(&mut self) -> bool {
        let next = self.current.map_or(0, |i| i + 1);
        if next < self.entries.len() {
            self.current = Some(next);
            true
        } else {
            self.current = Some(self.entries.len());
            false
        }
    }

    fn key(&self) -> Value {
        match self.current {
            Some(i) if i < self.entries.len() => Value::String(self.entries[i].0.clone()),
            _ => Value::Undefined,
        }
    }

    fn value(&self) -> Value {
        match self.current {
            Some(i) if i < self.entries.len() => self.entries[i].1.clone(),
            _ => Value::Undefined,
        }
    }
}

/// Yields 0-based int keys and int byte values.
#[derive(Clone, Debug)]
pub struct BytesIterator {
    bytes: Vec<u8>,
    current: Option<usize>,
}

impl BytesIterator {
    pub fn new(bytes: Vec<u8>) -> Self {
        BytesIterator {
            bytes,
            current: None,
        }
    }

    fn next(&mut self) -> bool {
        let next = self.current.map_or(0, |i| i + 1);
        if next < self.bytes.len() {
            self.current = Some(next);
            true
        } else {
            self.current = Some(self.bytes.len());
            false
        }
    }

    fn key(&self) -> Value {
        match self.current {
            Some(i) if i < self.bytes.len() => Value::Int(i as i64),
            _ => Value::Undefined,
        }
    }

    fn value(&self) -> Value {
        match self.current {
            Some(i) if i < self.bytes.len() => Value::Int(self.bytes[i] as i64),
            _ => Value::Undefined,
        }
    }
}

#[cfg(test)]
mod iterator_test {
    use super::*;

    #[test]
    fn array_iteration_yields_int_keys() {
        let mut it = ValueIterator::Array(ArrayIterator::new(vec![
            Value::Int(10),
            Value::Int(20),
        ]));
        assert!(matches!(it.key(), Value::Undefined));

        assert!(it.next());
        assert!(it.key().equals(&Value::Int(0)));
        assert!(it.value().equals(&Value::Int(10)));

        assert!(it.next());
        assert!(it.key().equals(&Value::Int(1)));
        assert!(it.value().equals(&Value::Int(20)));

        assert!(!it.next());
        assert!(!it.next());
        assert!(matches!(it.value(), Value::Undefined));
    }

    #[test]
    fn string_iteration_uses_byte_offsets() {
        let mut it = ValueIterator::String(StringIterator::new("aé☃"));
        let mut seen = Vec::new();
        while it.next() {
            seen.push((it.key(), it.value()));
        }
        assert_eq!(seen.len(), 3);
        assert!(seen[0].0.equals(&Value::Int(0)));
        assert!(seen[0].1.equals(&Value::Char('a')));
        assert!(seen[1].0.equals(&Value::Int(1)));
        assert!(seen[1].1.equals(&Value::Char('é')));
        // 'é' is two bytes, so the snowman starts at offset 3
        assert!(seen[2].0.equals(&Value::Int(3)));
        assert!(seen[2].1.equals(&Value::Char('☃')));
    }

    #[test]
    fn bytes_iteration_yields_ints() {
        let mut it = ValueIterator::Bytes(BytesIterator::new(vec![7, 9]));
        assert!(it.next());
        assert!(it.value().equals(&Value::Int(7)));
        assert!(it.next());
        assert!(it.value().equals(&Value::Int(9)));
        assert!(!it.next());
    }
}
