use std::rc::Rc;

use crate::values::{CompiledFunction, Value, ValueIterator, ValueMap};

fn map_of(entries: Vec<(&str, Value)>) -> Value {
    let m: ValueMap = entries
        .into_iter()
        .map(|(k, v)| (ecow::EcoString::from(k), v))
        .collect();
    Value::map(m)
}

#[test]
fn type_names() {
    assert_eq!(Value::Int(0).type_name(), "int");
    assert_eq!(Value::Float(0.0).type_name(), "float");
    assert_eq!(Value::Char('a').type_name(), "char");
    assert_eq!(Value::string("").type_name(), "string");
    assert_eq!(Value::Bool(false).type_name(), "bool");
    assert_eq!(Value::array(vec![]).type_name(), "array");
    assert_eq!(Value::immutable_array(vec![]).type_name(), "immutable-array");
    assert_eq!(map_of(vec![]).type_name(), "map");
    assert_eq!(Value::bytes(vec![]).type_name(), "bytes");
    assert_eq!(Value::error(Value::Undefined).type_name(), "error");
    assert_eq!(Value::Undefined.type_name(), "undefined");
    assert_eq!(
        Value::CompiledFunction(Rc::new(CompiledFunction::default())).type_name(),
        "compiled-function"
    );

    let arr = Value::array(vec![]);
    let it = Value::Iterator(Rc::new(core::cell::RefCell::new(arr.iterate().unwrap())));
    assert_eq!(it.type_name(), "array-iterator");
    let s = Value::string("ab");
    let it = Value::Iterator(Rc::new(core::cell::RefCell::new(s.iterate().unwrap())));
    assert_eq!(it.type_name(), "string-iterator");
    let m = map_of(vec![]);
    let it = Value::Iterator(Rc::new(core::cell::RefCell::new(m.iterate().unwrap())));
    assert_eq!(it.type_name(), "map-iterator");
}

#[test]
fn falsiness() {
    assert!(Value::Int(0).is_falsy());
    assert!(!Value::Int(1).is_falsy());
    // floats are never falsy, zero included
    assert!(!Value::Float(0.0).is_falsy());
    assert!(!Value::Float(1.0).is_falsy());
    assert!(!Value::Char(' ').is_falsy());
    assert!(!Value::Char('T').is_falsy());
    assert!(Value::string("").is_falsy());
    assert!(!Value::string(" ").is_falsy());
    assert!(Value::array(vec![]).is_falsy());
    assert!(!Value::array(vec![Value::Undefined]).is_falsy());
    assert!(map_of(vec![]).is_falsy());
    assert!(!map_of(vec![("a", Value::Undefined)]).is_falsy());
    assert!(Value::Undefined.is_falsy());
    assert!(Value::error(Value::Undefined).is_falsy());
    assert!(Value::bytes(vec![]).is_falsy());
    assert!(!Value::bytes(vec![1, 2]).is_falsy());
    assert!(!Value::CompiledFunction(Rc::new(CompiledFunction::default())).is_falsy());

    let arr = Value::array(vec![Value::Int(1)]);
    let it = Value::Iterator(Rc::new(core::cell::RefCell::new(arr.iterate().unwrap())));
    assert!(it.is_falsy());
}

#[test]
fn printable_forms() {
    assert_eq!(Value::Int(0).to_string(), "0");
    assert_eq!(Value::Int(1).to_string(), "1");
    assert_eq!(Value::Float(0.0).to_string(), "0");
    assert_eq!(Value::Float(1.0).to_string(), "1");
    assert_eq!(Value::Char(' ').to_string(), " ");
    assert_eq!(Value::Char('T').to_string(), "T");
    assert_eq!(Value::string("").to_string(), "\"\"");
    assert_eq!(Value::string(" ").to_string(), "\" \"");
    assert_eq!(Value::array(vec![]).to_string(), "[]");
    assert_eq!(map_of(vec![]).to_string(), "{}");
    assert_eq!(Value::error(Value::Undefined).to_string(), "error");
    assert_eq!(
        Value::error(Value::string("error 1")).to_string(),
        "error: \"error 1\""
    );
    assert_eq!(Value::Undefined.to_string(), "<undefined>");
    assert_eq!(Value::bytes(vec![]).to_string(), "");
    assert_eq!(Value::bytes(b"foo".to_vec()).to_string(), "foo");
    assert_eq!(
        Value::array(vec![Value::Int(1), Value::string("two")]).to_string(),
        "[1, \"two\"]"
    );
    assert_eq!(
        map_of(vec![("b", Value::Int(2)), ("a", Value::Int(1))]).to_string(),
        "{a: 1, b: 2}"
    );

    let arr = Value::array(vec![Value::Int(1)]);
    let it = Value::Iterator(Rc::new(core::cell::RefCell::new(arr.iterate().unwrap())));
    assert_eq!(it.to_string(), "<array-iterator>");
}

#[test]
fn cyclic_values_print_without_recursing() {
    let arr = Value::array(vec![Value::Int(1)]);
    if let Value::Array(inner) = &arr {
        inner.borrow_mut().push(arr.clone());
    }
    assert_eq!(arr.to_string(), "[1, [...]]");

    let map = map_of(vec![("n", Value::Int(1))]);
    if let Value::Map(inner) = &map {
        inner
            .borrow_mut()
            .insert(ecow::EcoString::from("self"), map.clone());
    }
    assert_eq!(map.to_string(), "{n: 1, self: {...}}");
}

#[test]
fn error_equality_is_identity() {
    let err1 = Value::error(Value::string("some error"));
    let err2 = err1.clone();
    assert!(err1.equals(&err2));
    assert!(err2.equals(&err1));

    let err3 = Value::error(Value::string("some error"));
    assert!(!err1.equals(&err3));
    assert!(!err3.equals(&err1));
}

#[test]
fn cross_type_equality() {
    assert!(Value::Int(3).equals(&Value::Float(3.0)));
    assert!(Value::Float(3.0).equals(&Value::Int(3)));
    assert!(!Value::Int(3).equals(&Value::Float(3.5)));
    assert!(Value::Char('a').equals(&Value::string("a")));
    assert!(Value::string("é").equals(&Value::Char('é')));
    assert!(!Value::Char('a').equals(&Value::string("ab")));
    assert!(!Value::Int(0).equals(&Value::Bool(false)));
    assert!(!Value::string("1").equals(&Value::Int(1)));
    assert!(Value::Undefined.equals(&Value::Undefined));
}

#[test]
fn composite_equality_is_structural() {
    let a = Value::array(vec![Value::Int(1), Value::Int(2)]);
    let b = Value::array(vec![Value::Int(1), Value::Int(2)]);
    let c = Value::array(vec![Value::Int(1)]);
    assert!(a.equals(&b));
    assert!(!a.equals(&c));
    // mutable and immutable arrays never compare equal
    assert!(!a.equals(&Value::immutable_array(vec![Value::Int(1), Value::Int(2)])));

    let m1 = map_of(vec![("k", Value::Int(1))]);
    let m2 = map_of(vec![("k", Value::Int(1))]);
    let m3 = map_of(vec![("k", Value::Int(2))]);
    assert!(m1.equals(&m2));
    assert!(!m1.equals(&m3));
}

#[test]
fn map_index_coerces_keys() {
    let m = map_of(vec![]);
    let k = Value::Int(1);
    let v = Value::string("abcdef");
    m.index_set(&k, v.clone()).unwrap();

    let got = m.index_get(&k).unwrap();
    assert!(got.equals(&v));
    // the coerced key is the printable form of the int
    let got = m.index_get(&Value::string("1")).unwrap();
    assert!(got.equals(&v));
    // missing keys read as undefined
    assert!(m.index_get(&Value::string("nope")).unwrap().equals(&Value::Undefined));
    // undefined is not a key
    assert!(m.index_set(&Value::Undefined, Value::Int(1)).is_err());
}

#[test]
fn array_indexing_bounds() {
    let a = Value::array(vec![Value::Int(10), Value::Int(20)]);
    assert!(a.index_get(&Value::Int(1)).unwrap().equals(&Value::Int(20)));
    assert!(a.index_get(&Value::Int(2)).is_err());
    assert!(a.index_get(&Value::Int(-1)).is_err());
    assert!(a.index_get(&Value::string("x")).is_err());

    a.index_set(&Value::Int(0), Value::Int(99)).unwrap();
    assert!(a.index_get(&Value::Int(0)).unwrap().equals(&Value::Int(99)));
    assert!(a.index_set(&Value::Int(5), Value::Int(0)).is_err());
}

#[test]
fn immutable_composites_reject_writes() {
    let a = Value::immutable_array(vec![Value::Int(1)]);
    assert!(a.index_get(&Value::Int(0)).unwrap().equals(&Value::Int(1)));
    assert!(a.index_set(&Value::Int(0), Value::Int(2)).is_err());

    let m: ValueMap = [(ecow::EcoString::from("a"), Value::Int(1))]
        .into_iter()
        .collect();
    let m = Value::immutable_map(m);
    assert!(m.index_get(&Value::string("a")).unwrap().equals(&Value::Int(1)));
    assert!(m.index_set(&Value::string("a"), Value::Int(2)).is_err());
}

#[test]
fn bytes_index_set_keeps_length() {
    let b = Value::bytes(vec![0, 0, 0]);
    b.index_set(&Value::Int(1), Value::Int(0x41)).unwrap();
    assert_eq!(b.to_string(), "\0A\0");
    assert!(b.index_set(&Value::Int(3), Value::Int(1)).is_err());
    assert!(b.index_set(&Value::Int(0), Value::string("x")).is_err());
}

#[test]
fn error_selector_reads_inner_value() {
    let err = Value::error(Value::Int(5));
    let got = err.index_get(&Value::string("value")).unwrap();
    assert!(got.equals(&Value::Int(5)));
    assert!(err.index_get(&Value::string("other")).is_err());
}

#[test]
fn undefined_indexes_to_undefined() {
    let got = Value::Undefined.index_get(&Value::string("x")).unwrap();
    assert!(got.equals(&Value::Undefined));
}

#[test]
fn deep_copy_detaches_storage() {
    let inner = Value::array(vec![Value::Int(1)]);
    let outer = Value::array(vec![inner.clone(), Value::Int(2)]);
    let copied = outer.copy_value();

    inner.index_set(&Value::Int(0), Value::Int(99)).unwrap();
    // the copy still sees the old element
    let copied_inner = copied.index_get(&Value::Int(0)).unwrap();
    assert!(copied_inner.index_get(&Value::Int(0)).unwrap().equals(&Value::Int(1)));

    // copying an immutable array yields a mutable one
    let frozen = Value::immutable_array(vec![Value::Int(1)]);
    assert_eq!(frozen.copy_value().type_name(), "array");
}

#[test]
fn count_objects_is_transitive() {
    assert_eq!(Value::array(vec![]).count_objects(), 1);
    let nested = Value::array(vec![
        Value::Int(1),
        Value::Int(2),
        Value::array(vec![Value::Int(3), Value::Int(4), Value::Int(5)]),
    ]);
    assert_eq!(nested.count_objects(), 7);
    assert_eq!(Value::error(Value::Int(5)).count_objects(), 2);
    assert_eq!(Value::Int(1984).count_objects(), 1);
    assert_eq!(
        Value::CompiledFunction(Rc::new(CompiledFunction::default())).count_objects(),
        1
    );

    let m = map_of(vec![
        ("k1", Value::Int(1)),
        ("k2", Value::Int(2)),
        (
            "k3",
            Value::array(vec![Value::Int(3), Value::Int(4), Value::Int(5)]),
        ),
    ]);
    assert_eq!(m.count_objects(), 7);
}

#[test]
fn cells_are_transparent() {
    let cell = Value::Cell(Value::cell(Value::Int(5)));
    assert!(cell.equals(&Value::Int(5)));
    assert!(Value::Int(5).equals(&cell));
    assert_eq!(cell.type_name(), "int");
    assert_eq!(cell.to_string(), "5");
    assert!(!cell.is_falsy());
}

#[test]
fn iterators_snapshot_their_source() {
    let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
    let mut it = arr.iterate().unwrap();
    arr.index_set(&Value::Int(0), Value::Int(99)).unwrap();
    assert!(it.next());
    assert!(it.value().equals(&Value::Int(1)));

    match arr.iterate().unwrap() {
        ValueIterator::Array(_) => {}
        other => panic!("unexpected iterator: {}", other.type_name()),
    }
    assert!(Value::Int(1).iterate().is_none());
}
