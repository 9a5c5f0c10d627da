//! Container tests: encode/decode round trips, constant deduplication,
//! object counting, and encoding determinism.

mod common;

use std::rc::Rc;

use common::*;
use pretty_assertions::assert_eq;
use zephyr_core::api::Context;
use zephyr_core::compiler::{BuiltinModule, ModuleMap};
use zephyr_core::errors::DecodeError;
use zephyr_core::source::SourceFileSet;
use zephyr_core::token::Token;
use zephyr_core::values::{CompiledFunction, Value, ValueMap};
use zephyr_core::vm::instruction_set::Opcode;
use zephyr_core::vm::{Bytecode, VM};

fn bytecode(instructions: Vec<u8>, constants: Vec<Value>) -> Bytecode {
    Bytecode {
        file_set: SourceFileSet::new(),
        main_function: Rc::new(CompiledFunction {
            instructions,
            ..CompiledFunction::default()
        }),
        constants,
    }
}

fn compiled_function(num_locals: usize, num_params: usize, instructions: &[Vec<u8>]) -> Value {
    Value::CompiledFunction(Rc::new(CompiledFunction {
        instructions: concat(instructions),
        num_locals,
        num_parameters: num_params,
        ..CompiledFunction::default()
    }))
}

fn round_trip(original: &Bytecode, modules: Option<&ModuleMap>) -> Bytecode {
    let mut buf = Vec::new();
    original.encode(&mut buf).expect("encode failed");
    let decoded =
        Bytecode::decode(&mut buf.as_slice(), modules).expect("decode failed");
    assert_eq!(original, &decoded);
    decoded
}

#[test]
fn round_trip_empty() {
    round_trip(&bytecode(concat(&[]), vec![]), None);
}

#[test]
fn round_trip_scalars_and_functions() {
    round_trip(
        &bytecode(
            concat(&[]),
            vec![
                Value::Char('y'),
                Value::Float(93.11),
                compiled_function(
                    1,
                    0,
                    &[
                        inst(Opcode::Constant, &[3]),
                        inst(Opcode::SetLocal, &[0]),
                        inst(Opcode::GetGlobal, &[0]),
                        inst(Opcode::GetFree, &[0]),
                    ],
                ),
                Value::Float(39.2),
                Value::Int(192),
                Value::string("bar"),
            ],
        ),
        None,
    );
}

#[test]
fn round_trip_composites_and_file_set() {
    let mut file_set = SourceFileSet::new();
    let f1 = file_set.add_file("file1", None, 100);
    f1.set_lines(vec![0, 10, 50]);
    file_set.add_file("file2", None, 200);

    let deep: ValueMap = [
        (
            "array".into(),
            Value::immutable_array(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::TRUE,
                Value::FALSE,
                Value::Undefined,
            ]),
        ),
        ("true".into(), Value::TRUE),
        ("false".into(), Value::FALSE),
        ("bytes".into(), Value::bytes(vec![0u8; 16])),
        ("char".into(), Value::Char('Y')),
        ("error".into(), Value::error(Value::string("some error"))),
        ("float".into(), Value::Float(-19.84)),
        (
            "immutable_map".into(),
            Value::immutable_map(
                [
                    ("a".into(), Value::Int(1)),
                    ("b".into(), Value::Int(2)),
                    ("c".into(), Value::Int(3)),
                    ("d".into(), Value::TRUE),
                    ("e".into(), Value::FALSE),
                    ("f".into(), Value::Undefined),
                ]
                .into_iter()
                .collect(),
            ),
        ),
        ("int".into(), Value::Int(91)),
        (
            "map".into(),
            Value::map(
                [
                    ("a".into(), Value::Int(1)),
                    ("b".into(), Value::Int(2)),
                ]
                .into_iter()
                .collect(),
            ),
        ),
        ("string".into(), Value::string("foo bar")),
        (
            "time".into(),
            Value::Time(chrono::DateTime::from_timestamp_nanos(
                1_600_000_000_123_456_789,
            )),
        ),
        ("undefined".into(), Value::Undefined),
    ]
    .into_iter()
    .collect();

    let original = Bytecode {
        file_set,
        main_function: Rc::new(CompiledFunction {
            instructions: concat(&[
                inst(Opcode::Constant, &[0]),
                inst(Opcode::SetGlobal, &[0]),
                inst(Opcode::Constant, &[6]),
                inst(Opcode::Pop, &[]),
            ]),
            source_map: [(0usize, 5u32), (3, 8), (6, 12)].into_iter().collect(),
            ..CompiledFunction::default()
        }),
        constants: vec![
            Value::Int(55),
            Value::Int(66),
            Value::Int(77),
            Value::Int(88),
            Value::immutable_map(deep),
            compiled_function(
                1,
                0,
                &[
                    inst(Opcode::Constant, &[3]),
                    inst(Opcode::SetLocal, &[0]),
                    inst(Opcode::GetGlobal, &[0]),
                    inst(Opcode::GetFree, &[0]),
                    inst(Opcode::BinaryOp, &[11]),
                    inst(Opcode::GetFree, &[1]),
                    inst(Opcode::BinaryOp, &[11]),
                    inst(Opcode::GetLocal, &[0]),
                    inst(Opcode::BinaryOp, &[11]),
                    inst(Opcode::Return, &[1]),
                ],
            ),
            compiled_function(
                1,
                0,
                &[
                    inst(Opcode::Constant, &[2]),
                    inst(Opcode::SetLocal, &[0]),
                    inst(Opcode::GetFree, &[0]),
                    inst(Opcode::GetLocal, &[0]),
                    inst(Opcode::Closure, &[4, 2]),
                    inst(Opcode::Return, &[1]),
                ],
            ),
        ],
    };
    round_trip(&original, None);
}

#[test]
fn round_trip_module_functions() {
    let mut math = BuiltinModule::new("math");
    math.add_function("square", |args| Ok(args[0].clone()));
    let square = math.attr("square").cloned().unwrap();
    let mut modules = ModuleMap::new();
    modules.add_builtin_module(math);

    let original = bytecode(concat(&[]), vec![square]);

    // with the module registered, the function re-binds by name
    let decoded = round_trip(&original, Some(&modules));
    match &decoded.constants[0] {
        Value::UserFunction(f) => {
            assert_eq!(f.name, "square");
            assert_eq!(f.module.as_deref(), Some("math"));
        }
        other => panic!("unexpected constant: {}", other.type_name()),
    }

    // without it, decoding fails
    let mut buf = Vec::new();
    original.encode(&mut buf).unwrap();
    match Bytecode::decode(&mut buf.as_slice(), None) {
        Err(DecodeError::ModuleNotFound { module }) => assert_eq!(module, "math"),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    // a bare host function has no wire form
    let bare = Value::UserFunction(Rc::new(zephyr_core::values::UserFunction::new(
        "f",
        |_| Ok(Value::Undefined),
    )));
    let mut buf = Vec::new();
    assert!(bytecode(concat(&[]), vec![bare]).encode(&mut buf).is_err());
}

#[test]
fn decode_rejects_bad_headers() {
    let mut buf = Vec::new();
    bytecode(concat(&[]), vec![]).encode(&mut buf).unwrap();

    let mut bad_magic = buf.clone();
    bad_magic[0] = b'X';
    assert!(matches!(
        Bytecode::decode(&mut bad_magic.as_slice(), None),
        Err(DecodeError::InvalidMagic)
    ));

    let mut bad_version = buf.clone();
    bad_version[4] = 99;
    assert!(matches!(
        Bytecode::decode(&mut bad_version.as_slice(), None),
        Err(DecodeError::UnsupportedVersion(99))
    ));

    assert!(Bytecode::decode(&mut &buf[..6], None).is_err());
}

#[test]
fn remove_duplicates_keeps_unique_pools() {
    let mut input = bytecode(
        concat(&[]),
        vec![
            Value::Char('y'),
            Value::Float(93.11),
            compiled_function(
                1,
                0,
                &[
                    inst(Opcode::Constant, &[3]),
                    inst(Opcode::SetLocal, &[0]),
                    inst(Opcode::GetGlobal, &[0]),
                    inst(Opcode::GetFree, &[0]),
                ],
            ),
            Value::Float(39.2),
            Value::Int(192),
            Value::string("bar"),
        ],
    );
    let expected = input.clone();
    input.remove_duplicates();
    assert_eq!(input, expected);
}

#[test]
fn remove_duplicates_rewrites_operands() {
    let mut input = bytecode(
        concat(&[
            inst(Opcode::Constant, &[0]),
            inst(Opcode::Constant, &[1]),
            inst(Opcode::Constant, &[2]),
            inst(Opcode::Constant, &[3]),
            inst(Opcode::Constant, &[4]),
            inst(Opcode::Constant, &[5]),
            inst(Opcode::Constant, &[6]),
            inst(Opcode::Constant, &[7]),
            inst(Opcode::Constant, &[8]),
            inst(Opcode::Closure, &[4, 1]),
        ]),
        vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::Char('3'),
            Value::string("four"),
            compiled_function(
                1,
                0,
                &[
                    inst(Opcode::Constant, &[3]),
                    inst(Opcode::Constant, &[7]),
                    inst(Opcode::SetLocal, &[0]),
                    inst(Opcode::GetGlobal, &[0]),
                    inst(Opcode::GetFree, &[0]),
                ],
            ),
            Value::Int(1),
            Value::Float(2.0),
            Value::Char('3'),
            Value::string("four"),
        ],
    );
    input.remove_duplicates();

    let expected = bytecode(
        concat(&[
            inst(Opcode::Constant, &[0]),
            inst(Opcode::Constant, &[1]),
            inst(Opcode::Constant, &[2]),
            inst(Opcode::Constant, &[3]),
            inst(Opcode::Constant, &[4]),
            inst(Opcode::Constant, &[0]),
            inst(Opcode::Constant, &[1]),
            inst(Opcode::Constant, &[2]),
            inst(Opcode::Constant, &[3]),
            inst(Opcode::Closure, &[4, 1]),
        ]),
        vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::Char('3'),
            Value::string("four"),
            compiled_function(
                1,
                0,
                &[
                    inst(Opcode::Constant, &[3]),
                    inst(Opcode::Constant, &[2]),
                    inst(Opcode::SetLocal, &[0]),
                    inst(Opcode::GetGlobal, &[0]),
                    inst(Opcode::GetFree, &[0]),
                ],
            ),
        ],
    );
    assert_eq!(input, expected);
}

#[test]
fn remove_duplicates_compacts_ints() {
    let mut input = bytecode(
        concat(&[
            inst(Opcode::Constant, &[0]),
            inst(Opcode::Constant, &[1]),
            inst(Opcode::Constant, &[2]),
            inst(Opcode::Constant, &[3]),
            inst(Opcode::Constant, &[4]),
        ]),
        vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Int(1),
            Value::Int(3),
        ],
    );
    input.remove_duplicates();

    let expected = bytecode(
        concat(&[
            inst(Opcode::Constant, &[0]),
            inst(Opcode::Constant, &[1]),
            inst(Opcode::Constant, &[2]),
            inst(Opcode::Constant, &[0]),
            inst(Opcode::Constant, &[2]),
        ]),
        vec![Value::Int(1), Value::Int(2), Value::Int(3)],
    );
    assert_eq!(input, expected);
}

#[test]
fn remove_duplicates_is_idempotent() {
    let mut once = bytecode(
        concat(&[
            inst(Opcode::Constant, &[0]),
            inst(Opcode::Constant, &[3]),
        ]),
        vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(1),
            Value::Int(2),
        ],
    );
    once.remove_duplicates();
    let mut twice = once.clone();
    twice.remove_duplicates();
    assert_eq!(once, twice);
}

#[test]
fn count_objects_spans_constants() {
    let b = bytecode(
        concat(&[]),
        vec![
            Value::Int(55),
            Value::Int(66),
            Value::Int(77),
            Value::Int(88),
            compiled_function(
                1,
                0,
                &[
                    inst(Opcode::Constant, &[3]),
                    inst(Opcode::Return, &[1]),
                ],
            ),
            compiled_function(
                1,
                0,
                &[
                    inst(Opcode::Constant, &[2]),
                    inst(Opcode::Return, &[1]),
                ],
            ),
            compiled_function(
                1,
                0,
                &[
                    inst(Opcode::Constant, &[1]),
                    inst(Opcode::Return, &[1]),
                ],
            ),
        ],
    );
    assert_eq!(b.count_objects(), 7);
}

#[test]
fn encoding_is_deterministic() {
    let program = || {
        file(vec![
            define(
                "m",
                map_lit(&[("b", int_lit(2)), ("a", int_lit(1)), ("c", int_lit(3))]),
            ),
            define("f", func_lit(&["x"], vec![ret(ident("x"))])),
            define("out", call(ident("f"), vec![int_lit(1)])),
        ])
    };
    let a = compile(&program()).unwrap();
    let b = compile(&program()).unwrap();

    let mut buf_a = Vec::new();
    a.encode(&mut buf_a).unwrap();
    let mut buf_b = Vec::new();
    b.encode(&mut buf_b).unwrap();
    assert_eq!(buf_a, buf_b);
}

#[test]
fn deduplication_preserves_execution() {
    // a := 7; b := 9; out := (a + b) * 7, hand-assembled with a duplicate
    // pool entry (the compiler itself dedups scalars on emit)
    let raw = bytecode(
        concat(&[
            inst(Opcode::Constant, &[0]),
            inst(Opcode::SetGlobal, &[0]),
            inst(Opcode::Constant, &[1]),
            inst(Opcode::SetGlobal, &[1]),
            inst(Opcode::GetGlobal, &[0]),
            inst(Opcode::GetGlobal, &[1]),
            inst(Opcode::BinaryOp, &[Token::Add as u8 as usize]),
            inst(Opcode::Constant, &[2]),
            inst(Opcode::BinaryOp, &[Token::Mul as u8 as usize]),
            inst(Opcode::SetGlobal, &[2]),
            inst(Opcode::Suspend, &[]),
        ]),
        vec![Value::Int(7), Value::Int(9), Value::Int(7)],
    );
    let mut deduped = raw.clone();
    deduped.remove_duplicates();
    assert_eq!(deduped.constants.len(), 2);

    let ctx = Context::background();
    let mut vm_raw = VM::new(&raw, None, -1);
    vm_raw.run(&ctx).unwrap();
    let mut vm_deduped = VM::new(&deduped, None, -1);
    vm_deduped.run(&ctx).unwrap();

    // out is global #2 in both runs
    assert!(vm_raw.globals()[2].equals(&Value::Int(112)));
    assert!(vm_deduped.globals()[2].equals(&Value::Int(112)));
}
