//! The compiled-program container and its wire format.
//!
//! A [`Bytecode`] owns the main function, the constant pool and the source
//! file set. It can be encoded to a portable, byte-exact binary form:
//! every integer is big-endian, every variable-length field is
//! `u32`-length-prefixed, and map constants are written in sorted-key
//! order, so the same program always encodes to the same bytes.
//!
//! Host-native functions are only encodable when they carry a module
//! attribution; on decode they are re-bound by `(module, name)` against
//! the module map the host passes in.

use std::io::{Read, Write};
use std::rc::Rc;

use ecow::EcoString;
use hashbrown::HashMap;

use crate::compiler::ModuleMap;
use crate::errors::{DecodeError, EncodeError};
use crate::source::{SourceFile, SourceFileSet};
use crate::values::{CompiledFunction, Value, ValueMap};
use crate::vm::builtins::builtin_by_name;
use crate::vm::instruction_set::{Opcode, format_instructions, iterate_instructions, make_instruction};

/// File magic: "ZEP" plus a NUL.
pub const BYTECODE_MAGIC: &[u8; 4] = b"ZEP\0";
/// Current format version. Opcode numbering, operand widths and operator
/// tags are all frozen per version.
pub const BYTECODE_VERSION: u8 = 1;

// Constant tags.
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_CHAR: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_ARRAY: u8 = 7;
const TAG_IMMUTABLE_ARRAY: u8 = 8;
const TAG_MAP: u8 = 9;
const TAG_IMMUTABLE_MAP: u8 = 10;
const TAG_TIME: u8 = 11;
const TAG_ERROR: u8 = 12;
const TAG_UNDEFINED: u8 = 13;
const TAG_COMPILED_FUNCTION: u8 = 14;
const TAG_USER_FUNCTION: u8 = 15;
const TAG_BUILTIN_FUNCTION: u8 = 16;

// Refuse absurd length prefixes instead of attempting the allocation.
const MAX_DECODE_LEN: usize = 1 << 30;

/// A compiled program.
#[derive(Clone, Debug)]
pub struct Bytecode {
    pub file_set: SourceFileSet,
    pub main_function: Rc<CompiledFunction>,
    pub constants: Vec<Value>,
}

impl PartialEq for Bytecode {
    fn eq(&self, other: &Self) -> bool {
        self.file_set == other.file_set
            && structurally_equal(
                &Value::CompiledFunction(self.main_function.clone()),
                &Value::CompiledFunction(other.main_function.clone()),
            )
            && self.constants.len() == other.constants.len()
            && self
                .constants
                .iter()
                .zip(other.constants.iter())
                .all(|(a, b)| structurally_equal(a, b))
    }
}

impl Bytecode {
    /// Serialize to `w`.
    pub fn encode(&self, w: &mut impl Write) -> Result<(), EncodeError> {
        w.write_all(BYTECODE_MAGIC)?;
        w.write_all(&[BYTECODE_VERSION])?;
        encode_value(w, &Value::CompiledFunction(self.main_function.clone()))?;
        w.write_all(&(self.constants.len() as u32).to_be_bytes())?;
        for constant in &self.constants {
            encode_value(w, constant)?;
        }
        encode_file_set(w, &self.file_set)?;
        Ok(())
    }

    /// Deserialize from `r`. `modules` supplies the builtin modules used
    /// to re-bind serialized host functions by name.
    pub fn decode(r: &mut impl Read, modules: Option<&ModuleMap>) -> Result<Bytecode, DecodeError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != BYTECODE_MAGIC {
            return Err(DecodeError::InvalidMagic);
        }
        let version = read_u8(r)?;
        if version != BYTECODE_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let main = match decode_value(r, modules)? {
            Value::CompiledFunction(func) => func,
            _ => return Err(DecodeError::Corrupt("main function expected")),
        };
        let count = read_len(r)?;
        let mut constants = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            constants.push(decode_value(r, modules)?);
        }
        let file_set = decode_file_set(r)?;
        Ok(Bytecode {
            file_set,
            main_function: main,
            constants,
        })
    }

    /// Total number of values reachable from the constant pool.
    pub fn count_objects(&self) -> usize {
        self.constants.iter().map(Value::count_objects).sum()
    }

    /// Collapse duplicate scalar constants in place, re-pointing every
    /// `Constant`/`Closure` operand in the main function and in all
    /// function constants. Composite and function constants are left
    /// alone.
    pub fn remove_duplicates(&mut self) {
        let mut fingerprints: HashMap<Fingerprint, usize> = HashMap::new();
        let mut index_map: HashMap<usize, usize> = HashMap::new();
        let mut deduped: Vec<Value> = Vec::new();

        for (old_index, constant) in self.constants.iter().enumerate() {
            match Fingerprint::of(constant) {
                Some(key) => match fingerprints.get(&key) {
                    Some(&existing) => {
                        index_map.insert(old_index, existing);
                    }
                    None => {
                        let new_index = deduped.len();
                        deduped.push(constant.clone());
                        fingerprints.insert(key, new_index);
                        index_map.insert(old_index, new_index);
                    }
                },
                None => {
                    index_map.insert(old_index, deduped.len());
                    deduped.push(constant.clone());
                }
            }
        }

        let main = Rc::make_mut(&mut self.main_function);
        remap_constant_operands(&mut main.instructions, &index_map);
        for constant in &mut deduped {
            if let Value::CompiledFunction(func) = constant {
                remap_constant_operands(&mut Rc::make_mut(func).instructions, &index_map);
            }
        }
        self.constants = deduped;
    }

    /// Disassemble the main function.
    pub fn format_instructions(&self) -> Vec<String> {
        format_instructions(&self.main_function.instructions, 0)
    }

    /// Render the constant pool, disassembling function constants.
    pub fn format_constants(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (index, constant) in self.constants.iter().enumerate() {
            match constant {
                Value::CompiledFunction(func) => {
                    out.push(format!("[{:3}] (compiled function)", index));
                    for line in format_instructions(&func.instructions, 0) {
                        out.push(format!("     {}", line));
                    }
                }
                other => {
                    out.push(format!("[{:3}] {} ({})", index, other, other.type_name()));
                }
            }
        }
        out
    }
}

/// Structural value equality for container comparisons: unlike language
/// equality, errors compare by inner value, functions by content, and
/// mutable/immutable composites stay distinct.
fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => *x.borrow() == *y.borrow(),
        (Value::Array(x), Value::Array(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| structurally_equal(a, b))
        }
        (Value::ImmutableArray(x), Value::ImmutableArray(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| structurally_equal(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            maps_structurally_equal(&x, &y)
        }
        (Value::ImmutableMap(x), Value::ImmutableMap(y)) => maps_structurally_equal(x, y),
        (Value::Time(x), Value::Time(y)) => x == y,
        (Value::Error(x), Value::Error(y)) => structurally_equal(x, y),
        (Value::Undefined, Value::Undefined) => true,
        (Value::CompiledFunction(x), Value::CompiledFunction(y)) => x == y,
        (Value::UserFunction(x), Value::UserFunction(y)) => {
            x.name == y.name && x.module == y.module
        }
        (Value::Builtin(x), Value::Builtin(y)) => x.name == y.name,
        _ => false,
    }
}

fn maps_structurally_equal(a: &ValueMap, b: &ValueMap) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.get(k).is_some_and(|other| structurally_equal(v, other)))
}

/// Scalar fingerprints for constant deduplication. Floats compare by bit
/// pattern so the pass is stable under NaN and signed zero.
#[derive(Hash, PartialEq, Eq)]
enum Fingerprint {
    Int(i64),
    Float(u64),
    Bool(bool),
    Char(char),
    Str(EcoString),
}

impl Fingerprint {
    fn of(value: &Value) -> Option<Fingerprint> {
        match value {
            Value::Int(v) => Some(Fingerprint::Int(*v)),
            Value::Float(v) => Some(Fingerprint::Float(v.to_bits())),
            Value::Bool(v) => Some(Fingerprint::Bool(*v)),
            Value::Char(v) => Some(Fingerprint::Char(*v)),
            Value::String(v) => Some(Fingerprint::Str(v.clone())),
            _ => None,
        }
    }
}

/// Rewrite the constant-pool operand of every `Constant` and `Closure`
/// instruction according to `index_map`.
fn remap_constant_operands(instructions: &mut Vec<u8>, index_map: &HashMap<usize, usize>) {
    let mut patches: Vec<(usize, Opcode, Vec<usize>)> = Vec::new();
    iterate_instructions(instructions, |pos, opcode, operands| {
        match opcode {
            Opcode::Constant | Opcode::Closure => {
                if let Some(&new_index) = index_map.get(&operands[0]) {
                    if new_index != operands[0] {
                        let mut operands = operands.to_vec();
                        operands[0] = new_index;
                        patches.push((pos, opcode, operands));
                    }
                }
            }
            _ => {}
        }
        true
    });
    for (pos, opcode, operands) in patches {
        let encoded = make_instruction(opcode, &operands);
        instructions[pos..pos + encoded.len()].copy_from_slice(&encoded);
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn encode_value(w: &mut impl Write, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Int(v) => {
            w.write_all(&[TAG_INT])?;
            w.write_all(&v.to_be_bytes())?;
        }
        Value::Float(v) => {
            w.write_all(&[TAG_FLOAT])?;
            w.write_all(&v.to_bits().to_be_bytes())?;
        }
        Value::Bool(v) => {
            w.write_all(&[TAG_BOOL, *v as u8])?;
        }
        Value::Char(v) => {
            w.write_all(&[TAG_CHAR])?;
            w.write_all(&(*v as u32 as i32).to_be_bytes())?;
        }
        Value::String(v) => {
            w.write_all(&[TAG_STRING])?;
            encode_bytes(w, v.as_bytes())?;
        }
        Value::Bytes(v) => {
            w.write_all(&[TAG_BYTES])?;
            encode_bytes(w, &v.borrow())?;
        }
        Value::Array(v) => {
            w.write_all(&[TAG_ARRAY])?;
            encode_array(w, &v.borrow())?;
        }
        Value::ImmutableArray(v) => {
            w.write_all(&[TAG_IMMUTABLE_ARRAY])?;
            encode_array(w, v)?;
        }
        Value::Map(v) => {
            w.write_all(&[TAG_MAP])?;
            encode_map(w, &v.borrow())?;
        }
        Value::ImmutableMap(v) => {
            w.write_all(&[TAG_IMMUTABLE_MAP])?;
            encode_map(w, v)?;
        }
        Value::Time(v) => {
            w.write_all(&[TAG_TIME])?;
            let nanos = v.timestamp_nanos_opt().unwrap_or(0);
            w.write_all(&nanos.to_be_bytes())?;
            encode_bytes(w, b"UTC")?;
        }
        Value::Error(inner) => {
            w.write_all(&[TAG_ERROR])?;
            encode_value(w, inner)?;
        }
        Value::Undefined => {
            w.write_all(&[TAG_UNDEFINED])?;
        }
        Value::CompiledFunction(func) => {
            w.write_all(&[TAG_COMPILED_FUNCTION])?;
            encode_function(w, func)?;
        }
        Value::UserFunction(func) => {
            let Some(module) = &func.module else {
                return Err(EncodeError::NotSerializable {
                    type_name: value.type_name(),
                });
            };
            w.write_all(&[TAG_USER_FUNCTION])?;
            encode_bytes(w, module.as_bytes())?;
            encode_bytes(w, func.name.as_bytes())?;
        }
        Value::Builtin(builtin) => {
            w.write_all(&[TAG_BUILTIN_FUNCTION])?;
            encode_bytes(w, builtin.name.as_bytes())?;
        }
        Value::Closure(_) | Value::Iterator(_) | Value::Cell(_) => {
            return Err(EncodeError::NotSerializable {
                type_name: value.type_name(),
            });
        }
    }
    Ok(())
}

fn encode_bytes(w: &mut impl Write, bytes: &[u8]) -> Result<(), EncodeError> {
    w.write_all(&(bytes.len() as u32).to_be_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn encode_array(w: &mut impl Write, items: &[Value]) -> Result<(), EncodeError> {
    w.write_all(&(items.len() as u32).to_be_bytes())?;
    for item in items {
        encode_value(w, item)?;
    }
    Ok(())
}

fn encode_map(w: &mut impl Write, entries: &ValueMap) -> Result<(), EncodeError> {
    // sorted keys keep the encoding deterministic
    let mut keys: Vec<&EcoString> = entries.keys().collect();
    keys.sort();
    w.write_all(&(keys.len() as u32).to_be_bytes())?;
    for key in keys {
        encode_bytes(w, key.as_bytes())?;
        encode_value(w, &entries[key])?;
    }
    Ok(())
}

fn encode_function(w: &mut impl Write, func: &CompiledFunction) -> Result<(), EncodeError> {
    encode_bytes(w, &func.instructions)?;
    w.write_all(&(func.num_locals as u16).to_be_bytes())?;
    w.write_all(&(func.num_parameters as u16).to_be_bytes())?;
    w.write_all(&[func.variadic as u8])?;

    let mut entries: Vec<(usize, u32)> = func
        .source_map
        .iter()
        .map(|(&offset, &pos)| (offset, pos))
        .collect();
    entries.sort_unstable();
    w.write_all(&(entries.len() as u32).to_be_bytes())?;
    for (offset, pos) in entries {
        w.write_all(&(offset as u32).to_be_bytes())?;
        w.write_all(&pos.to_be_bytes())?;
    }
    Ok(())
}

fn encode_file_set(w: &mut impl Write, file_set: &SourceFileSet) -> Result<(), EncodeError> {
    w.write_all(&file_set.base().to_be_bytes())?;
    // last-file slot: reserved, readers rebuild their own cache
    w.write_all(&0u32.to_be_bytes())?;
    let files = file_set.files();
    w.write_all(&(files.len() as u32).to_be_bytes())?;
    for (id, file) in files.iter().enumerate() {
        w.write_all(&(id as u32).to_be_bytes())?;
        encode_bytes(w, file.name.as_bytes())?;
        w.write_all(&file.base.to_be_bytes())?;
        w.write_all(&file.size.to_be_bytes())?;
        let lines = file.lines();
        w.write_all(&(lines.len() as u32).to_be_bytes())?;
        for line in lines {
            w.write_all(&line.to_be_bytes())?;
        }
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_value(r: &mut impl Read, modules: Option<&ModuleMap>) -> Result<Value, DecodeError> {
    let tag = read_u8(r)?;
    let value = match tag {
        TAG_INT => Value::Int(read_i64(r)?),
        TAG_FLOAT => Value::Float(f64::from_bits(read_i64(r)? as u64)),
        TAG_BOOL => Value::Bool(read_u8(r)? != 0),
        TAG_CHAR => {
            let code = read_u32(r)?;
            let c = char::from_u32(code).ok_or(DecodeError::Corrupt("invalid char"))?;
            Value::Char(c)
        }
        TAG_STRING => Value::String(EcoString::from(read_string(r)?)),
        TAG_BYTES => Value::bytes(read_bytes(r)?),
        TAG_ARRAY => Value::array(decode_array(r, modules)?),
        TAG_IMMUTABLE_ARRAY => Value::immutable_array(decode_array(r, modules)?),
        TAG_MAP => Value::map(decode_map(r, modules)?),
        TAG_IMMUTABLE_MAP => Value::immutable_map(decode_map(r, modules)?),
        TAG_TIME => {
            let nanos = read_i64(r)?;
            let _location = read_string(r)?;
            Value::Time(chrono::DateTime::from_timestamp_nanos(nanos))
        }
        TAG_ERROR => Value::error(decode_value(r, modules)?),
        TAG_UNDEFINED => Value::Undefined,
        TAG_COMPILED_FUNCTION => Value::CompiledFunction(Rc::new(decode_function(r)?)),
        TAG_USER_FUNCTION => {
            let module = read_string(r)?;
            let name = read_string(r)?;
            let registered = modules.and_then(|m| m.get(&module)).is_some();
            if !registered {
                return Err(DecodeError::ModuleNotFound { module });
            }
            match modules.unwrap().builtin_attr(&module, &name) {
                Some(value @ Value::UserFunction(_)) => value,
                _ => return Err(DecodeError::FunctionNotFound { module, name }),
            }
        }
        TAG_BUILTIN_FUNCTION => {
            let name = read_string(r)?;
            match builtin_by_name(&name) {
                Some(builtin) => Value::Builtin(builtin),
                None => {
                    return Err(DecodeError::Corrupt("unknown builtin function"));
                }
            }
        }
        other => return Err(DecodeError::InvalidTag(other)),
    };
    Ok(value)
}

fn decode_array(r: &mut impl Read, modules: Option<&ModuleMap>) -> Result<Vec<Value>, DecodeError> {
    let count = read_len(r)?;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(decode_value(r, modules)?);
    }
    Ok(items)
}

fn decode_map(r: &mut impl Read, modules: Option<&ModuleMap>) -> Result<ValueMap, DecodeError> {
    let count = read_len(r)?;
    let mut entries = ValueMap::new();
    for _ in 0..count {
        let key = EcoString::from(read_string(r)?);
        let value = decode_value(r, modules)?;
        entries.insert(key, value);
    }
    Ok(entries)
}

/// Every opcode in the stream must decode and carry complete operands;
/// otherwise the VM's fetch would run off the end.
fn instructions_well_formed(instructions: &[u8]) -> bool {
    let mut pos = 0;
    while pos < instructions.len() {
        let Some(opcode) = Opcode::from_byte(instructions[pos]) else {
            return false;
        };
        pos += opcode.instruction_size();
    }
    pos == instructions.len()
}

fn decode_function(r: &mut impl Read) -> Result<CompiledFunction, DecodeError> {
    let instructions = read_bytes(r)?;
    if !instructions_well_formed(&instructions) {
        return Err(DecodeError::Corrupt("malformed instruction stream"));
    }
    let num_locals = read_u16(r)? as usize;
    let num_parameters = read_u16(r)? as usize;
    let variadic = read_u8(r)? != 0;
    let entries = read_len(r)?;
    let mut source_map = HashMap::with_capacity(entries.min(1024));
    for _ in 0..entries {
        let offset = read_u32(r)? as usize;
        let pos = read_u32(r)?;
        source_map.insert(offset, pos);
    }
    Ok(CompiledFunction {
        instructions,
        num_locals,
        num_parameters,
        variadic,
        source_map,
    })
}

fn decode_file_set(r: &mut impl Read) -> Result<SourceFileSet, DecodeError> {
    let base = read_u32(r)?;
    let _last = read_u32(r)?;
    let count = read_len(r)?;
    let mut files: Vec<Rc<SourceFile>> = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let _id = read_u32(r)?;
        let name = read_string(r)?;
        let file_base = read_u32(r)?;
        let size = read_u32(r)?;
        let num_lines = read_len(r)?;
        let mut lines = Vec::with_capacity(num_lines.min(4096));
        for _ in 0..num_lines {
            lines.push(read_u32(r)?);
        }
        files.push(SourceFileSet::make_file(name, file_base, size, lines));
    }
    Ok(SourceFileSet::set_from_parts(base, files))
}

fn read_u8(r: &mut impl Read) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16(r: &mut impl Read) -> Result<u16, DecodeError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32(r: &mut impl Read) -> Result<u32, DecodeError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> Result<i64, DecodeError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

fn read_len(r: &mut impl Read) -> Result<usize, DecodeError> {
    let len = read_u32(r)? as usize;
    if len > MAX_DECODE_LEN {
        return Err(DecodeError::Corrupt("length out of range"));
    }
    Ok(len)
}

fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>, DecodeError> {
    let len = read_len(r)?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_string(r: &mut impl Read) -> Result<String, DecodeError> {
    String::from_utf8(read_bytes(r)?).map_err(|_| DecodeError::Corrupt("invalid utf-8"))
}
