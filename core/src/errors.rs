//! Error types shared across the pipeline.
//!
//! Three layers exist at runtime:
//! - parse errors arrive from the external parser as an [`ErrorList`],
//! - [`CompileError`] carries a message plus the resolved source position,
//! - [`RuntimeError`] is raised by the VM and wrapped with the innermost
//!   source position into [`Error::Runtime`] before it reaches the host.
//!
//! Script-level `error(x)` values are *not* represented here; they are
//! ordinary values (`Value::Error`) and only become a host-visible failure
//! if the embedder decides so.

use std::io;

use thiserror::Error;

use crate::source::FilePos;

/// A position-tagged parse diagnostic produced by the external parser.
#[derive(Clone, Debug, Error)]
#[error("Parse Error: {message}\n\tat {pos}")]
pub struct ParseError {
    pub message: String,
    pub pos: FilePos,
}

/// A list of parse diagnostics.
///
/// Displays as the first error followed by a count of the rest, which keeps
/// host-facing messages bounded no matter how broken the input is.
#[derive(Clone, Debug, Default)]
pub struct ErrorList(pub Vec<ParseError>);

impl std::error::Error for ErrorList {}

impl ErrorList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.len() {
            0 => f.write_str("no errors"),
            1 => write!(f, "{}", self.0[0]),
            n => write!(f, "{} (and {} more errors)", self.0[0], n - 1),
        }
    }
}

/// A compile-time diagnostic with its resolved position.
#[derive(Clone, Debug, Error)]
#[error("Compile Error: {message}\n\tat {pos}")]
pub struct CompileError {
    pub message: String,
    pub pos: FilePos,
}

/// Errors raised while executing bytecode.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RuntimeError {
    #[error("stack overflow")]
    StackOverflow,

    #[error("object is not indexable")]
    NotIndexable,

    #[error("object is not index-assignable")]
    NotIndexAssignable,

    #[error("invalid index type")]
    InvalidIndexType,

    #[error("invalid index value type")]
    InvalidIndexValueType,

    #[error("index out of bounds")]
    IndexOutOfBounds,

    #[error("invalid slice index")]
    InvalidSliceIndex,

    #[error("zero divisor")]
    ZeroDivisor,

    #[error("object is not callable")]
    NotCallable,

    #[error("invalid operator")]
    InvalidOperator,

    /// Builtin called with an unexpected argument count.
    #[error("wrong number of arguments")]
    WrongNumArguments,

    /// Script function called with an unexpected argument count.
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongNumArgumentsWant { want: usize, got: usize },

    /// Variadic script function called with too few arguments.
    #[error("wrong number of arguments: want>={want}, got={got}")]
    WrongNumArgumentsAtLeast { want: usize, got: usize },

    #[error("invalid type for argument '{name}': expected {expected}, found {found}")]
    InvalidArgumentType {
        name: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("exceeding string size limit")]
    StringLimit,

    #[error("exceeding bytes size limit")]
    BytesLimit,

    #[error("object allocation limit exceeded")]
    AllocLimit,

    #[error("range step must be greater than zero")]
    InvalidRangeStep,

    /// Execution was cancelled; `cause` names who pulled the plug.
    #[error("execution aborted: {cause}")]
    Aborted { cause: String },

    /// Corrupt bytecode: the dispatch loop hit an undefined opcode.
    #[error("fatal: unknown opcode {opcode} at {ip}")]
    UnknownOpcode { opcode: u8, ip: usize },

    #[error("{message}")]
    Custom { message: String },
}

impl RuntimeError {
    pub fn custom(message: impl Into<String>) -> Self {
        RuntimeError::Custom {
            message: message.into(),
        }
    }
}

/// Errors from encoding a bytecode container.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Host-native functions without a module attribution have no stable
    /// wire representation.
    #[error("object is not serializable: {type_name}")]
    NotSerializable { type_name: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors from decoding a bytecode container.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid bytecode: bad magic")]
    InvalidMagic,

    #[error("unsupported bytecode version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid bytecode: unknown constant tag {0}")]
    InvalidTag(u8),

    #[error("invalid bytecode: {0}")]
    Corrupt(&'static str),

    /// A serialized module function references a module the host did not
    /// register with `decode`.
    #[error("module '{module}' not found")]
    ModuleNotFound { module: String },

    #[error("module '{module}' has no function '{name}'")]
    FunctionNotFound { module: String, name: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The top-level error type surfaced by the embedding API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ErrorList),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Runtime Error: {err}\n\tat {pos}")]
    Runtime { err: RuntimeError, pos: FilePos },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Invalid(String),
}

impl Error {
    /// The underlying runtime error, if this is one.
    pub fn runtime(&self) -> Option<&RuntimeError> {
        match self {
            Error::Runtime { err, .. } => Some(err),
            _ => None,
        }
    }
}
