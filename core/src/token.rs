//! Operator and assignment tokens carried by AST nodes.
//!
//! The discriminant values are not arbitrary: binary operators are encoded
//! verbatim as the `u8` operand of the `BinaryOp` instruction, which makes
//! them part of the bytecode format (see `vm::instruction_set`). Changing a
//! value here is a format break and requires a new bytecode version.

use core::fmt;

/// A token kind attached to AST nodes that carry an operator.
///
/// `#[repr(u8)]` with explicit discriminants so that `token as u8` is the
/// wire tag used by `Opcode::BinaryOp`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    Illegal = 0,

    // Binary operators
    Add = 11,    // +
    Sub = 12,    // -
    Mul = 13,    // *
    Quo = 14,    // /
    Rem = 15,    // %
    And = 16,    // &
    Or = 17,     // |
    Xor = 18,    // ^
    Shl = 19,    // <<
    Shr = 20,    // >>
    AndNot = 21, // &^

    // Compound assignment operators
    AddAssign = 22,    // +=
    SubAssign = 23,    // -=
    MulAssign = 24,    // *=
    QuoAssign = 25,    // /=
    RemAssign = 26,    // %=
    AndAssign = 27,    // &=
    OrAssign = 28,     // |=
    XorAssign = 29,    // ^=
    ShlAssign = 30,    // <<=
    ShrAssign = 31,    // >>=
    AndNotAssign = 32, // &^=

    // Logical operators
    LAnd = 33, // &&
    LOr = 34,  // ||

    // Increment/decrement
    Inc = 35, // ++
    Dec = 36, // --

    // Comparison operators
    Equal = 37,   // ==
    Less = 38,    // <
    Greater = 39, // >

    Assign = 40, // =
    Not = 41,    // !

    NotEqual = 42,  // !=
    LessEq = 43,    // <=
    GreaterEq = 44, // >=

    Define = 45, // :=
}

impl Token {
    /// The surface syntax of the token, used in error messages.
    pub fn symbol(self) -> &'static str {
        match self {
            Token::Illegal => "ILLEGAL",
            Token::Add => "+",
            Token::Sub => "-",
            Token::Mul => "*",
            Token::Quo => "/",
            Token::Rem => "%",
            Token::And => "&",
            Token::Or => "|",
            Token::Xor => "^",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::AndNot => "&^",
            Token::AddAssign => "+=",
            Token::SubAssign => "-=",
            Token::MulAssign => "*=",
            Token::QuoAssign => "/=",
            Token::RemAssign => "%=",
            Token::AndAssign => "&=",
            Token::OrAssign => "|=",
            Token::XorAssign => "^=",
            Token::ShlAssign => "<<=",
            Token::ShrAssign => ">>=",
            Token::AndNotAssign => "&^=",
            Token::LAnd => "&&",
            Token::LOr => "||",
            Token::Inc => "++",
            Token::Dec => "--",
            Token::Equal => "==",
            Token::Less => "<",
            Token::Greater => ">",
            Token::Assign => "=",
            Token::Not => "!",
            Token::NotEqual => "!=",
            Token::LessEq => "<=",
            Token::GreaterEq => ">=",
            Token::Define => ":=",
        }
    }

    /// For a compound-assignment token, the underlying binary operator.
    pub fn assign_base_op(self) -> Option<Token> {
        Some(match self {
            Token::AddAssign => Token::Add,
            Token::SubAssign => Token::Sub,
            Token::MulAssign => Token::Mul,
            Token::QuoAssign => Token::Quo,
            Token::RemAssign => Token::Rem,
            Token::AndAssign => Token::And,
            Token::OrAssign => Token::Or,
            Token::XorAssign => Token::Xor,
            Token::ShlAssign => Token::Shl,
            Token::ShrAssign => Token::Shr,
            Token::AndNotAssign => Token::AndNot,
            _ => return None,
        })
    }

    /// Decode a `BinaryOp` operand tag back into a token.
    pub fn from_op_tag(tag: u8) -> Option<Token> {
        Some(match tag {
            11 => Token::Add,
            12 => Token::Sub,
            13 => Token::Mul,
            14 => Token::Quo,
            15 => Token::Rem,
            16 => Token::And,
            17 => Token::Or,
            18 => Token::Xor,
            19 => Token::Shl,
            20 => Token::Shr,
            21 => Token::AndNot,
            38 => Token::Less,
            39 => Token::Greater,
            43 => Token::LessEq,
            44 => Token::GreaterEq,
            _ => return None,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
