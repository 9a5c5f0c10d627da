//! The AST consumed by the compiler.
//!
//! Parsing is not part of this crate: a host-side parser (or, in tests,
//! direct construction) produces these nodes. The compiler only relies on
//! the shape of the tree and on the source positions each node carries,
//! which end up in compile errors and in the per-function source maps.

use crate::source::{NO_POS, Pos};
use crate::token::Token;

/// A parsed program: the top-level statement list of one source file.
#[derive(Clone, Debug)]
pub struct File {
    pub stmts: Vec<Stmt>,
}

impl File {
    pub fn pos(&self) -> Pos {
        self.stmts.first().map_or(NO_POS, Stmt::pos)
    }

    pub fn end(&self) -> Pos {
        self.stmts.last().map_or(NO_POS, Stmt::end)
    }
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Clone, Debug)]
pub enum Stmt {
    /// `lhs = rhs`, `lhs := rhs` and the compound assignment forms.
    Assign(AssignStmt),
    Block(BlockStmt),
    /// `break` / `continue`.
    Branch(BranchStmt),
    /// `export expr` (module result).
    Export(ExportStmt),
    Expr(ExprStmt),
    For(ForStmt),
    ForIn(ForInStmt),
    If(IfStmt),
    /// `expr++` / `expr--`.
    IncDec(IncDecStmt),
    Return(ReturnStmt),
}

impl Stmt {
    pub fn pos(&self) -> Pos {
        match self {
            Stmt::Assign(s) => s.lhs.first().map_or(s.token_pos, Expr::pos),
            Stmt::Block(s) => s.lbrace,
            Stmt::Branch(s) => s.token_pos,
            Stmt::Export(s) => s.export_pos,
            Stmt::Expr(s) => s.expr.pos(),
            Stmt::For(s) => s.for_pos,
            Stmt::ForIn(s) => s.for_pos,
            Stmt::If(s) => s.if_pos,
            Stmt::IncDec(s) => s.expr.pos(),
            Stmt::Return(s) => s.return_pos,
        }
    }

    pub fn end(&self) -> Pos {
        match self {
            Stmt::Assign(s) => s.rhs.last().map_or(s.token_pos, Expr::end),
            Stmt::Block(s) => s.rbrace + 1,
            Stmt::Branch(s) => s.token_pos,
            Stmt::Export(s) => s.value.end(),
            Stmt::Expr(s) => s.expr.end(),
            Stmt::For(s) => s.body.rbrace + 1,
            Stmt::ForIn(s) => s.body.rbrace + 1,
            Stmt::If(s) => match &s.else_stmt {
                Some(e) => e.end(),
                None => s.body.rbrace + 1,
            },
            Stmt::IncDec(s) => s.token_pos + 2,
            Stmt::Return(s) => match &s.value {
                Some(v) => v.end(),
                None => s.return_pos + 6,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct AssignStmt {
    pub lhs: Vec<Expr>,
    pub rhs: Vec<Expr>,
    /// `Assign`, `Define` or a compound-assignment token.
    pub token: Token,
    pub token_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct BlockStmt {
    pub stmts: Vec<Stmt>,
    pub lbrace: Pos,
    pub rbrace: Pos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchKind {
    Break,
    Continue,
}

impl BranchKind {
    pub fn keyword(self) -> &'static str {
        match self {
            BranchKind::Break => "break",
            BranchKind::Continue => "continue",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BranchStmt {
    pub kind: BranchKind,
    pub token_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct ExportStmt {
    pub value: Expr,
    pub export_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct ExprStmt {
    pub expr: Expr,
}

#[derive(Clone, Debug)]
pub struct ForStmt {
    pub init: Option<Box<Stmt>>,
    pub cond: Option<Expr>,
    pub post: Option<Box<Stmt>>,
    pub body: BlockStmt,
    pub for_pos: Pos,
}

/// `for key, value in iterable { … }`.
///
/// The single-variable form `for x in e` binds the element *value*; the
/// parser fills `key` with the blank identifier `_`. Either binding named
/// `_` is skipped by the compiler.
#[derive(Clone, Debug)]
pub struct ForInStmt {
    pub key: Ident,
    pub value: Ident,
    pub iterable: Expr,
    pub body: BlockStmt,
    pub for_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct IfStmt {
    pub init: Option<Box<Stmt>>,
    pub cond: Expr,
    pub body: BlockStmt,
    /// Either another `If` (else-if chain) or a `Block`.
    pub else_stmt: Option<Box<Stmt>>,
    pub if_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct IncDecStmt {
    pub expr: Expr,
    /// `Inc` or `Dec`.
    pub token: Token,
    pub token_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub return_pos: Pos,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Clone, Debug)]
pub enum Expr {
    ArrayLit(ArrayLit),
    BinaryExpr(BinaryExpr),
    BoolLit(BoolLit),
    CallExpr(CallExpr),
    CharLit(CharLit),
    /// Ternary `cond ? a : b`.
    CondExpr(CondExpr),
    /// `error(value)`.
    ErrorExpr(ErrorExpr),
    FloatLit(FloatLit),
    FuncLit(FuncLit),
    Ident(Ident),
    /// `immutable(value)`.
    ImmutableExpr(ImmutableExpr),
    /// `import("name")`.
    ImportExpr(ImportExpr),
    IndexExpr(IndexExpr),
    IntLit(IntLit),
    MapLit(MapLit),
    ParenExpr(ParenExpr),
    /// `expr.name`, sugar for indexing with a string key.
    SelectorExpr(SelectorExpr),
    SliceExpr(SliceExpr),
    StringLit(StringLit),
    UnaryExpr(UnaryExpr),
    UndefinedLit(UndefinedLit),
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::ArrayLit(e) => e.lbrack,
            Expr::BinaryExpr(e) => e.lhs.pos(),
            Expr::BoolLit(e) => e.value_pos,
            Expr::CallExpr(e) => e.func.pos(),
            Expr::CharLit(e) => e.value_pos,
            Expr::CondExpr(e) => e.cond.pos(),
            Expr::ErrorExpr(e) => e.error_pos,
            Expr::FloatLit(e) => e.value_pos,
            Expr::FuncLit(e) => e.func_pos,
            Expr::Ident(e) => e.name_pos,
            Expr::ImmutableExpr(e) => e.immutable_pos,
            Expr::ImportExpr(e) => e.token_pos,
            Expr::IndexExpr(e) => e.expr.pos(),
            Expr::IntLit(e) => e.value_pos,
            Expr::MapLit(e) => e.lbrace,
            Expr::ParenExpr(e) => e.lparen,
            Expr::SelectorExpr(e) => e.expr.pos(),
            Expr::SliceExpr(e) => e.expr.pos(),
            Expr::StringLit(e) => e.value_pos,
            Expr::UnaryExpr(e) => e.token_pos,
            Expr::UndefinedLit(e) => e.token_pos,
        }
    }

    pub fn end(&self) -> Pos {
        match self {
            Expr::ArrayLit(e) => e.rbrack + 1,
            Expr::BinaryExpr(e) => e.rhs.end(),
            Expr::BoolLit(e) => e.value_pos + if e.value { 4 } else { 5 },
            Expr::CallExpr(e) => e.rparen + 1,
            Expr::CharLit(e) => e.value_pos + 1 + e.value.len_utf8() as Pos,
            Expr::CondExpr(e) => e.false_expr.end(),
            Expr::ErrorExpr(e) => e.rparen + 1,
            Expr::FloatLit(e) => e.value_pos + 1,
            Expr::FuncLit(e) => e.body.rbrace + 1,
            Expr::Ident(e) => e.name_pos + e.name.len() as Pos,
            Expr::ImmutableExpr(e) => e.rparen + 1,
            Expr::ImportExpr(e) => e.token_pos + 6,
            Expr::IndexExpr(e) => e.rbrack + 1,
            Expr::IntLit(e) => e.value_pos + 1,
            Expr::MapLit(e) => e.rbrace + 1,
            Expr::ParenExpr(e) => e.rparen + 1,
            Expr::SelectorExpr(e) => e.sel.value_pos + e.sel.value.len() as Pos,
            Expr::SliceExpr(e) => e.rbrack + 1,
            Expr::StringLit(e) => e.value_pos + e.value.len() as Pos,
            Expr::UnaryExpr(e) => e.expr.end(),
            Expr::UndefinedLit(e) => e.token_pos + 9,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ArrayLit {
    pub elements: Vec<Expr>,
    pub lbrack: Pos,
    pub rbrack: Pos,
}

#[derive(Clone, Debug)]
pub struct BinaryExpr {
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub token: Token,
    pub token_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct BoolLit {
    pub value: bool,
    pub value_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct CallExpr {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    /// Position of `...` after the last argument; `NO_POS` when absent.
    pub ellipsis: Pos,
    pub lparen: Pos,
    pub rparen: Pos,
}

#[derive(Clone, Debug)]
pub struct CharLit {
    pub value: char,
    pub value_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct CondExpr {
    pub cond: Box<Expr>,
    pub true_expr: Box<Expr>,
    pub false_expr: Box<Expr>,
    pub question_pos: Pos,
    pub colon_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct ErrorExpr {
    pub value: Box<Expr>,
    pub error_pos: Pos,
    pub lparen: Pos,
    pub rparen: Pos,
}

#[derive(Clone, Debug)]
pub struct FloatLit {
    pub value: f64,
    pub value_pos: Pos,
}

/// Function literal parameter list.
#[derive(Clone, Debug)]
pub struct IdentList {
    pub vars: Vec<Ident>,
    /// When true, the last parameter collects surplus arguments.
    pub var_args: bool,
    pub lparen: Pos,
    pub rparen: Pos,
}

#[derive(Clone, Debug)]
pub struct FuncLit {
    pub params: IdentList,
    pub body: BlockStmt,
    pub func_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct Ident {
    pub name: String,
    pub name_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct ImmutableExpr {
    pub value: Box<Expr>,
    pub immutable_pos: Pos,
    pub lparen: Pos,
    pub rparen: Pos,
}

#[derive(Clone, Debug)]
pub struct ImportExpr {
    pub module_name: String,
    pub token_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct IndexExpr {
    pub expr: Box<Expr>,
    pub index: Box<Expr>,
    pub lbrack: Pos,
    pub rbrack: Pos,
}

#[derive(Clone, Debug)]
pub struct IntLit {
    pub value: i64,
    pub value_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct MapElementLit {
    pub key: String,
    pub key_pos: Pos,
    pub colon_pos: Pos,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct MapLit {
    pub elements: Vec<MapElementLit>,
    pub lbrace: Pos,
    pub rbrace: Pos,
}

#[derive(Clone, Debug)]
pub struct ParenExpr {
    pub expr: Box<Expr>,
    pub lparen: Pos,
    pub rparen: Pos,
}

#[derive(Clone, Debug)]
pub struct SelectorExpr {
    pub expr: Box<Expr>,
    pub sel: StringLit,
}

#[derive(Clone, Debug)]
pub struct SliceExpr {
    pub expr: Box<Expr>,
    pub low: Option<Box<Expr>>,
    pub high: Option<Box<Expr>>,
    pub lbrack: Pos,
    pub rbrack: Pos,
}

#[derive(Clone, Debug)]
pub struct StringLit {
    pub value: String,
    pub value_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct UnaryExpr {
    pub expr: Box<Expr>,
    pub token: Token,
    pub token_pos: Pos,
}

#[derive(Clone, Debug)]
pub struct UndefinedLit {
    pub token_pos: Pos,
}
