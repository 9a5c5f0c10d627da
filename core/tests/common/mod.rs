//! Shared test scaffolding: terse AST constructors (standing in for the
//! external parser) and bytecode assertion helpers.
#![allow(dead_code)]

use core::cell::RefCell;
use std::rc::Rc;

use zephyr_core::ast::*;
use zephyr_core::compiler::{Compiler, ModuleMap};
use zephyr_core::errors::CompileError;
use zephyr_core::source::{NO_POS, Pos, SourceFileSet};
use zephyr_core::token::Token;
use zephyr_core::values::Value;
use zephyr_core::vm::bytecode::Bytecode;
use zephyr_core::vm::instruction_set::{Opcode, make_instruction};

// ============================================================================
// Expressions
// ============================================================================

pub fn int_lit(value: i64) -> Expr {
    Expr::IntLit(IntLit {
        value,
        value_pos: 1,
    })
}

pub fn float_lit(value: f64) -> Expr {
    Expr::FloatLit(FloatLit {
        value,
        value_pos: 1,
    })
}

pub fn char_lit(value: char) -> Expr {
    Expr::CharLit(CharLit {
        value,
        value_pos: 1,
    })
}

pub fn string_lit(value: &str) -> Expr {
    Expr::StringLit(StringLit {
        value: value.to_string(),
        value_pos: 1,
    })
}

pub fn bool_lit(value: bool) -> Expr {
    Expr::BoolLit(BoolLit {
        value,
        value_pos: 1,
    })
}

pub fn undefined_lit() -> Expr {
    Expr::UndefinedLit(UndefinedLit { token_pos: 1 })
}

pub fn ident(name: &str) -> Expr {
    ident_at(1, name)
}

pub fn ident_at(pos: Pos, name: &str) -> Expr {
    Expr::Ident(Ident {
        name: name.to_string(),
        name_pos: pos,
    })
}

pub fn binary(lhs: Expr, token: Token, rhs: Expr) -> Expr {
    Expr::BinaryExpr(BinaryExpr {
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        token,
        token_pos: 1,
    })
}

pub fn unary(token: Token, expr: Expr) -> Expr {
    Expr::UnaryExpr(UnaryExpr {
        expr: Box::new(expr),
        token,
        token_pos: 1,
    })
}

pub fn array_lit(elements: Vec<Expr>) -> Expr {
    Expr::ArrayLit(ArrayLit {
        elements,
        lbrack: 1,
        rbrack: 1,
    })
}

pub fn map_lit(entries: &[(&str, Expr)]) -> Expr {
    Expr::MapLit(MapLit {
        elements: entries
            .iter()
            .map(|(key, value)| MapElementLit {
                key: key.to_string(),
                key_pos: 1,
                colon_pos: 1,
                value: value.clone(),
            })
            .collect(),
        lbrace: 1,
        rbrace: 1,
    })
}

pub fn index(expr: Expr, idx: Expr) -> Expr {
    index_at(1, expr, idx)
}

pub fn index_at(lbrack: Pos, expr: Expr, idx: Expr) -> Expr {
    Expr::IndexExpr(IndexExpr {
        expr: Box::new(expr),
        index: Box::new(idx),
        lbrack,
        rbrack: lbrack,
    })
}

pub fn slice(expr: Expr, low: Option<Expr>, high: Option<Expr>) -> Expr {
    Expr::SliceExpr(SliceExpr {
        expr: Box::new(expr),
        low: low.map(Box::new),
        high: high.map(Box::new),
        lbrack: 1,
        rbrack: 1,
    })
}

pub fn selector(expr: Expr, name: &str) -> Expr {
    Expr::SelectorExpr(SelectorExpr {
        expr: Box::new(expr),
        sel: StringLit {
            value: name.to_string(),
            value_pos: 1,
        },
    })
}

pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
    Expr::CallExpr(CallExpr {
        func: Box::new(func),
        args,
        ellipsis: NO_POS,
        lparen: 1,
        rparen: 1,
    })
}

pub fn call_spread(func: Expr, args: Vec<Expr>) -> Expr {
    Expr::CallExpr(CallExpr {
        func: Box::new(func),
        args,
        ellipsis: 1,
        lparen: 1,
        rparen: 1,
    })
}

pub fn func_lit(params: &[&str], body: Vec<Stmt>) -> Expr {
    func_lit_full(params, false, body)
}

pub fn func_variadic(params: &[&str], body: Vec<Stmt>) -> Expr {
    func_lit_full(params, true, body)
}

fn func_lit_full(params: &[&str], var_args: bool, stmts: Vec<Stmt>) -> Expr {
    Expr::FuncLit(FuncLit {
        params: IdentList {
            vars: params
                .iter()
                .map(|name| Ident {
                    name: name.to_string(),
                    name_pos: 1,
                })
                .collect(),
            var_args,
            lparen: 1,
            rparen: 1,
        },
        body: BlockStmt {
            stmts,
            lbrace: 1,
            rbrace: 1,
        },
        func_pos: 1,
    })
}

pub fn cond(c: Expr, t: Expr, f: Expr) -> Expr {
    Expr::CondExpr(CondExpr {
        cond: Box::new(c),
        true_expr: Box::new(t),
        false_expr: Box::new(f),
        question_pos: 1,
        colon_pos: 1,
    })
}

pub fn error_expr(value: Expr) -> Expr {
    Expr::ErrorExpr(ErrorExpr {
        value: Box::new(value),
        error_pos: 1,
        lparen: 1,
        rparen: 1,
    })
}

pub fn immutable_expr(value: Expr) -> Expr {
    Expr::ImmutableExpr(ImmutableExpr {
        value: Box::new(value),
        immutable_pos: 1,
        lparen: 1,
        rparen: 1,
    })
}

pub fn import_expr(module_name: &str) -> Expr {
    import_expr_at(1, module_name)
}

pub fn import_expr_at(pos: Pos, module_name: &str) -> Expr {
    Expr::ImportExpr(ImportExpr {
        module_name: module_name.to_string(),
        token_pos: pos,
    })
}

pub fn paren(expr: Expr) -> Expr {
    Expr::ParenExpr(ParenExpr {
        expr: Box::new(expr),
        lparen: 1,
        rparen: 1,
    })
}

// ============================================================================
// Statements
// ============================================================================

pub fn file(stmts: Vec<Stmt>) -> File {
    File { stmts }
}

pub fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(ExprStmt { expr })
}

pub fn define(name: &str, rhs: Expr) -> Stmt {
    define_at(1, name, rhs)
}

pub fn define_at(pos: Pos, name: &str, rhs: Expr) -> Stmt {
    Stmt::Assign(AssignStmt {
        lhs: vec![ident_at(pos, name)],
        rhs: vec![rhs],
        token: Token::Define,
        token_pos: pos,
    })
}

pub fn assign(lhs: Expr, rhs: Expr) -> Stmt {
    assign_op(lhs, Token::Assign, rhs)
}

pub fn assign_op(lhs: Expr, token: Token, rhs: Expr) -> Stmt {
    Stmt::Assign(AssignStmt {
        lhs: vec![lhs],
        rhs: vec![rhs],
        token,
        token_pos: 1,
    })
}

pub fn tuple_assign(lhs: Vec<Expr>, rhs: Vec<Expr>, token: Token) -> Stmt {
    Stmt::Assign(AssignStmt {
        lhs,
        rhs,
        token,
        token_pos: 1,
    })
}

pub fn inc(expr: Expr) -> Stmt {
    Stmt::IncDec(IncDecStmt {
        expr,
        token: Token::Inc,
        token_pos: 1,
    })
}

pub fn dec(expr: Expr) -> Stmt {
    Stmt::IncDec(IncDecStmt {
        expr,
        token: Token::Dec,
        token_pos: 1,
    })
}

pub fn block(stmts: Vec<Stmt>) -> BlockStmt {
    BlockStmt {
        stmts,
        lbrace: 1,
        rbrace: 1,
    }
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return(ReturnStmt {
        value: Some(value),
        return_pos: 1,
    })
}

pub fn ret_at(pos: Pos, value: Option<Expr>) -> Stmt {
    Stmt::Return(ReturnStmt {
        value,
        return_pos: pos,
    })
}

pub fn ret_none() -> Stmt {
    ret_at(1, None)
}

pub fn export(value: Expr) -> Stmt {
    export_at(1, value)
}

pub fn export_at(pos: Pos, value: Expr) -> Stmt {
    Stmt::Export(ExportStmt {
        value,
        export_pos: pos,
    })
}

pub fn break_at(pos: Pos) -> Stmt {
    Stmt::Branch(BranchStmt {
        kind: BranchKind::Break,
        token_pos: pos,
    })
}

pub fn continue_at(pos: Pos) -> Stmt {
    Stmt::Branch(BranchStmt {
        kind: BranchKind::Continue,
        token_pos: pos,
    })
}

pub fn if_stmt(cond: Expr, body: Vec<Stmt>, else_stmt: Option<Stmt>) -> Stmt {
    if_init(None, cond, body, else_stmt)
}

pub fn if_init(
    init: Option<Stmt>,
    cond: Expr,
    body: Vec<Stmt>,
    else_stmt: Option<Stmt>,
) -> Stmt {
    Stmt::If(IfStmt {
        init: init.map(Box::new),
        cond,
        body: block(body),
        else_stmt: else_stmt.map(Box::new),
        if_pos: 1,
    })
}

pub fn block_stmt(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(block(stmts))
}

pub fn for_loop(
    init: Option<Stmt>,
    cond: Option<Expr>,
    post: Option<Stmt>,
    body: Vec<Stmt>,
) -> Stmt {
    Stmt::For(ForStmt {
        init: init.map(Box::new),
        cond,
        post: post.map(Box::new),
        body: block(body),
        for_pos: 1,
    })
}

/// `for value in iterable { … }` (the key binds to `_`).
pub fn for_in(value: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    for_in_kv("_", value, iterable, body)
}

pub fn for_in_kv(key: &str, value: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::ForIn(ForInStmt {
        key: Ident {
            name: key.to_string(),
            name_pos: 1,
        },
        value: Ident {
            name: value.to_string(),
            name_pos: 1,
        },
        iterable,
        body: block(body),
        for_pos: 1,
    })
}

// ============================================================================
// Compilation helpers
// ============================================================================

pub fn compile(input: &File) -> Result<Bytecode, CompileError> {
    compile_with_modules(input, None)
}

pub fn compile_with_modules(
    input: &File,
    modules: Option<ModuleMap>,
) -> Result<Bytecode, CompileError> {
    let file_set = Rc::new(RefCell::new(SourceFileSet::new()));
    let src_file = file_set.borrow_mut().add_file("test", None, 1 << 16);
    let mut compiler = Compiler::new(file_set.clone(), Some(src_file), None, modules);
    compiler.compile(input)?;
    let mut bytecode = compiler.bytecode();
    bytecode.remove_duplicates();
    Ok(bytecode)
}

/// Concatenate instruction encodings, mirroring how expected streams are
/// written out in tests.
pub fn concat(instructions: &[Vec<u8>]) -> Vec<u8> {
    instructions.concat()
}

pub fn inst(opcode: Opcode, operands: &[usize]) -> Vec<u8> {
    make_instruction(opcode, operands)
}

/// Expected constant-pool entries.
#[derive(Clone, Debug)]
pub enum TConst {
    Int(i64),
    Float(f64),
    Char(char),
    Str(&'static str),
    Func {
        num_locals: usize,
        num_params: usize,
        instructions: Vec<u8>,
    },
}

pub fn func_const(num_locals: usize, num_params: usize, instructions: &[Vec<u8>]) -> TConst {
    TConst::Func {
        num_locals,
        num_params,
        instructions: concat(instructions),
    }
}

pub fn expect_compile(input: &File, instructions: &[Vec<u8>], constants: &[TConst]) {
    let bytecode = match compile(input) {
        Ok(b) => b,
        Err(err) => panic!("compile failed: {}", err),
    };
    assert_bytecode(&bytecode, &concat(instructions), constants);
}

pub fn assert_bytecode(bytecode: &Bytecode, instructions: &[u8], constants: &[TConst]) {
    use zephyr_core::vm::instruction_set::format_instructions;
    assert_eq!(
        bytecode.main_function.instructions,
        instructions,
        "main instructions mismatch:\n got:\n{}\nwant:\n{}",
        format_instructions(&bytecode.main_function.instructions, 0).join("\n"),
        format_instructions(instructions, 0).join("\n"),
    );
    assert_eq!(
        bytecode.constants.len(),
        constants.len(),
        "constant count mismatch:\n{}",
        bytecode.format_constants().join("\n"),
    );
    for (i, (actual, expected)) in bytecode.constants.iter().zip(constants.iter()).enumerate() {
        match (actual, expected) {
            (Value::Int(a), TConst::Int(e)) if a == e => {}
            (Value::Float(a), TConst::Float(e)) if a == e => {}
            (Value::Char(a), TConst::Char(e)) if a == e => {}
            (Value::String(a), TConst::Str(e)) if a == *e => {}
            (
                Value::CompiledFunction(a),
                TConst::Func {
                    num_locals,
                    num_params,
                    instructions,
                },
            ) if a.num_locals == *num_locals
                && a.num_parameters == *num_params
                && &a.instructions == instructions => {}
            (actual, expected) => panic!(
                "constant [{}] mismatch: got {} ({}), want {:?}{}",
                i,
                actual,
                actual.type_name(),
                expected,
                match actual {
                    Value::CompiledFunction(f) => format!(
                        "\n got instructions:\n{}",
                        format_instructions(&f.instructions, 0).join("\n")
                    ),
                    _ => String::new(),
                },
            ),
        }
    }
}

pub fn expect_compile_error(input: &File, expected: &str) {
    match compile(input) {
        Ok(_) => panic!("expected compile error containing {:?}", expected),
        Err(err) => {
            let message = err.to_string();
            assert!(
                message.contains(expected),
                "expected error containing {:?}, got {:?}",
                expected,
                message
            );
        }
    }
}
