//! Single-pass compiler from AST to stack bytecode.
//!
//! The compiler walks the tree once, emitting instructions into a stack of
//! compilation scopes (one per function literal being compiled) and
//! patching forward jumps as control-flow constructs close. Constants are
//! pooled with scalar deduplication; free variables are resolved through
//! the symbol table and turned into capture instructions at the closure
//! construction site.
//!
//! Function bodies get a finalization pass before they are frozen into
//! constants: instructions between a `Return` and the next jump target are
//! unreachable and deleted, jump operands are re-patched, and a trailing
//! `Return` is appended when control could fall off the end.

mod module;
mod symbol_table;

pub use module::{BuiltinModule, Module, ModuleMap, SourceModule};
pub use symbol_table::{Symbol, SymbolScope, SymbolTable};

use core::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use tracing::trace;

use crate::ast;
use crate::ast::{BlockStmt, BranchKind, Expr, Stmt};
use crate::errors::{CompileError, Error, ErrorList};
use crate::source::{NO_POS, Pos, SourceFile, SourceFileSet};
use crate::token::Token;
use crate::values::{CompiledFunction, Value};
use crate::vm::bytecode::Bytecode;
use crate::vm::instruction_set::{Opcode, iterate_instructions, make_instruction};

/// Default extension for file-based imports.
pub const SOURCE_FILE_EXT_DEFAULT: &str = ".zep";

/// The external parser used for file-based imports. Hosts that enable
/// file imports register one; everything else works without it.
pub trait SourceParser {
    fn parse(&self, file: Rc<SourceFile>, src: &[u8]) -> Result<ast::File, ErrorList>;
}

/// Per-function emission state.
#[derive(Default)]
struct CompilationScope {
    instructions: Vec<u8>,
    source_map: HashMap<usize, Pos>,
    last_op: Option<Opcode>,
    /// Open loops in this function; `break`/`continue` patch the top one.
    loops: Vec<LoopContext>,
}

#[derive(Default)]
struct LoopContext {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// Scalar constant fingerprints for pool deduplication.
#[derive(Clone, Hash, PartialEq, Eq)]
enum ConstKey {
    Int(i64),
    /// Bit pattern, so NaNs dedup and 0.0/-0.0 stay distinct.
    Float(u64),
    Char(char),
    Str(ecow::EcoString),
}

impl ConstKey {
    fn of(value: &Value) -> Option<ConstKey> {
        match value {
            Value::Int(v) => Some(ConstKey::Int(*v)),
            Value::Float(v) => Some(ConstKey::Float(v.to_bits())),
            Value::Char(v) => Some(ConstKey::Char(*v)),
            Value::String(v) => Some(ConstKey::Str(v.clone())),
            _ => None,
        }
    }
}

/// The compiler. One instance compiles one file; imported source modules
/// are compiled by forked child compilers sharing the constant pool and
/// the per-path module cache.
pub struct Compiler {
    file: Option<Rc<SourceFile>>,
    file_set: Rc<RefCell<SourceFileSet>>,
    /// Set for child compilers producing a module function; `export` is
    /// only meaningful (and `Suspend` absent) in that mode.
    in_module: bool,
    constants: Vec<Value>,
    const_index: HashMap<ConstKey, usize>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    modules: ModuleMap,
    compiled_modules: Rc<RefCell<HashMap<String, Rc<CompiledFunction>>>>,
    compiling_modules: Rc<RefCell<HashSet<String>>>,
    allow_file_import: bool,
    import_dir: PathBuf,
    import_file_ext: Vec<String>,
    parser: Option<Rc<dyn SourceParser>>,
}

impl Compiler {
    /// Create a compiler for `file`. Passing no symbol table starts from
    /// an empty global scope; either way the interned builtins are
    /// registered at the outermost level.
    pub fn new(
        file_set: Rc<RefCell<SourceFileSet>>,
        file: Option<Rc<SourceFile>>,
        symbol_table: Option<SymbolTable>,
        modules: Option<ModuleMap>,
    ) -> Compiler {
        let mut symbol_table = symbol_table.unwrap_or_default();
        for (index, builtin) in crate::vm::builtins::builtin_functions().iter().enumerate() {
            symbol_table.define_builtin(index, builtin.name);
        }
        Compiler {
            file,
            file_set,
            in_module: false,
            constants: Vec::new(),
            const_index: HashMap::new(),
            symbol_table,
            scopes: vec![CompilationScope::default()],
            modules: modules.unwrap_or_default(),
            compiled_modules: Rc::new(RefCell::new(HashMap::new())),
            compiling_modules: Rc::new(RefCell::new(HashSet::new())),
            allow_file_import: false,
            import_dir: PathBuf::new(),
            import_file_ext: vec![SOURCE_FILE_EXT_DEFAULT.to_string()],
            parser: None,
        }
    }

    /// Allow `import` to fall back to files under the import directory.
    pub fn enable_file_import(&mut self, enable: bool) {
        self.allow_file_import = enable;
    }

    pub fn set_import_dir(&mut self, dir: impl Into<PathBuf>) {
        self.import_dir = dir.into();
    }

    /// Replace the extension list used for file imports. Each name must be
    /// a bare `.ext`; on error the current list is left untouched.
    pub fn set_import_file_ext<S: AsRef<str>>(&mut self, exts: &[S]) -> Result<(), Error> {
        validate_import_file_ext(exts)?;
        self.import_file_ext = exts.iter().map(|e| e.as_ref().to_string()).collect();
        Ok(())
    }

    pub fn import_file_ext(&self) -> &[String] {
        &self.import_file_ext
    }

    /// Register the parser used to compile file-based imports.
    pub fn set_parser(&mut self, parser: Rc<dyn SourceParser>) {
        self.parser = Some(parser);
    }

    /// The symbol table, for global-index lookups after compilation.
    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    /// Compile a whole file into the current scope.
    pub fn compile(&mut self, file: &ast::File) -> Result<(), CompileError> {
        for stmt in &file.stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// Package the compiled program. The main function gets its trailing
    /// `Suspend` here.
    pub fn bytecode(&self) -> Bytecode {
        let scope = &self.scopes[0];
        let mut instructions = scope.instructions.clone();
        instructions.extend(make_instruction(Opcode::Suspend, &[]));
        Bytecode {
            file_set: self.file_set.borrow().clone(),
            main_function: Rc::new(CompiledFunction {
                instructions,
                num_locals: 0,
                num_parameters: 0,
                variadic: false,
                source_map: scope.source_map.clone(),
            }),
            constants: self.constants.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(s) => {
                self.compile_expr(&s.expr)?;
                self.emit(s.expr.pos(), Opcode::Pop, &[]);
                Ok(())
            }
            Stmt::Assign(s) => self.compile_assign(stmt.pos(), &s.lhs, &s.rhs, s.token),
            Stmt::IncDec(s) => {
                let op = if s.token == Token::Inc {
                    Token::AddAssign
                } else {
                    Token::SubAssign
                };
                let one = Expr::IntLit(ast::IntLit {
                    value: 1,
                    value_pos: s.token_pos,
                });
                self.compile_assign(stmt.pos(), &[s.expr.clone()], &[one], op)
            }
            Stmt::Block(s) => self.compile_block(s),
            Stmt::If(s) => self.in_block_scope(|c| c.compile_if(s)),
            Stmt::For(s) => self.in_block_scope(|c| c.compile_for(s)),
            Stmt::ForIn(s) => self.in_block_scope(|c| c.compile_for_in(s)),
            Stmt::Branch(s) => self.compile_branch(s),
            Stmt::Return(s) => {
                if self.scopes.len() == 1 {
                    return Err(self.error_at(s.return_pos, "return not allowed outside function"));
                }
                match &s.value {
                    Some(value) => {
                        self.compile_expr(value)?;
                        self.emit(s.return_pos, Opcode::Return, &[1]);
                    }
                    None => {
                        self.emit(s.return_pos, Opcode::Return, &[0]);
                    }
                }
                Ok(())
            }
            Stmt::Export(s) => {
                if self.scopes.len() > 1 {
                    return Err(self.error_at(s.export_pos, "export not allowed inside function"));
                }
                if !self.in_module {
                    // top-level export outside a module is a no-op
                    return Ok(());
                }
                self.compile_expr(&s.value)?;
                self.emit(s.export_pos, Opcode::Immutable, &[]);
                self.emit(s.export_pos, Opcode::Return, &[1]);
                Ok(())
            }
        }
    }

    fn compile_block(&mut self, block: &BlockStmt) -> Result<(), CompileError> {
        if block.stmts.is_empty() {
            return Ok(());
        }
        self.in_block_scope(|c| {
            for stmt in &block.stmts {
                c.compile_stmt(stmt)?;
            }
            Ok(())
        })
    }

    fn in_block_scope(
        &mut self,
        body: impl FnOnce(&mut Compiler) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let table = core::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::fork(table, true);
        let result = body(self);
        let table = core::mem::take(&mut self.symbol_table);
        self.symbol_table = table.unfork().unwrap_or_default();
        result
    }

    fn compile_if(&mut self, s: &ast::IfStmt) -> Result<(), CompileError> {
        if let Some(init) = &s.init {
            self.compile_stmt(init)?;
        }
        self.compile_expr(&s.cond)?;
        let jump_falsy = self.emit(s.if_pos, Opcode::JumpFalsy, &[0]);
        self.compile_block(&s.body)?;
        match &s.else_stmt {
            Some(else_stmt) => {
                let jump_end = self.emit(s.if_pos, Opcode::Jump, &[0]);
                let else_start = self.current_len();
                self.change_operand(jump_falsy, else_start);
                self.compile_stmt(else_stmt)?;
                let end = self.current_len();
                self.change_operand(jump_end, end);
            }
            None => {
                let end = self.current_len();
                self.change_operand(jump_falsy, end);
            }
        }
        Ok(())
    }

    fn compile_for(&mut self, s: &ast::ForStmt) -> Result<(), CompileError> {
        if let Some(init) = &s.init {
            self.compile_stmt(init)?;
        }
        let pre_cond = self.current_len();
        let post_cond_jump = match &s.cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                Some(self.emit(s.for_pos, Opcode::JumpFalsy, &[0]))
            }
            None => None,
        };

        self.enter_loop();
        let body_result = self.compile_block(&s.body);
        let loop_ctx = self.leave_loop();
        body_result?;

        let post_body = self.current_len();
        if let Some(post) = &s.post {
            self.compile_stmt(post)?;
        }
        self.emit(s.for_pos, Opcode::Jump, &[pre_cond]);

        let post_stmt = self.current_len();
        if let Some(jump) = post_cond_jump {
            self.change_operand(jump, post_stmt);
        }
        for pos in loop_ctx.breaks {
            self.change_operand(pos, post_stmt);
        }
        for pos in loop_ctx.continues {
            self.change_operand(pos, post_body);
        }
        Ok(())
    }

    fn compile_for_in(&mut self, s: &ast::ForInStmt) -> Result<(), CompileError> {
        // The iterator lives in a hidden binding; ":it" cannot collide
        // with any script identifier.
        let it_symbol = self.symbol_table.define(":it");
        self.compile_expr(&s.iterable)?;
        self.emit(s.for_pos, Opcode::IteratorInit, &[]);
        self.emit_store(s.for_pos, &it_symbol, true);

        let pre_cond = self.current_len();
        self.emit_load(s.for_pos, &it_symbol);
        self.emit(s.for_pos, Opcode::IteratorNext, &[]);
        let post_cond_jump = self.emit(s.for_pos, Opcode::JumpFalsy, &[0]);

        self.enter_loop();
        let body_result = (|| {
            if s.key.name != "_" {
                let key_symbol = self.symbol_table.define(&s.key.name);
                self.emit_load(s.key.name_pos, &it_symbol);
                self.emit(s.key.name_pos, Opcode::IteratorKey, &[]);
                self.emit_store(s.key.name_pos, &key_symbol, true);
            }
            if s.value.name != "_" {
                let value_symbol = self.symbol_table.define(&s.value.name);
                self.emit_load(s.value.name_pos, &it_symbol);
                self.emit(s.value.name_pos, Opcode::IteratorValue, &[]);
                self.emit_store(s.value.name_pos, &value_symbol, true);
            }
            self.compile_block(&s.body)
        })();
        let loop_ctx = self.leave_loop();
        body_result?;

        let post_body = self.current_len();
        self.emit(s.for_pos, Opcode::Jump, &[pre_cond]);

        let post_stmt = self.current_len();
        self.change_operand(post_cond_jump, post_stmt);
        for pos in loop_ctx.breaks {
            self.change_operand(pos, post_stmt);
        }
        for pos in loop_ctx.continues {
            self.change_operand(pos, post_body);
        }
        Ok(())
    }

    fn compile_branch(&mut self, s: &ast::BranchStmt) -> Result<(), CompileError> {
        if self.scopes.last().unwrap().loops.is_empty() {
            return Err(self.error_at(
                s.token_pos,
                format!("{} not allowed outside loop", s.kind.keyword()),
            ));
        }
        let jump = self.emit(s.token_pos, Opcode::Jump, &[0]);
        let loop_ctx = self.scopes.last_mut().unwrap().loops.last_mut().unwrap();
        match s.kind {
            BranchKind::Break => loop_ctx.breaks.push(jump),
            BranchKind::Continue => loop_ctx.continues.push(jump),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    fn compile_assign(
        &mut self,
        pos: Pos,
        lhs: &[Expr],
        rhs: &[Expr],
        op: Token,
    ) -> Result<(), CompileError> {
        if lhs.len() > 1 || rhs.len() > 1 {
            return Err(self.error_at(pos, "tuple assignment not allowed"));
        }
        let (lhs, rhs) = (&lhs[0], &rhs[0]);

        let (name, selectors) = resolve_assign_lhs(lhs);
        let Some(name) = name else {
            return Err(self.error_at(pos, "invalid left-hand side in assignment"));
        };
        if op == Token::Define && !selectors.is_empty() {
            return Err(self.error_at(pos, "operator ':=' not allowed with selector"));
        }

        // a function bound by `:=` is defined before its body compiles so
        // that it can call itself
        let is_func = matches!(rhs, Expr::FuncLit(_));
        let mut symbol = if op == Token::Define {
            if self.symbol_table.defined_in_block(&name) {
                return Err(self.error_at(pos, format!("'{}' redeclared in this block", name)));
            }
            is_func.then(|| self.symbol_table.define(&name))
        } else {
            match self.symbol_table.resolve(&name) {
                Some(symbol) => Some(symbol),
                None => {
                    return Err(self.error_at(pos, format!("unresolved reference '{}'", name)));
                }
            }
        };

        let base_op = op.assign_base_op();
        if base_op.is_some() {
            self.compile_expr(lhs)?;
        }
        self.compile_expr(rhs)?;
        if let Some(base) = base_op {
            self.emit(pos, Opcode::BinaryOp, &[base as u8 as usize]);
        }

        let symbol = match symbol.take() {
            Some(symbol) => symbol,
            None => self.symbol_table.define(&name),
        };

        if selectors.is_empty() {
            match symbol.scope {
                SymbolScope::Global => {
                    self.emit(pos, Opcode::SetGlobal, &[symbol.index]);
                }
                SymbolScope::Local => {
                    let opcode = if op == Token::Define {
                        Opcode::DefineLocal
                    } else {
                        Opcode::SetLocal
                    };
                    self.emit(pos, opcode, &[symbol.index]);
                }
                SymbolScope::Free => {
                    self.emit(pos, Opcode::SetFree, &[symbol.index]);
                }
                SymbolScope::Builtin => {
                    return Err(self.error_at(pos, "invalid left-hand side in assignment"));
                }
            }
        } else {
            // selectors compile right-to-left; the VM walks them from the
            // deepest back out to perform one index-set
            for selector in selectors.iter().rev() {
                self.compile_expr(selector)?;
            }
            let operands = [symbol.index, selectors.len()];
            match symbol.scope {
                SymbolScope::Global => {
                    self.emit(pos, Opcode::SetSelGlobal, &operands);
                }
                SymbolScope::Local => {
                    self.emit(pos, Opcode::SetSelLocal, &operands);
                }
                SymbolScope::Free => {
                    self.emit(pos, Opcode::SetSelFree, &operands);
                }
                SymbolScope::Builtin => {
                    return Err(self.error_at(pos, "invalid left-hand side in assignment"));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Ident(e) => {
                let Some(symbol) = self.symbol_table.resolve(&e.name) else {
                    return Err(
                        self.error_at(e.name_pos, format!("unresolved reference '{}'", e.name))
                    );
                };
                self.emit_load(e.name_pos, &symbol);
                Ok(())
            }
            Expr::IntLit(e) => {
                let idx = self.add_constant(Value::Int(e.value));
                self.emit(e.value_pos, Opcode::Constant, &[idx]);
                Ok(())
            }
            Expr::FloatLit(e) => {
                let idx = self.add_constant(Value::Float(e.value));
                self.emit(e.value_pos, Opcode::Constant, &[idx]);
                Ok(())
            }
            Expr::CharLit(e) => {
                let idx = self.add_constant(Value::Char(e.value));
                self.emit(e.value_pos, Opcode::Constant, &[idx]);
                Ok(())
            }
            Expr::StringLit(e) => {
                let idx = self.add_constant(Value::string(e.value.as_str()));
                self.emit(e.value_pos, Opcode::Constant, &[idx]);
                Ok(())
            }
            Expr::BoolLit(e) => {
                let opcode = if e.value { Opcode::True } else { Opcode::False };
                self.emit(e.value_pos, opcode, &[]);
                Ok(())
            }
            Expr::UndefinedLit(e) => {
                self.emit(e.token_pos, Opcode::Null, &[]);
                Ok(())
            }
            Expr::BinaryExpr(e) => self.compile_binary(e),
            Expr::UnaryExpr(e) => {
                self.compile_expr(&e.expr)?;
                match e.token {
                    Token::Add => {} // unary plus is the identity
                    Token::Sub => {
                        self.emit(e.token_pos, Opcode::Minus, &[]);
                    }
                    Token::Not => {
                        self.emit(e.token_pos, Opcode::LNot, &[]);
                    }
                    Token::Xor => {
                        self.emit(e.token_pos, Opcode::BComplement, &[]);
                    }
                    tok => {
                        return Err(self
                            .error_at(e.token_pos, format!("invalid unary operator: {}", tok)));
                    }
                }
                Ok(())
            }
            Expr::CondExpr(e) => {
                self.compile_expr(&e.cond)?;
                let jump_falsy = self.emit(e.question_pos, Opcode::JumpFalsy, &[0]);
                self.compile_expr(&e.true_expr)?;
                let jump_end = self.emit(e.colon_pos, Opcode::Jump, &[0]);
                let false_start = self.current_len();
                self.change_operand(jump_falsy, false_start);
                self.compile_expr(&e.false_expr)?;
                let end = self.current_len();
                self.change_operand(jump_end, end);
                Ok(())
            }
            Expr::ArrayLit(e) => {
                for element in &e.elements {
                    self.compile_expr(element)?;
                }
                self.emit(e.lbrack, Opcode::Array, &[e.elements.len()]);
                Ok(())
            }
            Expr::MapLit(e) => {
                for element in &e.elements {
                    let idx = self.add_constant(Value::string(element.key.as_str()));
                    self.emit(element.key_pos, Opcode::Constant, &[idx]);
                    self.compile_expr(&element.value)?;
                }
                self.emit(e.lbrace, Opcode::Map, &[e.elements.len() * 2]);
                Ok(())
            }
            Expr::SelectorExpr(e) => {
                self.compile_expr(&e.expr)?;
                let idx = self.add_constant(Value::string(e.sel.value.as_str()));
                self.emit(e.sel.value_pos, Opcode::Constant, &[idx]);
                self.emit(e.sel.value_pos, Opcode::Index, &[]);
                Ok(())
            }
            Expr::IndexExpr(e) => {
                self.compile_expr(&e.expr)?;
                self.compile_expr(&e.index)?;
                self.emit(e.lbrack, Opcode::Index, &[]);
                Ok(())
            }
            Expr::SliceExpr(e) => {
                self.compile_expr(&e.expr)?;
                match &e.low {
                    Some(low) => self.compile_expr(low)?,
                    None => {
                        self.emit(e.lbrack, Opcode::Null, &[]);
                    }
                }
                match &e.high {
                    Some(high) => self.compile_expr(high)?,
                    None => {
                        self.emit(e.lbrack, Opcode::Null, &[]);
                    }
                }
                self.emit(e.lbrack, Opcode::SliceIndex, &[]);
                Ok(())
            }
            Expr::CallExpr(e) => {
                self.compile_expr(&e.func)?;
                for arg in &e.args {
                    self.compile_expr(arg)?;
                }
                let spread = usize::from(e.ellipsis != NO_POS);
                self.emit(e.rparen, Opcode::Call, &[e.args.len(), spread]);
                Ok(())
            }
            Expr::ErrorExpr(e) => {
                self.compile_expr(&e.value)?;
                self.emit(e.error_pos, Opcode::Error, &[]);
                Ok(())
            }
            Expr::ImmutableExpr(e) => {
                self.compile_expr(&e.value)?;
                self.emit(e.immutable_pos, Opcode::Immutable, &[]);
                Ok(())
            }
            Expr::ImportExpr(e) => self.compile_import(e),
            Expr::FuncLit(e) => self.compile_func_lit(e),
            Expr::ParenExpr(e) => self.compile_expr(&e.expr),
        }
    }

    fn compile_binary(&mut self, e: &ast::BinaryExpr) -> Result<(), CompileError> {
        if e.token == Token::LAnd || e.token == Token::LOr {
            self.compile_expr(&e.lhs)?;
            let opcode = if e.token == Token::LAnd {
                Opcode::AndJump
            } else {
                Opcode::OrJump
            };
            let jump = self.emit(e.token_pos, opcode, &[0]);
            self.compile_expr(&e.rhs)?;
            let end = self.current_len();
            self.change_operand(jump, end);
            return Ok(());
        }

        self.compile_expr(&e.lhs)?;
        self.compile_expr(&e.rhs)?;
        match e.token {
            Token::Equal => {
                self.emit(e.token_pos, Opcode::Equal, &[]);
            }
            Token::NotEqual => {
                self.emit(e.token_pos, Opcode::NotEqual, &[]);
            }
            Token::Add
            | Token::Sub
            | Token::Mul
            | Token::Quo
            | Token::Rem
            | Token::And
            | Token::Or
            | Token::Xor
            | Token::Shl
            | Token::Shr
            | Token::AndNot
            | Token::Less
            | Token::Greater
            | Token::LessEq
            | Token::GreaterEq => {
                self.emit(e.token_pos, Opcode::BinaryOp, &[e.token as u8 as usize]);
            }
            tok => {
                return Err(self.error_at(e.token_pos, format!("invalid binary operator: {}", tok)));
            }
        }
        Ok(())
    }

    fn compile_func_lit(&mut self, e: &ast::FuncLit) -> Result<(), CompileError> {
        self.enter_scope();
        for param in &e.params.vars {
            self.symbol_table.define(&param.name);
        }

        // the body is an ordinary block, so parameters may be shadowed
        if let Err(err) = self.compile_block(&e.body) {
            self.leave_scope();
            return Err(err);
        }

        self.finalize_current_function(e.func_pos);

        let free_symbols = self.symbol_table.free_symbols().to_vec();
        let num_locals = self.symbol_table.max_symbols();
        let (instructions, source_map) = self.leave_scope();

        for symbol in &free_symbols {
            match symbol.scope {
                SymbolScope::Local => {
                    self.emit(e.func_pos, Opcode::GetLocalPtr, &[symbol.index]);
                }
                SymbolScope::Free => {
                    self.emit(e.func_pos, Opcode::GetFreePtr, &[symbol.index]);
                }
                _ => unreachable!("captured symbol is neither local nor free"),
            }
        }

        let func = Value::CompiledFunction(Rc::new(CompiledFunction {
            instructions,
            num_locals,
            num_parameters: e.params.vars.len(),
            variadic: e.params.var_args,
            source_map,
        }));
        let idx = self.add_constant(func);
        if free_symbols.is_empty() {
            self.emit(e.func_pos, Opcode::Constant, &[idx]);
        } else {
            self.emit(e.func_pos, Opcode::Closure, &[idx, free_symbols.len()]);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    fn compile_import(&mut self, e: &ast::ImportExpr) -> Result<(), CompileError> {
        if e.module_name.is_empty() {
            return Err(self.error_at(e.token_pos, "empty module name"));
        }

        if let Some(module) = self.modules.get(&e.module_name).cloned() {
            match module {
                Module::Builtin(builtin) => {
                    let idx = self.add_constant(builtin.as_value());
                    self.emit(e.token_pos, Opcode::Constant, &[idx]);
                }
                Module::Source(source) => {
                    let compiled = self.compile_module(
                        e.token_pos,
                        &e.module_name,
                        &e.module_name,
                        &source.file,
                    )?;
                    let idx = self.add_constant(Value::CompiledFunction(compiled));
                    self.emit(e.token_pos, Opcode::Constant, &[idx]);
                    self.emit(e.token_pos, Opcode::Call, &[0, 0]);
                }
            }
            return Ok(());
        }

        if !self.allow_file_import {
            return Err(self.error_at(
                e.token_pos,
                format!("module '{}' not found", e.module_name),
            ));
        }

        let mut found = None;
        for ext in &self.import_file_ext {
            let candidate = self.import_dir.join(format!("{}{}", e.module_name, ext));
            if candidate.is_file() {
                found = Some(candidate);
                break;
            }
        }
        let Some(path) = found else {
            return Err(self.error_at(
                e.token_pos,
                format!("module '{}' not found", e.module_name),
            ));
        };
        let path_str = path.to_string_lossy().into_owned();

        let Some(parser) = self.parser.clone() else {
            return Err(self.error_at(e.token_pos, "file import requires a source parser"));
        };
        let src = std::fs::read(&path).map_err(|err| {
            self.error_at(e.token_pos, format!("module file read error: {}", err))
        })?;
        let mod_file = self
            .file_set
            .borrow_mut()
            .add_file(&path_str, None, src.len() as u32);
        let file = parser
            .parse(mod_file, &src)
            .map_err(|list| self.error_at(e.token_pos, list.to_string()))?;

        let compiled = self.compile_module(e.token_pos, &e.module_name, &path_str, &file)?;
        let idx = self.add_constant(Value::CompiledFunction(compiled));
        self.emit(e.token_pos, Opcode::Constant, &[idx]);
        self.emit(e.token_pos, Opcode::Call, &[0, 0]);
        Ok(())
    }

    /// Compile a source module into a zero-argument function. Modules are
    /// compiled once per path; re-entering a path mid-compilation is a
    /// cycle.
    fn compile_module(
        &mut self,
        pos: Pos,
        name: &str,
        path: &str,
        file: &ast::File,
    ) -> Result<Rc<CompiledFunction>, CompileError> {
        if let Some(cached) = self.compiled_modules.borrow().get(path) {
            return Ok(cached.clone());
        }
        if !self.compiling_modules.borrow_mut().insert(path.to_string()) {
            return Err(self.error_at(pos, format!("cyclic import of module '{}'", name)));
        }

        // fresh symbol table with the builtins only, forked without a
        // global scope: the module's top-level bindings become locals of
        // the module function
        let mut base = SymbolTable::new();
        for symbol in self.symbol_table.root_builtin_symbols().to_vec() {
            base.define_builtin(symbol.index, &symbol.name);
        }
        let module_table = SymbolTable::fork(base, false);

        let mut child = Compiler {
            file: None,
            file_set: self.file_set.clone(),
            in_module: true,
            constants: core::mem::take(&mut self.constants),
            const_index: core::mem::take(&mut self.const_index),
            symbol_table: module_table,
            scopes: vec![CompilationScope::default()],
            modules: self.modules.clone(),
            compiled_modules: self.compiled_modules.clone(),
            compiling_modules: self.compiling_modules.clone(),
            allow_file_import: self.allow_file_import,
            import_dir: self.import_dir.clone(),
            import_file_ext: self.import_file_ext.clone(),
            parser: self.parser.clone(),
        };

        let result = child.compile(file);
        if result.is_ok() {
            child.finalize_current_function(file.pos());
        }
        self.constants = core::mem::take(&mut child.constants);
        self.const_index = core::mem::take(&mut child.const_index);
        self.compiling_modules.borrow_mut().remove(path);
        result?;

        let scope = child.scopes.pop().unwrap();
        let func = Rc::new(CompiledFunction {
            instructions: scope.instructions,
            num_locals: child.symbol_table.max_symbols(),
            num_parameters: 0,
            variadic: false,
            source_map: scope.source_map,
        });
        self.compiled_modules
            .borrow_mut()
            .insert(path.to_string(), func.clone());
        Ok(func)
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn emit(&mut self, pos: Pos, opcode: Opcode, operands: &[usize]) -> usize {
        let instruction = make_instruction(opcode, operands);
        let scope = self.scopes.last_mut().unwrap();
        let at = scope.instructions.len();
        scope.source_map.insert(at, pos);
        scope.instructions.extend(instruction);
        scope.last_op = Some(opcode);
        trace!(target: "zephyr::compiler", "{:04} {} {:?}", at, opcode, operands);
        at
    }

    fn emit_load(&mut self, pos: Pos, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(pos, Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(pos, Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(pos, Opcode::GetFree, &[symbol.index]),
            SymbolScope::Builtin => self.emit(pos, Opcode::GetBuiltin, &[symbol.index]),
        };
    }

    fn emit_store(&mut self, pos: Pos, symbol: &Symbol, define: bool) {
        match symbol.scope {
            SymbolScope::Global => self.emit(pos, Opcode::SetGlobal, &[symbol.index]),
            SymbolScope::Local if define => self.emit(pos, Opcode::DefineLocal, &[symbol.index]),
            SymbolScope::Local => self.emit(pos, Opcode::SetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(pos, Opcode::SetFree, &[symbol.index]),
            SymbolScope::Builtin => unreachable!("builtins are read-only"),
        };
    }

    fn current_len(&self) -> usize {
        self.scopes.last().unwrap().instructions.len()
    }

    /// Rewrite the operand of the jump emitted at `op_pos`.
    fn change_operand(&mut self, op_pos: usize, operand: usize) {
        let scope = self.scopes.last_mut().unwrap();
        let opcode = Opcode::from_byte(scope.instructions[op_pos]).unwrap();
        let instruction = make_instruction(opcode, &[operand]);
        scope.instructions[op_pos..op_pos + instruction.len()].copy_from_slice(&instruction);
    }

    fn add_constant(&mut self, value: Value) -> usize {
        if let Some(key) = ConstKey::of(&value) {
            if let Some(&idx) = self.const_index.get(&key) {
                return idx;
            }
            let idx = self.constants.len();
            self.constants.push(value);
            self.const_index.insert(key, idx);
            trace!(target: "zephyr::compiler", "const [{}]", idx);
            return idx;
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let table = core::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::fork(table, false);
    }

    fn leave_scope(&mut self) -> (Vec<u8>, HashMap<usize, Pos>) {
        let scope = self.scopes.pop().unwrap();
        let table = core::mem::take(&mut self.symbol_table);
        self.symbol_table = table.unfork().unwrap_or_default();
        (scope.instructions, scope.source_map)
    }

    fn enter_loop(&mut self) {
        self.scopes
            .last_mut()
            .unwrap()
            .loops
            .push(LoopContext::default());
    }

    fn leave_loop(&mut self) -> LoopContext {
        self.scopes.last_mut().unwrap().loops.pop().unwrap()
    }

    // ------------------------------------------------------------------
    // Function finalization
    // ------------------------------------------------------------------

    /// Dead-code elimination plus the implicit trailing return.
    ///
    /// Control that falls off the end first gets an explicit `Return 0`.
    /// Then instructions between a `Return` and the next jump target are
    /// unreachable and dropped; a `Return` that is itself a jump target
    /// stays live and does not start a dead region. Surviving jumps are
    /// re-patched through the old→new position map; one whose target was
    /// past the live code is routed to a fresh trailing return instead.
    fn finalize_current_function(&mut self, func_pos: Pos) {
        if self.scopes.last().unwrap().last_op != Some(Opcode::Return) {
            self.emit(func_pos, Opcode::Return, &[0]);
        }

        let scope = self.scopes.last_mut().unwrap();
        let instructions = core::mem::take(&mut scope.instructions);
        let old_source_map = core::mem::take(&mut scope.source_map);

        // pass 1: collect jump destinations
        let mut dsts = HashSet::new();
        iterate_instructions(&instructions, |_, opcode, operands| {
            if opcode.is_jump() {
                dsts.insert(operands[0]);
            }
            true
        });

        // pass 2: drop unreachable instructions
        let mut new_insts: Vec<u8> = Vec::with_capacity(instructions.len());
        let mut pos_map: HashMap<usize, usize> = HashMap::new();
        let mut dead_code = false;
        let mut last_kept: Option<Opcode> = None;
        iterate_instructions(&instructions, |pos, opcode, operands| {
            if dsts.contains(&pos) {
                dead_code = false;
            } else if opcode == Opcode::Return {
                if dead_code {
                    return true;
                }
                dead_code = true;
            } else if dead_code {
                return true;
            }
            pos_map.insert(pos, new_insts.len());
            new_insts.extend(make_instruction(opcode, operands));
            last_kept = Some(opcode);
            true
        });

        // pass 3: re-patch jump operands
        let end = new_insts.len();
        let mut end_return = false;
        let mut patches: Vec<(usize, Opcode, usize)> = Vec::new();
        iterate_instructions(&new_insts, |pos, opcode, operands| {
            if opcode.is_jump() {
                let target = match pos_map.get(&operands[0]) {
                    Some(&target) => target,
                    None => {
                        // the target fell past the live code
                        end_return = true;
                        end
                    }
                };
                patches.push((pos, opcode, target));
            }
            true
        });
        for (pos, opcode, target) in patches {
            let instruction = make_instruction(opcode, &[target]);
            new_insts[pos..pos + instruction.len()].copy_from_slice(&instruction);
        }
        if end_return {
            new_insts.extend(make_instruction(Opcode::Return, &[0]));
            last_kept = Some(Opcode::Return);
        }

        // pass 4: remap the source map
        let mut new_source_map = HashMap::with_capacity(old_source_map.len());
        for (old_pos, src_pos) in old_source_map {
            if let Some(&new_pos) = pos_map.get(&old_pos) {
                new_source_map.insert(new_pos, src_pos);
            }
        }
        if end_return {
            new_source_map.insert(end, func_pos);
        }

        let scope = self.scopes.last_mut().unwrap();
        scope.instructions = new_insts;
        scope.source_map = new_source_map;
        scope.last_op = last_kept;
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    fn error_at(&self, pos: Pos, message: impl Into<String>) -> CompileError {
        let mut file_pos = self.file_set.borrow().position(pos);
        if file_pos.name.is_empty() {
            // position outside the file set: at least name the file
            if let Some(file) = &self.file {
                file_pos.name = file.name.clone();
            }
        }
        CompileError {
            message: message.into(),
            pos: file_pos,
        }
    }
}

/// Check a file-import extension list: non-empty, and each entry a bare
/// `.ext` with no further dots.
pub(crate) fn validate_import_file_ext<S: AsRef<str>>(exts: &[S]) -> Result<(), Error> {
    if exts.is_empty() {
        return Err(Error::Invalid(
            "missing arg: at least one extension is required".to_string(),
        ));
    }
    for ext in exts {
        let ext = ext.as_ref();
        let valid = ext
            .strip_prefix('.')
            .is_some_and(|stem| !stem.is_empty() && !stem.contains('.'));
        if !valid {
            return Err(Error::Invalid(format!("invalid file extension: '{}'", ext)));
        }
    }
    Ok(())
}

/// Split an assignment target into its root identifier and the selector
/// path applied to it. A non-identifier root yields `None`.
fn resolve_assign_lhs(expr: &Expr) -> (Option<String>, Vec<Expr>) {
    match expr {
        Expr::Ident(ident) => (Some(ident.name.clone()), Vec::new()),
        Expr::SelectorExpr(sel) => {
            let (name, mut selectors) = resolve_assign_lhs(&sel.expr);
            selectors.push(Expr::StringLit(sel.sel.clone()));
            (name, selectors)
        }
        Expr::IndexExpr(index) => {
            let (name, mut selectors) = resolve_assign_lhs(&index.expr);
            selectors.push((*index.index).clone());
            (name, selectors)
        }
        Expr::ParenExpr(paren) => resolve_assign_lhs(&paren.expr),
        _ => (None, Vec::new()),
    }
}
