//! The embedding facade: bind variables, compile, run, read results.
//!
//! A [`Script`] owns a parsed program plus its compilation settings. One
//! `compile()` produces a [`Compiled`], which pairs the immutable bytecode
//! with a globals array; running mutates the globals, `get`/`set` read and
//! write them between runs, and `clone()` yields an independently runnable
//! instance over the same bytecode.

use std::path::PathBuf;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::api::context::Context;
use crate::api::variable::Variable;
use crate::ast;
use crate::compiler::{Compiler, ModuleMap, SourceParser, SymbolTable};
use crate::errors::Error;
use crate::source::SourceFileSet;
use crate::values::Value;
use crate::vm::{Bytecode, GLOBALS_SIZE, VM};

/// A script: a parsed program and everything needed to compile it.
pub struct Script {
    input: ast::File,
    variables: Vec<(String, Value)>,
    modules: Option<ModuleMap>,
    allow_file_import: bool,
    import_dir: PathBuf,
    import_file_ext: Option<Vec<String>>,
    parser: Option<Rc<dyn SourceParser>>,
    max_allocs: i64,
}

impl Script {
    /// Create a script from a parsed program (parsing itself lives with
    /// the host's parser).
    pub fn new(input: ast::File) -> Script {
        Script {
            input,
            variables: Vec::new(),
            modules: None,
            allow_file_import: false,
            import_dir: PathBuf::new(),
            import_file_ext: None,
            parser: None,
            max_allocs: -1,
        }
    }

    /// Bind a host value as a global variable. Re-adding a name replaces
    /// its value.
    pub fn add(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.variables.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.variables.push((name.to_string(), value)),
        }
    }

    /// Drop a bound variable. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.variables.len();
        self.variables.retain(|(n, _)| n != name);
        self.variables.len() != before
    }

    /// Replace the importable-module registry.
    pub fn set_imports(&mut self, modules: ModuleMap) {
        self.modules = Some(modules);
    }

    /// Allow `import` to read module files from disk.
    pub fn enable_file_import(&mut self, enable: bool) {
        self.allow_file_import = enable;
    }

    pub fn set_import_dir(&mut self, dir: impl Into<PathBuf>) {
        self.import_dir = dir.into();
    }

    /// Replace the extension list tried for file imports.
    pub fn set_import_file_ext<S: AsRef<str>>(&mut self, exts: &[S]) -> Result<(), Error> {
        crate::compiler::validate_import_file_ext(exts)?;
        self.import_file_ext = Some(exts.iter().map(|e| e.as_ref().to_string()).collect());
        Ok(())
    }

    /// Register the parser used for file imports.
    pub fn set_source_parser(&mut self, parser: Rc<dyn SourceParser>) {
        self.parser = Some(parser);
    }

    /// Bound the number of composite allocations per run; -1 disables.
    pub fn set_max_allocs(&mut self, n: i64) {
        self.max_allocs = n;
    }

    /// Compile the script into a runnable form.
    pub fn compile(&self) -> Result<Compiled, Error> {
        let file_set = Rc::new(core::cell::RefCell::new(SourceFileSet::new()));
        let src_file = file_set
            .borrow_mut()
            .add_file("(main)", None, self.input.end().saturating_add(1));

        let mut symbol_table = SymbolTable::new();
        for (name, _) in &self.variables {
            symbol_table.define(name);
        }

        let mut compiler = Compiler::new(
            file_set.clone(),
            Some(src_file),
            Some(symbol_table),
            self.modules.clone(),
        );
        compiler.enable_file_import(self.allow_file_import);
        compiler.set_import_dir(self.import_dir.clone());
        if let Some(exts) = &self.import_file_ext {
            compiler.set_import_file_ext(exts)?;
        }
        if let Some(parser) = &self.parser {
            compiler.set_parser(parser.clone());
        }

        compiler.compile(&self.input)?;

        let mut bytecode = compiler.bytecode();
        bytecode.remove_duplicates();

        let global_indexes: HashMap<String, usize> = compiler
            .symbol_table()
            .root_global_symbols()
            .into_iter()
            .map(|symbol| (symbol.name, symbol.index))
            .collect();

        let mut globals = vec![Value::Undefined; GLOBALS_SIZE];
        for (name, value) in &self.variables {
            if let Some(&index) = global_indexes.get(name) {
                globals[index] = value.clone();
            }
        }

        Ok(Compiled {
            global_indexes,
            bytecode: Rc::new(bytecode),
            globals,
            max_allocs: self.max_allocs,
        })
    }

    /// Compile and run in one step.
    pub fn run(&self) -> Result<Compiled, Error> {
        self.run_context(&Context::background())
    }

    /// Compile and run under `ctx`.
    pub fn run_context(&self, ctx: &Context) -> Result<Compiled, Error> {
        let mut compiled = self.compile()?;
        compiled.run_context(ctx)?;
        Ok(compiled)
    }
}

/// A compiled script plus its global state.
///
/// The bytecode is shared and immutable; the globals are this instance's
/// own. Clone before running the same program concurrently elsewhere.
#[derive(Clone, Debug)]
pub struct Compiled {
    global_indexes: HashMap<String, usize>,
    bytecode: Rc<Bytecode>,
    globals: Vec<Value>,
    max_allocs: i64,
}

impl Compiled {
    /// Execute against the current globals.
    pub fn run(&mut self) -> Result<(), Error> {
        self.run_context(&Context::background())
    }

    /// Execute under `ctx`; on cancellation the cause comes back inside
    /// the runtime error.
    pub fn run_context(&mut self, ctx: &Context) -> Result<(), Error> {
        let globals = core::mem::take(&mut self.globals);
        let mut vm = VM::new(&self.bytecode, Some(globals), self.max_allocs);
        let result = vm.run(ctx);
        self.globals = vm.into_globals();
        result
    }

    /// The compiled program, for serialization or sharing.
    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    /// Read a global by name.
    pub fn get(&self, name: &str) -> Option<Variable> {
        let &index = self.global_indexes.get(name)?;
        Some(Variable::new(name, self.globals[index].clone()))
    }

    /// All named globals.
    pub fn get_all(&self) -> Vec<Variable> {
        let mut all: Vec<Variable> = self
            .global_indexes
            .iter()
            .map(|(name, &index)| Variable::new(name.clone(), self.globals[index].clone()))
            .collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// True when `name` exists and holds a value.
    pub fn is_defined(&self, name: &str) -> bool {
        match self.global_indexes.get(name) {
            Some(&index) => !matches!(self.globals[index], Value::Undefined),
            None => false,
        }
    }

    /// Overwrite a global by name.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        match self.global_indexes.get(name) {
            Some(&index) => {
                self.globals[index] = value.into();
                Ok(())
            }
            None => Err(Error::Invalid(format!("'{}' is not defined", name))),
        }
    }
}
