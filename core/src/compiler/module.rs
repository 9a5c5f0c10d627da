//! Importable modules.
//!
//! A module map is the compiler's view of what `import("name")` may refer
//! to: either a builtin module (a named bag of host values, imported as an
//! immutable map) or a source module (a pre-parsed program compiled into a
//! zero-argument function whose result is the module's `export` value).
//! File-system imports are resolved separately by the compiler against its
//! import directory and extension list.

use std::rc::Rc;

use ecow::EcoString;
use hashbrown::HashMap;

use crate::ast;
use crate::values::{NativeFn, UserFunction, Value, ValueMap};

/// A named collection of host-provided values.
///
/// Functions registered through [`BuiltinModule::add_function`] carry the
/// module name as their attribution, which is what allows bytecode
/// referencing them to be re-bound by name after decoding.
#[derive(Clone, Debug)]
pub struct BuiltinModule {
    pub name: String,
    attrs: ValueMap,
}

impl BuiltinModule {
    pub fn new(name: impl Into<String>) -> BuiltinModule {
        BuiltinModule {
            name: name.into(),
            attrs: ValueMap::new(),
        }
    }

    /// Register a native function member.
    pub fn add_function(&mut self, name: &str, func: NativeFn) -> &mut Self {
        let value = Value::UserFunction(Rc::new(UserFunction {
            name: name.to_string(),
            module: Some(self.name.clone()),
            func: Box::new(func),
        }));
        self.attrs.insert(EcoString::from(name), value);
        self
    }

    /// Register a constant member.
    pub fn add_value(&mut self, name: &str, value: Value) -> &mut Self {
        self.attrs.insert(EcoString::from(name), value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// The value an `import` of this module evaluates to.
    pub fn as_value(&self) -> Value {
        Value::immutable_map(self.attrs.clone())
    }
}

/// A module distributed as source, pre-parsed by the host's parser.
#[derive(Clone, Debug)]
pub struct SourceModule {
    pub file: ast::File,
}

/// One entry in a [`ModuleMap`].
#[derive(Clone, Debug)]
pub enum Module {
    Builtin(Rc<BuiltinModule>),
    Source(Rc<SourceModule>),
}

/// Name → module registry handed to the compiler.
#[derive(Clone, Debug, Default)]
pub struct ModuleMap {
    modules: HashMap<String, Module>,
}

impl ModuleMap {
    pub fn new() -> ModuleMap {
        ModuleMap::default()
    }

    pub fn add_builtin_module(&mut self, module: BuiltinModule) -> &mut Self {
        self.modules
            .insert(module.name.clone(), Module::Builtin(Rc::new(module)));
        self
    }

    pub fn add_source_module(&mut self, name: impl Into<String>, file: ast::File) -> &mut Self {
        self.modules
            .insert(name.into(), Module::Source(Rc::new(SourceModule { file })));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.modules.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Look up a builtin module's member, for decode-time re-binding.
    pub fn builtin_attr(&self, module: &str, name: &str) -> Option<Value> {
        match self.modules.get(module)? {
            Module::Builtin(m) => m.attr(name).cloned(),
            Module::Source(_) => None,
        }
    }
}
