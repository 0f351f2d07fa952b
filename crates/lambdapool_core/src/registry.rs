//! Dispatch table mapping `module.function` paths to callable entries.
//!
//! The table is built once when the agent starts; nothing is resolved by
//! reflection and no code travels over the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::envelope::{CallArgs, FunctionPath};

pub type RemoteFn = Arc<dyn Fn(&CallArgs) -> Result<Value, String> + Send + Sync>;

/// Named group of remote functions.
#[derive(Clone, Default)]
pub struct Module {
    functions: BTreeMap<String, RemoteFn>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`; the return value is converted to JSON after the call.
    pub fn function<F, R>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<R, String> + Send + Sync + 'static,
        R: Serialize,
    {
        let entry: RemoteFn = Arc::new(move |call| {
            let result = function(call)?;
            serde_json::to_value(result).map_err(|error| format!("unrepresentable result: {error}"))
        });
        self.functions.insert(name.into(), entry);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RemoteFn> {
        self.functions.get(name)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    UnknownModule(String),
    UnknownFunction { module: String, function: String },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModule(module) => write!(f, "no module named '{module}'"),
            Self::UnknownFunction { module, function } => {
                write!(f, "module '{module}' has no function '{function}'")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    modules: BTreeMap<String, Module>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module, merging with any functions already registered under `name`.
    pub fn module(mut self, name: impl Into<String>, module: Module) -> Self {
        let entry = self.modules.entry(name.into()).or_default();
        entry.functions.extend(module.functions);
        self
    }

    pub fn resolve(&self, path: &FunctionPath) -> Result<&RemoteFn, ResolveError> {
        let module = self
            .modules
            .get(path.module())
            .ok_or_else(|| ResolveError::UnknownModule(path.module().to_string()))?;
        module
            .get(path.function())
            .ok_or_else(|| ResolveError::UnknownFunction {
                module: path.module().to_string(),
                function: path.function().to_string(),
            })
    }

    /// Every registered `module.function` path, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|(module, entries)| {
                entries
                    .function_names()
                    .map(move |function| format!("{module}.{function}"))
            })
            .collect()
    }
}
