use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{LedgerError, LedgerResult};

/// A named, importable item (a function, a type, a task) referenced from a
/// document as `{"__module__": ..., "__name__": ...}`.
///
/// The referenced item is never serialized itself; decoding looks the name up
/// again through a [`SymbolResolver`].
#[derive(Clone)]
pub struct Symbol {
    module: String,
    name: String,
    target: Arc<dyn Any + Send + Sync>,
}

impl Symbol {
    pub fn new<T: Any + Send + Sync>(
        module: impl Into<String>,
        name: impl Into<String>,
        target: T,
    ) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            target: Arc::new(target),
        }
    }

    fn from_shared(module: &str, name: &str, target: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            module: module.to_string(),
            name: name.to_string(),
            target,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.target.downcast_ref::<T>()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module && self.name == other.name
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({}::{})", self.module, self.name)
    }
}

/// Resolves `(module, name)` pairs found in documents back into live items.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, module: &str, name: &str) -> LedgerResult<Symbol>;
}

/// Explicit table of importable items.
#[derive(Default)]
pub struct SymbolTable {
    items: RwLock<HashMap<(String, String), Arc<dyn Any + Send + Sync>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `target` importable as `module::name`, returning its symbol.
    pub fn register<T: Any + Send + Sync>(&self, module: &str, name: &str, target: T) -> Symbol {
        let target: Arc<dyn Any + Send + Sync> = Arc::new(target);
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.insert((module.to_string(), name.to_string()), target.clone());
        Symbol::from_shared(module, name, target)
    }

    pub fn contains(&self, module: &str, name: &str) -> bool {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        items.contains_key(&(module.to_string(), name.to_string()))
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, module: &str, name: &str) -> LedgerResult<Symbol> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        items
            .get(&(module.to_string(), name.to_string()))
            .map(|target| Symbol::from_shared(module, name, target.clone()))
            .ok_or_else(|| LedgerError::SymbolNotFound {
                module: module.to_string(),
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(x: i64) -> i64 {
        x * 2
    }

    #[test]
    fn registered_symbol_resolves_to_same_target() {
        let table = SymbolTable::new();
        table.register("demo::math", "double", double as fn(i64) -> i64);

        let symbol = table.resolve("demo::math", "double").unwrap();
        let f = symbol.downcast_ref::<fn(i64) -> i64>().unwrap();
        assert_eq!(f(21), 42);
    }

    #[test]
    fn unknown_symbol_is_typed_error() {
        let table = SymbolTable::new();
        let err = table.resolve("demo::math", "missing").unwrap_err();
        assert!(matches!(err, LedgerError::SymbolNotFound { ref name, .. } if name == "missing"));
    }
}
