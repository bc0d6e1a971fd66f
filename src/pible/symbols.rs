//! Lexically scoped symbol table.
//!
//! Built on the fly during code generation rather than as a separate
//! semantic pass. Lookup walks scopes innermost to outermost.

use std::collections::HashMap;

use crate::pible::ast::Type;

/// What a name denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Function-local variable with a frame slot.
    Local,
    /// Parameter spilled to a frame slot at entry.
    Param,
    /// File-scope variable with a heap slot.
    Global,
    /// Function name.
    Function,
    /// Declared record type.
    Type,
}

/// A resolved name.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// Declared name.
    pub name: String,
    /// What the name denotes.
    pub kind: SymbolKind,
    /// Declared type.
    pub ty: Type,
    /// Frame offset relative to `R10` for locals and params, heap
    /// offset for globals, absent otherwise.
    pub offset: Option<i32>,
}

/// A stack of lexical scopes.
///
/// The bottom scope holds file-scope names and survives for the whole
/// compilation; block scopes push and pop around their statements.
#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl SymbolTable {
    /// Creates a table containing only the file scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    /// Opens a nested scope.
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Closes the innermost scope, dropping its names.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "file scope never pops");
        self.scopes.pop();
    }

    /// Defines a name in the innermost scope, shadowing outer ones.
    pub fn define(&mut self, symbol: Symbol) {
        self.scopes
            .last_mut()
            .expect("symbol table always has a scope")
            .insert(symbol.name.clone(), symbol);
    }

    /// Resolves a name, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, offset: i32) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Local,
            ty: Type::unsigned(64),
            offset: Some(offset),
        }
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        table.define(local("x", -8));
        table.push_scope();
        table.define(local("x", -16));

        assert_eq!(table.lookup("x").unwrap().offset, Some(-16));
        table.pop_scope();
        assert_eq!(table.lookup("x").unwrap().offset, Some(-8));
    }

    #[test]
    fn names_drop_with_their_scope() {
        let mut table = SymbolTable::new();
        table.push_scope();
        table.define(local("tmp", -8));
        assert!(table.lookup("tmp").is_some());
        table.pop_scope();
        assert!(table.lookup("tmp").is_none());
    }
}
