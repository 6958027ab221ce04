use std::collections::HashMap;

use crate::language::ast::{ExprId, Node};
use crate::language::symbols::Symbol;

/// Maps receiver types to their type functions. Keys are the *type-id* of
/// the dereferenced receiver type, so `&Foo`, `mut&Foo` and `Foo` all reach
/// the same method set.
#[derive(Debug, Default)]
pub struct TypeFunTab {
    m: HashMap<Symbol, HashMap<Symbol, ExprId>>,
}

impl TypeFunTab {
    pub fn define(&mut self, recv_tid: Symbol, name: Symbol, fun: ExprId) -> Option<ExprId> {
        self.m.entry(recv_tid).or_default().insert(name, fun)
    }

    pub fn lookup(&self, recv_tid: Symbol, name: Symbol) -> Option<ExprId> {
        self.m.get(&recv_tid).and_then(|funs| funs.get(&name)).copied()
    }
}

/// A set of source files sharing a namespace. The parser pre-populates
/// `defs` with top-level definitions; the loader fills `api_ns` before any
/// importer of this package is checked.
#[derive(Debug)]
pub struct Package {
    /// Canonical import path, e.g. "main" or "std/runtime".
    pub path: String,
    /// Package-level definitions.
    pub defs: HashMap<Symbol, Node>,
    /// Type functions defined by this package.
    pub tfundefs: TypeFunTab,
    /// Namespace value exposing the public API, set by the loader.
    pub api_ns: Option<ExprId>,
    /// `fun main()`, recorded by the checker for the main package.
    pub main_fun: Option<ExprId>,
    /// SHA-256 of the emitted public header, filled by the backend.
    pub api_sha256: [u8; 32],
}

impl Package {
    pub fn new(path: impl Into<String>) -> Package {
        Package {
            path: path.into(),
            defs: HashMap::new(),
            tfundefs: TypeFunTab::default(),
            api_ns: None,
            main_fun: None,
            api_sha256: [0; 32],
        }
    }

    pub fn is_main(&self) -> bool {
        self.path == "main"
    }

    pub fn def(&self, name: Symbol) -> Option<Node> {
        self.defs.get(&name).copied()
    }
}
