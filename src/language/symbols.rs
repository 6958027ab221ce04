use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

/// An interned identifier. Equality is handle equality; two symbols interned
/// from the same bytes compare equal and hash identically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Symbol(u32);

struct Interner {
    map: HashMap<&'static str, Symbol>,
    strings: Vec<&'static str>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        // symbols are immortal; the leaked storage lives for the process
        let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let sym = Symbol(self.strings.len() as u32);
        self.strings.push(s);
        self.map.insert(s, sym);
        sym
    }
}

fn interner() -> &'static RwLock<Interner> {
    static INTERNER: OnceLock<RwLock<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| {
        let mut it = Interner {
            map: HashMap::new(),
            strings: Vec::new(),
        };
        // Reserved names and primitive type names are pre-interned at fixed
        // handles; the constants in `sym` below rely on this order.
        for s in [
            "_", "this", "drop", "main", "str", "as", "from", "void", "bool", "i8", "i16", "i32",
            "i64", "int", "u8", "u16", "u32", "u64", "uint", "f32", "f64", "unknown",
        ] {
            it.intern(s);
        }
        RwLock::new(it)
    })
}

impl Symbol {
    pub fn intern(s: &str) -> Symbol {
        if let Some(&sym) = interner().read().unwrap().map.get(s) {
            return sym;
        }
        interner().write().unwrap().intern(s)
    }

    pub fn intern_formatted(args: fmt::Arguments<'_>) -> Symbol {
        Symbol::intern(&args.to_string())
    }

    pub fn as_str(self) -> &'static str {
        interner().read().unwrap().strings[self.0 as usize]
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.as_str())
    }
}

/// Pre-interned symbols. Handles match the seeding order in `interner()`.
pub mod sym {
    use super::Symbol;

    /// The wildcard/anonymous name "_".
    pub const UNDERSCORE: Symbol = Symbol(0);
    pub const THIS: Symbol = Symbol(1);
    pub const DROP: Symbol = Symbol(2);
    pub const MAIN: Symbol = Symbol(3);
    pub const STR: Symbol = Symbol(4);
    pub const AS: Symbol = Symbol(5);
    pub const FROM: Symbol = Symbol(6);

    pub const VOID: Symbol = Symbol(7);
    pub const BOOL: Symbol = Symbol(8);
    pub const I8: Symbol = Symbol(9);
    pub const I16: Symbol = Symbol(10);
    pub const I32: Symbol = Symbol(11);
    pub const I64: Symbol = Symbol(12);
    pub const INT: Symbol = Symbol(13);
    pub const U8: Symbol = Symbol(14);
    pub const U16: Symbol = Symbol(15);
    pub const U32: Symbol = Symbol(16);
    pub const U64: Symbol = Symbol(17);
    pub const UINT: Symbol = Symbol(18);
    pub const F32: Symbol = Symbol(19);
    pub const F64: Symbol = Symbol(20);
    pub const UNKNOWN: Symbol = Symbol(21);
}

/// Name prefix reserved for the implementation; synthesized locals use it
/// and unused-value warnings skip it.
pub const INTERNAL_PREFIX: &str = "__keel_";

pub fn name_is_reserved(name: Symbol) -> bool {
    name.as_str().starts_with(INTERNAL_PREFIX)
}
