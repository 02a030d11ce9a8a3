//! Small wrapper over [`string_interner`].
//!
//! Every name that appears in a schema (packages, modules, declarations,
//! fields, operations) is interned once by the loader. After loading, the
//! interner is only ever read, so it can be shared between pipeline workers
//! by reference.

use string_interner::{self, backend, symbol};

/// The initial capacity of a [`StringInterner`].
///
/// At time of writing, [`string_interner`] will multiply this value by 5 and
/// pass it to [`String::with_capacity`]. This is based on the assumption that
/// the typical word size is 5 characters.
const INTERNER_CAPACITY: usize = 1024;

#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Symbol(symbol::SymbolU32);

#[derive(Debug)]
pub struct StringInterner(
    string_interner::StringInterner<backend::StringBackend<symbol::SymbolU32>>,
);

impl StringInterner {
    pub fn new() -> Self {
        StringInterner(string_interner::StringInterner::with_capacity(
            INTERNER_CAPACITY,
        ))
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        let raw_symbol = self.0.get_or_intern(s);
        Symbol(raw_symbol)
    }

    pub fn resolve(&self, sym: Symbol) -> Option<&str> {
        self.0.resolve(sym.0)
    }

    /// Like [`resolve`], but for symbols that are known to come from this
    /// interner.
    ///
    /// [`resolve`]: StringInterner::resolve
    pub fn get(&self, sym: Symbol) -> &str {
        self.resolve(sym)
            .expect("symbols are only created by this interner")
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::StringInterner;

    #[test]
    fn interning_is_idempotent() {
        let mut interner = StringInterner::new();
        let a = interner.intern("Point");
        let b = interner.intern("Point");
        let c = interner.intern("Color");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.get(a), "Point");
        assert_eq!(interner.resolve(c), Some("Color"));
    }
}
