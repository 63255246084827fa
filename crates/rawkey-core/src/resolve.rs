//! Layout resolver: `(keycode, group)` → symbol name.
//!
//! # Fallback chain
//!
//! | Step | Lookup                   | Covers                                   |
//! |------|--------------------------|------------------------------------------|
//! | 1    | `(keycode, group, 0)`    | primary symbol in the active layout      |
//! | 2    | `(keycode, group, 1)`    | keys with only a shifted/secondary symbol |
//! | 3    | `(keycode, 0, 0)`        | groups that have no mapping for the key  |
//! | –    | `"(unknown)"`            | nothing found, or the name is empty      |
//!
//! The group is read from live keyboard state per event, and group changes
//! are asynchronous to key events, so a miss at the preferred group is not an
//! error.  The event is always reported; an unresolved key just gets the
//! sentinel name.

use std::collections::HashMap;

use crate::event::SymbolName;

/// Name reported when no symbol can be resolved.
pub const UNKNOWN_SYMBOL: &str = "(unknown)";

/// A keysym value.  Zero (`NoSymbol`) is never wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Keysym(pub u32);

/// Source of keysyms and their canonical names.
#[cfg_attr(test, mockall::automock)]
pub trait SymbolTable {
    /// Keysym bound to `(keycode, group, level)`, or `None` for `NoSymbol`.
    fn keysym(&self, keycode: u16, group: u8, level: u8) -> Option<Keysym>;

    /// Canonical textual name of `sym`.
    fn keysym_name(&self, sym: Keysym) -> Option<String>;
}

/// Resolves the symbol name for `keycode` with `group` as the preferred
/// layout group.
pub fn resolve_symbol_name<T: SymbolTable + ?Sized>(table: &T, keycode: u16, group: u8) -> SymbolName {
    let attempts = [(group, 0), (group, 1), (0, 0)];
    attempts
        .iter()
        .find_map(|&(g, level)| table.keysym(keycode, g, level))
        .and_then(|sym| table.keysym_name(sym))
        .filter(|name| !name.is_empty())
        .map(|name| SymbolName::new(&name))
        .unwrap_or_else(|| SymbolName::new(UNKNOWN_SYMBOL))
}

/// Map-backed [`SymbolTable`] for synthetic layouts.
#[derive(Debug, Clone, Default)]
pub struct MapSymbolTable {
    bindings: HashMap<(u16, u8, u8), Keysym>,
    names: HashMap<Keysym, String>,
}

impl MapSymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `(keycode, group, level)` to a keysym with the given name.
    pub fn bind(&mut self, keycode: u16, group: u8, level: u8, sym: Keysym, name: &str) -> &mut Self {
        self.bindings.insert((keycode, group, level), sym);
        self.names.insert(sym, name.to_string());
        self
    }

    /// Binds `(keycode, group, level)` to a keysym that has no name.
    pub fn bind_unnamed(&mut self, keycode: u16, group: u8, level: u8, sym: Keysym) -> &mut Self {
        self.bindings.insert((keycode, group, level), sym);
        self
    }
}

impl SymbolTable for MapSymbolTable {
    fn keysym(&self, keycode: u16, group: u8, level: u8) -> Option<Keysym> {
        self.bindings.get(&(keycode, group, level)).copied()
    }

    fn keysym_name(&self, sym: Keysym) -> Option<String> {
        self.names.get(&sym).cloned()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
