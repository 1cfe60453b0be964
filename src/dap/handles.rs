//! Handle table for session objects named in protocol messages
//!
//! Scopes and variable containers have no wire representation of their own,
//! so the session hands out small integer handles for them and resolves the
//! handles when the front end refers back. Handles start above a reserved base
//! because small integers carry protocol meaning (`0` means "no children").

use std::collections::HashMap;

/// First handle value handed out after construction or `reset`
pub const HANDLE_BASE: i64 = 1000;

#[derive(Debug)]
pub struct HandleTable<V> {
    base: i64,
    next: i64,
    values: HashMap<i64, V>,
}

impl<V> HandleTable<V> {
    pub fn new() -> Self {
        Self::with_base(HANDLE_BASE)
    }

    pub fn with_base(base: i64) -> Self {
        Self {
            base,
            next: base,
            values: HashMap::new(),
        }
    }

    /// Store `value` under a fresh handle; handles are never reused before `reset`
    pub fn create(&mut self, value: V) -> i64 {
        let handle = self.next;
        self.next += 1;
        self.values.insert(handle, value);
        handle
    }

    pub fn get(&self, handle: i64) -> Option<&V> {
        self.values.get(&handle)
    }

    /// Resolve `handle`, falling back to `default` for unknown handles
    pub fn get_or<'a>(&'a self, handle: i64, default: &'a V) -> &'a V {
        self.values.get(&handle).unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every entry and restart allocation at the base
    pub fn reset(&mut self) {
        self.next = self.base;
        self.values.clear();
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
