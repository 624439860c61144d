//! `TableUse` — per-compilation tracking of which (table, alias) pairs were
//! actually referenced, driving auto-join pruning.

use std::any::TypeId;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct TableUse {
    used: HashSet<(TypeId, String)>,
}

impl TableUse {
    pub fn new() -> Self {
        TableUse::default()
    }

    pub fn mark(&mut self, type_id: TypeId, alias: impl Into<String>) {
        self.used.insert((type_id, alias.into()));
    }

    pub fn is_referenced(&self, type_id: TypeId, alias: &str) -> bool {
        self.used.contains(&(type_id, alias.to_string()))
    }
}
