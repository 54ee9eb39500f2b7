// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store backend.

use crate::{Store, StoreError, Table};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// In-memory [`Store`] backed by one sorted map per table.
///
/// Cheap to clone; clones share the underlying tables.
#[derive(Clone, Default)]
pub struct MemStore {
    tables: Arc<Mutex<HashMap<Table, BTreeMap<String, Value>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a table. Test convenience.
    pub fn len(&self, table: Table) -> usize {
        self.tables
            .lock()
            .get(&table)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }
}

impl Store for MemStore {
    fn get(&self, table: Table, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .tables
            .lock()
            .get(&table)
            .and_then(|t| t.get(key))
            .cloned())
    }

    fn put(&self, table: Table, key: &str, value: Value) -> Result<(), StoreError> {
        self.tables
            .lock()
            .entry(table)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, table: Table, key: &str) -> Result<(), StoreError> {
        if let Some(t) = self.tables.lock().get_mut(&table) {
            t.remove(key);
        }
        Ok(())
    }

    fn list(&self, table: Table) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .tables
            .lock()
            .get(&table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "mem_tests.rs"]
mod tests;
