// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! swb-storage: Store port and the in-memory implementation.
//!
//! The core only consumes an opaque K/V surface with typed tables;
//! anything that can satisfy [`Store`] (an embedded database, a remote
//! KV, a test double) can back it.

pub mod chat;
pub mod mem;
pub mod runs;

pub use chat::{clear_chat_state, load_chat_state, save_chat_state, sweep_chat};
pub use mem::MemStore;
pub use runs::{
    delete_progress, load_progress, put_progress, put_run_summary, record_run_event,
    run_history_for_session, run_record, store_run_history, touch_session, RunRecord,
};

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e.to_string())
    }
}

/// Typed tables the core reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Per-session continuation state, TTL'd.
    Chat,
    /// Per-run event record and terminal summary.
    Runs,
    /// Terminal summaries keyed `{session_key}/{ts}/{run_id}`.
    RunHistory,
    /// `{scope}/{msg_id}` → run id, for cancel-by-progress.
    Progress,
    /// Session key → last-activity timestamp.
    SessionsIndex,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Chat,
        Table::Runs,
        Table::RunHistory,
        Table::Progress,
        Table::SessionsIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Chat => "chat",
            Table::Runs => "runs",
            Table::RunHistory => "run_history",
            Table::Progress => "progress",
            Table::SessionsIndex => "sessions_index",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque K/V store with typed tables.
///
/// The core makes no atomicity assumptions across calls; implementations
/// only need per-call consistency.
pub trait Store: Send + Sync + 'static {
    fn get(&self, table: Table, key: &str) -> Result<Option<Value>, StoreError>;
    fn put(&self, table: Table, key: &str, value: Value) -> Result<(), StoreError>;
    fn delete(&self, table: Table, key: &str) -> Result<(), StoreError>;
    /// List all entries of a table, sorted by key.
    fn list(&self, table: Table) -> Result<Vec<(String, Value)>, StoreError>;
}
