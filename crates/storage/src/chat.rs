// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat-state access with lazy TTL enforcement.
//!
//! Expired entries are dropped on read; a periodic sweep cleans up
//! entries nobody reads anymore.

use crate::{Store, StoreError, Table};
use swb_core::ChatState;

/// Load the session's chat state, deleting it if expired.
pub fn load_chat_state(
    store: &dyn Store,
    session_key: &str,
    now_ms: u64,
) -> Result<Option<ChatState>, StoreError> {
    let Some(value) = store.get(Table::Chat, session_key)? else {
        return Ok(None);
    };
    let state: ChatState = serde_json::from_value(value)?;
    if state.is_expired(now_ms) {
        store.delete(Table::Chat, session_key)?;
        return Ok(None);
    }
    Ok(Some(state))
}

pub fn save_chat_state(
    store: &dyn Store,
    session_key: &str,
    state: &ChatState,
) -> Result<(), StoreError> {
    store.put(Table::Chat, session_key, serde_json::to_value(state)?)
}

pub fn clear_chat_state(store: &dyn Store, session_key: &str) -> Result<(), StoreError> {
    store.delete(Table::Chat, session_key)
}

/// Delete all expired chat entries. Returns the number removed.
pub fn sweep_chat(store: &dyn Store, now_ms: u64) -> Result<usize, StoreError> {
    let mut removed = 0;
    for (key, value) in store.list(Table::Chat)? {
        let expired = serde_json::from_value::<ChatState>(value)
            .map(|s| s.is_expired(now_ms))
            // Unreadable entries are dead weight; sweep them too.
            .unwrap_or(true);
        if expired {
            store.delete(Table::Chat, &key)?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::debug!(removed, "swept expired chat state");
    }
    Ok(removed)
}

#[cfg(test)]
#[path = "chat_tests.rs"]
mod tests;
