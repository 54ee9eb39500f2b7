// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::MemStore;
use serde_json::json;
use swb_core::ResumeToken;

fn state(expires_at_ms: u64) -> ChatState {
    ChatState {
        last_engine: "echo".into(),
        last_resume: Some(ResumeToken::new("echo", "tok-1")),
        expires_at_ms,
    }
}

#[test]
fn save_and_load_before_expiry() {
    let store = MemStore::new();
    save_chat_state(&store, "s1", &state(10_000)).unwrap();

    let loaded = load_chat_state(&store, "s1", 9_999).unwrap();
    assert_eq!(loaded, Some(state(10_000)));
}

#[test]
fn expired_entry_is_dropped_on_read() {
    let store = MemStore::new();
    save_chat_state(&store, "s1", &state(10_000)).unwrap();

    assert_eq!(load_chat_state(&store, "s1", 10_000).unwrap(), None);
    // Lazy delete actually removed the row
    assert!(store.is_empty(Table::Chat));
}

#[test]
fn missing_session_loads_none() {
    let store = MemStore::new();
    assert_eq!(load_chat_state(&store, "absent", 0).unwrap(), None);
}

#[test]
fn clear_removes_entry() {
    let store = MemStore::new();
    save_chat_state(&store, "s1", &state(10_000)).unwrap();
    clear_chat_state(&store, "s1").unwrap();
    assert_eq!(load_chat_state(&store, "s1", 0).unwrap(), None);
}

#[test]
fn sweep_removes_only_expired_entries() {
    let store = MemStore::new();
    save_chat_state(&store, "old", &state(1_000)).unwrap();
    save_chat_state(&store, "fresh", &state(100_000)).unwrap();

    let removed = sweep_chat(&store, 50_000).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(load_chat_state(&store, "old", 50_000).unwrap(), None);
    assert!(load_chat_state(&store, "fresh", 50_000).unwrap().is_some());
}

#[test]
fn sweep_drops_unreadable_entries() {
    let store = MemStore::new();
    store.put(Table::Chat, "junk", json!("not a chat state")).unwrap();

    let removed = sweep_chat(&store, 0).unwrap();
    assert_eq!(removed, 1);
    assert!(store.is_empty(Table::Chat));
}
