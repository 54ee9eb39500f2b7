// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pub/sub bus for run events.
//!
//! External subscribers (renderers, transports) observe runs through
//! per-run topics; payloads are plain JSON maps, never internal struct
//! types.

mod memory;

pub use memory::MemoryBus;

use serde_json::{json, Value};
use swb_core::RunId;
use tokio::sync::mpsc;

/// Broadcast pub/sub over string topics.
pub trait Bus: Send + Sync + 'static {
    fn broadcast(&self, topic: &str, event: Value);
    /// Subscribe to a topic. Events broadcast after this call are
    /// delivered; dropping the receiver unsubscribes.
    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Value>;
}

/// Topic carrying one run's events.
pub fn run_topic(run_id: &RunId) -> String {
    format!("run:{}", run_id)
}

/// Assemble the standard bus event shape:
/// `{type, payload, meta: {run_id, session_key?, origin?}}`.
pub fn bus_event(kind: &str, payload: Value, meta: Value) -> Value {
    json!({
        "type": kind,
        "payload": payload,
        "meta": meta,
    })
}
