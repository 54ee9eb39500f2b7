// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory bus backend.

use super::Bus;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-process [`Bus`] delivering events over unbounded channels.
///
/// Cheap to clone; clones share the subscriber table. Subscribers that
/// dropped their receiver are pruned on the next broadcast to their
/// topic.
#[derive(Clone, Default)]
pub struct MemoryBus {
    topics: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on a topic. Test convenience.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Bus for MemoryBus {
    fn broadcast(&self, topic: &str, event: Value) {
        let mut topics = self.topics.lock();
        let Some(subs) = topics.get_mut(topic) else {
            return;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        if subs.is_empty() {
            topics.remove(topic);
        }
    }

    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
