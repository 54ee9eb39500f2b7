// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job descriptor and session state.

use crate::event::Completed;
use crate::id::{RunId, SessionKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Well-known keys recognized inside [`JobMeta`]. Everything else in the
/// meta map is opaque and carried through untouched.
pub mod meta_keys {
    /// Suppresses auto-resume for this submit.
    pub const DISABLE_AUTO_RESUME: &str = "disable_auto_resume";
    /// Marks a followup produced by a finished subtask; promoted to
    /// `steer_backlog` while a run is active.
    pub const TASK_AUTO_FOLLOWUP: &str = "task_auto_followup";
    /// Marks a followup produced by a delegated run; promoted like
    /// [`TASK_AUTO_FOLLOWUP`].
    pub const DELEGATED_AUTO_FOLLOWUP: &str = "delegated_auto_followup";
    /// Transport message id; the newest one wins when jobs merge.
    pub const MESSAGE_ID: &str = "message_id";
    /// Progress indicator message id; enables cancel-by-progress.
    pub const PROGRESS_MSG_ID: &str = "progress_msg_id";
    /// Status message id; also enables cancel-by-progress.
    pub const STATUS_MSG_ID: &str = "status_msg_id";
    /// Origin tag (transport/channel scope).
    pub const ORIGIN: &str = "origin";
}

/// How a job interacts with the session's queue and any in-flight run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Enqueue at tail; leading collects are coalesced at dispatch.
    Collect,
    /// Enqueue at tail, merging into a recent tail followup within the
    /// debounce window.
    Followup,
    /// Inject into the in-flight run; falls back to `followup`.
    Steer,
    /// Inject into the in-flight run; falls back to `collect`.
    SteerBacklog,
    /// Cancel the in-flight run and jump to the head of the queue.
    Interrupt,
}

impl Default for QueueMode {
    fn default() -> Self {
        QueueMode::Collect
    }
}

impl fmt::Display for QueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueMode::Collect => write!(f, "collect"),
            QueueMode::Followup => write!(f, "followup"),
            QueueMode::Steer => write!(f, "steer"),
            QueueMode::SteerBacklog => write!(f, "steer_backlog"),
            QueueMode::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Advisory origin lane, carried through to the engine untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Chat,
    Subagent,
    Cron,
}

/// Hint that a prior run may be continued by the same engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub engine: String,
    pub value: String,
}

impl ResumeToken {
    pub fn new(engine: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            value: value.into(),
        }
    }
}

/// Opaque caller metadata with typed accessors for the well-known keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobMeta(pub HashMap<String, Value>);

impl JobMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// True when the key holds boolean `true` or the string `"true"`.
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Adopt message-id metadata from a newer job's meta. Used when
    /// followup/collect jobs merge: the merged job keeps the first job's
    /// identity but reports against the newest transport message.
    pub fn adopt_message_ids(&mut self, newer: &JobMeta) {
        for key in [
            meta_keys::MESSAGE_ID,
            meta_keys::PROGRESS_MSG_ID,
            meta_keys::STATUS_MSG_ID,
        ] {
            if let Some(v) = newer.get(key) {
                self.0.insert(key.to_string(), v.clone());
            }
        }
    }
}

/// Caller notification address: receives the terminal [`Completed`] of
/// the run. The send never blocks and ignores a hung-up receiver.
#[derive(Clone)]
pub struct NotifySender(std::sync::mpsc::Sender<Completed>);

impl NotifySender {
    pub fn new(tx: std::sync::mpsc::Sender<Completed>) -> Self {
        Self(tx)
    }

    pub fn send(&self, completed: Completed) {
        let _ = self.0.send(completed);
    }
}

impl fmt::Debug for NotifySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NotifySender(..)")
    }
}

/// A prompt-carrying request to execute an engine run.
///
/// Immutable from the caller's point of view; the scheduler may fill in
/// `resume`/`engine_id` via auto-resume, and the worker may merge prompts
/// of coalescible jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub run_id: RunId,
    pub session_key: SessionKey,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeToken>,
    #[serde(default)]
    pub queue_mode: QueueMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<Lane>,
    /// Opaque tool policy, carried through to the engine.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tool_policy: HashMap<String, Value>,
    #[serde(default)]
    pub meta: JobMeta,
    /// Caller notification address; not serialized.
    #[serde(skip)]
    pub notify: Option<NotifySender>,
}

impl Job {
    /// Create a job with a freshly generated run id.
    pub fn new(session_key: impl Into<SessionKey>, prompt: impl Into<String>) -> Self {
        Self {
            run_id: RunId::generate(),
            session_key: session_key.into(),
            prompt: prompt.into(),
            engine_id: None,
            cwd: None,
            resume: None,
            queue_mode: QueueMode::Collect,
            lane: None,
            tool_policy: HashMap::new(),
            meta: JobMeta::new(),
            notify: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_engine(mut self, engine_id: impl Into<String>) -> Self {
        self.engine_id = Some(engine_id.into());
        self
    }

    pub fn with_mode(mut self, mode: QueueMode) -> Self {
        self.queue_mode = mode;
        self
    }

    pub fn with_resume(mut self, token: ResumeToken) -> Self {
        self.resume = Some(token);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key, value);
        self
    }

    pub fn with_notify(mut self, notify: NotifySender) -> Self {
        self.notify = Some(notify);
        self
    }

    /// True when this followup was produced by a finished subtask and
    /// should be promoted to `steer_backlog` while a run is active.
    pub fn is_auto_followup(&self) -> bool {
        self.meta.flag(meta_keys::TASK_AUTO_FOLLOWUP)
            || self.meta.flag(meta_keys::DELEGATED_AUTO_FOLLOWUP)
    }
}

/// Per-session continuation state, TTL'd in the chat table.
///
/// Consumed on submit to auto-populate `resume` when the caller didn't
/// supply one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub last_engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resume: Option<ResumeToken>,
    pub expires_at_ms: u64,
}

impl ChatState {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
