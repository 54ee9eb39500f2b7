// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine event types and the terminal run summary.

use crate::id::{RunId, SessionKey};
use crate::job::ResumeToken;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One step of an engine's visible activity (tool call, file edit, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub kind: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Lifecycle phase of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    Started,
    Updated,
    Completed,
}

/// Terminal summary of a run.
///
/// Engines emit this with `run_id`/`session_key` unset; the run fills
/// them in (and the accumulated answer, if the engine supplied none)
/// before broadcasting and persisting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completed {
    pub engine: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKey>,
}

impl Completed {
    /// Successful completion with an answer.
    pub fn ok(engine: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            ok: true,
            answer: Some(answer.into()),
            ..Self::default()
        }
    }

    /// Failed completion with an error string.
    pub fn failure(engine: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            ok: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Plain-map rendition for bus payloads and the run store.
    pub fn as_map(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}

/// Events an engine delivers to its run's sink.
///
/// Serializes with `{"type": "engine:name", ...fields}` format, mirroring
/// the shape persisted in the run-event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "engine:started")]
    Started {
        engine: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume: Option<ResumeToken>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },

    #[serde(rename = "engine:action")]
    Action {
        engine: String,
        action: Action,
        phase: ActionPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
    },

    #[serde(rename = "engine:completed")]
    Completed(Completed),
}

impl EngineEvent {
    /// Bus event kind this engine event re-broadcasts as.
    pub fn bus_kind(&self) -> &'static str {
        match self {
            EngineEvent::Started { .. } => "engine_started",
            EngineEvent::Action { .. } => "engine_action",
            EngineEvent::Completed(_) => "engine_completed",
        }
    }

    /// Plain-map rendition; bus payloads never carry struct identities.
    pub fn as_map(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}

/// Why a run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    Interrupted,
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::UserRequested => write!(f, "user_requested"),
            CancelReason::Interrupted => write!(f, "interrupted"),
            CancelReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Error fragments that indicate the engine's context window overflowed.
/// A matching error clears the session's chat state so the next submit
/// starts fresh.
const CONTEXT_OVERFLOW_MARKERS: [&str; 4] = [
    "context_length_exceeded",
    "context length exceeded",
    "input exceeds the context window",
    "context window",
];

pub fn is_context_overflow(error: &str) -> bool {
    let lower = error.to_lowercase();
    CONTEXT_OVERFLOW_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
