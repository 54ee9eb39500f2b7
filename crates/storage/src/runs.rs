// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run-event records, run history, and the progress mapping.

use crate::{Store, StoreError, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swb_core::{RunId, SessionKey};

/// Accumulated record of one run: the engine events in arrival order and
/// the terminal summary. Events always precede the summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

/// Append one engine event to the run's record.
pub fn record_run_event(
    store: &dyn Store,
    run_id: &RunId,
    event: Value,
) -> Result<(), StoreError> {
    let mut record = load_record(store, run_id)?;
    record.events.push(event);
    store.put(Table::Runs, run_id.as_str(), serde_json::to_value(&record)?)
}

/// Set the run's terminal summary. Exactly one summary is kept per run;
/// a second write is ignored with a warning.
pub fn put_run_summary(
    store: &dyn Store,
    run_id: &RunId,
    summary: Value,
) -> Result<bool, StoreError> {
    let mut record = load_record(store, run_id)?;
    if record.summary.is_some() {
        tracing::warn!(run_id = %run_id, "run already has a summary, keeping the first");
        return Ok(false);
    }
    record.summary = Some(summary);
    store.put(Table::Runs, run_id.as_str(), serde_json::to_value(&record)?)?;
    Ok(true)
}

/// Load a run's record, if any.
pub fn run_record(store: &dyn Store, run_id: &RunId) -> Result<Option<RunRecord>, StoreError> {
    match store.get(Table::Runs, run_id.as_str())? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

fn load_record(store: &dyn Store, run_id: &RunId) -> Result<RunRecord, StoreError> {
    Ok(run_record(store, run_id)?.unwrap_or_default())
}

/// History keys sort chronologically within a session prefix.
fn history_key(session_key: &SessionKey, ts_ms: u64, run_id: &RunId) -> String {
    format!("{}/{:020}/{}", session_key, ts_ms, run_id)
}

/// Record a terminal summary in the per-session history.
pub fn store_run_history(
    store: &dyn Store,
    session_key: &SessionKey,
    ts_ms: u64,
    run_id: &RunId,
    summary: Value,
) -> Result<(), StoreError> {
    store.put(
        Table::RunHistory,
        &history_key(session_key, ts_ms, run_id),
        summary,
    )
}

/// All history entries for a session, oldest first.
pub fn run_history_for_session(
    store: &dyn Store,
    session_key: &SessionKey,
) -> Result<Vec<Value>, StoreError> {
    let prefix = format!("{}/", session_key);
    Ok(store
        .list(Table::RunHistory)?
        .into_iter()
        .filter(|(k, _)| k.starts_with(&prefix))
        .map(|(_, v)| v)
        .collect())
}

fn progress_key(scope: &str, msg_id: &str) -> String {
    format!("{}/{}", scope, msg_id)
}

/// Map a progress/status message to its run for cancel-by-progress.
pub fn put_progress(
    store: &dyn Store,
    scope: &str,
    msg_id: &str,
    run_id: &RunId,
) -> Result<(), StoreError> {
    store.put(
        Table::Progress,
        &progress_key(scope, msg_id),
        Value::String(run_id.to_string()),
    )
}

pub fn load_progress(
    store: &dyn Store,
    scope: &str,
    msg_id: &str,
) -> Result<Option<RunId>, StoreError> {
    Ok(store
        .get(Table::Progress, &progress_key(scope, msg_id))?
        .and_then(|v| v.as_str().map(RunId::from)))
}

pub fn delete_progress(store: &dyn Store, scope: &str, msg_id: &str) -> Result<(), StoreError> {
    store.delete(Table::Progress, &progress_key(scope, msg_id))
}

/// Record last activity for a session.
pub fn touch_session(
    store: &dyn Store,
    session_key: &SessionKey,
    now_ms: u64,
) -> Result<(), StoreError> {
    store.put(
        Table::SessionsIndex,
        session_key.as_str(),
        serde_json::json!({ "last_activity_ms": now_ms }),
    )
}

#[cfg(test)]
#[path = "runs_tests.rs"]
mod tests;
