// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One run: a single execution of a job against an engine.
//!
//! Lifecycle: lock acquire → engine start → event loop → finalize.
//! Every failure mode becomes a terminal Completed; nothing escapes the
//! run boundary. Finalize happens exactly once by construction (every
//! path funnels through it).

use crate::lock::LockGrant;
use crate::scheduler::{SchedMsg, SlotId};
use crate::worker::WorkerMsg;
use crate::Shared;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swb_adapters::{bus_event, run_topic, Engine, EngineMsg, EngineSink, StartCtx};
use swb_core::{
    is_context_overflow, CancelReason, ChatState, Completed, EngineEvent, Job, ResumeToken, RunId,
    RunRef,
};
use swb_storage as storage;
use tokio::sync::mpsc;

pub(crate) enum RunMsg {
    Cancel {
        reason: CancelReason,
    },
    Steer {
        job_run_id: RunId,
        text: String,
        backlog: bool,
    },
}

/// What the event loop hands to finalize.
struct RunOutcome {
    completed: Completed,
    grant: Option<LockGrant>,
    /// Resolved engine id, when resolution got that far. Gates the
    /// chat-state update.
    engine_id: Option<String>,
    answer: String,
    last_resume: Option<ResumeToken>,
}

pub(crate) struct Run {
    shared: Arc<Shared>,
    job: Job,
    slot: SlotId,
    worker_tx: mpsc::UnboundedSender<WorkerMsg>,
    self_tx: mpsc::UnboundedSender<RunMsg>,
    rx: mpsc::UnboundedReceiver<RunMsg>,
}

impl Run {
    pub fn new(
        shared: Arc<Shared>,
        job: Job,
        slot: SlotId,
        worker_tx: mpsc::UnboundedSender<WorkerMsg>,
        self_tx: mpsc::UnboundedSender<RunMsg>,
        rx: mpsc::UnboundedReceiver<RunMsg>,
    ) -> Self {
        Self {
            shared,
            job,
            slot,
            worker_tx,
            self_tx,
            rx,
        }
    }

    /// The key this run serializes under: the resume value when present,
    /// else the session key, else a global fallback.
    fn lock_key(&self) -> String {
        if let Some(resume) = &self.job.resume {
            return resume.value.clone();
        }
        if !self.job.session_key.is_empty() {
            return self.job.session_key.to_string();
        }
        "global".to_string()
    }

    /// Engine id to report in failures that happen before resolution.
    fn requested_engine_id(&self) -> String {
        self.job
            .engine_id
            .clone()
            .or_else(|| self.job.resume.as_ref().map(|r| r.engine.clone()))
            .unwrap_or_else(|| self.shared.config.default_engine.clone())
    }

    fn bus_meta(&self) -> serde_json::Value {
        let mut meta = json!({
            "run_id": self.job.run_id,
            "session_key": self.job.session_key,
        });
        if let Some(origin) = self.job.meta.str_value(swb_core::meta_keys::ORIGIN) {
            meta["origin"] = json!(origin);
        }
        meta
    }

    fn broadcast(&self, kind: &str, payload: serde_json::Value) {
        self.shared.bus.broadcast(
            &run_topic(&self.job.run_id),
            bus_event(kind, payload, self.bus_meta()),
        );
    }

    pub async fn execute(mut self) {
        let started_at = Instant::now();
        let started_ms = self.shared.clock.epoch_ms();

        if self.job.run_id.is_empty() {
            self.job.run_id = RunId::generate();
        }
        let run_id = self.job.run_id.clone();
        self.shared
            .registry
            .register(run_id.clone(), self.self_tx.clone());
        let progress = self.register_progress();

        let outcome = self.drive(started_at).await;
        self.finalize(outcome, started_at, started_ms, progress);
    }

    /// Record the progress-message → run mapping when the caller asked
    /// for one. Cancel-by-progress only works for jobs that did.
    fn register_progress(&self) -> Option<(String, String)> {
        let meta = &self.job.meta;
        let msg_id = meta
            .str_value(swb_core::meta_keys::PROGRESS_MSG_ID)
            .or_else(|| meta.str_value(swb_core::meta_keys::STATUS_MSG_ID))?;
        let scope = meta
            .str_value(swb_core::meta_keys::ORIGIN)
            .unwrap_or_default();
        if let Err(e) = storage::put_progress(
            self.shared.store.as_ref(),
            scope,
            msg_id,
            &self.job.run_id,
        ) {
            tracing::warn!(error = %e, "failed to record progress mapping");
            return None;
        }
        Some((scope.to_string(), msg_id.to_string()))
    }

    async fn drive(&mut self, started_at: Instant) -> RunOutcome {
        let mut outcome = RunOutcome {
            completed: Completed::failure(self.requested_engine_id(), "not started"),
            grant: None,
            engine_id: None,
            answer: String::new(),
            last_resume: self.job.resume.clone(),
        };

        // Lock acquire. Cancels arriving while we wait still win; steers
        // are rejected because no engine is up yet.
        if self.shared.config.require_engine_lock {
            let timeout = Duration::from_millis(self.shared.config.engine_lock_timeout_ms);
            match self.acquire_lock(timeout).await {
                LockWait::Granted(grant) => outcome.grant = Some(grant),
                LockWait::Timeout => {
                    tracing::warn!(run_id = %self.job.run_id, key = %self.lock_key(), "engine lock timeout");
                    outcome.completed =
                        Completed::failure(self.requested_engine_id(), "lock_timeout");
                    return outcome;
                }
                LockWait::Cancelled(reason) => {
                    outcome.completed =
                        Completed::failure(self.requested_engine_id(), reason.to_string());
                    return outcome;
                }
            }
        }

        // Engine resolve.
        let engine = match self
            .shared
            .engines
            .resolve(&self.job, &self.shared.config.default_engine)
        {
            Ok(engine) => engine,
            Err(requested) => {
                outcome.completed = Completed::failure(
                    requested.clone(),
                    format!("unknown engine id: {}", requested),
                );
                return outcome;
            }
        };
        outcome.engine_id = Some(engine.id().to_string());

        self.broadcast(
            "run_started",
            json!({
                "run_id": self.job.run_id,
                "session_key": self.job.session_key,
                "engine": engine.id(),
            }),
        );
        tracing::info!(
            run_id = %self.job.run_id,
            session_key = %self.job.session_key,
            engine = engine.id(),
            "run_start"
        );

        let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();
        let sink = EngineSink::new(engine_tx);
        let ctx = StartCtx {
            run_id: self.job.run_id.clone(),
            cwd: self.job.cwd.clone(),
        };
        let engine_ref = match engine.start_run(&self.job, ctx, sink).await {
            Ok(engine_ref) => engine_ref,
            Err(e) => {
                outcome.completed = Completed::failure(engine.id(), e.to_string());
                return outcome;
            }
        };

        outcome.completed = self
            .event_loop(
                engine.as_ref(),
                &engine_ref,
                &mut engine_rx,
                started_at,
                &mut outcome.answer,
                &mut outcome.last_resume,
            )
            .await;
        outcome
    }

    async fn event_loop(
        &mut self,
        engine: &dyn Engine,
        engine_ref: &RunRef,
        engine_rx: &mut mpsc::UnboundedReceiver<EngineMsg>,
        started_at: Instant,
        answer: &mut String,
        last_resume: &mut Option<ResumeToken>,
    ) -> Completed {
        enum Input {
            Engine(Option<EngineMsg>),
            Control(Option<RunMsg>),
        }

        let mut seq: u64 = 0;
        loop {
            let input = tokio::select! {
                msg = engine_rx.recv() => Input::Engine(msg),
                msg = self.rx.recv() => Input::Control(msg),
            };
            match input {
                Input::Engine(Some(EngineMsg::Event { run_ref, event }))
                    if &run_ref == engine_ref =>
                {
                    if let Some(completed) = self.handle_engine_event(event, last_resume) {
                        return completed;
                    }
                }
                Input::Engine(Some(EngineMsg::Delta { run_ref, text }))
                    if &run_ref == engine_ref =>
                {
                    seq += 1;
                    if seq == 1 {
                        let latency_ms = started_at.elapsed().as_millis() as u64;
                        tracing::info!(run_id = %self.job.run_id, latency_ms, "first_token");
                    }
                    self.broadcast(
                        "delta",
                        json!({
                            "run_id": self.job.run_id,
                            "seq": seq,
                            "ts_ms": self.shared.clock.epoch_ms(),
                            "text": text,
                            "session_key": self.job.session_key,
                        }),
                    );
                    answer.push_str(&text);
                }
                // Stale refs from an earlier invocation are dropped.
                Input::Engine(Some(_)) => {}
                Input::Engine(None) => {
                    return Completed::failure(engine.id(), "engine stream ended unexpectedly");
                }
                Input::Control(Some(RunMsg::Cancel { reason })) => {
                    tracing::warn!(run_id = %self.job.run_id, reason = %reason, "run cancelled");
                    if let Err(e) = engine.cancel(engine_ref).await {
                        tracing::warn!(run_id = %self.job.run_id, error = %e, "engine cancel failed");
                    }
                    return Completed {
                        engine: engine.id().to_string(),
                        ok: false,
                        error: Some(reason.to_string()),
                        resume: last_resume.clone(),
                        ..Completed::default()
                    };
                }
                Input::Control(Some(RunMsg::Steer {
                    job_run_id,
                    text,
                    backlog,
                })) => {
                    self.handle_steer(engine, engine_ref, job_run_id, &text, backlog)
                        .await;
                }
                // The registry and worker both hold senders, so the
                // channel outlives the loop; closure means shutdown.
                Input::Control(None) => {
                    return Completed::failure(engine.id(), "run mailbox closed");
                }
            }
        }
    }

    /// Persist and re-broadcast one engine event. Returns the terminal
    /// Completed when the event is one.
    fn handle_engine_event(
        &self,
        event: EngineEvent,
        last_resume: &mut Option<ResumeToken>,
    ) -> Option<Completed> {
        if let Err(e) = storage::record_run_event(
            self.shared.store.as_ref(),
            &self.job.run_id,
            event.as_map(),
        ) {
            tracing::warn!(run_id = %self.job.run_id, error = %e, "failed to record run event");
        }
        if let EngineEvent::Started {
            resume: Some(resume),
            ..
        } = &event
        {
            *last_resume = Some(resume.clone());
        }
        self.broadcast(event.bus_kind(), event.as_map());
        match event {
            EngineEvent::Completed(completed) => Some(completed),
            _ => None,
        }
    }

    async fn handle_steer(
        &self,
        engine: &dyn Engine,
        engine_ref: &RunRef,
        job_run_id: RunId,
        text: &str,
        backlog: bool,
    ) {
        let accepted = if engine.supports_steer() {
            match engine.steer(engine_ref, text).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(run_id = %self.job.run_id, error = %e, "steer failed");
                    false
                }
            }
        } else {
            false
        };
        let reply = if accepted {
            WorkerMsg::SteerAccepted {
                run_id: self.job.run_id.clone(),
                job_run_id,
            }
        } else {
            if backlog {
                tracing::debug!(run_id = %self.job.run_id, "steer_backlog_rejected");
            } else {
                tracing::debug!(run_id = %self.job.run_id, "steer_rejected");
            }
            WorkerMsg::SteerRejected {
                run_id: self.job.run_id.clone(),
                job_run_id,
            }
        };
        let _ = self.worker_tx.send(reply);
    }

    /// Wait for the engine lock while staying responsive to cancel and
    /// steer messages.
    async fn acquire_lock(&mut self, timeout: Duration) -> LockWait {
        enum Input {
            Grant(Result<LockGrant, tokio::sync::oneshot::error::RecvError>),
            Deadline,
            Control(Option<RunMsg>),
        }

        let key = self.lock_key();
        let (waiter_id, mut grant_rx) = self.shared.lock.request(&key);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let input = tokio::select! {
                result = &mut grant_rx => Input::Grant(result),
                _ = tokio::time::sleep_until(deadline) => Input::Deadline,
                msg = self.rx.recv() => Input::Control(msg),
            };
            match input {
                Input::Grant(Ok(grant)) => return LockWait::Granted(grant),
                // Lock actor gone; treat like a timeout.
                Input::Grant(Err(_)) => return LockWait::Timeout,
                Input::Deadline => {
                    self.shared.lock.cancel_wait(&key, waiter_id);
                    // The grant may have raced the deadline; use it if so.
                    return match grant_rx.try_recv() {
                        Ok(grant) => LockWait::Granted(grant),
                        Err(_) => LockWait::Timeout,
                    };
                }
                Input::Control(Some(RunMsg::Cancel { reason })) => {
                    self.shared.lock.cancel_wait(&key, waiter_id);
                    return LockWait::Cancelled(reason);
                }
                Input::Control(Some(RunMsg::Steer { job_run_id, .. })) => {
                    // No engine up yet; reject so the worker reroutes.
                    let _ = self.worker_tx.send(WorkerMsg::SteerRejected {
                        run_id: self.job.run_id.clone(),
                        job_run_id,
                    });
                }
                Input::Control(None) => {
                    self.shared.lock.cancel_wait(&key, waiter_id);
                    return LockWait::Cancelled(CancelReason::Shutdown);
                }
            }
        }
    }

    /// Terminal step, exactly once per run: release the lock, broadcast
    /// and persist the completion, release the slot, notify the worker
    /// and caller, update chat state, and unregister.
    fn finalize(
        self,
        outcome: RunOutcome,
        started_at: Instant,
        started_ms: u64,
        progress: Option<(String, String)>,
    ) {
        let RunOutcome {
            mut completed,
            grant,
            engine_id,
            answer,
            last_resume,
        } = outcome;

        completed.run_id = Some(self.job.run_id.clone());
        completed.session_key = Some(self.job.session_key.clone());
        if completed.answer.is_none() && !answer.is_empty() {
            completed.answer = Some(answer);
        }
        if completed.resume.is_none() {
            completed.resume = last_resume;
        }

        if let Some(grant) = grant {
            grant.release();
        }

        let duration_ms = started_at.elapsed().as_millis() as u64;
        self.broadcast(
            "run_completed",
            json!({
                "completed": completed.as_map(),
                "duration_ms": duration_ms,
            }),
        );
        tracing::info!(
            run_id = %self.job.run_id,
            ok = completed.ok,
            duration_ms,
            "run_stop"
        );

        let store = self.shared.store.as_ref();
        if let Err(e) = storage::put_run_summary(store, &self.job.run_id, completed.as_map()) {
            tracing::warn!(run_id = %self.job.run_id, error = %e, "failed to persist run summary");
        }
        if let Err(e) = storage::store_run_history(
            store,
            &self.job.session_key,
            started_ms,
            &self.job.run_id,
            completed.as_map(),
        ) {
            tracing::warn!(run_id = %self.job.run_id, error = %e, "failed to persist run history");
        }

        let _ = self
            .shared
            .sched_tx
            .send(SchedMsg::ReleaseSlot { slot: self.slot });
        let _ = self.worker_tx.send(WorkerMsg::RunComplete {
            run_id: self.job.run_id.clone(),
            ok: completed.ok,
        });
        if let Some(notify) = &self.job.notify {
            notify.send(completed.clone());
        }

        self.update_chat_state(&completed, engine_id);

        self.shared.registry.unregister(&self.job.run_id);
        if let Some((scope, msg_id)) = progress {
            let _ = storage::delete_progress(store, &scope, &msg_id);
        }
    }

    /// Store continuation state for the session, or clear it on context
    /// overflow so the next submit starts fresh.
    fn update_chat_state(&self, completed: &Completed, engine_id: Option<String>) {
        if self.job.session_key.is_empty() {
            return;
        }
        let Some(engine_id) = engine_id else {
            return;
        };
        let store = self.shared.store.as_ref();
        let overflow = completed
            .error
            .as_deref()
            .is_some_and(is_context_overflow);
        if overflow {
            tracing::warn!(
                session_key = %self.job.session_key,
                "context overflow, clearing chat state"
            );
            let _ = storage::clear_chat_state(store, self.job.session_key.as_str());
            return;
        }
        let state = ChatState {
            last_engine: engine_id,
            last_resume: completed.resume.clone(),
            expires_at_ms: self.shared.clock.epoch_ms() + self.shared.config.chat_state_ttl_ms,
        };
        if let Err(e) = storage::save_chat_state(store, self.job.session_key.as_str(), &state) {
            tracing::warn!(session_key = %self.job.session_key, error = %e, "failed to save chat state");
        }
    }
}

enum LockWait {
    Granted(LockGrant),
    Timeout,
    Cancelled(CancelReason),
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
