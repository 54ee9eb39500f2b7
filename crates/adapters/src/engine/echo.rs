// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process echo engine for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{Engine, EngineError, EngineSink, StartCtx};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swb_core::{
    Action, ActionPhase, Completed, EngineEvent, Job, ResumeToken, RunId, RunRef, SessionKey,
};
use tokio::sync::watch;

/// One scripted emission of the echo engine.
#[derive(Debug, Clone)]
pub enum EchoStep {
    Started { resume: Option<ResumeToken> },
    Delta(String),
    Action { kind: String, title: String },
    /// Pause between emissions, in milliseconds.
    Sleep(u64),
    Completed {
        ok: bool,
        answer: Option<String>,
        error: Option<String>,
        resume: Option<ResumeToken>,
    },
}

impl EchoStep {
    /// Plain successful completion; the run fills in the accumulated
    /// answer.
    pub fn completed_ok() -> Self {
        EchoStep::Completed {
            ok: true,
            answer: None,
            error: None,
            resume: None,
        }
    }

    pub fn completed_err(error: impl Into<String>) -> Self {
        EchoStep::Completed {
            ok: false,
            answer: None,
            error: Some(error.into()),
            resume: None,
        }
    }
}

/// Recorded call to EchoEngine
#[derive(Debug, Clone)]
pub enum EchoCall {
    Start {
        run_id: RunId,
        session_key: SessionKey,
        prompt: String,
        resume: Option<ResumeToken>,
        at: Instant,
    },
    Cancel {
        run_ref: RunRef,
        at: Instant,
    },
    Steer {
        run_ref: RunRef,
        text: String,
        at: Instant,
    },
}

struct EchoInner {
    default_script: Option<Vec<EchoStep>>,
    session_scripts: HashMap<String, Vec<EchoStep>>,
    supports_steer: bool,
    start_error: Option<String>,
    steer_error: Option<String>,
    calls: Vec<EchoCall>,
    cancelled: HashMap<RunRef, watch::Sender<bool>>,
}

/// Scriptable in-process engine for tests.
///
/// Allows programmatic control over emitted events and records all calls.
#[derive(Clone)]
pub struct EchoEngine {
    id: String,
    inner: Arc<Mutex<EchoInner>>,
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::with_id("echo")
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Arc::new(Mutex::new(EchoInner {
                default_script: None,
                session_scripts: HashMap::new(),
                supports_steer: true,
                start_error: None,
                steer_error: None,
                calls: Vec::new(),
                cancelled: HashMap::new(),
            })),
        }
    }

    /// Script used for sessions without a per-session script. Without
    /// any script, a run emits Started, one delta echoing the prompt,
    /// and a successful Completed.
    pub fn set_default_script(&self, steps: Vec<EchoStep>) {
        self.inner.lock().default_script = Some(steps);
    }

    /// Script used for runs of one specific session.
    pub fn set_session_script(&self, session_key: impl Into<String>, steps: Vec<EchoStep>) {
        self.inner
            .lock()
            .session_scripts
            .insert(session_key.into(), steps);
    }

    pub fn set_supports_steer(&self, supported: bool) {
        self.inner.lock().supports_steer = supported;
    }

    /// Fail the next start_run with this error.
    pub fn set_start_error(&self, error: impl Into<String>) {
        self.inner.lock().start_error = Some(error.into());
    }

    /// Fail the next steer with this error.
    pub fn set_steer_error(&self, error: impl Into<String>) {
        self.inner.lock().steer_error = Some(error.into());
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<EchoCall> {
        self.inner.lock().calls.clone()
    }

    /// Recorded start calls, in order.
    pub fn starts(&self) -> Vec<(RunId, SessionKey, String, Instant)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EchoCall::Start {
                    run_id,
                    session_key,
                    prompt,
                    at,
                    ..
                } => Some((run_id, session_key, prompt, at)),
                _ => None,
            })
            .collect()
    }

    /// Resume tokens the recorded start calls carried, in order.
    pub fn start_resumes(&self) -> Vec<Option<ResumeToken>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EchoCall::Start { resume, .. } => Some(resume),
                _ => None,
            })
            .collect()
    }

    /// Recorded steer texts, in order.
    pub fn steer_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EchoCall::Steer { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn cancel_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EchoCall::Cancel { .. }))
            .count()
    }

    fn script_for(&self, job: &Job) -> Vec<EchoStep> {
        let inner = self.inner.lock();
        inner
            .session_scripts
            .get(job.session_key.as_str())
            .or(inner.default_script.as_ref())
            .cloned()
            .unwrap_or_else(|| {
                vec![
                    EchoStep::Started { resume: None },
                    EchoStep::Delta(job.prompt.clone()),
                    EchoStep::completed_ok(),
                ]
            })
    }
}

#[async_trait]
impl Engine for EchoEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_run(
        &self,
        job: &Job,
        ctx: StartCtx,
        sink: EngineSink,
    ) -> Result<RunRef, EngineError> {
        let script = self.script_for(job);
        let run_ref = RunRef::generate();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        {
            let mut inner = self.inner.lock();
            inner.calls.push(EchoCall::Start {
                run_id: ctx.run_id.clone(),
                session_key: job.session_key.clone(),
                prompt: job.prompt.clone(),
                resume: job.resume.clone(),
                at: Instant::now(),
            });
            if let Some(error) = inner.start_error.take() {
                return Err(EngineError::StartFailed(error));
            }
            inner.cancelled.insert(run_ref.clone(), cancel_tx);
        }

        let engine_id = self.id.clone();
        let emit_ref = run_ref.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut action_seq = 0u32;
            for step in script {
                if *cancel_rx.borrow() {
                    break;
                }
                match step {
                    EchoStep::Started { resume } => sink.event(
                        &emit_ref,
                        EngineEvent::Started {
                            engine: engine_id.clone(),
                            resume,
                            title: None,
                            meta: None,
                        },
                    ),
                    EchoStep::Delta(text) => sink.delta(&emit_ref, text),
                    EchoStep::Action { kind, title } => {
                        action_seq += 1;
                        sink.event(
                            &emit_ref,
                            EngineEvent::Action {
                                engine: engine_id.clone(),
                                action: Action {
                                    id: format!("a{}", action_seq),
                                    kind,
                                    title,
                                    detail: None,
                                },
                                phase: ActionPhase::Completed,
                                ok: Some(true),
                                message: None,
                                level: None,
                            },
                        );
                    }
                    EchoStep::Sleep(ms) => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                            _ = cancel_rx.changed() => break,
                        }
                    }
                    EchoStep::Completed {
                        ok,
                        answer,
                        error,
                        resume,
                    } => {
                        sink.event(
                            &emit_ref,
                            EngineEvent::Completed(Completed {
                                engine: engine_id.clone(),
                                ok,
                                answer,
                                error,
                                resume,
                                ..Completed::default()
                            }),
                        );
                        break;
                    }
                }
            }
            inner.lock().cancelled.remove(&emit_ref);
        });

        Ok(run_ref)
    }

    async fn cancel(&self, run_ref: &RunRef) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EchoCall::Cancel {
            run_ref: run_ref.clone(),
            at: Instant::now(),
        });
        if let Some(cancel_tx) = inner.cancelled.get(run_ref) {
            let _ = cancel_tx.send(true);
        }
        Ok(())
    }

    fn supports_steer(&self) -> bool {
        self.inner.lock().supports_steer
    }

    async fn steer(&self, run_ref: &RunRef, text: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EchoCall::Steer {
            run_ref: run_ref.clone(),
            text: text.to_string(),
            at: Instant::now(),
        });
        if let Some(error) = inner.steer_error.take() {
            return Err(EngineError::SteerFailed(error));
        }
        if !inner.supports_steer {
            return Err(EngineError::SteerUnsupported);
        }
        Ok(())
    }

    fn format_resume(&self, token: &ResumeToken) -> String {
        format!("resume:{}:{}", token.engine, token.value)
    }

    fn extract_resume(&self, line: &str) -> Option<ResumeToken> {
        let rest = line.strip_prefix("resume:")?;
        let (engine, value) = rest.split_once(':')?;
        if engine != self.id {
            return None;
        }
        Some(ResumeToken::new(engine, value))
    }
}

#[cfg(test)]
#[path = "echo_tests.rs"]
mod tests;
