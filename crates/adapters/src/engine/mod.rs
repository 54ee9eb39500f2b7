// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine adapters
//!
//! This module provides the abstraction layer for pluggable AI engine
//! backends. The [`Engine`] trait encapsulates engine-specific logic:
//! starting an invocation, streaming events and deltas back to the run,
//! cancellation, optional mid-run steering, and the resume-line
//! round-trip used to continue prior conversations.

mod cli;
mod registry;

pub use cli::{CliConfig, CliEngine};
pub use registry::EngineRegistry;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod echo;
#[cfg(any(test, feature = "test-support"))]
pub use echo::{EchoCall, EchoEngine, EchoStep};

use async_trait::async_trait;
use std::path::PathBuf;
use swb_core::{EngineEvent, Job, ResumeToken, RunId, RunRef};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("start failed: {0}")]
    StartFailed(String),
    #[error("cancel failed: {0}")]
    CancelFailed(String),
    #[error("steer not supported")]
    SteerUnsupported,
    #[error("steer failed: {0}")]
    SteerFailed(String),
    #[error("run not found: {0}")]
    RunNotFound(String),
}

/// Per-invocation context handed to [`Engine::start_run`].
#[derive(Debug, Clone)]
pub struct StartCtx {
    pub run_id: RunId,
    pub cwd: Option<PathBuf>,
}

/// Messages an engine delivers to its run's sink.
#[derive(Debug)]
pub enum EngineMsg {
    Event { run_ref: RunRef, event: EngineEvent },
    Delta { run_ref: RunRef, text: String },
}

/// The run actor's address, as seen by an engine.
///
/// Sends never block; a hung-up run drops the message on the floor
/// (the run is finalizing and no longer cares).
#[derive(Clone)]
pub struct EngineSink {
    tx: mpsc::UnboundedSender<EngineMsg>,
}

impl EngineSink {
    pub fn new(tx: mpsc::UnboundedSender<EngineMsg>) -> Self {
        Self { tx }
    }

    pub fn event(&self, run_ref: &RunRef, event: EngineEvent) {
        let _ = self.tx.send(EngineMsg::Event {
            run_ref: run_ref.clone(),
            event,
        });
    }

    pub fn delta(&self, run_ref: &RunRef, text: impl Into<String>) {
        let _ = self.tx.send(EngineMsg::Delta {
            run_ref: run_ref.clone(),
            text: text.into(),
        });
    }
}

/// Pluggable engine backend.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Stable engine identifier (e.g. "lemon").
    fn id(&self) -> &str;

    /// Start one invocation for the job.
    ///
    /// The engine sends [`EngineMsg`]s carrying the returned run ref to
    /// `sink` until it emits a terminal `Completed` event. Events for a
    /// different run ref are discarded by the run.
    async fn start_run(
        &self,
        job: &Job,
        ctx: StartCtx,
        sink: EngineSink,
    ) -> Result<RunRef, EngineError>;

    /// Cancel a running invocation. Idempotent; cancelling an already
    /// finished invocation is a no-op.
    async fn cancel(&self, run_ref: &RunRef) -> Result<(), EngineError>;

    /// Whether [`Engine::steer`] is available.
    fn supports_steer(&self) -> bool {
        false
    }

    /// Inject text into a running invocation.
    async fn steer(&self, _run_ref: &RunRef, _text: &str) -> Result<(), EngineError> {
        Err(EngineError::SteerUnsupported)
    }

    /// Render a resume token as the line this engine emits for it.
    fn format_resume(&self, token: &ResumeToken) -> String;

    /// Parse a resume line previously produced by [`Engine::format_resume`].
    /// Returns `None` for lines belonging to other engines.
    fn extract_resume(&self, line: &str) -> Option<ResumeToken>;
}
