// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! swb-runtime: the session-scoped scheduler and run executor.
//!
//! Guarantees: at most one in-flight run per session, a global cap on
//! concurrent runs, and non-destructive handling of messages that arrive
//! while a run is active (coalesce, merge, steer, or interrupt, per
//! caller choice). Each of the scheduler, the engine lock, every session
//! worker, and every run is a single tokio task draining a serialized
//! mailbox.

mod lock;
mod queue;
mod registry;
mod run;
mod scheduler;
mod worker;

#[cfg(test)]
mod test_helpers;

use lock::EngineLockHandle;
use registry::RunRegistry;
use scheduler::{SchedMsg, Scheduler};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use swb_adapters::{Bus, EngineRegistry};
use swb_core::{CancelReason, Clock, ConfigError, Job, RunId, SwitchboardConfig, SystemClock};
use swb_storage::{load_progress, sweep_chat, Store};
use tokio::sync::mpsc;

const CHAT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Dependencies and configuration shared by every actor.
pub(crate) struct Shared {
    pub config: SwitchboardConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn Bus>,
    pub engines: Arc<EngineRegistry>,
    pub lock: EngineLockHandle,
    pub registry: RunRegistry,
    pub sched_tx: mpsc::UnboundedSender<SchedMsg>,
}

/// The public entry point: accepts jobs and executes them against the
/// registered engines.
///
/// Must be created inside a tokio runtime; construction spawns the
/// scheduler, the engine lock, and the chat-state sweeper.
pub struct Switchboard {
    shared: Arc<Shared>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl Switchboard {
    pub fn new(
        config: SwitchboardConfig,
        engines: EngineRegistry,
        store: Arc<dyn Store>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self::with_clock(config, engines, store, bus, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SwitchboardConfig,
        engines: EngineRegistry,
        store: Arc<dyn Store>,
        bus: Arc<dyn Bus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = config.normalized();
        let lock = EngineLockHandle::spawn(
            Duration::from_millis(config.engine_lock_max_hold_ms),
            Duration::from_millis(config.reap_interval_ms()),
        );
        let (sched_tx, sched_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            clock,
            store,
            bus,
            engines: Arc::new(engines),
            lock,
            registry: RunRegistry::default(),
            sched_tx,
        });
        tokio::spawn(Scheduler::new(Arc::clone(&shared), sched_rx).run());

        let sweeper = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval_at(
                    tokio::time::Instant::now() + CHAT_SWEEP_INTERVAL,
                    CHAT_SWEEP_INTERVAL,
                );
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    let now_ms = shared.clock.epoch_ms();
                    if let Err(e) = sweep_chat(shared.store.as_ref(), now_ms) {
                        tracing::warn!(error = %e, "chat sweep failed");
                    }
                }
            })
        };

        Self { shared, sweeper }
    }

    /// Load configuration from a TOML file and build a switchboard.
    pub fn from_config_path(
        path: &Path,
        engines: EngineRegistry,
        store: Arc<dyn Store>,
        bus: Arc<dyn Bus>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            SwitchboardConfig::load(path)?,
            engines,
            store,
            bus,
        ))
    }

    /// Submit a job. Routing, auto-resume, and queueing happen on the
    /// scheduler; this never blocks.
    pub fn submit(&self, job: Job) {
        let _ = self
            .shared
            .sched_tx
            .send(SchedMsg::Submit { job, attempt: 0 });
    }

    /// Cancel a run by its id. Unknown ids are a no-op.
    pub fn cancel_by_run_id(&self, run_id: &RunId, reason: CancelReason) {
        if !self.shared.registry.cancel(run_id, reason) {
            tracing::debug!(run_id = %run_id, "cancel requested for unknown run");
        }
    }

    /// Cancel the run a progress/status message belongs to. Only jobs
    /// whose meta carried `progress_msg_id` or `status_msg_id` are
    /// reachable this way.
    pub fn cancel_by_progress(&self, scope: &str, progress_msg_id: &str) {
        match load_progress(self.shared.store.as_ref(), scope, progress_msg_id) {
            Ok(Some(run_id)) => self.cancel_by_run_id(&run_id, CancelReason::UserRequested),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "progress lookup failed"),
        }
    }

    /// Stop accepting work and wind down: cancels in-flight runs, tells
    /// workers to drain, and stops the sweepers.
    pub fn shutdown(&self) {
        self.shared.registry.cancel_all(CancelReason::Shutdown);
        let _ = self.shared.sched_tx.send(SchedMsg::Shutdown);
        self.shared.lock.shutdown();
        self.sweeper.abort();
    }

    pub fn config(&self) -> &SwitchboardConfig {
        &self.shared.config
    }
}

impl Drop for Switchboard {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
