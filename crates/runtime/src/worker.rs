// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session worker: serializes runs for one thread key.
//!
//! The worker owns the session's job queue, keeps at most one slot
//! request outstanding and at most one run in flight, and implements the
//! five queue modes. It terminates when the queue is empty, no run is
//! active, and no slot request is outstanding.

use crate::queue::JobQueue;
use crate::run::{Run, RunMsg};
use crate::scheduler::{SchedMsg, SlotId, WorkerRef, SLOT_REQUEST_TIMEOUT};
use crate::Shared;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swb_core::{CancelReason, Job, QueueMode, RunId};
use tokio::sync::mpsc;

const SLOT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

pub(crate) enum WorkerMsg {
    Job(Job),
    SlotGranted(SlotId),
    RunComplete { run_id: RunId, ok: bool },
    RunDown { run_id: RunId },
    SteerAccepted { run_id: RunId, job_run_id: RunId },
    SteerRejected { run_id: RunId, job_run_id: RunId },
    Shutdown,
}

struct CurrentRun {
    run_id: RunId,
    tx: mpsc::UnboundedSender<RunMsg>,
}

struct PendingSteer {
    job: Job,
    fallback: QueueMode,
}

pub(crate) struct ThreadWorker {
    thread_key: String,
    generation: u64,
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<WorkerMsg>,
    self_tx: mpsc::WeakUnboundedSender<WorkerMsg>,
    queue: JobQueue,
    current: Option<CurrentRun>,
    slot: Option<SlotId>,
    slot_requested_at: Option<Instant>,
    pending_steers: HashMap<RunId, Vec<PendingSteer>>,
    shutting_down: bool,
    seen_work: bool,
}

impl ThreadWorker {
    pub fn new(
        thread_key: String,
        generation: u64,
        shared: Arc<Shared>,
        rx: mpsc::UnboundedReceiver<WorkerMsg>,
        self_tx: mpsc::WeakUnboundedSender<WorkerMsg>,
    ) -> Self {
        let queue = JobQueue::new(
            shared.config.queue.cap,
            shared.config.queue.drop,
            Duration::from_millis(shared.config.followup_debounce_ms),
        );
        Self {
            thread_key,
            generation,
            shared,
            rx,
            self_tx,
            queue,
            current: None,
            slot: None,
            slot_requested_at: None,
            pending_steers: HashMap::new(),
            shutting_down: false,
            seen_work: false,
        }
    }

    pub async fn run(mut self) {
        let start = tokio::time::Instant::now() + SLOT_WATCHDOG_INTERVAL;
        let mut watchdog = tokio::time::interval_at(start, SLOT_WATCHDOG_INTERVAL);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            if self.is_idle() {
                // Drain anything already mailed before terminating.
                match self.rx.try_recv() {
                    Ok(msg) => {
                        self.handle(msg);
                        continue;
                    }
                    Err(_) => break,
                }
            }
            let input = tokio::select! {
                msg = self.rx.recv() => Some(msg),
                _ = watchdog.tick() => None,
            };
            match input {
                Some(Some(msg)) => self.handle(msg),
                Some(None) => break,
                None => self.check_slot_watchdog(),
            }
        }
        tracing::debug!(
            thread_key = %self.thread_key,
            generation = self.generation,
            "worker terminating"
        );
    }

    fn is_idle(&self) -> bool {
        self.seen_work
            && self.queue.is_empty()
            && self.current.is_none()
            && self.slot.is_none()
            && self.slot_requested_at.is_none()
    }

    fn handle(&mut self, msg: WorkerMsg) {
        match msg {
            WorkerMsg::Job(job) => {
                self.seen_work = true;
                if !self.shutting_down {
                    self.enqueue(job);
                }
            }
            WorkerMsg::SlotGranted(slot) => self.handle_slot_granted(slot),
            WorkerMsg::RunComplete { run_id, ok } => self.handle_run_complete(&run_id, ok),
            WorkerMsg::RunDown { run_id } => self.handle_run_down(&run_id),
            WorkerMsg::SteerAccepted { run_id, job_run_id } => {
                self.remove_pending_steer(&run_id, &job_run_id);
            }
            WorkerMsg::SteerRejected { run_id, job_run_id } => {
                if let Some(pending) = self.remove_pending_steer(&run_id, &job_run_id) {
                    tracing::debug!(
                        run_id = %run_id,
                        job_run_id = %job_run_id,
                        fallback = %pending.fallback,
                        "steer rejected, re-enqueueing"
                    );
                    self.enqueue_with_mode(pending.job, pending.fallback);
                }
            }
            WorkerMsg::Shutdown => {
                self.seen_work = true;
                self.shutting_down = true;
                self.queue.clear();
                self.slot_requested_at = None;
                if let Some(current) = &self.current {
                    let _ = current.tx.send(RunMsg::Cancel {
                        reason: CancelReason::Shutdown,
                    });
                }
            }
        }
        self.maybe_request_slot();
    }

    fn enqueue(&mut self, job: Job) {
        let mut mode = job.queue_mode;
        // A followup carrying subtask meta is promoted so the subagent's
        // result lands in the in-flight run instead of queueing behind it.
        if mode == QueueMode::Followup && self.current.is_some() && job.is_auto_followup() {
            mode = QueueMode::SteerBacklog;
        }
        self.enqueue_with_mode(job, mode);
    }

    fn enqueue_with_mode(&mut self, job: Job, mode: QueueMode) {
        match mode {
            QueueMode::Collect => {
                // Fallback jobs are reclassified so dispatch coalescing
                // treats them like any other collect.
                let mut job = job;
                job.queue_mode = QueueMode::Collect;
                self.queue.push_tail(job);
            }
            QueueMode::Followup => {
                self.queue.push_followup(job, self.shared.clock.now());
            }
            QueueMode::Steer => self.steer_or_track(job, QueueMode::Followup),
            QueueMode::SteerBacklog => self.steer_or_track(job, QueueMode::Collect),
            QueueMode::Interrupt => {
                if let Some(current) = &self.current {
                    let _ = current.tx.send(RunMsg::Cancel {
                        reason: CancelReason::Interrupted,
                    });
                }
                self.queue.push_head(job);
            }
        }
    }

    /// Cast a steer to the in-flight run, remembering the job so a
    /// rejection or run death can re-enqueue it under `fallback`. With no
    /// run active, the job is reclassified as its fallback immediately.
    fn steer_or_track(&mut self, job: Job, fallback: QueueMode) {
        let Some(current) = &self.current else {
            self.enqueue_with_mode(job, fallback);
            return;
        };
        let sent = current.tx.send(RunMsg::Steer {
            job_run_id: job.run_id.clone(),
            text: job.prompt.clone(),
            backlog: fallback == QueueMode::Collect,
        });
        if sent.is_ok() {
            self.pending_steers
                .entry(current.run_id.clone())
                .or_default()
                .push(PendingSteer { job, fallback });
        } else {
            // Run is finalizing; treat as an immediate rejection.
            self.enqueue_with_mode(job, fallback);
        }
    }

    fn remove_pending_steer(&mut self, run_id: &RunId, job_run_id: &RunId) -> Option<PendingSteer> {
        let pending = self.pending_steers.get_mut(run_id)?;
        let idx = pending.iter().position(|p| &p.job.run_id == job_run_id)?;
        let entry = pending.remove(idx);
        if pending.is_empty() {
            self.pending_steers.remove(run_id);
        }
        Some(entry)
    }

    /// Re-enqueue steers the run neither accepted nor rejected. Runs on
    /// both completion and death so cast messages are never lost.
    fn flush_pending_steers(&mut self, run_id: &RunId) {
        let Some(pending) = self.pending_steers.remove(run_id) else {
            return;
        };
        for entry in pending {
            tracing::debug!(
                run_id = %run_id,
                job_run_id = %entry.job.run_id,
                fallback = %entry.fallback,
                "recovering unanswered steer"
            );
            self.enqueue_with_mode(entry.job, entry.fallback);
        }
    }

    fn maybe_request_slot(&mut self) {
        if self.shutting_down
            || self.current.is_some()
            || self.slot.is_some()
            || self.slot_requested_at.is_some()
            || self.queue.is_empty()
        {
            return;
        }
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        let worker = WorkerRef {
            thread_key: self.thread_key.clone(),
            generation: self.generation,
            tx,
        };
        let _ = self.shared.sched_tx.send(SchedMsg::RequestSlot { worker });
        self.slot_requested_at = Some(Instant::now());
    }

    fn handle_slot_granted(&mut self, slot: SlotId) {
        self.slot_requested_at = None;
        if self.shutting_down || self.current.is_some() || self.queue.is_empty() {
            // Stale or unneeded grant; hand it straight back.
            let _ = self.shared.sched_tx.send(SchedMsg::ReleaseSlot { slot });
            return;
        }
        let Some(job) = self.queue.pop_for_dispatch() else {
            let _ = self.shared.sched_tx.send(SchedMsg::ReleaseSlot { slot });
            return;
        };
        self.spawn_run(job, slot);
    }

    fn spawn_run(&mut self, job: Job, slot: SlotId) {
        let Some(worker_tx) = self.self_tx.upgrade() else {
            let _ = self.shared.sched_tx.send(SchedMsg::ReleaseSlot { slot });
            return;
        };
        let run_id = job.run_id.clone();
        let (run_tx, run_rx) = mpsc::unbounded_channel();
        let run = Run::new(
            Arc::clone(&self.shared),
            job,
            slot,
            worker_tx.clone(),
            run_tx.clone(),
            run_rx,
        );
        let join = tokio::spawn(run.execute());

        // Supervisor: a run that dies without reporting completion still
        // frees the worker (and its pending steers).
        let down_id = run_id.clone();
        tokio::spawn(async move {
            let _ = join.await;
            let _ = worker_tx.send(WorkerMsg::RunDown { run_id: down_id });
        });

        self.current = Some(CurrentRun {
            run_id,
            tx: run_tx,
        });
        self.slot = Some(slot);
    }

    fn handle_run_complete(&mut self, run_id: &RunId, ok: bool) {
        if self
            .current
            .as_ref()
            .is_none_or(|current| &current.run_id != run_id)
        {
            return;
        }
        tracing::debug!(thread_key = %self.thread_key, run_id = %run_id, ok, "run complete");
        self.current = None;
        // The run released its own slot during finalize.
        self.slot = None;
        self.flush_pending_steers(run_id);
    }

    fn handle_run_down(&mut self, run_id: &RunId) {
        if self
            .current
            .as_ref()
            .is_some_and(|current| &current.run_id == run_id)
        {
            tracing::warn!(thread_key = %self.thread_key, run_id = %run_id, "run died");
            self.current = None;
            if let Some(slot) = self.slot.take() {
                let _ = self.shared.sched_tx.send(SchedMsg::ReleaseSlot { slot });
            }
        }
        // Flush whether or not this was the current run: a normal
        // completion already flushed, making this a no-op.
        self.flush_pending_steers(run_id);
    }

    /// Recover from a lost grant: reset the outstanding request so the
    /// next pass re-requests.
    fn check_slot_watchdog(&mut self) {
        let Some(requested_at) = self.slot_requested_at else {
            return;
        };
        if requested_at.elapsed() >= SLOT_REQUEST_TIMEOUT {
            tracing::warn!(
                thread_key = %self.thread_key,
                "slot request timed out, re-requesting"
            );
            self.slot_requested_at = None;
            self.maybe_request_slot();
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
