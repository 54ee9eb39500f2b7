// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global scheduler: slot pool, session routing, auto-resume.
//!
//! One actor owns the slot pool (cap `max_concurrent_runs`) and the
//! session-key → worker table. Workers request slots asynchronously and
//! are granted FIFO; worker death is observed through a supervisor task
//! and reclaims both queued requests and held slots.

use crate::worker::{ThreadWorker, WorkerMsg};
use crate::Shared;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swb_core::{meta_keys, Job};
use swb_storage::{load_chat_state, touch_session};
use tokio::sync::mpsc;

/// How long a queued slot request may wait before the sweep drops it.
/// The worker's watchdog re-requests after the same interval.
pub(crate) const SLOT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const STALE_WAIT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// Bounds the cleanup loop when a worker dies holding many entries.
const PURGE_ITERATION_CAP: usize = 1000;
const SUBMIT_RETRY_ATTEMPTS: u32 = 3;
const SUBMIT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// One unit of the global concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId(pub u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// Address of a worker, as the scheduler sees it.
#[derive(Clone)]
pub(crate) struct WorkerRef {
    pub thread_key: String,
    pub generation: u64,
    pub tx: mpsc::UnboundedSender<WorkerMsg>,
}

pub(crate) enum SchedMsg {
    Submit { job: Job, attempt: u32 },
    RequestSlot { worker: WorkerRef },
    ReleaseSlot { slot: SlotId },
    WorkerDown { thread_key: String, generation: u64 },
    Shutdown,
}

/// Routing key a job serializes under. The session key wins over the
/// resume token: strict single-flight per session must hold even for
/// jobs that deliberately run without a resume token.
pub(crate) fn thread_key(job: &Job) -> String {
    if !job.session_key.is_empty() {
        return job.session_key.to_string();
    }
    if let Some(resume) = &job.resume {
        let engine = job.engine_id.as_deref().unwrap_or(&resume.engine);
        return format!("{}:{}", engine, resume.value);
    }
    "global".to_string()
}

struct InFlight {
    thread_key: String,
    generation: u64,
    granted_at: Instant,
}

struct SlotWaiter {
    worker: WorkerRef,
    queued_at: Instant,
}

/// Pure slot-accounting state, separated from the actor shell for
/// testability.
pub(crate) struct SlotPool {
    max: usize,
    next_slot: u64,
    in_flight: HashMap<SlotId, InFlight>,
    wait_queue: VecDeque<SlotWaiter>,
}

impl SlotPool {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            next_slot: 1,
            in_flight: HashMap::new(),
            wait_queue: VecDeque::new(),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.wait_queue.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.max
    }

    /// Allocate a fresh slot for the worker. Caller checks capacity.
    pub fn allocate(&mut self, worker: &WorkerRef, now: Instant) -> SlotId {
        let slot = SlotId(self.next_slot);
        self.next_slot += 1;
        self.in_flight.insert(
            slot,
            InFlight {
                thread_key: worker.thread_key.clone(),
                generation: worker.generation,
                granted_at: now,
            },
        );
        slot
    }

    pub fn enqueue(&mut self, worker: WorkerRef, now: Instant) {
        self.wait_queue.push_back(SlotWaiter {
            worker,
            queued_at: now,
        });
    }

    /// Release a slot. Idempotent; returns when the slot was granted,
    /// or `None` if it was not held.
    pub fn release(&mut self, slot: SlotId) -> Option<Instant> {
        self.in_flight.remove(&slot).map(|f| f.granted_at)
    }

    pub fn pop_waiter(&mut self) -> Option<(WorkerRef, Instant)> {
        self.wait_queue
            .pop_front()
            .map(|w| (w.worker, w.queued_at))
    }

    /// Remove everything a dead worker owned. Returns released slots.
    pub fn purge_worker(&mut self, thread_key: &str, generation: u64) -> usize {
        self.wait_queue
            .retain(|w| !(w.worker.thread_key == thread_key && w.worker.generation == generation));

        let doomed: Vec<SlotId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.thread_key == thread_key && f.generation == generation)
            .map(|(slot, _)| *slot)
            .take(PURGE_ITERATION_CAP)
            .collect();
        let released = doomed.len();
        for slot in doomed {
            self.in_flight.remove(&slot);
        }
        released
    }

    /// Drop slot requests that have waited past the timeout; their
    /// workers re-request via the watchdog.
    pub fn sweep_stale(&mut self, now: Instant, timeout: Duration) -> Vec<WorkerRef> {
        let mut dropped = Vec::new();
        self.wait_queue.retain(|w| {
            if now.saturating_duration_since(w.queued_at) >= timeout {
                dropped.push(w.worker.clone());
                false
            } else {
                true
            }
        });
        dropped
    }
}

struct WorkerEntry {
    tx: mpsc::UnboundedSender<WorkerMsg>,
    generation: u64,
}

pub(crate) struct Scheduler {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<SchedMsg>,
    workers: HashMap<String, WorkerEntry>,
    pool: SlotPool,
    next_generation: u64,
}

impl Scheduler {
    pub fn new(shared: Arc<Shared>, rx: mpsc::UnboundedReceiver<SchedMsg>) -> Self {
        let max = shared.config.max_runs();
        Self {
            shared,
            rx,
            workers: HashMap::new(),
            pool: SlotPool::new(max),
            next_generation: 1,
        }
    }

    pub async fn run(mut self) {
        let start = tokio::time::Instant::now() + STALE_WAIT_SWEEP_INTERVAL;
        let mut sweep = tokio::time::interval_at(start, STALE_WAIT_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            let input = tokio::select! {
                msg = self.rx.recv() => Some(msg),
                _ = sweep.tick() => None,
            };
            match input {
                Some(Some(SchedMsg::Shutdown)) | Some(None) => {
                    self.shutdown();
                    break;
                }
                Some(Some(msg)) => self.handle(msg),
                None => self.sweep_stale_waits(),
            }
        }
    }

    fn handle(&mut self, msg: SchedMsg) {
        match msg {
            SchedMsg::Submit { job, attempt } => self.handle_submit(job, attempt),
            SchedMsg::RequestSlot { worker } => self.handle_request_slot(worker),
            SchedMsg::ReleaseSlot { slot } => {
                if let Some(granted_at) = self.pool.release(slot) {
                    let held_ms = granted_at.elapsed().as_millis() as u64;
                    tracing::debug!(slot = %slot, held_ms, "slot released");
                    self.grant_until_full();
                }
            }
            SchedMsg::WorkerDown {
                thread_key,
                generation,
            } => self.handle_worker_down(&thread_key, generation),
            SchedMsg::Shutdown => {}
        }
    }

    fn handle_submit(&mut self, mut job: Job, attempt: u32) {
        if attempt == 0 {
            self.apply_auto_resume(&mut job);
            if !job.session_key.is_empty() {
                let now_ms = self.shared.clock.epoch_ms();
                if let Err(e) =
                    touch_session(self.shared.store.as_ref(), &job.session_key, now_ms)
                {
                    tracing::warn!(error = %e, "failed to touch session index");
                }
            }
        }

        let key = thread_key(&job);
        if let Some(entry) = self.workers.get(&key) {
            match entry.tx.send(WorkerMsg::Job(job)) {
                Ok(()) => return,
                Err(e) => {
                    // Worker is terminating; replace it below.
                    self.workers.remove(&key);
                    let WorkerMsg::Job(recovered) = e.0 else {
                        return;
                    };
                    job = recovered;
                }
            }
        }

        let tx = self.spawn_worker(&key);
        if let Err(e) = tx.send(WorkerMsg::Job(job)) {
            let WorkerMsg::Job(recovered) = e.0 else {
                return;
            };
            self.retry_submit(recovered, attempt);
        }
    }

    /// Defer a submit retry with linear backoff. Bounded attempts; jobs
    /// that cannot land after that are dropped with a warning.
    fn retry_submit(&self, job: Job, attempt: u32) {
        let next = attempt + 1;
        if next >= SUBMIT_RETRY_ATTEMPTS {
            tracing::warn!(
                run_id = %job.run_id,
                session_key = %job.session_key,
                "giving up on submit after repeated worker spawn failures"
            );
            return;
        }
        let tx = self.shared.sched_tx.clone();
        let delay = SUBMIT_RETRY_BACKOFF * next;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SchedMsg::Submit { job, attempt: next });
        });
    }

    /// Fill in `resume`/`engine_id` from stored chat state. Any failure
    /// falls through and the job is submitted unchanged.
    fn apply_auto_resume(&self, job: &mut Job) {
        if !self.shared.config.auto_resume
            || job.resume.is_some()
            || job.session_key.is_empty()
            || job.meta.flag(meta_keys::DISABLE_AUTO_RESUME)
        {
            return;
        }
        let now_ms = self.shared.clock.epoch_ms();
        let state = match load_chat_state(
            self.shared.store.as_ref(),
            job.session_key.as_str(),
            now_ms,
        ) {
            Ok(Some(state)) => state,
            _ => return,
        };
        if let Some(engine_id) = &job.engine_id {
            if *engine_id != state.last_engine {
                return;
            }
        }
        if let Some(token) = state.last_resume {
            job.resume = Some(token);
        }
        if job.engine_id.is_none() {
            job.engine_id = Some(state.last_engine);
        }
    }

    fn spawn_worker(&mut self, key: &str) -> mpsc::UnboundedSender<WorkerMsg> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ThreadWorker::new(
            key.to_string(),
            generation,
            Arc::clone(&self.shared),
            rx,
            tx.downgrade(),
        );
        let join = tokio::spawn(worker.run());

        // Supervisor: observe the worker's termination and report it so
        // queued requests and held slots can be reclaimed.
        let sched_tx = self.shared.sched_tx.clone();
        let down_key = key.to_string();
        tokio::spawn(async move {
            let _ = join.await;
            let _ = sched_tx.send(SchedMsg::WorkerDown {
                thread_key: down_key,
                generation,
            });
        });

        tracing::debug!(thread_key = key, generation, "spawned session worker");
        self.workers.insert(
            key.to_string(),
            WorkerEntry {
                tx: tx.clone(),
                generation,
            },
        );
        tx
    }

    fn handle_request_slot(&mut self, worker: WorkerRef) {
        let now = Instant::now();
        if self.pool.has_capacity() {
            let slot = self.pool.allocate(&worker, now);
            if worker.tx.send(WorkerMsg::SlotGranted(slot)).is_ok() {
                tracing::info!(
                    thread_key = %worker.thread_key,
                    slot = %slot,
                    wait_ms = 0u64,
                    "slot granted"
                );
            } else {
                self.pool.release(slot);
            }
        } else {
            self.pool.enqueue(worker, now);
        }
    }

    fn handle_worker_down(&mut self, thread_key: &str, generation: u64) {
        if self
            .workers
            .get(thread_key)
            .is_some_and(|e| e.generation == generation)
        {
            self.workers.remove(thread_key);
        }
        let released = self.pool.purge_worker(thread_key, generation);
        if released > 0 {
            tracing::warn!(thread_key, released, "reclaimed slots from dead worker");
        }
        self.grant_until_full();
    }

    /// Grant queued slot requests FIFO while capacity remains, skipping
    /// workers that died while waiting.
    fn grant_until_full(&mut self) {
        while self.pool.has_capacity() {
            let Some((worker, queued_at)) = self.pool.pop_waiter() else {
                break;
            };
            let slot = self.pool.allocate(&worker, Instant::now());
            if worker.tx.send(WorkerMsg::SlotGranted(slot)).is_ok() {
                let wait_ms = queued_at.elapsed().as_millis() as u64;
                tracing::info!(
                    thread_key = %worker.thread_key,
                    slot = %slot,
                    wait_ms,
                    "slot granted"
                );
            } else {
                self.pool.release(slot);
            }
        }
    }

    fn sweep_stale_waits(&mut self) {
        for worker in self
            .pool
            .sweep_stale(Instant::now(), SLOT_REQUEST_TIMEOUT)
        {
            tracing::warn!(
                thread_key = %worker.thread_key,
                "dropping stale slot request; worker will re-request"
            );
        }
    }

    fn shutdown(&mut self) {
        for (_, entry) in self.workers.drain() {
            let _ = entry.tx.send(WorkerMsg::Shutdown);
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
