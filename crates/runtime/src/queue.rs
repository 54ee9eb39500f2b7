// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session job queue: mode-aware ordering, followup debounce-merge,
//! collect coalescing, and the bounded-cap drop policy.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use swb_core::{DropPolicy, Job, QueueMode};

pub(crate) struct JobQueue {
    items: VecDeque<Job>,
    cap: Option<usize>,
    drop_policy: DropPolicy,
    debounce: Duration,
    last_followup_at: Option<Instant>,
}

impl JobQueue {
    pub fn new(cap: Option<usize>, drop_policy: DropPolicy, debounce: Duration) -> Self {
        Self {
            items: VecDeque::new(),
            cap,
            drop_policy,
            debounce,
            last_followup_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn front(&self) -> Option<&Job> {
        self.items.front()
    }

    /// Enqueue at tail.
    pub fn push_tail(&mut self, job: Job) -> Vec<Job> {
        self.items.push_back(job);
        self.enforce_cap(false)
    }

    /// Insert at head (interrupt jobs jump the line).
    pub fn push_head(&mut self, job: Job) -> Vec<Job> {
        self.items.push_front(job);
        self.enforce_cap(true)
    }

    /// Enqueue a followup, merging into the tail-most followup when this
    /// arrives within the debounce window of the previous one. The merged
    /// job keeps the first job's identity and adopts the newer message-id
    /// metadata. Returns (merged, dropped).
    pub fn push_followup(&mut self, job: Job, now: Instant) -> (bool, Vec<Job>) {
        let within_window = self
            .last_followup_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.debounce);
        self.last_followup_at = Some(now);

        if within_window {
            if let Some(tail) = self
                .items
                .back_mut()
                .filter(|j| j.queue_mode == QueueMode::Followup)
            {
                tail.prompt.push('\n');
                tail.prompt.push_str(&job.prompt);
                tail.meta.adopt_message_ids(&job.meta);
                return (true, Vec::new());
            }
        }

        let mut job = job;
        job.queue_mode = QueueMode::Followup;
        (false, self.push_tail(job))
    }

    /// Pop the next job to run. A leading run of collect jobs coalesces
    /// into one: prompts concatenate with newlines, the first job keeps
    /// its identity, and the newest message-id metadata wins.
    pub fn pop_for_dispatch(&mut self) -> Option<Job> {
        let mut job = self.items.pop_front()?;
        if job.queue_mode == QueueMode::Collect {
            while self
                .items
                .front()
                .is_some_and(|j| j.queue_mode == QueueMode::Collect)
            {
                if let Some(next) = self.items.pop_front() {
                    job.prompt.push('\n');
                    job.prompt.push_str(&next.prompt);
                    job.meta.adopt_message_ids(&next.meta);
                }
            }
        }
        Some(job)
    }

    /// Apply the queue cap after an enqueue.
    ///
    /// `oldest` discards from the head, except that a head-inserted job
    /// never evicts itself (discard falls to the tail instead). `newest`
    /// discards the just-inserted job.
    fn enforce_cap(&mut self, head_insert: bool) -> Vec<Job> {
        let Some(cap) = self.cap else {
            return Vec::new();
        };
        let mut dropped = Vec::new();
        while self.items.len() > cap {
            let victim = match (self.drop_policy, head_insert) {
                (DropPolicy::Oldest, false) => self.items.pop_front(),
                (DropPolicy::Oldest, true) => self.items.pop_back(),
                (DropPolicy::Newest, false) => self.items.pop_back(),
                (DropPolicy::Newest, true) => self.items.pop_front(),
            };
            if let Some(job) = victim {
                tracing::warn!(
                    run_id = %job.run_id,
                    session_key = %job.session_key,
                    policy = ?self.drop_policy,
                    "queue cap exceeded, dropping job"
                );
                dropped.push(job);
            } else {
                break;
            }
        }
        dropped
    }

    #[cfg(test)]
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.items.iter()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
