// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fair FIFO engine lock.
//!
//! Serializes runs that share a lock key (normally a resume token value)
//! so interleaved scheduling cannot corrupt a continued engine session.
//! Grants are RAII: dropping a [`LockGrant`] releases the lock, which
//! covers owner death without a separate monitor. A periodic sweep
//! reclaims holds older than the configured cap.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

pub(crate) enum LockMsg {
    Acquire {
        key: String,
        waiter_id: u64,
        reply: oneshot::Sender<LockGrant>,
    },
    CancelWait {
        key: String,
        waiter_id: u64,
    },
    Release {
        key: String,
        grant_id: u64,
    },
    Shutdown,
}

/// Handle to the lock actor.
#[derive(Clone)]
pub(crate) struct EngineLockHandle {
    tx: mpsc::UnboundedSender<LockMsg>,
    next_waiter: Arc<AtomicU64>,
}

impl EngineLockHandle {
    /// Spawn the lock actor. A `max_hold` of zero disables age-based
    /// reclamation.
    pub fn spawn(max_hold: Duration, reap_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = LockActor {
            rx,
            tx: tx.clone(),
            held: HashMap::new(),
            next_grant: 1,
            max_hold,
        };
        tokio::spawn(actor.run(reap_interval));
        Self {
            tx,
            next_waiter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Enqueue an acquire. The returned receiver yields the grant; the
    /// waiter id is needed to cancel the wait on timeout.
    pub fn request(&self, key: &str) -> (u64, oneshot::Receiver<LockGrant>) {
        let waiter_id = self.next_waiter.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(LockMsg::Acquire {
            key: key.to_string(),
            waiter_id,
            reply,
        });
        (waiter_id, rx)
    }

    pub fn cancel_wait(&self, key: &str, waiter_id: u64) {
        let _ = self.tx.send(LockMsg::CancelWait {
            key: key.to_string(),
            waiter_id,
        });
    }

    /// Acquire with a timeout. Returns `None` when the timeout elapses
    /// before the lock is granted.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Option<LockGrant> {
        let (waiter_id, rx) = self.request(key);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(grant)) => Some(grant),
            Ok(Err(_)) => None,
            Err(_) => {
                self.cancel_wait(key, waiter_id);
                None
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(LockMsg::Shutdown);
    }
}

/// Exclusive hold on one lock key.
///
/// Released on [`LockGrant::release`] or on drop; double release is a
/// no-op.
pub(crate) struct LockGrant {
    key: String,
    grant_id: u64,
    tx: mpsc::UnboundedSender<LockMsg>,
    released: bool,
}

impl LockGrant {
    fn new(key: &str, grant_id: u64, tx: mpsc::UnboundedSender<LockMsg>) -> Self {
        Self {
            key: key.to_string(),
            grant_id,
            tx,
            released: false,
        }
    }

    pub fn release(mut self) {
        self.send_release();
    }

    fn send_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.tx.send(LockMsg::Release {
            key: self.key.clone(),
            grant_id: self.grant_id,
        });
    }
}

impl Drop for LockGrant {
    fn drop(&mut self) {
        self.send_release();
    }
}

impl fmt::Debug for LockGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGrant")
            .field("key", &self.key)
            .field("grant_id", &self.grant_id)
            .finish()
    }
}

struct LockWaiter {
    waiter_id: u64,
    reply: oneshot::Sender<LockGrant>,
}

struct HeldLock {
    grant_id: u64,
    acquired_at: Instant,
    waiters: VecDeque<LockWaiter>,
}

struct LockActor {
    rx: mpsc::UnboundedReceiver<LockMsg>,
    tx: mpsc::UnboundedSender<LockMsg>,
    held: HashMap<String, HeldLock>,
    next_grant: u64,
    max_hold: Duration,
}

impl LockActor {
    async fn run(mut self, reap_interval: Duration) {
        let start = tokio::time::Instant::now() + reap_interval;
        let mut reap = tokio::time::interval_at(start, reap_interval);
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            let input = tokio::select! {
                msg = self.rx.recv() => Some(msg),
                _ = reap.tick() => None,
            };
            match input {
                Some(Some(LockMsg::Shutdown)) | Some(None) => break,
                Some(Some(msg)) => self.handle(msg),
                None => self.reap(),
            }
        }
    }

    fn handle(&mut self, msg: LockMsg) {
        match msg {
            LockMsg::Acquire {
                key,
                waiter_id,
                reply,
            } => {
                if let Some(held) = self.held.get_mut(&key) {
                    held.waiters.push_back(LockWaiter { waiter_id, reply });
                    return;
                }
                let grant_id = self.alloc_grant_id();
                let grant = LockGrant::new(&key, grant_id, self.tx.clone());
                // A failed send means the waiter is already gone; the
                // returned grant drops and its release is ignored below.
                if reply.send(grant).is_ok() {
                    self.held.insert(
                        key,
                        HeldLock {
                            grant_id,
                            acquired_at: Instant::now(),
                            waiters: VecDeque::new(),
                        },
                    );
                }
            }
            LockMsg::CancelWait { key, waiter_id } => {
                if let Some(held) = self.held.get_mut(&key) {
                    held.waiters.retain(|w| w.waiter_id != waiter_id);
                }
            }
            LockMsg::Release { key, grant_id } => {
                let current = self.held.get(&key).map(|h| h.grant_id);
                if current == Some(grant_id) {
                    self.advance(&key);
                }
            }
            LockMsg::Shutdown => {}
        }
    }

    fn alloc_grant_id(&mut self) -> u64 {
        let id = self.next_grant;
        self.next_grant += 1;
        id
    }

    /// Hand the key to the next live waiter, or free it.
    fn advance(&mut self, key: &str) {
        loop {
            let waiter = match self.held.get_mut(key) {
                Some(held) => held.waiters.pop_front(),
                None => return,
            };
            let Some(waiter) = waiter else {
                self.held.remove(key);
                return;
            };
            let grant_id = self.alloc_grant_id();
            let grant = LockGrant::new(key, grant_id, self.tx.clone());
            if waiter.reply.send(grant).is_ok() {
                if let Some(held) = self.held.get_mut(key) {
                    held.grant_id = grant_id;
                    held.acquired_at = Instant::now();
                }
                return;
            }
            // Dead waiter; try the next one.
        }
    }

    fn reap(&mut self) {
        if self.max_hold.is_zero() {
            return;
        }
        let stale: Vec<String> = self
            .held
            .iter()
            .filter(|(_, held)| held.acquired_at.elapsed() >= self.max_hold)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            tracing::warn!(key = %key, "reclaiming stale engine lock");
            self.advance(&key);
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
