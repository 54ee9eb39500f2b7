// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run-id registry for external cancellation.
//!
//! Cancel-by-id is a lookup followed by send-or-drop: a missing run id
//! is a no-op by contract.

use crate::run::RunMsg;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use swb_core::{CancelReason, RunId};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
pub(crate) struct RunRegistry {
    inner: Arc<Mutex<HashMap<RunId, mpsc::UnboundedSender<RunMsg>>>>,
}

impl RunRegistry {
    pub fn register(&self, run_id: RunId, tx: mpsc::UnboundedSender<RunMsg>) {
        self.inner.lock().insert(run_id, tx);
    }

    pub fn unregister(&self, run_id: &RunId) {
        self.inner.lock().remove(run_id);
    }

    /// Request cancellation of a live run. Returns false when the run id
    /// is unknown or the run is already gone.
    pub fn cancel(&self, run_id: &RunId, reason: CancelReason) -> bool {
        let tx = match self.inner.lock().get(run_id) {
            Some(tx) => tx.clone(),
            None => return false,
        };
        tx.send(RunMsg::Cancel { reason }).is_ok()
    }

    /// Cancel every registered run.
    pub fn cancel_all(&self, reason: CancelReason) {
        let senders: Vec<_> = self.inner.lock().values().cloned().collect();
        for tx in senders {
            let _ = tx.send(RunMsg::Cancel { reason });
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
