// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for the runtime crate.

use crate::Switchboard;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swb_adapters::{EchoEngine, EngineRegistry, MemoryBus};
use swb_core::{Completed, NotifySender, SwitchboardConfig};
use swb_storage::MemStore;

/// Test context holding the switchboard and its fakes.
pub(crate) struct TestContext {
    pub board: Switchboard,
    pub engine: EchoEngine,
    pub store: MemStore,
    pub bus: MemoryBus,
}

/// Default test configuration: echo engine, everything else stock.
pub(crate) fn test_config() -> SwitchboardConfig {
    SwitchboardConfig {
        default_engine: "echo".to_string(),
        ..SwitchboardConfig::default()
    }
}

/// Build a switchboard wired to an echo engine, a memory store, and a
/// memory bus.
pub(crate) fn setup(config: SwitchboardConfig) -> TestContext {
    let engine = EchoEngine::new();
    let mut engines = EngineRegistry::new();
    engines.register(Arc::new(engine.clone()));
    let store = MemStore::new();
    let bus = MemoryBus::new();
    let board = Switchboard::new(
        config,
        engines,
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
    );
    TestContext {
        board,
        engine,
        store,
        bus,
    }
}

/// Caller notification pair for observing terminal completions.
pub(crate) fn notify_pair() -> (NotifySender, std::sync::mpsc::Receiver<Completed>) {
    let (tx, rx) = std::sync::mpsc::channel();
    (NotifySender::new(tx), rx)
}

/// Wait for the run's terminal completion, polling the std channel from
/// async context.
pub(crate) async fn wait_completed(rx: &std::sync::mpsc::Receiver<Completed>) -> Completed {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(completed) = rx.try_recv() {
            return completed;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for run completion");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
