//! Shared harness for the spec tests.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swb_adapters::{EchoEngine, EngineRegistry, MemoryBus};

// Re-exported so scenario modules get the subscribe method via glob.
pub use swb_adapters::Bus;
use swb_core::{Completed, NotifySender, SwitchboardConfig};
use swb_runtime::Switchboard;
use swb_storage::MemStore;
use tokio::sync::mpsc;

pub struct Harness {
    pub board: Switchboard,
    pub engine: EchoEngine,
    pub store: MemStore,
    pub bus: MemoryBus,
}

/// Config with the echo engine as default and the given global cap.
pub fn config(max_concurrent_runs: i64) -> SwitchboardConfig {
    SwitchboardConfig {
        max_concurrent_runs,
        default_engine: "echo".to_string(),
        ..SwitchboardConfig::default()
    }
}

pub fn harness(config: SwitchboardConfig) -> Harness {
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
    Harness {
        board,
        engine,
        store,
        bus,
    }
}

pub fn notify() -> (NotifySender, std::sync::mpsc::Receiver<Completed>) {
    let (tx, rx) = std::sync::mpsc::channel();
    (NotifySender::new(tx), rx)
}

/// Wait for a run's terminal completion delivered over the caller
/// notification channel.
pub async fn wait_completed(rx: &std::sync::mpsc::Receiver<Completed>) -> Completed {
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

/// Drain a run topic until (and including) its `run_completed` event.
pub async fn events_until_run_completed(rx: &mut mpsc::UnboundedReceiver<Value>) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for bus event")
            .expect("bus topic closed before run_completed");
        let terminal = event["type"] == "run_completed";
        events.push(event);
        if terminal {
            return events;
        }
    }
}

pub fn event_types(events: &[Value]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| e["type"].as_str())
        .collect()
}
