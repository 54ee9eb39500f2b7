//! Stress: many sessions share the slot pool and all complete.

use crate::prelude::*;
use swb_adapters::EchoStep;
use swb_core::Job;
use std::time::Duration;

#[tokio::test]
async fn six_sessions_share_two_slots_and_all_complete() {
    let h = harness(config(2));
    h.engine.set_default_script(vec![
        EchoStep::Started { resume: None },
        EchoStep::Sleep(100),
        EchoStep::completed_ok(),
    ]);

    let mut receivers = Vec::new();
    for i in 0..6 {
        let (notify, rx) = notify();
        h.board.submit(Job::new(format!("s{}", i), "work").with_notify(notify));
        receivers.push(rx);
    }

    for rx in &receivers {
        assert!(wait_completed(rx).await.ok);
    }

    let starts = h.engine.starts();
    assert_eq!(starts.len(), 6);

    // With two slots, the third start has to wait for a completion.
    let gap = starts[2].3.duration_since(starts[0].3);
    assert!(
        gap >= Duration::from_millis(80),
        "third start came after {:?}, expected it to wait for a free slot",
        gap
    );

    // Every session ran exactly once.
    let mut sessions: Vec<String> = starts.into_iter().map(|s| s.1.to_string()).collect();
    sessions.sort();
    sessions.dedup();
    assert_eq!(sessions.len(), 6);
}
