//! S4: interrupt cancels the in-flight run and runs next.

use crate::prelude::*;
use swb_adapters::EchoStep;
use swb_core::{Job, QueueMode};
use std::time::Duration;

#[tokio::test]
async fn interrupt_cancels_current_run_and_takes_over() {
    let h = harness(config(1));
    h.engine.set_session_script(
        "s",
        vec![
            EchoStep::Started { resume: None },
            EchoStep::Sleep(2_000),
            EchoStep::completed_ok(),
        ],
    );

    let (n1, rx1) = notify();
    h.board.submit(Job::new("s", "slow work").with_notify(n1));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Swap the script so the interrupt job itself finishes quickly.
    h.engine.set_session_script(
        "s",
        vec![EchoStep::Started { resume: None }, EchoStep::completed_ok()],
    );
    let (n2, rx2) = notify();
    h.board.submit(
        Job::new("s", "drop everything")
            .with_mode(QueueMode::Interrupt)
            .with_notify(n2),
    );

    let first = wait_completed(&rx1).await;
    assert!(!first.ok);
    assert_eq!(first.error.as_deref(), Some("interrupted"));

    let second = wait_completed(&rx2).await;
    assert!(second.ok);

    assert_eq!(h.engine.cancel_count(), 1);
    let starts = h.engine.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].2, "drop everything");
    // The interrupted run still finalized before the interrupt started.
    assert!(starts[1].3 > starts[0].3);
}
