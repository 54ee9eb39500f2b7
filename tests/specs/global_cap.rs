//! S2: the global cap serializes runs across sessions.

use crate::prelude::*;
use swb_adapters::EchoStep;
use swb_core::Job;
use std::time::Duration;

#[tokio::test]
async fn cap_of_one_runs_sessions_back_to_back() {
    let h = harness(config(1));
    h.engine.set_default_script(vec![
        EchoStep::Started { resume: None },
        EchoStep::Sleep(200),
        EchoStep::completed_ok(),
    ]);

    let (n1, rx1) = notify();
    let (n2, rx2) = notify();
    h.board.submit(Job::new("a", "first").with_notify(n1));
    h.board.submit(Job::new("b", "second").with_notify(n2));

    assert!(wait_completed(&rx1).await.ok);
    assert!(wait_completed(&rx2).await.ok);

    let starts = h.engine.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0].1, "a");
    assert_eq!(starts[1].1, "b");

    // The second session's run cannot start until the first run's slot
    // frees up, which takes the full engine sleep.
    let gap = starts[1].3.duration_since(starts[0].3);
    assert!(
        gap >= Duration::from_millis(180),
        "second start after {:?}, expected the first run to hold the slot",
        gap
    );
}

#[tokio::test]
async fn cap_of_two_admits_both_immediately() {
    let h = harness(config(2));
    h.engine.set_default_script(vec![
        EchoStep::Started { resume: None },
        EchoStep::Sleep(200),
        EchoStep::completed_ok(),
    ]);

    let (n1, rx1) = notify();
    let (n2, rx2) = notify();
    h.board.submit(Job::new("a", "first").with_notify(n1));
    h.board.submit(Job::new("b", "second").with_notify(n2));

    assert!(wait_completed(&rx1).await.ok);
    assert!(wait_completed(&rx2).await.ok);

    let starts = h.engine.starts();
    assert_eq!(starts.len(), 2);
    let gap = starts[1].3.duration_since(starts[0].3);
    assert!(
        gap < Duration::from_millis(150),
        "both runs should start without waiting, gap was {:?}",
        gap
    );
}
