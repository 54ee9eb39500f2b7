//! S3: per-session serialization even with a wide-open global cap.

use crate::prelude::*;
use swb_adapters::EchoStep;
use swb_core::Job;
use std::time::Duration;

#[tokio::test]
async fn same_session_jobs_never_overlap() {
    let h = harness(config(10));
    h.engine.set_session_script(
        "s",
        vec![
            EchoStep::Started { resume: None },
            EchoStep::Sleep(150),
            EchoStep::completed_ok(),
        ],
    );

    let (n1, rx1) = notify();
    let (n2, rx2) = notify();
    h.board.submit(Job::new("s", "first").with_notify(n1));
    // Let the first run start before queueing the second, so the two
    // stay separate jobs rather than coalescing.
    tokio::time::sleep(Duration::from_millis(40)).await;
    h.board.submit(Job::new("s", "second").with_notify(n2));

    assert!(wait_completed(&rx1).await.ok);
    assert!(wait_completed(&rx2).await.ok);

    let starts = h.engine.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0].2, "first");
    assert_eq!(starts[1].2, "second");

    // The second start waits out the first run's full execution.
    let gap = starts[1].3.duration_since(starts[0].3);
    assert!(
        gap >= Duration::from_millis(140),
        "second job started {:?} after the first; it must wait for completion",
        gap
    );
}

#[tokio::test]
async fn distinct_sessions_run_concurrently_under_a_high_cap() {
    let h = harness(config(10));
    h.engine.set_default_script(vec![
        EchoStep::Started { resume: None },
        EchoStep::Sleep(150),
        EchoStep::completed_ok(),
    ]);

    let (n1, rx1) = notify();
    let (n2, rx2) = notify();
    h.board.submit(Job::new("s1", "one").with_notify(n1));
    h.board.submit(Job::new("s2", "two").with_notify(n2));

    assert!(wait_completed(&rx1).await.ok);
    assert!(wait_completed(&rx2).await.ok);

    let starts = h.engine.starts();
    let gap = starts[1].3.duration_since(starts[0].3);
    assert!(gap < Duration::from_millis(100), "gap was {:?}", gap);
}
