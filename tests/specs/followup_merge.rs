//! S5: followups inside the debounce window merge into one job.

use crate::prelude::*;
use swb_adapters::EchoStep;
use swb_core::{Job, QueueMode};
use std::time::Duration;

#[tokio::test]
async fn two_followups_within_window_produce_one_merged_run() {
    let h = harness(config(1));
    // A blocker on another session holds the only slot, keeping the
    // followups queued long enough to observe the merge.
    h.engine.set_session_script(
        "blocker",
        vec![
            EchoStep::Started { resume: None },
            EchoStep::Sleep(250),
            EchoStep::completed_ok(),
        ],
    );
    h.board.submit(Job::new("blocker", "occupy the slot"));
    tokio::time::sleep(Duration::from_millis(40)).await;

    let (notify_merged, rx) = notify();
    h.board.submit(
        Job::new("s", "a")
            .with_mode(QueueMode::Followup)
            .with_notify(notify_merged),
    );
    h.board.submit(Job::new("s", "b").with_mode(QueueMode::Followup));

    let completed = wait_completed(&rx).await;
    assert!(completed.ok);

    let session_starts: Vec<String> = h
        .engine
        .starts()
        .into_iter()
        .filter(|s| s.1 == "s")
        .map(|s| s.2)
        .collect();
    assert_eq!(session_starts, vec!["a\nb"]);
}

#[tokio::test]
async fn followups_past_the_window_run_separately() {
    let h = harness(config(1));
    let (n1, rx1) = notify();
    let (n2, rx2) = notify();

    h.board.submit(
        Job::new("s", "a")
            .with_mode(QueueMode::Followup)
            .with_notify(n1),
    );
    assert!(wait_completed(&rx1).await.ok);

    // Well past the 500ms debounce window.
    tokio::time::sleep(Duration::from_millis(600)).await;
    h.board.submit(
        Job::new("s", "b")
            .with_mode(QueueMode::Followup)
            .with_notify(n2),
    );
    assert!(wait_completed(&rx2).await.ok);

    let prompts: Vec<String> = h.engine.starts().into_iter().map(|s| s.2).collect();
    assert_eq!(prompts, vec!["a", "b"]);
}
