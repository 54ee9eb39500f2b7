//! S6: steer acceptance, then rejection with followup fallback.

use crate::prelude::*;
use swb_adapters::EchoStep;
use swb_core::{Job, QueueMode};
use std::time::Duration;

#[tokio::test]
async fn accepted_then_rejected_steer_falls_back_to_followup() {
    let h = harness(config(1));
    h.engine.set_session_script(
        "s",
        vec![
            EchoStep::Started { resume: None },
            EchoStep::Sleep(400),
            EchoStep::completed_ok(),
        ],
    );

    let (n1, rx1) = notify();
    h.board.submit(Job::new("s", "main work").with_notify(n1));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // First steer is accepted and injected into the running engine.
    h.board
        .submit(Job::new("s", "more context").with_mode(QueueMode::Steer));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.steer_texts(), vec!["more context"]);

    // Second steer is rejected by the engine and re-enqueued as a
    // followup; it must run once the main job finishes.
    h.engine.set_steer_error("stream busy");
    h.engine.set_session_script(
        "s",
        vec![EchoStep::Started { resume: None }, EchoStep::completed_ok()],
    );
    let (n3, rx3) = notify();
    h.board.submit(
        Job::new("s", "extra detail")
            .with_mode(QueueMode::Steer)
            .with_notify(n3),
    );

    assert!(wait_completed(&rx1).await.ok);
    assert!(wait_completed(&rx3).await.ok);

    assert_eq!(h.engine.steer_texts(), vec!["more context", "extra detail"]);
    let prompts: Vec<String> = h.engine.starts().into_iter().map(|s| s.2).collect();
    assert_eq!(prompts, vec!["main work", "extra detail"]);
}

#[tokio::test]
async fn steer_without_engine_support_reroutes_to_followup() {
    let h = harness(config(1));
    h.engine.set_supports_steer(false);
    h.engine.set_session_script(
        "s",
        vec![
            EchoStep::Started { resume: None },
            EchoStep::Sleep(200),
            EchoStep::completed_ok(),
        ],
    );

    let (n1, rx1) = notify();
    h.board.submit(Job::new("s", "main work").with_notify(n1));
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.engine.set_session_script(
        "s",
        vec![EchoStep::Started { resume: None }, EchoStep::completed_ok()],
    );
    let (n2, rx2) = notify();
    h.board.submit(
        Job::new("s", "attempted steer")
            .with_mode(QueueMode::Steer)
            .with_notify(n2),
    );

    assert!(wait_completed(&rx1).await.ok);
    assert!(wait_completed(&rx2).await.ok);

    // The engine refused the injection, so the text became its own run.
    let prompts: Vec<String> = h.engine.starts().into_iter().map(|s| s.2).collect();
    assert_eq!(prompts, vec!["main work", "attempted steer"]);
}
