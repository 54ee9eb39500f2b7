//! S1: single submit, happy path — full bus event order for one run.

use crate::prelude::*;
use swb_adapters::EchoStep;
use swb_core::Job;

#[tokio::test]
async fn single_submit_emits_the_full_event_sequence() {
    let h = harness(config(1));
    h.engine.set_session_script(
        "s",
        vec![
            EchoStep::Started { resume: None },
            EchoStep::Delta("a".into()),
            EchoStep::Delta("b".into()),
            EchoStep::Delta("c".into()),
            EchoStep::Completed {
                ok: true,
                answer: Some("abc".into()),
                error: None,
                resume: None,
            },
        ],
    );

    let mut topic = h.bus.subscribe("run:r1");
    let (notify, completed_rx) = notify();
    h.board.submit(
        Job::new("s", "hi")
            .with_run_id("r1")
            .with_notify(notify),
    );

    let events = events_until_run_completed(&mut topic).await;
    assert_eq!(
        event_types(&events),
        vec![
            "run_started",
            "engine_started",
            "delta",
            "delta",
            "delta",
            "engine_completed",
            "run_completed",
        ]
    );

    // Deltas carry strictly monotonic sequence numbers starting at 1.
    let deltas: Vec<&serde_json::Value> =
        events.iter().filter(|e| e["type"] == "delta").collect();
    for (i, delta) in deltas.iter().enumerate() {
        assert_eq!(delta["payload"]["seq"], (i + 1) as u64);
        assert_eq!(delta["meta"]["run_id"], "r1");
    }
    assert_eq!(deltas[0]["payload"]["text"], "a");
    assert_eq!(deltas[1]["payload"]["text"], "b");
    assert_eq!(deltas[2]["payload"]["text"], "c");

    let run_started = &events[0];
    assert_eq!(run_started["payload"]["session_key"], "s");
    assert_eq!(run_started["payload"]["engine"], "echo");

    let run_completed = events.last().unwrap();
    assert_eq!(run_completed["payload"]["completed"]["ok"], true);
    assert_eq!(run_completed["payload"]["completed"]["answer"], "abc");
    assert!(run_completed["payload"]["duration_ms"].is_u64());

    let completed = wait_completed(&completed_rx).await;
    assert!(completed.ok);
    assert_eq!(completed.answer.as_deref(), Some("abc"));
    assert_eq!(completed.run_id.as_ref().map(|r| r.as_str()), Some("r1"));
}

#[tokio::test]
async fn payloads_are_plain_maps_with_meta() {
    let h = harness(config(1));
    let mut topic = h.bus.subscribe("run:r2");
    let (notify, completed_rx) = notify();

    h.board.submit(
        Job::new("s", "ping")
            .with_run_id("r2")
            .with_notify(notify),
    );
    wait_completed(&completed_rx).await;

    let events = events_until_run_completed(&mut topic).await;
    for event in &events {
        assert!(event["type"].is_string());
        assert!(event["payload"].is_object() || event["payload"].is_null());
        assert_eq!(event["meta"]["run_id"], "r2");
        assert_eq!(event["meta"]["session_key"], "s");
    }
}
