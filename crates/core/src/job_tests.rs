// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn new_job_gets_a_generated_run_id() {
    let job = Job::new("s1", "hello");
    assert!(!job.run_id.is_empty());
    assert_eq!(job.session_key, "s1");
    assert_eq!(job.queue_mode, QueueMode::Collect);
}

#[test]
fn builder_methods_fill_fields() {
    let job = Job::new("s1", "hi")
        .with_run_id("r-7")
        .with_engine("echo")
        .with_mode(QueueMode::Followup)
        .with_resume(ResumeToken::new("echo", "tok"))
        .with_meta(meta_keys::MESSAGE_ID, json!("m1"));

    assert_eq!(job.run_id, "r-7");
    assert_eq!(job.engine_id.as_deref(), Some("echo"));
    assert_eq!(job.queue_mode, QueueMode::Followup);
    assert_eq!(job.resume, Some(ResumeToken::new("echo", "tok")));
    assert_eq!(job.meta.str_value(meta_keys::MESSAGE_ID), Some("m1"));
}

#[yare::parameterized(
    bool_true = { json!(true), true },
    bool_false = { json!(false), false },
    string_true = { json!("true"), true },
    string_other = { json!("yes"), false },
    number = { json!(1), false },
)]
fn meta_flag_accepts_bool_or_true_string(value: serde_json::Value, expected: bool) {
    let mut meta = JobMeta::new();
    meta.insert("flag", value);
    assert_eq!(meta.flag("flag"), expected);
}

#[test]
fn meta_flag_missing_key_is_false() {
    assert!(!JobMeta::new().flag(meta_keys::DISABLE_AUTO_RESUME));
}

#[test]
fn adopt_message_ids_takes_newer_values_only() {
    let mut older = JobMeta::new();
    older.insert(meta_keys::MESSAGE_ID, json!("old"));
    older.insert("custom", json!("keep"));

    let mut newer = JobMeta::new();
    newer.insert(meta_keys::MESSAGE_ID, json!("new"));
    newer.insert(meta_keys::STATUS_MSG_ID, json!("st-9"));
    newer.insert("custom", json!("ignored"));

    older.adopt_message_ids(&newer);

    assert_eq!(older.str_value(meta_keys::MESSAGE_ID), Some("new"));
    assert_eq!(older.str_value(meta_keys::STATUS_MSG_ID), Some("st-9"));
    // Non message-id keys are untouched
    assert_eq!(older.str_value("custom"), Some("keep"));
}

#[test]
fn auto_followup_detected_from_either_meta_key() {
    let task = Job::new("s", "p").with_meta(meta_keys::TASK_AUTO_FOLLOWUP, json!(true));
    let delegated =
        Job::new("s", "p").with_meta(meta_keys::DELEGATED_AUTO_FOLLOWUP, json!("true"));
    let plain = Job::new("s", "p");

    assert!(task.is_auto_followup());
    assert!(delegated.is_auto_followup());
    assert!(!plain.is_auto_followup());
}

#[test]
fn chat_state_expiry_is_inclusive() {
    let state = ChatState {
        last_engine: "echo".into(),
        last_resume: None,
        expires_at_ms: 1_000,
    };
    assert!(!state.is_expired(999));
    assert!(state.is_expired(1_000));
    assert!(state.is_expired(1_001));
}

#[test]
fn job_serializes_without_notify() {
    let (tx, _rx) = std::sync::mpsc::channel();
    let job = Job::new("s1", "hi").with_notify(NotifySender::new(tx));

    let value = serde_json::to_value(&job).unwrap();
    assert!(value.get("notify").is_none());
    assert_eq!(value["session_key"], "s1");

    // Round-trips back without the notify address
    let back: Job = serde_json::from_value(value).unwrap();
    assert!(back.notify.is_none());
    assert_eq!(back.prompt, "hi");
}

#[test]
fn queue_mode_serde_uses_snake_case() {
    assert_eq!(
        serde_json::to_value(QueueMode::SteerBacklog).unwrap(),
        json!("steer_backlog")
    );
    let mode: QueueMode = serde_json::from_value(json!("interrupt")).unwrap();
    assert_eq!(mode, QueueMode::Interrupt);
}
