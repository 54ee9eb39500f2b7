// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn defaults_match_documented_values() {
    let config = SwitchboardConfig::default();
    assert_eq!(config.max_concurrent_runs, 2);
    assert!(config.require_engine_lock);
    assert_eq!(config.engine_lock_timeout_ms, 60_000);
    assert_eq!(config.engine_lock_max_hold_ms, 300_000);
    assert_eq!(config.followup_debounce_ms, 500);
    assert!(!config.auto_resume);
    assert_eq!(config.default_engine, "lemon");
    assert_eq!(config.chat_state_ttl_ms, 86_400_000);
    assert_eq!(config.queue.cap, None);
    assert_eq!(config.queue.drop, DropPolicy::Oldest);
}

#[test]
fn parses_full_toml() {
    let toml = r#"
        max_concurrent_runs = 4
        require_engine_lock = false
        engine_lock_timeout_ms = 5000
        engine_lock_max_hold_ms = 60000
        followup_debounce_ms = 250
        auto_resume = true
        default_engine = "echo"

        [queue]
        cap = 16
        drop = "newest"
    "#;
    let config: SwitchboardConfig = toml::from_str(toml).unwrap();
    assert_eq!(config.max_concurrent_runs, 4);
    assert!(!config.require_engine_lock);
    assert_eq!(config.engine_lock_timeout_ms, 5_000);
    assert!(config.auto_resume);
    assert_eq!(config.default_engine, "echo");
    assert_eq!(config.queue.cap, Some(16));
    assert_eq!(config.queue.drop, DropPolicy::Newest);
}

#[test]
fn partial_toml_keeps_defaults() {
    let config: SwitchboardConfig = toml::from_str("max_concurrent_runs = 8").unwrap();
    assert_eq!(config.max_concurrent_runs, 8);
    assert_eq!(config.default_engine, "lemon");
    assert_eq!(config.queue.drop, DropPolicy::Oldest);
}

#[yare::parameterized(
    zero = { 0 },
    negative = { -3 },
)]
fn non_positive_cap_normalizes_to_ten(value: i64) {
    let config = SwitchboardConfig {
        max_concurrent_runs: value,
        ..SwitchboardConfig::default()
    };
    assert_eq!(config.normalized().max_concurrent_runs, 10);
}

#[test]
fn positive_cap_survives_normalization() {
    let config = SwitchboardConfig {
        max_concurrent_runs: 7,
        ..SwitchboardConfig::default()
    }
    .normalized();
    assert_eq!(config.max_concurrent_runs, 7);
    assert_eq!(config.max_runs(), 7);
}

#[yare::parameterized(
    default_capped = { 300_000, None, 30_000 },
    short_hold = { 10_000, None, 10_000 },
    disabled_hold = { 0, None, 30_000 },
    explicit = { 300_000, Some(5_000), 5_000 },
)]
fn reap_interval_derivation(hold: u64, explicit: Option<u64>, expected: u64) {
    let config = SwitchboardConfig {
        engine_lock_max_hold_ms: hold,
        engine_lock_reap_interval_ms: explicit,
        ..SwitchboardConfig::default()
    };
    assert_eq!(config.reap_interval_ms(), expected);
}

#[test]
fn load_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = SwitchboardConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, SwitchboardConfig::default());
}

#[test]
fn load_reads_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("switchboard.toml");
    std::fs::write(&path, "default_engine = \"cli\"\n").unwrap();

    let config = SwitchboardConfig::load(&path).unwrap();
    assert_eq!(config.default_engine, "cli");
}

#[test]
fn load_rejects_malformed_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "max_concurrent_runs = \"lots\"").unwrap();

    assert!(matches!(
        SwitchboardConfig::load(&path),
        Err(ConfigError::Parse(_))
    ));
}
