//! Tests for forked instructions and async commands

use super::helpers::harness;
use maplit::hashmap;
use serde_json::json;
use std::time::{Duration, Instant};

#[test]
fn test_parallel_instructions_overlap() {
    let h = harness(&[
        ("MAIN_1", "!sleep:200"),
        ("MAIN_2", "!sleep:200"),
        ("MAIN_3", "record:queued"),
    ]);

    let started = Instant::now();
    let (ok, _) = h.run("MAIN", hashmap! {});
    let elapsed = started.elapsed();

    assert!(ok);
    assert_eq!(h.logged(), vec!["queued"]);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(390), "took {:?}", elapsed);
}

#[test]
fn test_cycle_waits_for_forked_call() {
    let h = harness(&[
        ("MAIN_1", r#"!call:{"action": "SLOW"}"#),
        ("MAIN_2", "record:main"),
        ("SLOW_1", "sleep:100"),
        ("SLOW_2", "record:slow"),
    ]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["main", "slow"]);
}

#[test]
fn test_forked_call_writes_shared_request() {
    let h = harness(&[
        ("MAIN_1", r#"!call:{"action": "SET", "params": {"v": 7}}"#),
        ("SET_1", r#"var:{"assign": {"request:seen": "v"}}"#),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("seen"), Some(json!(7)));
}

#[test]
fn test_forked_failure_does_not_stop_sequence() {
    let h = harness(&[("MAIN_1", "!fail:"), ("MAIN_2", "record:after")]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["after"]);
}

#[test]
fn test_async_command_joined_before_cycle_ends() {
    let h = harness(&[("MAIN_1", "spawn:100"), ("MAIN_2", "record:main")]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["main", "spawned"]);
}

#[test]
fn test_async_command_ignores_parallel_flag() {
    let h = harness(&[("MAIN_1", "!spawn:50"), ("MAIN_2", "record:main")]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["main", "spawned"]);
}

#[test]
fn test_idle_runs_on_forked_thread() {
    let h = harness(&[("MAIN_1", "!10,0,0,record:late"), ("MAIN_2", "record:early")]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["early", "late"]);
}

#[test]
fn test_forked_call_outlives_caller_frame() {
    let h = harness(&[
        ("MAIN_1", r#"var:{"assign": {"who": "'main'"}}"#),
        ("MAIN_2", r#"!call:{"action": "LATE"}"#),
        ("LATE_1", "sleep:100"),
        ("LATE_2", r#"call:{"action": "SHOW"}"#),
        ("SHOW_1", "record:{{who}}"),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["main"]);
    assert_eq!(request.scopes().len(), 1);
}
