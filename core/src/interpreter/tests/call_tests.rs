//! Tests for call / return and the branching commands

use super::helpers::harness;
use crate::interpreter::context::{ExecContext, RequestContext};
use crate::interpreter::frames::{push_frame, return_frame, ReturnSpec};
use maplit::hashmap;
use serde_json::{json, Map};
use std::sync::Arc;

#[test]
fn test_explicit_return_binds_in_order() {
    let h = harness(&[
        ("MAIN_1", r#"call:{"action": "SUB", "result": "request:a, request:b"}"#),
        ("SUB_1", r#"var:{"assign": {"x": "1", "y": "'two'"}}"#),
        ("SUB_2", "return:x,y"),
        ("SUB_3", "record:unreachable"),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("a"), Some(json!(1)));
    assert_eq!(request.global("b"), Some(json!("two")));
    assert!(h.logged().is_empty());
}

#[test]
fn test_discard_slot_is_skipped() {
    let h = harness(&[
        ("MAIN_1", r#"call:{"action": "SUB", "result": "_, request:b"}"#),
        ("SUB_1", r#"var:{"assign": {"x": "1", "y": "2"}}"#),
        ("SUB_2", "return:x, y"),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("b"), Some(json!(2)));
    assert_eq!(request.global("_"), None);
}

#[test]
fn test_implicit_return_reads_result_names() {
    let h = harness(&[
        ("MAIN_1", r#"call:{"action": "SUB", "result": "out, missing"}"#),
        ("MAIN_2", r#"var:{"assign": {"request:out": "out", "request:flag": "missing == null"}}"#),
        ("SUB_1", r#"var:{"assign": {"out": "3 * 7"}}"#),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("out"), Some(json!(21)));
    assert_eq!(request.global("flag"), Some(json!(true)));
}

#[test]
fn test_explicit_missing_name_returns_empty_string() {
    let h = harness(&[
        ("MAIN_1", r#"call:{"action": "SUB", "result": "request:r"}"#),
        ("SUB_1", "return:nothing"),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("r"), Some(json!("")));
}

#[test]
fn test_callee_writes_do_not_leak() {
    let h = harness(&[
        ("MAIN_1", r#"call:{"action": "SUB"}"#),
        ("MAIN_2", r#"var:{"assign": {"request:seen": "seen"}}"#),
        ("SUB_1", r#"var:{"assign": {"seen": "1"}}"#),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("seen"), Some(json!(null)));
}

#[test]
fn test_callee_sees_caller_variables() {
    let h = harness(&[
        ("MAIN_1", r#"var:{"assign": {"x": "5"}}"#),
        ("MAIN_2", r#"call:{"action": "SUB"}"#),
        ("SUB_1", "record:x={{x}}"),
    ]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["x=5"]);
}

#[test]
fn test_call_params_resolve_addresses() {
    let h = harness(&[
        ("MAIN_1", r#"var:{"assign": {"user": "{name: 'ann', age: 30}"}}"#),
        (
            "MAIN_2",
            r#"call:{"action": "SUB", "params": {"who": "@user.name", "plain": "user.name", "n": 7}}"#,
        ),
        ("SUB_1", "record:{{who}}|{{plain}}|{{n}}"),
    ]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["ann|user.name|7"]);
}

#[test]
fn test_call_to_return_pseudo_action() {
    let h = harness(&[
        ("MAIN_1", r#"call:{"action": "SUB", "result": "request:answer"}"#),
        ("SUB_1", r#"call:{"action": "return", "params": {"answer": 42}}"#),
        ("SUB_2", "record:unreachable"),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("answer"), Some(json!(42)));
    assert!(h.logged().is_empty());
}

#[test]
fn test_nested_calls_unwind() {
    let h = harness(&[
        ("MAIN_1", r#"call:{"action": "A", "result": "request:total"}"#),
        ("A_1", r#"call:{"action": "B", "params": {"n": 1}, "result": "got"}"#),
        ("A_2", "return:got"),
        ("B_1", r#"call:{"action": "C", "params": {"n": "@n"}, "result": "got"}"#),
        ("B_2", r#"var:{"assign": {"got": "got + 10"}}"#),
        ("B_3", "return:got"),
        ("C_1", r#"var:{"assign": {"got": "n + 100"}}"#),
        ("C_2", "return:got"),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("total"), Some(json!(111)));
}

#[test]
fn test_push_and_return_restore_stack() {
    let h = harness(&[]);
    let request = Arc::new(RequestContext::new(Map::new()));
    let mut ctx = ExecContext::new(h.engine.clone(), Arc::clone(&request));

    assert_eq!(ctx.level(), -1);
    for action in ["A", "B", "C"] {
        push_frame(&mut ctx, action, ReturnSpec::ignore(), Map::new());
    }
    assert_eq!(ctx.level(), 2);
    assert_ne!(ctx.current_scope(), request.root());

    for _ in 0..3 {
        assert!(return_frame(&mut ctx, None));
    }
    assert_eq!(ctx.level(), -1);
    assert_eq!(ctx.current_scope(), request.root());
    assert!(!return_frame(&mut ctx, None));
}

#[test]
fn test_if_picks_branch() {
    let h = harness(&[
        (
            "MAIN_1",
            r#"if:{"condition": "n > 2", "then": {"action": "BIG"}, "else": {"action": "SMALL"}}"#,
        ),
        ("BIG_1", "record:big"),
        ("SMALL_1", "record:small"),
    ]);

    h.run("MAIN", hashmap! { "n" => json!(5) });
    h.run("MAIN", hashmap! { "n" => json!(1) });

    assert_eq!(h.logged(), vec!["big", "small"]);
}

#[test]
fn test_if_without_branch_is_a_no_op() {
    let h = harness(&[
        ("MAIN_1", r#"if:{"condition": "false", "then": {"action": "NEVER"}}"#),
        ("MAIN_2", "record:after"),
        ("NEVER_1", "record:never"),
    ]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(h.logged(), vec!["after"]);
}

#[test]
fn test_if_branch_returns_values() {
    let h = harness(&[
        (
            "MAIN_1",
            r#"if:{"condition": "true", "then": {"action": "PICK", "params": {"v": "yes"}, "result": "request:picked"}}"#,
        ),
        ("PICK_1", "return:v"),
    ]);

    let (ok, request) = h.run("MAIN", hashmap! {});

    assert!(ok);
    assert_eq!(request.global("picked"), Some(json!("yes")));
}

#[test]
fn test_if_condition_error_fails() {
    let h = harness(&[("MAIN_1", r#"?if:{"condition": "n >", "then": {"action": "X"}}"#)]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(ok, "optional instruction failure continues");

    let h = harness(&[("MAIN_1", r#"if:{"condition": "n >", "then": {"action": "X"}}"#)]);
    let (ok, _) = h.run("MAIN", hashmap! {});
    assert!(!ok);
}

#[test]
fn test_if_empty_and_if_array() {
    let h = harness(&[
        (
            "MAIN_1",
            r#"ifEmpty:{"condition": "items", "then": {"action": "EMPTY"}, "else": {"action": "FULL"}}"#,
        ),
        (
            "MAIN_2",
            r#"ifArray:{"condition": "items", "then": {"action": "ARRAY"}, "else": {"action": "OTHER"}}"#,
        ),
        ("EMPTY_1", "record:empty"),
        ("FULL_1", "record:full"),
        ("ARRAY_1", "record:array"),
        ("OTHER_1", "record:other"),
    ]);

    h.run("MAIN", hashmap! { "items" => json!([]) });
    h.run("MAIN", hashmap! { "items" => json!([1]) });
    h.run("MAIN", hashmap! { "items" => json!("text") });
    h.run("MAIN", hashmap! {});

    assert_eq!(
        h.logged(),
        vec!["empty", "array", "full", "array", "full", "other", "empty", "other"]
    );
}

#[test]
fn test_switch_takes_first_true_case_in_order() {
    let h = harness(&[
        (
            "MAIN_1",
            r#"switch:{"cases": {"n > 10": "HUGE", "n > 2": "BIG"}, "defaultAction": "SMALL"}"#,
        ),
        ("HUGE_1", "record:huge"),
        ("BIG_1", "record:big"),
        ("SMALL_1", "record:small"),
    ]);

    h.run("MAIN", hashmap! { "n" => json!(20) });
    h.run("MAIN", hashmap! { "n" => json!(5) });
    h.run("MAIN", hashmap! { "n" => json!(1) });

    assert_eq!(h.logged(), vec!["huge", "big", "small"]);
}

#[test]
fn test_switch_evaluates_against_request_scope() {
    let h = harness(&[
        ("MAIN_1", r#"call:{"action": "INNER", "params": {"n": 100}}"#),
        (
            "INNER_1",
            r#"switch:{"cases": {"n > 10": "HUGE"}, "defaultAction": "SMALL", "params": {"m": "@n"}}"#,
        ),
        ("HUGE_1", "record:huge {{m}}"),
        ("SMALL_1", "record:small {{m}}"),
    ]);

    h.run("MAIN", hashmap! { "n" => json!(1) });

    assert_eq!(h.logged(), vec!["small 100"]);
}

#[test]
fn test_switch_rejects_non_string_case() {
    let h = harness(&[("MAIN_1", r#"switch:{"cases": {"true": 1}}"#)]);

    let (ok, _) = h.run("MAIN", hashmap! {});

    assert!(!ok);
}
