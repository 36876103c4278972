//! Tests for evaluating code and moving values in and out of an engine.

#![allow(clippy::disallowed_macros)]

mod common;

use common::{engine, eval_err, eval_json};
use quickjs_bridge::rquickjs::Value;
use quickjs_bridge::{Error, EvalKind, ScriptErrorKind};

#[test]
fn eval_returns_completion_values() {
    let engine = engine();
    engine
        .enter(|scope| -> quickjs_bridge::Result<()> {
            assert_eq!(scope.eval("1+2", EvalKind::Script)?.as_int(), Some(3));
            assert!(scope.eval("null", EvalKind::Script)?.is_null());
            assert!(scope.eval("undefined", EvalKind::Script)?.is_undefined());
            assert_eq!(scope.eval("0.5", EvalKind::Script)?.as_float(), Some(0.5));
            Ok(())
        })
        .unwrap()
        .unwrap();
}

#[test]
fn objects_serialize_to_json() {
    let engine = engine();
    assert_eq!(eval_json(&engine, "({a:1})").as_deref(), Some(r#"{"a":1}"#));
    assert_eq!(eval_json(&engine, "[1, 'two', null]").as_deref(), Some(r#"[1,"two",null]"#));
    assert_eq!(eval_json(&engine, "(function () {})"), None);
}

#[test]
fn scripts_share_globals() {
    let engine = engine();
    engine
        .enter(|scope| -> quickjs_bridge::Result<()> {
            scope.eval("var counter = 40;", EvalKind::Script)?;
            scope.set_global("step", Value::new_int(scope.ctx().clone(), 2))?;
            assert_eq!(scope.eval("counter + step", EvalKind::Script)?.as_int(), Some(42));
            assert_eq!(scope.get_global("counter")?.as_int(), Some(40));
            assert!(scope.get_global("missing")?.is_undefined());
            Ok(())
        })
        .unwrap()
        .unwrap();
}

#[test]
fn writing_a_read_only_global_fails_to_publish() {
    let engine = engine();
    let result = engine
        .enter(|scope| -> quickjs_bridge::Result<()> {
            scope.eval(
                "Object.defineProperty(globalThis, 'pinned', { value: 1, writable: false })",
                EvalKind::Script,
            )?;
            scope.set_global("pinned", Value::new_int(scope.ctx().clone(), 2))
        })
        .unwrap();
    match result {
        Err(Error::Publish(message)) => {
            assert!(message.starts_with("Failed setting the global variable 'pinned'"), "{message}")
        }
        other => panic!("expected a publish error, got {other:?}"),
    }
}

#[test]
fn parse_json_builds_values() {
    let engine = engine();
    engine
        .enter(|scope| -> quickjs_bridge::Result<()> {
            let value = scope.parse_json(r#"{"list": [1, 2, 3]}"#)?;
            assert_eq!(scope.to_json(value)?.as_deref(), Some(r#"{"list":[1,2,3]}"#));

            let err = scope.parse_json("{nope").unwrap_err();
            assert!(err.to_string().starts_with("SyntaxError"), "{err}");
            Ok(())
        })
        .unwrap()
        .unwrap();
}

#[test]
fn calling_values() {
    let engine = engine();
    engine
        .enter(|scope| -> quickjs_bridge::Result<()> {
            let ctx = scope.ctx().clone();
            let add = scope.eval("(a, b) => a + b", EvalKind::Script)?;
            let sum = scope.call(&add, vec![Value::new_int(ctx.clone(), 2), Value::new_int(ctx.clone(), 3)])?;
            assert_eq!(sum.as_int(), Some(5));

            let not_a_function = scope.eval("({})", EvalKind::Script)?;
            let err = scope.call(&not_a_function, Vec::new()).unwrap_err();
            assert_eq!(err.as_script().map(|e| e.text()), Some("TypeError: not a function"));
            Ok(())
        })
        .unwrap()
        .unwrap();
}

#[test]
fn script_errors_carry_text_and_stack() {
    let engine = engine();
    let err = eval_err(&engine, "function boom() { throw new Error('x') }\nboom()");
    let script = err.as_script().unwrap();
    assert_eq!(script.kind(), ScriptErrorKind::Script);
    assert_eq!(script.text(), "Error: x");
    assert!(script.stack().unwrap().contains("<input>"));
    assert!(err.to_string().starts_with("Error: x\n"));

    let err = eval_err(&engine, "throw null");
    assert_eq!(err.to_string(), "null");

    let err = eval_err(&engine, "throw 'plain'");
    assert_eq!(err.to_string(), "plain");
}

#[test]
fn unbounded_recursion_is_a_stack_overflow() {
    let engine = engine();
    let err = eval_err(&engine, "function f() { return f() + 1 }\nf()");
    assert_eq!(err.as_script().map(|e| e.kind()), Some(ScriptErrorKind::StackOverflow));

    // the engine stays usable afterwards
    assert_eq!(eval_json(&engine, "1 + 1").as_deref(), Some("2"));
}

#[test]
fn modules_run_and_report_rejections() {
    let engine = engine();
    engine
        .enter(|scope| -> quickjs_bridge::Result<()> {
            let value = scope.eval("globalThis.fromModule = 7;", EvalKind::Module)?;
            assert!(value.is_promise());
            assert_eq!(scope.get_global("fromModule")?.as_int(), Some(7));

            let err = scope
                .eval("throw new Error('module failed')", EvalKind::Module)
                .unwrap_err();
            assert_eq!(err.as_script().map(|e| e.text()), Some("Error: module failed"));
            Ok(())
        })
        .unwrap()
        .unwrap();
}

#[test]
fn pending_jobs_run_one_at_a_time() {
    let engine = engine();
    engine
        .enter(|scope| -> quickjs_bridge::Result<()> {
            scope.eval(
                "var steps = 0; Promise.resolve().then(() => { steps += 1 }).then(() => { steps += 1 })",
                EvalKind::Script,
            )?;
            assert_eq!(scope.get_global("steps")?.as_int(), Some(0));
            assert!(scope.run_pending_job()?);
            assert_eq!(scope.get_global("steps")?.as_int(), Some(1));
            while scope.run_pending_job()? {}
            assert_eq!(scope.get_global("steps")?.as_int(), Some(2));
            assert!(!scope.run_pending_job()?);
            Ok(())
        })
        .unwrap()
        .unwrap();
}

#[test]
fn engine_cannot_be_reentered_outside_callbacks() {
    let engine = engine();
    let inner = engine.clone();
    let nested = engine.enter(|_| inner.enter(|_| ())).unwrap();
    assert!(matches!(nested, Err(Error::Protocol(_))));

    // the failed attempt left the engine usable
    assert_eq!(eval_json(&engine, "'ok'").as_deref(), Some(r#""ok""#));
}
