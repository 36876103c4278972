//! Tests for Python callables exposed to script code.

#![allow(clippy::disallowed_macros)]

mod common;

use common::run_python;

#[test]
fn script_code_calls_python() {
    run_python(
        r#"
        context = quickjs.Context()
        seen = []
        def special(x, y):
            seen.append((x, y))
            return x * 10 + y
        context.add_callable("special", special)
        assert context.eval("special(4, 2)") == 42
        assert seen == [(4, 2)]

        context.add_callable("concat", lambda a, b: a + "-" + b)
        assert context.eval("concat('aaa', 'bbb')") == "aaa-bbb"

        context.add_callable("nothing", lambda: None)
        assert context.eval("nothing()") is None
        "#,
    );
}

#[test]
fn python_errors_travel_back_as_the_cause() {
    run_python(
        r#"
        context = quickjs.Context()
        def fail():
            raise ValueError("from python")
        context.add_callable("fail", fail)

        err = raises(quickjs.HostCallError, "Python call failed", lambda: context.eval("fail()"))
        assert isinstance(err, quickjs.JSException)
        assert isinstance(err.__cause__, ValueError)
        assert str(err.__cause__) == "from python"

        assert context.eval("(() => { try { fail() } catch (e) { return e.message } })()") == "Python call failed"

        context.add_callable("p", lambda: 42)
        assert context.eval("p()") == 42
        raises(quickjs.JSException, "Python call failed", lambda: context.eval("p(1)"))
        raises(quickjs.JSException, "Python call failed", lambda: context.eval("p({})"))
        "#,
    );
}

#[test]
fn unconvertible_results_raise_script_errors() {
    run_python(
        r#"
        context = quickjs.Context()
        context.add_callable("test_list", lambda: [1, 2, 3])
        raises(quickjs.JSException, "TypeError: cannot convert result of Python call",
               lambda: context.eval("test_list()"))
        "#,
    );
}

#[test]
fn registration_errors() {
    run_python(
        r#"
        context = quickjs.Context()
        raises(TypeError, "Argument must be callable.", lambda: context.add_callable("f", 1))

        context.eval("Object.defineProperty(globalThis, 'locked', { value: 1, writable: false })")
        raises(TypeError, "Failed adding the callable.", lambda: context.add_callable("locked", lambda: 1))
        "#,
    );
}

#[test]
fn callables_can_use_their_context() {
    run_python(
        r#"
        context = quickjs.Context()
        context.add_callable("f", lambda: 40 + context.eval("1 + 1"))
        assert context.eval("f()") == 42

        inner = context.eval("(function() { return 42; })")
        context.add_callable("g", lambda: inner())
        assert context.eval("g()") == 42

        context.add_callable("twice", lambda fn, x: fn(fn(x)))
        assert context.eval("twice((x) => x + 1, 40)") == 42
        "#,
    );
}

#[test]
fn callables_are_refused_while_a_time_limit_is_set() {
    run_python(
        r#"
        context = quickjs.Context()
        context.add_callable("f", lambda x: x + 2)
        context.set_time_limit(1000)
        raises(quickjs.JSException, "cannot call into host with a time limit set",
               lambda: context.eval("f(40)"))
        context.set_time_limit(-1)
        assert context.eval("f(40)") == 42
        "#,
    );
}

#[test]
fn callable_slots_are_bounded() {
    run_python(
        r#"
        context = quickjs.Context()
        for i in range(65535):
            context.add_callable(f"f{i}", lambda: i)
        raises(RuntimeError, "Callables slots exhausted.", lambda: context.add_callable("more", lambda: 0))
        "#,
    );
}

#[test]
fn cycles_through_the_engine_are_collected() {
    run_python(
        r#"
        import gc
        import weakref

        class Marker:
            pass

        def build():
            context = quickjs.Context()
            marker = Marker()
            identity = context.eval("(x) => x")
            context.add_callable("keep", lambda: (marker, identity))
            return weakref.ref(marker)

        ref = build()
        gc.collect()
        assert ref() is None
        "#,
    );
}

#[test]
fn script_closures_over_callables_are_collected() {
    run_python(
        r#"
        import gc
        import weakref

        class Marker:
            pass

        def build():
            context = quickjs.Context()
            marker = Marker()
            holder = {}
            def cb():
                return holder["h"] is not None and marker is not None
            context.add_callable("cb", cb)
            holder["h"] = context.eval("(() => { const k = cb; return () => k(); })()")
            assert holder["h"]() is True
            return weakref.ref(marker), weakref.ref(context)

        marker_ref, context_ref = build()
        gc.collect()
        assert marker_ref() is None
        assert context_ref() is None
        "#,
    );
}
