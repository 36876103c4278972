//! A pure-Rust host for driving engines from integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;

use quickjs_bridge::rquickjs::convert::Coerced;
use quickjs_bridge::rquickjs::prelude::Rest;
use quickjs_bridge::rquickjs::{self, Exception, FromJs, Value};
use quickjs_bridge::{Engine, EngineBuilder, Error, EvalKind, Host, Retained, Scope};

pub type MathFn = Box<dyn Fn(&[f64]) -> Result<f64, String> + Send + Sync>;

/// What a test registers with the engine.
pub enum Callable {
    /// Numbers in, number out. An `Err` becomes a host fault.
    Math(MathFn),
    /// Evaluate the source on the same engine and return its numeric result.
    Eval(String),
    /// Try to drive the engine from another thread; returns whether that was refused.
    Probe,
    /// Drop the parked value on another thread while the engine is busy.
    DropParked,
}

#[derive(Default)]
pub struct TestHost {
    pub parked: Mutex<Option<Retained<TestHost>>>,
}

impl Host for TestHost {
    type Callable = Callable;

    fn invoke<'js>(
        &self,
        scope: &Scope<'js, Self>,
        callable: &Callable,
        args: Rest<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>> {
        let ctx = scope.ctx();
        match callable {
            Callable::Math(f) => {
                let nums = args
                    .into_inner()
                    .into_iter()
                    .map(|v| Coerced::<f64>::from_js(ctx, v).map(|c| c.0))
                    .collect::<rquickjs::Result<Vec<_>>>()?;
                match f(&nums) {
                    Ok(n) => Ok(Value::new_number(ctx.clone(), n)),
                    Err(msg) => Err(quickjs_bridge::throw_host_fault(
                        ctx,
                        "host call failed",
                        Arc::new(msg),
                    )),
                }
            }
            Callable::Eval(source) => {
                let nested = scope.engine().enter(|inner| -> quickjs_bridge::Result<f64> {
                    let value = inner.eval(source, EvalKind::Script)?;
                    Ok(value.as_number().unwrap_or(f64::NAN))
                });
                match nested {
                    Ok(Ok(n)) => Ok(Value::new_number(ctx.clone(), n)),
                    Ok(Err(err)) | Err(err) => {
                        Err(Exception::throw_internal(ctx, &err.to_string()))
                    }
                }
            }
            Callable::Probe => {
                let engine = scope.engine().clone();
                let refused = thread::scope(|s| {
                    s.spawn(move || matches!(engine.enter(|_| ()), Err(Error::Protocol(_))))
                        .join()
                        .unwrap()
                });
                Ok(Value::new_bool(ctx.clone(), refused))
            }
            Callable::DropParked => {
                let parked = self.parked.lock().unwrap().take();
                let dropped = parked.is_some();
                thread::scope(|s| {
                    s.spawn(move || drop(parked)).join().unwrap();
                });
                Ok(Value::new_bool(ctx.clone(), dropped))
            }
        }
    }
}

/// Send engine logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine() -> Engine<TestHost> {
    init_tracing();
    EngineBuilder::new().build(TestHost::default()).unwrap()
}

pub fn math(f: impl Fn(&[f64]) -> Result<f64, String> + Send + Sync + 'static) -> Callable {
    Callable::Math(Box::new(f))
}

/// Evaluate `source` as a script and return `JSON.stringify` of the result.
pub fn eval_json(engine: &Engine<TestHost>, source: &str) -> Option<String> {
    engine
        .enter(|scope| -> quickjs_bridge::Result<Option<String>> {
            let value = scope.eval(source, EvalKind::Script)?;
            scope.to_json(value)
        })
        .unwrap()
        .unwrap()
}

/// Evaluate `source` as a script and return the error it raised.
pub fn eval_err(engine: &Engine<TestHost>, source: &str) -> Error {
    engine
        .enter(|scope| scope.eval(source, EvalKind::Script).map(|_| ()))
        .unwrap()
        .unwrap_err()
}
