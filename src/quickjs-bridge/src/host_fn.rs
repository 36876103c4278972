use std::sync::Weak;

use rquickjs::class::{JsClass, Readable, Trace, Tracer};
use rquickjs::function::Constructor;
use rquickjs::prelude::Rest;
use rquickjs::{Class, Ctx, Exception, Function, JsLifetime, Value};

use crate::engine::{Engine, EngineInner};
use crate::error::FaultPayload;
use crate::host::Host;
use crate::metrics::{METRIC_CALLABLE_NAME, METRIC_HOST_CALL_FAILURES, METRIC_HOST_CALLS};
use crate::registry::CallableId;
use crate::scope::Scope;

/// Pins the closure's signature so the returned `Value<'js>` borrows from the `Ctx<'js>` it
/// was handed. Closure lifetimes can't be spelled out directly
/// (<https://github.com/rust-lang/rust/issues/97362>), but are inferred from a bound like this.
fn coerce_fn_signature<F>(f: F) -> F
where
    F: for<'js> Fn(Ctx<'js>, Rest<Value<'js>>) -> rquickjs::Result<Value<'js>>,
{
    f
}

/// The dispatch key a script function carries back to its registry entry.
///
/// Owned by the script function; dropping it (when the function is finalized) frees the
/// entry. It only holds a weak reference, so script functions never keep their engine alive.
struct Lease<H: Host> {
    id: CallableId,
    ticket: Weak<H::Callable>,
    engine: Weak<EngineInner<H>>,
}

impl<H: Host> Lease<H> {
    fn dispatch<'js>(&self, ctx: Ctx<'js>, args: Rest<Value<'js>>) -> rquickjs::Result<Value<'js>> {
        let Some(engine) = Engine::upgrade(&self.engine) else {
            return Err(Exception::throw_internal(&ctx, "engine is gone"));
        };

        if engine.time_limit().is_some() {
            return Err(Exception::throw_internal(
                &ctx,
                "cannot call into host with a time limit set",
            ));
        }

        let Some((name, callable)) = engine.callable(self.id, &self.ticket) else {
            return Err(Exception::throw_internal(
                &ctx,
                &format!("host callable #{} is not registered", self.id.get()),
            ));
        };

        let _phase = match engine.inner.slot.enter_callback(ctx.as_raw()) {
            Ok(phase) => phase,
            Err(err) => return Err(Exception::throw_internal(&ctx, &err.to_string())),
        };

        metrics::counter!(METRIC_HOST_CALLS, METRIC_CALLABLE_NAME => name.clone()).increment(1);
        let scope = Scope::new(engine.clone(), ctx);
        let result = engine.host().invoke(&scope, &callable, args);
        if result.is_err() {
            metrics::counter!(METRIC_HOST_CALL_FAILURES, METRIC_CALLABLE_NAME => name)
                .increment(1);
        }
        result
    }
}

impl<H: Host> Drop for Lease<H> {
    fn drop(&mut self) {
        if let Some(engine) = Engine::upgrade(&self.engine) {
            engine.forget_callable(self.id, &self.ticket);
        }
    }
}

/// Create the script function dispatching to registry entry `id`.
pub(crate) fn callable_function<'js, H: Host>(
    ctx: &Ctx<'js>,
    engine: &Engine<H>,
    id: CallableId,
    ticket: Weak<H::Callable>,
    name: &str,
) -> rquickjs::Result<Function<'js>> {
    let lease = Lease {
        id,
        ticket,
        engine: engine.downgrade(),
    };
    let func = coerce_fn_signature(move |ctx, args| lease.dispatch(ctx, args));
    Function::new(ctx.clone(), func)?.with_name(name)
}

/// Opaque holder of a host failure, attached as the `cause` of the script error reporting it.
///
/// The payload lives as long as the script object does and is dropped by its finalizer.
pub(crate) struct HostFault {
    payload: FaultPayload,
}

impl HostFault {
    pub(crate) fn payload(&self) -> FaultPayload {
        self.payload.clone()
    }
}

unsafe impl<'js> JsLifetime<'js> for HostFault {
    type Changed<'to> = HostFault;
}

impl<'js> Trace<'js> for HostFault {
    fn trace<'a>(&self, _tracer: Tracer<'a, 'js>) {}
}

impl<'js> JsClass<'js> for HostFault {
    const NAME: &'static str = "HostFault";

    type Mutable = Readable;

    fn constructor(_ctx: &Ctx<'js>) -> rquickjs::Result<Option<Constructor<'js>>> {
        Ok(None)
    }
}

/// Build an `Error(message)` whose `cause` holds `payload`.
pub fn host_fault<'js>(
    ctx: &Ctx<'js>,
    message: &str,
    payload: FaultPayload,
) -> rquickjs::Result<Exception<'js>> {
    let exception = Exception::from_message(ctx.clone(), message)?;
    let cause = Class::instance(ctx.clone(), HostFault { payload })?;
    exception.set("cause", cause)?;
    Ok(exception)
}

/// Throw an `Error(message)` whose `cause` holds `payload`.
///
/// The payload comes back as [`ScriptError::fault`](crate::ScriptError::fault) if the
/// exception propagates out of the engine.
pub fn throw_host_fault(ctx: &Ctx<'_>, message: &str, payload: FaultPayload) -> rquickjs::Error {
    match host_fault(ctx, message, payload) {
        Ok(exception) => ctx.throw(exception.into_value()),
        Err(err) => err,
    }
}
