use rquickjs::context::EvalOptions;
use rquickjs::prelude::Rest;
use rquickjs::promise::PromiseState;
use rquickjs::{Ctx, Exception, Persistent, Value, qjs};
use tracing::instrument;

use crate::engine::Engine;
use crate::error::{Error, Result, catch};
use crate::host::Host;
use crate::host_fn::callable_function;
use crate::registry::CallableId;
use crate::retained::Retained;
use crate::stats::MemoryStats;

/// File name reported in backtraces for evaluated source.
pub const SOURCE_NAME: &str = "<input>";

/// How source code passed to [`Scope::eval`] is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// Sloppy-mode global code; the completion value is returned.
    Script,
    /// An ES module; the module's evaluation promise is returned.
    Module,
}

/// Exclusive access to an engine's context, handed out by [`Engine::enter`].
pub struct Scope<'js, H: Host> {
    engine: Engine<H>,
    ctx: Ctx<'js>,
}

impl<'js, H: Host> Scope<'js, H> {
    pub(crate) fn new(engine: Engine<H>, ctx: Ctx<'js>) -> Self {
        Self { engine, ctx }
    }

    /// The context, for building values.
    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    /// The engine this scope belongs to.
    pub fn engine(&self) -> &Engine<H> {
        &self.engine
    }

    /// Take the pending exception (if any) behind `err`.
    pub fn catch(&self, err: rquickjs::Error) -> Error {
        catch(&self.ctx, err)
    }

    /// Run script code with the time limit armed and the host suspended.
    fn suspended<T>(&self, run: impl FnOnce() -> T) -> Result<T> {
        let inner = &self.engine.inner;
        let _phase = inner.slot.enter_foreign()?;
        let _armed = inner.clock.arm();
        Ok(inner.host.suspend(run))
    }

    fn foreign<T>(&self, run: impl FnOnce() -> rquickjs::Result<T>) -> Result<T> {
        self.suspended(run)?.map_err(|err| self.catch(err))
    }

    /// Evaluate `source`.
    #[instrument(skip_all, level = "debug")]
    pub fn eval(&self, source: &str, kind: EvalKind) -> Result<Value<'js>> {
        let mut options = EvalOptions::default();
        options.global = kind == EvalKind::Script;
        options.strict = false;
        options.filename = Some(SOURCE_NAME.to_string());

        let value: Value<'js> = self.foreign(|| self.ctx.eval_with_options(source, options))?;

        if kind == EvalKind::Module
            && let Some(promise) = value.as_promise()
            && matches!(promise.state(), PromiseState::Rejected)
            && let Some(Err(err)) = promise.result::<Value>()
        {
            return Err(self.catch(err));
        }
        Ok(value)
    }

    /// Call `callee` with `args`.
    #[instrument(skip_all, level = "debug")]
    pub fn call(&self, callee: &Value<'js>, args: Vec<Value<'js>>) -> Result<Value<'js>> {
        let Some(function) = callee.as_function() else {
            return Err(self.catch(Exception::throw_type(&self.ctx, "not a function")));
        };
        self.foreign(|| function.call::<_, Value>((Rest(args),)))
    }

    /// Run one queued job, returning whether there was one.
    pub fn run_pending_job(&self) -> Result<bool> {
        let rt = self.runtime();
        let (status, failing) = self.suspended(|| {
            let mut failing: *mut qjs::JSContext = std::ptr::null_mut();
            // SAFETY: `rt` belongs to this scope's context, whose runtime lock is held for the
            // whole scope; `failing` is a valid out-pointer.
            let status = unsafe { qjs::JS_ExecutePendingJob(rt, &mut failing) };
            (status, failing)
        })?;
        if status >= 0 {
            return Ok(status > 0);
        }
        match std::ptr::NonNull::new(failing) {
            Some(failing) => {
                // SAFETY: the engine hands back the context whose job failed; the runtime lock is held.
                let failing = unsafe { Ctx::from_raw(failing) };
                Err(catch(&failing, rquickjs::Error::Exception))
            }
            None => Err(self.catch(rquickjs::Error::Exception)),
        }
    }

    /// `JSON.parse(text)`.
    pub fn parse_json(&self, text: &str) -> Result<Value<'js>> {
        self.ctx.json_parse(text).map_err(|err| self.catch(err))
    }

    /// `JSON.stringify(value)`, `None` when the value has no JSON form.
    pub fn to_json(&self, value: Value<'js>) -> Result<Option<String>> {
        self.ctx
            .json_stringify(value)
            .and_then(|text| text.map(|text| text.to_string()).transpose())
            .map_err(|err| self.catch(err))
    }

    /// Read a global.
    pub fn get_global(&self, name: &str) -> Result<Value<'js>> {
        self.ctx
            .globals()
            .get(name)
            .map_err(|err| self.catch(err))
    }

    /// Write a global. Fails with [`Error::Publish`] when the engine refuses the write.
    pub fn set_global(&self, name: &str, value: Value<'js>) -> Result<()> {
        self.ctx.globals().set(name, value).map_err(|err| {
            match self.catch(err) {
                Error::Script(err) => Error::Publish(format!(
                    "Failed setting the global variable '{name}': {}",
                    err.text()
                )),
                other => other,
            }
        })
    }

    /// Publish `callable` as the global function `name`.
    ///
    /// The registry slot is taken first. If publishing fails the slot stays taken until
    /// the script function is finalized or the engine is torn down.
    #[instrument(skip(self, callable), level = "debug")]
    pub fn register_callable(&self, name: &str, callable: H::Callable) -> Result<CallableId> {
        let (id, ticket) = self.engine.retain_callable(name, callable)?;
        let function = callable_function(&self.ctx, &self.engine, id, ticket, name)
            .map_err(|err| self.catch(err))?;
        self.ctx
            .globals()
            .set(name, function)
            .map_err(|err| {
                tracing::debug!(error = %self.catch(err), name, "publishing callable failed");
                Error::Publish("Failed adding the callable.".to_string())
            })?;
        Ok(id)
    }

    /// Keep `value` alive beyond this scope.
    pub fn retain(&self, value: Value<'js>) -> Retained<H> {
        Retained::new(self.engine.clone(), Persistent::save(&self.ctx, value))
    }

    /// Get back a value kept with [`Scope::retain`].
    pub fn restore(&self, retained: &Retained<H>) -> Result<Value<'js>> {
        if !self.engine.same_engine(retained.engine()) {
            return Err(Error::ForeignHandle);
        }
        retained
            .persistent()
            .clone()
            .restore(&self.ctx)
            .map_err(|_| Error::ForeignHandle)
    }

    /// Run a full garbage collection cycle.
    pub fn collect_garbage(&self) {
        self.ctx.run_gc();
    }

    fn runtime(&self) -> *mut qjs::JSRuntime {
        // SAFETY: `ctx` is a live context for as long as this scope exists.
        unsafe { qjs::JS_GetRuntime(self.ctx.as_raw().as_ptr()) }
    }

    /// Set the allocation limit in bytes, 0 for none.
    pub fn set_memory_limit(&self, bytes: usize) {
        // SAFETY: the runtime lock is held while the scope exists.
        unsafe { qjs::JS_SetMemoryLimit(self.runtime(), bytes as _) };
    }

    /// Set the stack limit in bytes, 0 for none.
    pub fn set_max_stack_size(&self, bytes: usize) {
        // SAFETY: the runtime lock is held while the scope exists.
        unsafe { qjs::JS_SetMaxStackSize(self.runtime(), bytes as _) };
    }

    /// Snapshot of the engine's memory counters.
    pub fn memory_stats(&self) -> MemoryStats {
        let mut usage = std::mem::MaybeUninit::<qjs::JSMemoryUsage>::uninit();
        // SAFETY: the runtime lock is held and the engine fills every field.
        let usage = unsafe {
            qjs::JS_ComputeMemoryUsage(self.runtime(), usage.as_mut_ptr());
            usage.assume_init()
        };
        MemoryStats::from(usage)
    }
}
