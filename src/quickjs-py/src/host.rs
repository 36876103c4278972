use std::mem::ManuallyDrop;
use std::sync::{Arc, OnceLock};

use pyo3::prelude::*;
use pyo3::types::{PyTuple, PyWeakrefMethods, PyWeakrefReference};
use quickjs_bridge::rquickjs::prelude::Rest;
use quickjs_bridge::rquickjs::{self, Exception, Value};
use quickjs_bridge::{Host, Scope, throw_host_fault};

use crate::context::Context;
use crate::convert::{to_foreign, to_host};

/// Asserts that a value may cross a GIL release.
///
/// `Python::detach` runs its closure on the current thread and hands the result straight
/// back, so nothing wrapped here actually changes threads.
pub(crate) struct Unguarded<T>(pub(crate) T);

// SAFETY:
// Only used to move values into and out of `Python::detach` on the same thread.
unsafe impl<T> Send for Unguarded<T> {}

impl<T> Unguarded<T> {
    pub(crate) fn into_inner(self) -> T {
        self.0
    }
}

/// A Python object released with the GIL held, whichever thread drops it.
pub(crate) struct GilBound<T>(ManuallyDrop<T>);

impl<T> GilBound<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(ManuallyDrop::new(value))
    }

    pub(crate) fn get(&self) -> &T {
        &self.0
    }
}

impl<T> Drop for GilBound<T> {
    fn drop(&mut self) {
        // SAFETY: the value is taken exactly once, here.
        let value = unsafe { ManuallyDrop::take(&mut self.0) };
        Python::attach(|_py| drop(value));
    }
}

/// Drives an engine on behalf of the Python interpreter.
///
/// The GIL is released while script code runs and taken back for every Python callable the
/// script invokes.
#[derive(Default)]
pub(crate) struct PyHost {
    context: OnceLock<Py<PyWeakrefReference>>,
}

impl PyHost {
    /// Remember the Python object owning this engine.
    pub(crate) fn adopt(&self, context: &Bound<'_, Context>) -> PyResult<()> {
        if self.context.get().is_none() {
            let weak = PyWeakrefReference::new(context)?;
            let _ = self.context.set(weak.unbind());
        }
        Ok(())
    }

    fn context(&self, py: Python<'_>) -> Option<Py<Context>> {
        let weak = self.context.get()?.bind(py);
        weak.upgrade_as::<Context>().ok().flatten().map(Bound::unbind)
    }
}

impl Host for PyHost {
    type Callable = GilBound<Py<PyAny>>;

    fn suspend<R>(&self, run: impl FnOnce() -> R) -> R {
        let run = Unguarded(run);
        Python::attach(|py| py.detach(move || Unguarded(run.into_inner()())))
            .into_inner()
    }

    fn invoke<'js>(
        &self,
        scope: &Scope<'js, Self>,
        callable: &Self::Callable,
        args: Rest<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>> {
        let ctx = scope.ctx();
        Python::attach(|py| {
            let Some(context) = self.context(py) else {
                return Err(Exception::throw_internal(ctx, "context is gone"));
            };
            let args = args
                .into_inner()
                .into_iter()
                .map(|value| to_host(py, scope, &context, value))
                .collect::<PyResult<Vec<_>>>()
                .and_then(|args| PyTuple::new(py, args));
            let args = match args {
                Ok(args) => args,
                Err(err) => return Err(Exception::throw_internal(ctx, &err.to_string())),
            };

            let result = match callable.get().bind(py).call1(args) {
                Ok(result) => result,
                Err(err) => {
                    tracing::debug!(error = %err, "python callable raised");
                    return Err(throw_host_fault(
                        ctx,
                        "Python call failed",
                        Arc::new(GilBound::new(err)),
                    ));
                }
            };
            to_foreign(scope, &result).map_err(|_| {
                Exception::throw_type(ctx, "cannot convert result of Python call")
            })
        })
    }
}
