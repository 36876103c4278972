use pyo3::exceptions::{PyRuntimeError, PyTypeError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTuple};
use pyo3::{PyTraverseError, PyVisit};
use quickjs_bridge::{Engine, EngineBuilder, EvalKind, Retained, Scope};

use crate::convert::{ensure_representable, to_foreign, to_foreign_args, to_host};
use crate::errors::to_py_err;
use crate::host::{GilBound, PyHost};

/// An engine with its own global scope.
///
/// A context may be used from any thread, but only by one at a time. Using it while another
/// thread is running code in it raises `RuntimeError`.
#[pyclass(frozen, weakref, module = "quickjs")]
pub struct Context {
    engine: Engine<PyHost>,
}

impl Context {
    pub(crate) fn create() -> PyResult<Self> {
        let engine = EngineBuilder::new()
            .build(PyHost::default())
            .map_err(|err| PyRuntimeError::new_err(format!("{err:#}")))?;
        Ok(Self { engine })
    }

    /// Run `f` with the engine entered on behalf of `slf`.
    fn run<T>(
        slf: &Bound<'_, Self>,
        f: impl for<'js> FnOnce(&Scope<'js, PyHost>, &Py<Context>) -> PyResult<T>,
    ) -> PyResult<T> {
        let this = slf.get();
        this.engine.host().adopt(slf)?;
        let context = slf.clone().unbind();
        this.engine
            .enter(|scope| f(scope, &context))
            .map_err(to_py_err)?
    }

    fn evaluate(slf: &Bound<'_, Self>, code: &str, kind: EvalKind) -> PyResult<Py<PyAny>> {
        let py = slf.py();
        Self::run(slf, |scope, context| {
            let value = scope.eval(code, kind).map_err(to_py_err)?;
            to_host(py, scope, context, value)
        })
    }

    pub(crate) fn call_value(
        slf: &Bound<'_, Self>,
        callee: &Retained<PyHost>,
        args: &Bound<'_, PyTuple>,
    ) -> PyResult<Py<PyAny>> {
        let py = slf.py();
        Self::run(slf, |scope, context| {
            let args = to_foreign_args(scope, args)?;
            let callee = scope.restore(callee).map_err(to_py_err)?;
            let value = scope.call(&callee, args).map_err(to_py_err)?;
            to_host(py, scope, context, value)
        })
    }

    pub(crate) fn json_of(
        slf: &Bound<'_, Self>,
        value: &Retained<PyHost>,
    ) -> PyResult<Option<String>> {
        Self::run(slf, |scope, _| {
            let value = scope.restore(value).map_err(to_py_err)?;
            scope.to_json(value).map_err(to_py_err)
        })
    }
}

#[pymethods]
impl Context {
    #[new]
    fn py_new() -> PyResult<Self> {
        Self::create()
    }

    /// Evaluate `code` as a script and return its completion value.
    pub(crate) fn eval(slf: &Bound<'_, Self>, code: &str) -> PyResult<Py<PyAny>> {
        Self::evaluate(slf, code, EvalKind::Script)
    }

    /// Evaluate `code` as an ES module and return its evaluation promise.
    fn module(slf: &Bound<'_, Self>, code: &str) -> PyResult<Py<PyAny>> {
        Self::evaluate(slf, code, EvalKind::Module)
    }

    /// Run one queued job, returning whether there was one.
    pub(crate) fn execute_pending_job(slf: &Bound<'_, Self>) -> PyResult<bool> {
        Self::run(slf, |scope, _| scope.run_pending_job().map_err(to_py_err))
    }

    /// `JSON.parse(text)`.
    pub(crate) fn parse_json(slf: &Bound<'_, Self>, text: &str) -> PyResult<Py<PyAny>> {
        let py = slf.py();
        Self::run(slf, |scope, context| {
            let value = scope.parse_json(text).map_err(to_py_err)?;
            to_host(py, scope, context, value)
        })
    }

    /// Read the global `name`.
    pub(crate) fn get(slf: &Bound<'_, Self>, name: &str) -> PyResult<Py<PyAny>> {
        let py = slf.py();
        Self::run(slf, |scope, context| {
            let value = scope.get_global(name).map_err(to_py_err)?;
            to_host(py, scope, context, value)
        })
    }

    /// Write the global `name`.
    fn set(slf: &Bound<'_, Self>, name: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        ensure_representable(value)?;
        Self::run(slf, |scope, _| {
            let value = to_foreign(scope, value)?;
            scope.set_global(name, value).map_err(to_py_err)
        })
    }

    /// Limit the engine's memory to `bytes`, 0 for no limit.
    pub(crate) fn set_memory_limit(&self, bytes: usize) -> PyResult<()> {
        self.engine.set_memory_limit(bytes).map_err(to_py_err)
    }

    /// Limit each call to `seconds` of CPU time. A negative value removes the limit.
    ///
    /// Python callables cannot be called from script code while a limit is set.
    pub(crate) fn set_time_limit(&self, seconds: f64) {
        self.engine.set_time_limit(seconds);
    }

    /// Limit the engine's stack to `bytes`, 0 for no limit.
    pub(crate) fn set_max_stack_size(&self, bytes: usize) -> PyResult<()> {
        self.engine.set_max_stack_size(bytes).map_err(to_py_err)
    }

    /// The engine's memory counters.
    pub(crate) fn memory<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let stats = self.engine.memory_stats().map_err(to_py_err)?;
        let dict = PyDict::new(py);
        for (name, value) in stats.entries() {
            dict.set_item(name, value)?;
        }
        Ok(dict)
    }

    /// Run the garbage collector.
    pub(crate) fn gc(&self) -> PyResult<()> {
        self.engine.collect_garbage().map_err(to_py_err)
    }

    /// Expose `callable` to script code as the global function `name`.
    pub(crate) fn add_callable(
        slf: &Bound<'_, Self>,
        name: &str,
        callable: &Bound<'_, PyAny>,
    ) -> PyResult<()> {
        if !callable.is_callable() {
            return Err(PyTypeError::new_err("Argument must be callable."));
        }
        let callable = GilBound::new(callable.clone().unbind());
        Self::run(slf, |scope, _| {
            scope
                .register_callable(name, callable)
                .map(|_| ())
                .map_err(to_py_err)
        })
    }

    fn __traverse__(&self, visit: PyVisit<'_>) -> Result<(), PyTraverseError> {
        self.engine
            .visit_callables(|callable| visit.call(callable.get()))
    }

    fn __clear__(&self) {
        self.engine.clear_callables();
    }
}
