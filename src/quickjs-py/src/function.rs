use std::sync::{Mutex, MutexGuard, PoisonError};

use pyo3::prelude::*;
use pyo3::{PyTraverseError, PyVisit};
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyString, PyTuple};

use crate::context::Context;
use crate::host::Unguarded;
use crate::object::Object;

/// A script function with a context of its own.
///
/// `Function(name, code)` evaluates `code` in a fresh context and calls the global `name`.
/// Arguments other than `None`, `bool`, `int`, `float` and `str` are passed through JSON, as
/// are object results. Calls from several threads take turns.
#[pyclass(frozen, module = "quickjs")]
pub struct Function {
    context: Py<Context>,
    function: Py<PyAny>,
    lock: Mutex<()>,
}

impl Function {
    /// Wait for our turn without holding the GIL.
    fn turn(&self, py: Python<'_>) -> MutexGuard<'_, ()> {
        if let Ok(guard) = self.lock.try_lock() {
            return guard;
        }
        py.detach(|| Unguarded(self.lock.lock().unwrap_or_else(PoisonError::into_inner)))
            .into_inner()
    }

    fn pass_through(arg: &Bound<'_, PyAny>) -> bool {
        arg.is_none()
            || arg.is_instance_of::<PyBool>()
            || arg.is_instance_of::<PyInt>()
            || arg.is_instance_of::<PyFloat>()
            || arg.is_instance_of::<PyString>()
    }
}

#[pymethods]
impl Function {
    #[new]
    fn new(py: Python<'_>, name: &str, code: &str) -> PyResult<Self> {
        let context = Bound::new(py, Context::create()?)?;
        Context::eval(&context, code)?;
        let function = Context::get(&context, name)?;
        Ok(Self {
            context: context.unbind(),
            function,
            lock: Mutex::new(()),
        })
    }

    #[pyo3(signature = (*args, run_gc = true))]
    fn __call__(
        &self,
        py: Python<'_>,
        args: &Bound<'_, PyTuple>,
        run_gc: bool,
    ) -> PyResult<Py<PyAny>> {
        let _turn = self.turn(py);
        let context = self.context.bind(py);
        let json = py.import("json")?;

        let result = (|| -> PyResult<Py<PyAny>> {
            let mut converted = Vec::with_capacity(args.len());
            for arg in args.iter() {
                if Self::pass_through(&arg) {
                    converted.push(arg.unbind());
                } else {
                    let text: String = json.call_method1("dumps", (arg,))?.extract()?;
                    converted.push(Context::parse_json(context, &text)?);
                }
            }
            let result = self
                .function
                .bind(py)
                .call1(PyTuple::new(py, converted)?)?;
            if let Ok(object) = result.cast::<Object>() {
                let text: Option<String> = object.call_method0("json")?.extract()?;
                return match text {
                    Some(text) => Ok(json.call_method1("loads", (text,))?.unbind()),
                    None => Ok(py.None()),
                };
            }
            Ok(result.unbind())
        })();

        if run_gc {
            context.get().gc()?;
        }
        result
    }

    fn __traverse__(&self, visit: PyVisit<'_>) -> Result<(), PyTraverseError> {
        visit.call(&self.context)?;
        visit.call(&self.function)
    }

    /// See `Context.set_memory_limit`.
    fn set_memory_limit(&self, py: Python<'_>, bytes: usize) -> PyResult<()> {
        let _turn = self.turn(py);
        self.context.get().set_memory_limit(bytes)
    }

    /// See `Context.set_time_limit`.
    fn set_time_limit(&self, py: Python<'_>, seconds: f64) {
        let _turn = self.turn(py);
        self.context.get().set_time_limit(seconds);
    }

    /// See `Context.set_max_stack_size`.
    fn set_max_stack_size(&self, py: Python<'_>, bytes: usize) -> PyResult<()> {
        let _turn = self.turn(py);
        self.context.get().set_max_stack_size(bytes)
    }

    /// See `Context.memory`.
    fn memory<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let _turn = self.turn(py);
        self.context.get().memory(py)
    }

    /// See `Context.gc`.
    fn gc(&self, py: Python<'_>) -> PyResult<()> {
        let _turn = self.turn(py);
        self.context.get().gc()
    }

    /// See `Context.add_callable`.
    fn add_callable(&self, py: Python<'_>, name: &str, callable: &Bound<'_, PyAny>) -> PyResult<()> {
        let _turn = self.turn(py);
        Context::add_callable(self.context.bind(py), name, callable)
    }

    /// See `Context.execute_pending_job`.
    fn execute_pending_job(&self, py: Python<'_>) -> PyResult<bool> {
        let _turn = self.turn(py);
        Context::execute_pending_job(self.context.bind(py))
    }
}
