use std::sync::{Arc, Mutex, PoisonError};

use pyo3::prelude::*;
use pyo3::types::PyTuple;
use pyo3::{PyTraverseError, PyVisit};
use quickjs_bridge::Retained;

use crate::context::Context;
use crate::host::PyHost;

/// A script value held on behalf of Python.
pub(crate) struct Handle {
    // the value goes first so it is released while the context is still referenced
    pub(crate) value: Retained<PyHost>,
    pub(crate) context: Py<Context>,
}

/// A script object, array, function, symbol or other non-primitive value.
///
/// Calling an `Object` calls the script value. `Object()` creates a detached handle that
/// does nothing when called.
#[pyclass(frozen, module = "quickjs")]
pub struct Object {
    handle: Mutex<Option<Arc<Handle>>>,
}

impl Object {
    pub(crate) fn attached(
        py: Python<'_>,
        value: Retained<PyHost>,
        context: Py<Context>,
    ) -> PyResult<Py<Object>> {
        let handle = Handle { value, context };
        Py::new(
            py,
            Object {
                handle: Mutex::new(Some(Arc::new(handle))),
            },
        )
    }

    /// The handle, unless this object is detached.
    pub(crate) fn handle(&self) -> Option<Arc<Handle>> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[pymethods]
impl Object {
    #[new]
    fn detached() -> Self {
        Object {
            handle: Mutex::new(None),
        }
    }

    /// Call the script value with `args`.
    #[pyo3(signature = (*args))]
    fn __call__(&self, py: Python<'_>, args: &Bound<'_, PyTuple>) -> PyResult<Py<PyAny>> {
        let Some(handle) = self.handle() else {
            return Ok(py.None());
        };
        Context::call_value(handle.context.bind(py), &handle.value, args)
    }

    /// `JSON.stringify` of the script value.
    fn json(&self, py: Python<'_>) -> PyResult<Option<String>> {
        let Some(handle) = self.handle() else {
            return Ok(None);
        };
        Context::json_of(handle.context.bind(py), &handle.value)
    }

    fn __traverse__(&self, visit: PyVisit<'_>) -> Result<(), PyTraverseError> {
        let Ok(handle) = self.handle.try_lock() else {
            return Ok(());
        };
        if let Some(handle) = handle.as_ref() {
            visit.call(&handle.context)?;
        }
        Ok(())
    }

    fn __clear__(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(handle);
    }
}
