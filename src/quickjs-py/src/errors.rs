//! Python exception types and the mapping from engine errors onto them.

use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use quickjs_bridge::{Error, ScriptError, ScriptErrorKind};

use crate::host::GilBound;

create_exception!(
    quickjs,
    JSException,
    PyException,
    "Raised when script code throws."
);
create_exception!(
    quickjs,
    StackOverflow,
    JSException,
    "Raised when script code exhausts the engine's stack."
);
create_exception!(
    quickjs,
    HostCallError,
    JSException,
    "Raised when a Python callable invoked from script code failed; `__cause__` is its error."
);

/// Map an engine error onto the Python exception reporting it.
pub(crate) fn to_py_err(err: Error) -> PyErr {
    match err {
        Error::Script(err) => script_error(err),
        Error::Conversion(message) | Error::Publish(message) => PyTypeError::new_err(message),
        Error::ForeignHandle => PyValueError::new_err(Error::ForeignHandle.to_string()),
        err @ (Error::CallableSlotsExhausted | Error::Protocol(_) | Error::Engine(_)) => {
            PyRuntimeError::new_err(err.to_string())
        }
    }
}

fn script_error(err: ScriptError) -> PyErr {
    let message = err.to_string();
    match err.kind() {
        ScriptErrorKind::Script => JSException::new_err(message),
        ScriptErrorKind::StackOverflow => StackOverflow::new_err(message),
        ScriptErrorKind::Host => {
            let raised = HostCallError::new_err(message);
            let cause = err
                .fault()
                .and_then(|fault| fault.downcast_ref::<GilBound<PyErr>>());
            if let Some(cause) = cause {
                Python::attach(|py| raised.set_cause(py, Some(cause.get().clone_ref(py))));
            }
            raised
        }
    }
}
