//! Conversion of values between Python and the engine.

use std::str::FromStr;

use num_bigint::BigInt;
use pyo3::IntoPyObjectExt;
use pyo3::exceptions::{PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyFloat, PyInt, PyString};
use quickjs_bridge::rquickjs::convert::Coerced;
use quickjs_bridge::rquickjs::{self, FromJs, Type, Value};
use quickjs_bridge::{Error, Scope};

use crate::context::Context;
use crate::errors::to_py_err;
use crate::host::PyHost;
use crate::object::Object;

/// Convert a script value into a Python object, consuming it.
///
/// `null` and `undefined` both become `None`. Anything object-like (including symbols and
/// modules) becomes an [`Object`] handle owned by `context`.
pub(crate) fn to_host<'js>(
    py: Python<'_>,
    scope: &Scope<'js, PyHost>,
    context: &Py<Context>,
    value: Value<'js>,
) -> PyResult<Py<PyAny>> {
    let ctx = scope.ctx();
    match value.type_of() {
        Type::Null | Type::Undefined => Ok(py.None()),
        Type::Bool => value.as_bool().into_py_any(py),
        Type::Int => value.as_int().into_py_any(py),
        Type::Float => value.as_float().into_py_any(py),
        Type::String => {
            let text = String::from_js(ctx, value).map_err(|err| match err {
                rquickjs::Error::Exception => to_py_err(scope.catch(err)),
                // lone surrogates have no UTF-8 form
                err => to_py_err(Error::Conversion(format!("cannot convert string: {err}"))),
            })?;
            text.into_py_any(py)
        }
        Type::BigInt => {
            let Coerced(digits) = Coerced::<String>::from_js(ctx, value)
                .map_err(|err| to_py_err(scope.catch(err)))?;
            let number = BigInt::from_str(&digits)
                .map_err(|err| PyValueError::new_err(format!("invalid BigInt {digits}: {err}")))?;
            number.into_py_any(py)
        }
        Type::Uninitialized | Type::Unknown => {
            Err(to_py_err(Error::Conversion("unknown foreign value tag".to_string())))
        }
        _ => {
            let retained = scope.retain(value);
            Object::attached(py, retained, context.clone_ref(py)).map(Py::into_any)
        }
    }
}

/// Fail with a `TypeError` unless `value` has a script counterpart.
pub(crate) fn ensure_representable(value: &Bound<'_, PyAny>) -> PyResult<()> {
    let representable = value.is_none()
        || value.is_instance_of::<PyBool>()
        || value.is_instance_of::<PyInt>()
        || value.is_instance_of::<PyFloat>()
        || value.is_instance_of::<PyString>()
        || value.is_instance_of::<Object>();
    if representable {
        return Ok(());
    }
    let type_name = value.get_type().name()?;
    Err(PyTypeError::new_err(format!(
        "Unsupported type when converting a Python object to quickjs: {type_name}."
    )))
}

/// Convert a Python object into a script value.
///
/// Integers outside the engine's 32-bit range become floats. Handles must belong to the
/// engine behind `scope`.
pub(crate) fn to_foreign<'js>(
    scope: &Scope<'js, PyHost>,
    value: &Bound<'_, PyAny>,
) -> PyResult<Value<'js>> {
    ensure_representable(value)?;
    let ctx = scope.ctx().clone();
    if value.is_none() {
        return Ok(Value::new_null(ctx));
    }
    if let Ok(flag) = value.cast::<PyBool>() {
        return Ok(Value::new_bool(ctx, flag.is_true()));
    }
    if value.is_instance_of::<PyInt>() {
        return Ok(match value.extract::<i32>() {
            Ok(int) => Value::new_int(ctx, int),
            Err(_) => Value::new_float(ctx, value.extract::<f64>()?),
        });
    }
    if let Ok(float) = value.cast::<PyFloat>() {
        return Ok(Value::new_float(ctx, float.value()));
    }
    if let Ok(text) = value.cast::<PyString>() {
        let text = text.to_cow()?;
        return rquickjs::String::from_str(ctx, &text)
            .map(|text| text.into_value())
            .map_err(|err| to_py_err(scope.catch(err)));
    }
    let object = value.cast::<Object>()?.get();
    let Some(handle) = object.handle() else {
        return Err(to_py_err(Error::ForeignHandle));
    };
    scope.restore(&handle.value).map_err(to_py_err)
}

/// Convert every argument, failing before any of them reaches the engine.
pub(crate) fn to_foreign_args<'js>(
    scope: &Scope<'js, PyHost>,
    args: &Bound<'_, pyo3::types::PyTuple>,
) -> PyResult<Vec<Value<'js>>> {
    for arg in args.iter() {
        ensure_representable(&arg)?;
    }
    args.iter().map(|arg| to_foreign(scope, &arg)).collect()
}
