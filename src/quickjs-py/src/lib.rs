//! The `quickjs` Python extension module.
//!
//! Exposes [`Context`], [`Object`] and [`Function`] along with the exceptions raised for
//! script errors. Script code runs with the GIL released; Python callables registered with
//! `Context.add_callable` take it back while they run.
#![deny(dead_code, unused_mut)]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

use pyo3::prelude::*;

mod context;
mod convert;
mod errors;
mod function;
mod host;
mod object;

pub use context::Context;
pub use errors::{HostCallError, JSException, StackOverflow};
pub use function::Function;
pub use object::Object;

/// Python quickjs module
#[pymodule]
fn quickjs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    register(m)
}

/// Add the module's classes and exceptions to `m`.
pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let py = m.py();
    m.add_class::<Context>()?;
    m.add_class::<Object>()?;
    m.add_class::<Function>()?;
    m.add("JSException", py.get_type::<JSException>())?;
    m.add("StackOverflow", py.get_type::<StackOverflow>())?;
    m.add("HostCallError", py.get_type::<HostCallError>())?;
    Ok(())
}
