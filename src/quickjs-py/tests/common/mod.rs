//! Runs Python snippets against the module inside an embedded interpreter.

use std::ffi::CString;

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};

// Helpers available to every snippet.
const PRELUDE: &str = r#"
import quickjs

def raises(kind, fragment, call):
    try:
        call()
    except kind as err:
        assert fragment in str(err), f"{fragment!r} not in {str(err)!r}"
        return err
    raise AssertionError(f"{kind.__name__} not raised")
"#;

/// Run `code` with `quickjs` importable, panicking with the Python traceback on failure.
pub fn run_python(code: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    Python::attach(|py| {
        let result = (|| -> PyResult<()> {
            let sys_modules = py.import("sys")?.getattr("modules")?;
            if !sys_modules.contains("quickjs")? {
                let module = PyModule::new(py, "quickjs")?;
                quickjs::register(&module)?;
                sys_modules.set_item("quickjs", module)?;
            }

            let globals = PyDict::new(py);
            globals.set_item("__builtins__", py.import("builtins")?)?;
            let code: String = py
                .import("textwrap")?
                .call_method1("dedent", (code,))?
                .extract()?;
            let code = CString::new(format!("{PRELUDE}\n{code}"))?;
            py.run(&code, Some(&globals), None)
        })();
        if let Err(err) = result {
            err.print(py);
            panic!("python snippet failed: {err}");
        }
    });
}
