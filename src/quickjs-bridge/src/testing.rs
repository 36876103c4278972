use rquickjs::convert::Coerced;
use rquickjs::prelude::Rest;
use rquickjs::{FromJs, Value};

use crate::{Host, Scope};

/// A host whose callables map one number to another.
pub(crate) struct TestHost;

impl Host for TestHost {
    type Callable = Box<dyn Fn(f64) -> f64 + Send + Sync>;

    fn invoke<'js>(
        &self,
        scope: &Scope<'js, Self>,
        callable: &Self::Callable,
        args: Rest<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>> {
        let arg = match args.into_inner().into_iter().next() {
            Some(value) => Coerced::<f64>::from_js(scope.ctx(), value)?.0,
            None => f64::NAN,
        };
        Ok(Value::new_float(scope.ctx().clone(), callable(arg)))
    }
}
