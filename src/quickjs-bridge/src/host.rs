use rquickjs::prelude::Rest;
use rquickjs::Value;

use crate::scope::Scope;

/// A trait representing the host environment driving an [`Engine`](crate::Engine).
///
/// The engine calls [`Host::suspend`] around every stretch of script execution and
/// [`Host::invoke`] whenever script code calls a callable registered with
/// [`Scope::register_callable`]. A host with a global interpreter lock releases it in
/// `suspend` and takes it back in `invoke`.
pub trait Host: Send + Sync + Sized + 'static {
    /// What the host registers as a callable.
    type Callable: Send + Sync + 'static;

    /// Run script code. The default runs it directly.
    fn suspend<R>(&self, run: impl FnOnce() -> R) -> R {
        run()
    }

    /// Invoke a registered callable on behalf of script code.
    ///
    /// Failures are reported by returning an exception, usually built with
    /// [`throw_host_fault`](crate::throw_host_fault).
    fn invoke<'js>(
        &self,
        scope: &Scope<'js, Self>,
        callable: &Self::Callable,
        args: Rest<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>>;
}
