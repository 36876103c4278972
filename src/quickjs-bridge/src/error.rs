use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rquickjs::convert::Coerced;
use rquickjs::{CaughtError, Class, Ctx, FromJs, Value};

use crate::host_fn::HostFault;

/// The payload a host attaches to a failed host call.
pub type FaultPayload = Arc<dyn Any + Send + Sync>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by an [`Engine`](crate::Engine).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Script code threw.
    #[error("{0}")]
    Script(#[from] ScriptError),
    /// A value could not cross the boundary.
    #[error("{0}")]
    Conversion(String),
    /// A retained value was handed to an engine that does not own it.
    #[error("Can not mix JS objects from different contexts.")]
    ForeignHandle,
    /// A global could not be written.
    #[error("{0}")]
    Publish(String),
    /// The callable registry has no free slot left.
    #[error("Callables slots exhausted.")]
    CallableSlotsExhausted,
    /// The engine was driven in a way its state machine does not allow.
    #[error("{0}")]
    Protocol(String),
    /// The engine failed without raising a script exception.
    #[error("{0}")]
    Engine(String),
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "engine protocol violation");
        Self::Protocol(message)
    }

    /// The script error carried by this error, if any.
    pub fn as_script(&self) -> Option<&ScriptError> {
        match self {
            Self::Script(err) => Some(err),
            _ => None,
        }
    }
}

/// How a [`ScriptError`] is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    /// Any other exception.
    Script,
    /// The engine ran out of stack.
    StackOverflow,
    /// A host callable failed and the fault travelled back as the `cause` of the exception.
    Host,
}

/// An exception thrown by script code, captured after the engine returned.
#[derive(Clone)]
pub struct ScriptError {
    kind: ScriptErrorKind,
    text: String,
    stack: Option<String>,
    fault: Option<FaultPayload>,
}

// Substrings the engine uses when the stack limit is hit. Older QuickJS builds say
// "InternalError: stack overflow", quickjs-ng says "RangeError: Maximum call stack size exceeded".
const STACK_OVERFLOW_MARKERS: [&str; 2] = ["stack overflow", "Maximum call stack size exceeded"];

impl ScriptError {
    /// Build a script error from its textual parts.
    pub fn new(text: impl Into<String>, stack: Option<String>) -> Self {
        let text = text.into();
        let kind = if STACK_OVERFLOW_MARKERS.iter().any(|m| text.contains(m)) {
            ScriptErrorKind::StackOverflow
        } else {
            ScriptErrorKind::Script
        };
        Self {
            kind,
            text,
            stack: stack.filter(|s| !s.is_empty()),
            fault: None,
        }
    }

    fn with_fault(mut self, fault: FaultPayload) -> Self {
        self.kind = ScriptErrorKind::Host;
        self.fault = Some(fault);
        self
    }

    /// How the error was classified.
    pub fn kind(&self) -> ScriptErrorKind {
        self.kind
    }

    /// `String(exception)`, e.g. `TypeError: not a function`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The backtrace recorded by the engine, if any.
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// The host fault that caused this exception, for [`ScriptErrorKind::Host`].
    pub fn fault(&self) -> Option<&FaultPayload> {
        self.fault.as_ref()
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        if let Some(stack) = &self.stack {
            write!(f, "\n{}", stack.trim_end())?;
        }
        Ok(())
    }
}

impl fmt::Debug for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptError")
            .field("kind", &self.kind)
            .field("text", &self.text)
            .field("stack", &self.stack)
            .field("fault", &self.fault.is_some())
            .finish()
    }
}

impl std::error::Error for ScriptError {}

/// Turn an error returned by rquickjs into an [`Error`], taking the pending exception if there is one.
pub(crate) fn catch(ctx: &Ctx<'_>, err: rquickjs::Error) -> Error {
    match CaughtError::from_error(ctx, err) {
        CaughtError::Error(err) => Error::Engine(err.to_string()),
        CaughtError::Exception(exception) => {
            let stack = exception.stack();
            let fault = exception
                .get::<_, Value>("cause")
                .ok()
                .and_then(|cause| Class::<HostFault>::from_value(&cause).ok())
                .map(|cause| cause.borrow().payload());
            let error = ScriptError::new(describe(ctx, exception.into_value()), stack);
            match fault {
                Some(fault) => error.with_fault(fault),
                None => error,
            }
            .into()
        }
        CaughtError::Value(value) => ScriptError::new(describe(ctx, value), None).into(),
    }
}

fn describe<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    match Coerced::<String>::from_js(ctx, value) {
        Ok(Coerced(text)) => text,
        Err(_) => {
            // toString itself threw; drop that exception so it does not leak into the next call
            let _ = ctx.catch();
            "<exception>".to_string()
        }
    }
}
