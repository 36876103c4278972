//! This crate drives an embedded QuickJS engine on behalf of a host language.
//!
//! It owns the runtime/context pair, decides who may drive it at any moment, arms the
//! time-limit clock around script execution, keeps host callables alive while script code
//! can reach them, and converts script exceptions into [`Error`]s.
#![deny(dead_code, unused_mut)]
#![warn(missing_docs)]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(any(test, debug_assertions), allow(clippy::disallowed_macros))]

mod builder;
mod clock;
mod engine;
mod error;
mod host;
mod host_fn;
mod metrics;
mod protocol;
mod registry;
mod retained;
mod scope;
mod stats;

#[cfg(test)]
mod testing;

/// A builder for creating a new [`Engine`]
pub use builder::EngineBuilder;
/// A QuickJS runtime and context driven on behalf of a host
pub use engine::Engine;
/// Error types and the result alias used by every fallible operation
pub use error::{Error, FaultPayload, Result, ScriptError, ScriptErrorKind};
/// The trait a host language implements to drive an engine
pub use host::Host;
/// Helpers for reporting host failures to script code
pub use host_fn::{host_fault, throw_host_fault};
/// Identifier of a host callable retained by an engine
pub use registry::CallableId;
/// Script values kept alive outside of a scope
pub use retained::Retained;
/// Exclusive access to an engine's context
pub use scope::{EvalKind, SOURCE_NAME, Scope};
/// Memory counters reported by the engine
pub use stats::MemoryStats;

/// The script engine types exposed through this crate's API
pub use rquickjs;
