// crates/stagecast-core/src/error.rs
//
// Error kinds shared across the core. User errors carry enough context to be
// surfaced verbatim to the caller that issued the offending command; nothing
// here is ever fatal to a running pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid command argument, unknown variable, malformed expression.
    /// Surfaced to the caller verbatim.
    #[error("{0}")]
    User(String),

    /// Missing file, missing help item.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected at construction (negative channel counts, reserved
    /// characters in layout strings, unknown easing names).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors raised by the binding engine, synchronously to the caller of
/// `get`/`set`/`bind`.
#[derive(Debug, Error, PartialEq)]
pub enum BindingError {
    #[error("can't have circular dependencies between bindings")]
    Cycle,

    #[error("bound value cannot be set")]
    SetOnBound,
}
