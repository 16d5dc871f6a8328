//! Error definitions for the virtual machine and register emitter.

use thiserror::Error;

/// Failures the evaluator and emitter can report. None of these abort
/// evaluation outright — the virtual machine records one as a diagnostic
/// and keeps going with a `Null` in its place, matching how the earlier
/// pipeline stages never abort on a recoverable error either.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("call depth exceeded the configured limit of {limit}")]
    CallDepthExceeded { limit: usize },

    #[error("value stack depth exceeded the configured limit of {limit}")]
    StackDepthExceeded { limit: usize },

    #[error("popped from an empty value stack")]
    StackUnderflow,

    #[error("array index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("'{value}' is not callable")]
    NotCallable { value: String },

    #[error("unknown builtin procedure '{name}'")]
    UnknownBuiltin { name: String },

    #[error("phi at block {block} has no entry for predecessor {predecessor}")]
    PhiMissingPredecessor { block: usize, predecessor: usize },
}

pub type VmResult<T> = Result<T, VmError>;
