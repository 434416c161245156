use thiserror::Error;

/// The kinds of error a running program can raise. `Display` yields the exact
/// message stored in the raised Error object.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("Out of memory")]
    OutOfMemory,

    /// An operation received an object whose type does not support it.
    #[error("Unexpected type")]
    TypeMismatch,

    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Stack overflow")]
    StackOverflow,

    #[error("Unbound symbol: {0}")]
    UnboundSymbol(String),

    #[error("Cannot apply nil")]
    CannotApplyNil,

    /// Carries the display name of the operator's type.
    #[error("Cannot apply {0}")]
    CannotApply(String),

    /// Input ended inside a list.
    #[error("Unexpected end of input")]
    UnexpectedEof,

    #[error("Wrong number of arguments: expected {expected}, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("Division by zero")]
    DivisionByZero,

    /// Raised by user code through `error`.
    #[error("{0}")]
    User(String),
}

/// What propagates through Rust frames once something has gone wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// An Error object is pending in the active context's error slot and the
    /// registered unwind actions have already run. Resumes at the nearest
    /// handler frame, or at `Runtime::recover`.
    #[error("error raised")]
    Raised,

    /// The runtime can no longer continue (e.g. a non-function unwind action).
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type RtResult<T> = Result<T, Fault>;
