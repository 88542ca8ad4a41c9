use crate::value::Value;
use thiserror::Error;

/// A Scheme-level condition: a tag symbol plus an info list (both heap
/// values). Raised by builtins and by the evaluator, caught by `catch`
/// boundaries whose tag matches (or is `#t`). If the info list starts
/// with a string it is treated as a `~A`/`~S` format template for the
/// remaining elements when the condition is reported.
#[derive(Debug, Clone, Copy)]
pub struct Condition {
    /// A symbol naming the condition kind ('wrong-type-arg, 'error, ...).
    pub tag: Value,
    /// A list of details, usually (template-string arg ...).
    pub info: Value,
}

impl Condition {
    pub fn new(tag: Value, info: Value) -> Self {
        Condition { tag, info }
    }
}

/// Errors that reach the embedding host at the Rust level. Conditions that
/// a `catch` handles never surface here; these are the terminal outcomes
/// of one `eval` call.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The reader could not parse the input.
    #[error("read error: {0}")]
    Read(String),

    /// A condition propagated past every catch; the string is the default
    /// handler's formatted report ("tag: message").
    #[error("{0}")]
    Uncaught(String),

    /// `(quit)` or a host interrupt unwound the evaluation.
    #[error("quit")]
    Quit,

    /// The interrupt flag was raised while evaluating.
    #[error("interrupted")]
    Interrupted,

    /// File loading failed before any evaluation happened.
    #[error("i/o error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;
