//! shed: an embeddable Scheme-family interpreter.
//!
//! The host-facing surface is [`Interp`]: create one, evaluate source
//! with [`Interp::eval_str`], register native functions with
//! [`Interp::define_function`], and protect any [`Value`] the host holds
//! across evaluations with [`Interp::gc_protect`].
//!
//! ```no_run
//! use shed::{Interp, Value};
//!
//! let mut interp = Interp::new();
//! let v = interp.eval_str("(+ 1 2 3)").unwrap();
//! assert_eq!(v, Value::Int(6));
//! ```
//!
//! Each instance owns its heap (mark-and-sweep, cell arena) and symbol
//! table; instances share nothing. Continuations, `dynamic-wind`, and
//! `catch` are supported in full because the evaluator keeps its whole
//! control state on explicit stacks.

pub mod builtins;
pub mod env;
pub mod error;
pub mod eval;
pub mod heap;
pub mod printer;
pub mod reader;
pub mod symbol;
pub mod value;

pub use error::{Condition, Error, Result};
pub use eval::Interp;
pub use heap::{CType, GC_TEMPS};
pub use value::{ObjId, SymbolId, Value};
