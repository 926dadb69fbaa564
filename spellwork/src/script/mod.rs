//! Sandboxed scripting.
//!
//! This module implements a tree-walking evaluator for a restricted
//! Python-like expression language, covering:
//!
//! - One expression or one assignment per evaluation
//! - Arithmetic, comparison chains, boolean short-circuiting
//! - List, set and dict comprehensions under a shared iteration budget
//! - f-strings with conversions and format specs
//! - A fixed registry of built-in functions plus host functions
//! - `{{expr}}` / `<name>` / `{roll}` text interpolation
//!
//! # Quick start
//!
//! ```rust
//! use spellwork::script::{Evaluator, NoHost, Value};
//!
//! let mut ev = Evaluator::new();
//! ev.eval("x = 6", &mut NoHost).unwrap();
//! assert_eq!(ev.eval("x * 7", &mut NoHost).unwrap(), Value::Int(42));
//! ```

pub mod builtins;
pub mod error;
pub mod eval;
pub mod expand;
pub mod expr;
pub mod scope;
pub mod value;

// Re-exports for convenience.
pub use error::{EvaluationError, SandboxError};
pub use eval::{Evaluator, Host, Limits, NoHost, Scope};
pub use scope::{ChangeLog, Invocation, ScriptEvaluator, SpellEvaluator};
pub use value::Value;
