//! Sandboxed scripting and spell automation for tabletop combat.
//!
//! The crate is layered bottom-up:
//!
//! - [`script`] evaluates a restricted Python-like expression language and
//!   expands `{{expr}}` / `{roll}` / `<name>` markup in free text.
//! - [`store`] persists user, global, character and combat state; the
//!   [`script::scope`] bridge defers every write until an explicit commit.
//! - [`automation`] walks a declarative effect tree (attacks, saves, damage,
//!   status effects) against a casting context.
//! - [`spell`] ties the above together into the spell cast workflow.
//!
//! Dice are rolled through the [`dice::RollOracle`] trait; [`dice::Roller`]
//! is a small reference implementation.

pub mod args;
pub mod automation;
pub mod config;
pub mod dice;
pub mod game;
pub mod script;
pub mod spell;
pub mod store;
pub mod var;

pub use config::{Config, EngineConfig};
pub use script::{EvaluationError, SandboxError, Value};
