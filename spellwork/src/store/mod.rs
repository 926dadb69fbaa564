//! Persistence seams.
//!
//! The engine never talks to a database directly.  Script evaluators read
//! and write through [`PersistentStore`]; private messages go out through
//! [`Notifier`].  Two reference stores ship with the crate:
//! [`MemoryStore`] and the JSON-on-disk [`FileStore`].

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::{Character, Combat};

pub use file::FileStore;
pub use memory::{MemoryNotifier, MemoryStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed document: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("store backend failed: {0}")]
    Backend(String),
}

/// One user-scoped variable as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVar {
    pub owner: String,
    pub name: String,
    pub value: String,
}

/// One global variable as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVar {
    pub key: String,
    pub value: String,
}

/// Durable state behind the scripting layer.  Writes are last-writer-wins.
#[allow(async_fn_in_trait)]
pub trait PersistentStore {
    /// Every user-scoped variable of `owner`, by name.
    async fn user_vars(&self, owner: &str) -> Result<BTreeMap<String, String>, StoreError>;

    async fn set_user_var(&self, owner: &str, name: &str, value: &str) -> Result<(), StoreError>;

    /// Deleting a variable that does not exist is not an error.
    async fn delete_user_var(&self, owner: &str, name: &str) -> Result<(), StoreError>;

    /// The combat running in `channel`, if any.
    async fn load_combat(&self, channel: &str) -> Result<Option<Combat>, StoreError>;

    async fn save_combat(&self, combat: &Combat) -> Result<(), StoreError>;

    async fn save_character(&self, character: &Character) -> Result<(), StoreError>;

    /// Synchronous global variable read, used from inside an evaluation.
    fn global_var(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Direct messages to individual users.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send(&self, user: &str, message: &str) -> Result<(), StoreError>;
}

/// Best-effort delivery: failures are logged and dropped.
pub async fn notify<N: Notifier + ?Sized>(notifier: &N, user: &str, message: &str) {
    if let Err(e) = notifier.send(user, message).await {
        log::warn!("could not message {user}: {e}");
    }
}

/// A notifier that drops everything.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    async fn send(&self, _user: &str, _message: &str) -> Result<(), StoreError> {
        Ok(())
    }
}
