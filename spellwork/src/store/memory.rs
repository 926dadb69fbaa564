//! In-process store, for tests and single-process embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tokio::sync::Mutex;

use super::{Notifier, PersistentStore, StoreError};
use crate::game::{Character, Combat};

#[derive(Debug, Default)]
pub struct MemoryStore {
    user_vars: Mutex<HashMap<String, BTreeMap<String, String>>>,
    combats: Mutex<HashMap<String, Combat>>,
    /// Keyed by `(owner, name)`.
    characters: Mutex<HashMap<(String, String), Character>>,
    globals: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), StoreError> {
        self.globals
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .insert(key.into(), value.into());
        Ok(())
    }

    pub async fn character(&self, owner: &str, name: &str) -> Option<Character> {
        self.characters
            .lock()
            .await
            .get(&(owner.to_owned(), name.to_owned()))
            .cloned()
    }
}

impl PersistentStore for MemoryStore {
    async fn user_vars(&self, owner: &str) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.user_vars.lock().await.get(owner).cloned().unwrap_or_default())
    }

    async fn set_user_var(&self, owner: &str, name: &str, value: &str) -> Result<(), StoreError> {
        self.user_vars
            .lock()
            .await
            .entry(owner.to_owned())
            .or_default()
            .insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete_user_var(&self, owner: &str, name: &str) -> Result<(), StoreError> {
        if let Some(vars) = self.user_vars.lock().await.get_mut(owner) {
            vars.remove(name);
        }
        Ok(())
    }

    async fn load_combat(&self, channel: &str) -> Result<Option<Combat>, StoreError> {
        Ok(self.combats.lock().await.get(channel).cloned())
    }

    async fn save_combat(&self, combat: &Combat) -> Result<(), StoreError> {
        self.combats
            .lock()
            .await
            .insert(combat.channel.clone(), combat.clone());
        Ok(())
    }

    async fn save_character(&self, character: &Character) -> Result<(), StoreError> {
        self.characters.lock().await.insert(
            (character.owner.clone(), character.name.clone()),
            character.clone(),
        );
        Ok(())
    }

    fn global_var(&self, key: &str) -> Result<Option<String>, StoreError> {
        let globals = self
            .globals
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(globals.get(key).cloned())
    }
}

/// Records every message; users listed in `unreachable` fail delivery.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(String, String)>>,
    pub unreachable: Vec<String>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

impl Notifier for MemoryNotifier {
    async fn send(&self, user: &str, message: &str) -> Result<(), StoreError> {
        if self.unreachable.iter().any(|u| u == user) {
            return Err(StoreError::Backend(format!("{user} does not accept messages")));
        }
        self.sent
            .lock()
            .await
            .push((user.to_owned(), message.to_owned()));
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
