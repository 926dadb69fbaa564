//! JSON documents on disk.
//!
//! Layout under the store root:
//!
//! | Path                              | Contents                       |
//! |-----------------------------------|--------------------------------|
//! | `uvars/<owner>.json`              | `[{owner, name, value}, ...]`  |
//! | `gvars.json`                      | `[{key, value}, ...]`          |
//! | `combats/<channel>.json`          | one combat                     |
//! | `characters/<owner>/<name>.json`  | one character                  |
//!
//! Path components are reduced to `[A-Za-z0-9_-]`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{GlobalVar, PersistentStore, StoreError, UserVar};
use crate::game::{Character, Combat};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

fn component(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_owned()
    } else {
        cleaned
    }
}

/// Read a JSON document; a missing file is `None`.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn uvar_path(&self, owner: &str) -> PathBuf {
        self.root.join("uvars").join(format!("{}.json", component(owner)))
    }

    fn combat_path(&self, channel: &str) -> PathBuf {
        self.root.join("combats").join(format!("{}.json", component(channel)))
    }

    fn character_path(&self, owner: &str, name: &str) -> PathBuf {
        self.root
            .join("characters")
            .join(component(owner))
            .join(format!("{}.json", component(name)))
    }

    fn gvar_path(&self) -> PathBuf {
        self.root.join("gvars.json")
    }

    async fn read_uvars(&self, owner: &str) -> Result<Vec<UserVar>, StoreError> {
        Ok(read_json(&self.uvar_path(owner)).await?.unwrap_or_default())
    }

    pub async fn load_character(&self, owner: &str, name: &str) -> Result<Character, StoreError> {
        read_json(&self.character_path(owner, name))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("character `{name}`")))
    }

    /// Add or replace a global variable.
    pub async fn set_global(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.gvar_path();
        let mut all: Vec<GlobalVar> = read_json(&path).await?.unwrap_or_default();
        match all.iter_mut().find(|g| g.key == key) {
            Some(g) => g.value = value.to_owned(),
            None => all.push(GlobalVar { key: key.to_owned(), value: value.to_owned() }),
        }
        write_json(&path, &all).await
    }
}

impl PersistentStore for FileStore {
    async fn user_vars(&self, owner: &str) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self
            .read_uvars(owner)
            .await?
            .into_iter()
            .map(|v| (v.name, v.value))
            .collect())
    }

    async fn set_user_var(&self, owner: &str, name: &str, value: &str) -> Result<(), StoreError> {
        let mut vars = self.read_uvars(owner).await?;
        match vars.iter_mut().find(|v| v.name == name) {
            Some(v) => v.value = value.to_owned(),
            None => vars.push(UserVar {
                owner: owner.to_owned(),
                name: name.to_owned(),
                value: value.to_owned(),
            }),
        }
        write_json(&self.uvar_path(owner), &vars).await
    }

    async fn delete_user_var(&self, owner: &str, name: &str) -> Result<(), StoreError> {
        let mut vars = self.read_uvars(owner).await?;
        let before = vars.len();
        vars.retain(|v| v.name != name);
        if vars.len() == before {
            return Ok(());
        }
        write_json(&self.uvar_path(owner), &vars).await
    }

    async fn load_combat(&self, channel: &str) -> Result<Option<Combat>, StoreError> {
        read_json(&self.combat_path(channel)).await
    }

    async fn save_combat(&self, combat: &Combat) -> Result<(), StoreError> {
        write_json(&self.combat_path(&combat.channel), combat).await
    }

    async fn save_character(&self, character: &Character) -> Result<(), StoreError> {
        write_json(&self.character_path(&character.owner, &character.name), character).await
    }

    fn global_var(&self, key: &str) -> Result<Option<String>, StoreError> {
        let all: Vec<GlobalVar> = match std::fs::read(self.gvar_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(all.into_iter().find(|g| g.key == key).map(|g| g.value))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
