//! Plain-data game models: characters, combats, combatants and status
//! effects.  These carry the state the automation layer reads and mutates.

pub mod character;
pub mod combat;
pub mod effect;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use character::{Character, Counter, CounterDisplay, Stats};
pub use combat::{Combat, Combatant};
pub use effect::{EffectRef, StatusEffect};

/// Save skill names in ability order.
pub const SAVE_SKILLS: [&str; 6] = [
    "strengthSave",
    "dexteritySave",
    "constitutionSave",
    "intelligenceSave",
    "wisdomSave",
    "charismaSave",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("counter `{0}` does not exist")]
    NoSuchCounter(String),

    #[error("counter `{name}` must be between {min} and {max}")]
    CounterOutOfBounds { name: String, min: i64, max: i64 },

    #[error("level {0} is not a valid spell level")]
    InvalidSlotLevel(i64),

    #[error("no level {0} spell slots remaining")]
    NoSlotsRemaining(i64),

    #[error("level {level} slots must be between 0 and {max}")]
    SlotOutOfRange { level: i64, max: i64 },

    #[error("could not evaluate `{formula}`: {message}")]
    InvalidFormula { formula: String, message: String },

    #[error("no combatant named `{0}`")]
    NoSuchCombatant(String),

    #[error("no effect with id {0}")]
    NoSuchEffect(u64),
}

/// Damage type modifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resistances {
    #[serde(default)]
    pub resist: Vec<String>,
    #[serde(default)]
    pub immune: Vec<String>,
    #[serde(default)]
    pub vuln: Vec<String>,
    #[serde(default)]
    pub neutral: Vec<String>,
}

impl Resistances {
    /// Append `other`'s entries, skipping duplicates.
    pub fn merge(&mut self, other: &Resistances) {
        fn extend(into: &mut Vec<String>, from: &[String]) {
            for v in from {
                if !into.contains(v) {
                    into.push(v.clone());
                }
            }
        }
        extend(&mut self.resist, &other.resist);
        extend(&mut self.immune, &other.immune);
        extend(&mut self.vuln, &other.vuln);
        extend(&mut self.neutral, &other.neutral);
    }
}

/// Spellcasting numbers and slots shared by characters and combatants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spellbook {
    #[serde(default)]
    pub attack_bonus: Option<i64>,
    #[serde(default)]
    pub dc: Option<i64>,
    #[serde(default)]
    pub caster_level: i64,
    /// Maximum slots per level.
    #[serde(default)]
    pub max_slots: BTreeMap<i64, i64>,
    /// Remaining slots per level; missing levels are full.
    #[serde(default)]
    pub slots: BTreeMap<i64, i64>,
    #[serde(default)]
    pub spells: Vec<String>,
}

impl Spellbook {
    fn check_level(level: i64) -> Result<(), GameError> {
        if (1..=9).contains(&level) {
            Ok(())
        } else {
            Err(GameError::InvalidSlotLevel(level))
        }
    }

    pub fn max(&self, level: i64) -> i64 {
        self.max_slots.get(&level).copied().unwrap_or(0)
    }

    pub fn remaining(&self, level: i64) -> i64 {
        self.slots.get(&level).copied().unwrap_or_else(|| self.max(level))
    }

    pub fn set_remaining(&mut self, level: i64, value: i64) -> Result<(), GameError> {
        Self::check_level(level)?;
        let max = self.max(level);
        if !(0..=max).contains(&value) {
            return Err(GameError::SlotOutOfRange { level, max });
        }
        self.slots.insert(level, value);
        Ok(())
    }

    /// Spend one slot.  Level 0 (cantrips) costs nothing.
    pub fn use_slot(&mut self, level: i64) -> Result<(), GameError> {
        if level == 0 {
            return Ok(());
        }
        Self::check_level(level)?;
        let left = self.remaining(level);
        if left <= 0 {
            return Err(GameError::NoSlotsRemaining(level));
        }
        self.slots.insert(level, left - 1);
        Ok(())
    }

    pub fn can_cast(&self, level: i64) -> bool {
        level == 0 || self.remaining(level) > 0
    }

    /// An empty spell list knows every spell.
    pub fn knows(&self, spell: &str) -> bool {
        self.spells.is_empty() || self.spells.iter().any(|s| s.eq_ignore_ascii_case(spell))
    }

    /// `3: ◉◉〇` for one level, or every level with slots.
    pub fn slots_str(&self, level: Option<i64>) -> String {
        let one = |l: i64| format!("{l}: {}", bubbles(self.remaining(l), self.max(l)));
        match level {
            Some(l) => one(l),
            None => {
                let lines: Vec<String> = (1..=9).filter(|l| self.max(*l) > 0).map(one).collect();
                if lines.is_empty() {
                    "No spell slots.".to_owned()
                } else {
                    lines.join("\n")
                }
            }
        }
    }
}

/// Longest run of bubbles drawn before falling back to `value/max`.
pub const MAX_BUBBLES: i64 = 100;

/// `◉◉〇` for `filled` of `max`, or `filled/max` past [`MAX_BUBBLES`].
pub fn bubbles(filled: i64, max: i64) -> String {
    let filled = filled.max(0);
    let empty = max.saturating_sub(filled).max(0);
    if filled.saturating_add(empty) > MAX_BUBBLES {
        return format!("{filled}/{max}");
    }
    format!("{}{}", "\u{25c9}".repeat(filled as usize), "\u{3007}".repeat(empty as usize))
}

/// Short upper-case ability name of a save skill (`strengthSave` → `STR`).
pub fn save_abbrev(skill: &str) -> String {
    skill.chars().take(3).collect::<String>().to_uppercase()
}
