//! Character sheets as seen by the scripting and automation layers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{GameError, Resistances, Spellbook};
use crate::args::Args;
use crate::script::eval::{Evaluator, NoHost};
use crate::script::Value;

const COUNTER_MAX: i64 = (1 << 32) - 1;
const COUNTER_MIN: i64 = -(1 << 32);

/// Ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub strength: i64,
    pub dexterity: i64,
    pub constitution: i64,
    pub intelligence: i64,
    pub wisdom: i64,
    pub charisma: i64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

impl Stats {
    pub fn modifier(score: i64) -> i64 {
        (score - 10).div_euclid(2)
    }

    /// `(name, score)` in ability order.
    pub fn scores(&self) -> [(&'static str, i64); 6] {
        [
            ("strength", self.strength),
            ("dexterity", self.dexterity),
            ("constitution", self.constitution),
            ("intelligence", self.intelligence),
            ("wisdom", self.wisdom),
            ("charisma", self.charisma),
        ]
    }

    /// Score of the ability whose name starts with `prefix` (`str`, `dex`...).
    pub fn by_prefix(&self, prefix: &str) -> Option<i64> {
        let prefix = prefix.to_lowercase();
        if prefix.is_empty() {
            return None;
        }
        self.scores()
            .into_iter()
            .find(|(name, _)| name.starts_with(&prefix))
            .map(|(_, score)| score)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterDisplay {
    #[default]
    Default,
    Bubble,
}

/// A custom counter; bounds and reset are formulas over the character's
/// variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
    #[serde(default)]
    pub display: CounterDisplay,
}

fn default_level() -> i64 {
    1
}

fn default_prof() -> i64 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default = "default_level")]
    pub level: i64,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default = "default_prof")]
    pub prof_bonus: i64,
    #[serde(default)]
    pub armor: i64,
    pub max_hp: i64,
    /// Hit points, not counting temporary hit points.
    pub hp: i64,
    #[serde(default)]
    pub temp_hp: i64,
    /// Save bonuses by skill (`dexteritySave`).
    #[serde(default)]
    pub saves: BTreeMap<String, i64>,
    /// Argument strings applied to individual saves, e.g. `adv`.
    #[serde(default)]
    pub save_effects: BTreeMap<String, String>,
    #[serde(default)]
    pub resistances: Resistances,
    #[serde(default)]
    pub spellbook: Spellbook,
    #[serde(default)]
    pub counters: BTreeMap<String, Counter>,
    #[serde(default)]
    pub cvars: BTreeMap<String, String>,
    #[serde(default)]
    pub color: u32,
}

impl Character {
    pub fn new(name: impl Into<String>, max_hp: i64) -> Self {
        Character {
            name: name.into(),
            owner: String::new(),
            level: 1,
            stats: Stats::default(),
            prof_bonus: 2,
            armor: 10,
            max_hp,
            hp: max_hp,
            temp_hp: 0,
            saves: BTreeMap::new(),
            save_effects: BTreeMap::new(),
            resistances: Resistances::default(),
            spellbook: Spellbook::default(),
            counters: BTreeMap::new(),
            cvars: BTreeMap::new(),
            color: 0,
        }
    }

    // ── Derived numbers ───────────────────────────────────────────────────────

    pub fn save_bonus(&self, skill: &str) -> i64 {
        self.saves.get(skill).copied().unwrap_or_else(|| {
            let ability = skill.trim_end_matches("Save");
            self.stats.by_prefix(ability).map_or(0, Stats::modifier)
        })
    }

    /// Net advantage from per-save effects: 1, 0 or -1.
    pub fn save_adv(&self, skill: &str) -> i8 {
        self.save_effects
            .get(skill)
            .map_or(0, |args| Args::parse(args).adv(false))
    }

    pub fn spell_ab(&self) -> Option<i64> {
        self.spellbook.attack_bonus
    }

    pub fn save_dc(&self) -> Option<i64> {
        self.spellbook.dc
    }

    /// Ability scores, modifiers, saves and the headline numbers.
    pub fn stat_vars(&self) -> Vec<(String, Value)> {
        let mut out = vec![
            ("name".to_owned(), Value::str(self.name.as_str())),
            ("level".to_owned(), Value::Int(self.level)),
            ("proficiencyBonus".to_owned(), Value::Int(self.prof_bonus)),
            ("armor".to_owned(), Value::Int(self.armor)),
            ("hp".to_owned(), Value::Int(self.max_hp)),
        ];
        for (ability, score) in self.stats.scores() {
            out.push((ability.to_owned(), Value::Int(score)));
            out.push((format!("{ability}Mod"), Value::Int(Stats::modifier(score))));
            let skill = format!("{ability}Save");
            out.push((skill.clone(), Value::Int(self.save_bonus(&skill))));
        }
        out
    }

    pub fn cvar_names(&self) -> Vec<(String, Value)> {
        self.cvars
            .iter()
            .map(|(k, v)| (k.clone(), Value::str(v.as_str())))
            .collect()
    }

    /// Evaluate a counter-bound style formula (`5`, `{proficiencyBonus*2}`,
    /// `wisdomMod`) against this character's variables.
    pub fn evaluate_formula(&self, formula: &str) -> Result<i64, GameError> {
        let src = formula.trim().trim_matches(|c: char| matches!(c, '<' | '>' | '{' | '}'));
        let invalid = |message: String| GameError::InvalidFormula {
            formula: formula.to_owned(),
            message,
        };
        let mut ev = Evaluator::new();
        ev.names.layer(self.cvar_names());
        ev.names.layer(self.stat_vars());
        let v = ev.eval_raw(src, &mut NoHost).map_err(|e| invalid(e.to_string()))?;
        match v {
            Value::Float(x) if x.is_finite() => Ok(x.trunc() as i64),
            Value::Str(s) => s.trim().parse().map_err(|_| invalid(format!("`{s}` is not a number"))),
            other => other
                .as_int()
                .ok_or_else(|| invalid(format!("{} is not a number", other.type_name()))),
        }
    }

    // ── Hit points ────────────────────────────────────────────────────────────

    pub fn set_hp(&mut self, value: i64) {
        self.hp = value;
    }

    /// Adjust hit points; with `overflow` false the result is capped at max.
    pub fn mod_hp(&mut self, delta: i64, overflow: bool) {
        let new = self.hp.saturating_add(delta);
        self.hp = if overflow { new } else { new.min(self.max_hp) };
    }

    /// Apply a signed change the way damage and healing land: temporary hit
    /// points absorb damage first and hit points stay within `0..=max`.
    pub fn modify_hp(&mut self, mut delta: i64) {
        if delta < 0 && self.temp_hp > 0 {
            let absorbed = self.temp_hp.min(-delta);
            self.temp_hp -= absorbed;
            delta += absorbed;
        }
        self.hp = self.hp.saturating_add(delta).clamp(0, self.max_hp.max(0));
    }

    pub fn set_temp_hp(&mut self, value: i64) {
        self.temp_hp = value.max(0);
    }

    pub fn hp_str(&self) -> String {
        let mut out = format!("{}/{}", self.hp, self.max_hp);
        if self.temp_hp > 0 {
            out.push_str(&format!(" ({} temp)", self.temp_hp));
        }
        out
    }

    // ── Counters ──────────────────────────────────────────────────────────────

    pub fn counter(&self, name: &str) -> Result<&Counter, GameError> {
        self.counters
            .get(name)
            .ok_or_else(|| GameError::NoSuchCounter(name.to_owned()))
    }

    pub fn counter_max(&self, name: &str) -> Result<i64, GameError> {
        match &self.counter(name)?.max {
            Some(f) => self.evaluate_formula(f),
            None => Ok(COUNTER_MAX),
        }
    }

    pub fn counter_min(&self, name: &str) -> Result<i64, GameError> {
        match &self.counter(name)?.min {
            Some(f) => self.evaluate_formula(f),
            None => Ok(COUNTER_MIN),
        }
    }

    /// Set a counter.  Out-of-range values are clamped, or rejected when
    /// `strict`.
    pub fn set_counter(&mut self, name: &str, value: i64, strict: bool) -> Result<(), GameError> {
        let min = self.counter_min(name)?;
        let max = self.counter_max(name)?;
        if strict && !(min..=max).contains(&value) {
            return Err(GameError::CounterOutOfBounds {
                name: name.to_owned(),
                min,
                max,
            });
        }
        let value = value.clamp(min, max.max(min));
        if let Some(c) = self.counters.get_mut(name) {
            c.value = value;
        }
        Ok(())
    }

    pub fn create_counter(
        &mut self,
        name: &str,
        min: Option<String>,
        max: Option<String>,
        reset: Option<String>,
        display: CounterDisplay,
    ) -> Result<(), GameError> {
        let start = match &max {
            Some(f) => self.evaluate_formula(f)?,
            None => 0,
        };
        let floor = match &min {
            Some(f) => self.evaluate_formula(f)?,
            None => COUNTER_MIN,
        };
        self.counters.insert(
            name.to_owned(),
            Counter {
                value: start.max(floor),
                min,
                max,
                reset,
                display,
            },
        );
        Ok(())
    }

    pub fn delete_counter(&mut self, name: &str) -> Result<Counter, GameError> {
        self.counters
            .remove(name)
            .ok_or_else(|| GameError::NoSuchCounter(name.to_owned()))
    }

    /// `◉◉〇` for bubble counters with a max, `3 / 5` for others with a max,
    /// the bare value otherwise.
    pub fn counter_str(&self, name: &str) -> Result<String, GameError> {
        let counter = self.counter(name)?;
        let Some(max) = &counter.max else {
            return Ok(counter.value.to_string());
        };
        let max = self.evaluate_formula(max)?;
        Ok(match counter.display {
            CounterDisplay::Bubble => super::bubbles(counter.value, max),
            CounterDisplay::Default => format!("{} / {max}", counter.value),
        })
    }

    /// Snapshot as a sandbox value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).map_or(Value::None, Value::from_json)
    }
}
