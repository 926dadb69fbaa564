//! Initiative-tracked combats and their combatants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{EffectRef, GameError, Resistances, Spellbook, StatusEffect};
use crate::args::Args;
use crate::script::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub name: String,
    /// User id of whoever runs this combatant.
    #[serde(default)]
    pub controller: String,
    /// Hide exact hit points from the channel.
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub hp: Option<i64>,
    #[serde(default)]
    pub max_hp: Option<i64>,
    #[serde(default)]
    pub temp_hp: i64,
    #[serde(default)]
    pub ac: Option<i64>,
    #[serde(default)]
    pub saves: BTreeMap<String, i64>,
    #[serde(default)]
    pub save_effects: BTreeMap<String, String>,
    #[serde(default)]
    pub resistances: Resistances,
    #[serde(default)]
    pub spellbook: Spellbook,
    #[serde(default)]
    pub effects: Vec<StatusEffect>,
}

impl Combatant {
    pub fn new(name: impl Into<String>) -> Self {
        Combatant {
            name: name.into(),
            controller: String::new(),
            private: false,
            hp: None,
            max_hp: None,
            temp_hp: 0,
            ac: None,
            saves: BTreeMap::new(),
            save_effects: BTreeMap::new(),
            resistances: Resistances::default(),
            spellbook: Spellbook::default(),
            effects: Vec::new(),
        }
    }

    pub fn with_hp(mut self, hp: i64) -> Self {
        self.hp = Some(hp);
        self.max_hp = Some(hp);
        self
    }

    pub fn with_ac(mut self, ac: i64) -> Self {
        self.ac = Some(ac);
        self
    }

    /// Values given for `-tag` across every active effect.
    pub fn active_effects(&self, tag: &str) -> Vec<String> {
        self.effects
            .iter()
            .flat_map(|e| {
                e.args()
                    .get(tag)
                    .into_iter()
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Armor class including `-ac` effect bonuses.
    pub fn armor_class(&self) -> Option<i64> {
        let base = self.ac?;
        let bonus: i64 = self
            .active_effects("ac")
            .iter()
            .filter_map(|v| {
                let n = v.trim().parse::<i64>();
                if n.is_err() {
                    log::warn!("{}: ignoring non-numeric -ac effect `{v}`", self.name);
                }
                n.ok()
            })
            .sum();
        Some(base + bonus)
    }

    pub fn save_bonus(&self, skill: &str) -> i64 {
        self.saves.get(skill).copied().unwrap_or(0)
    }

    pub fn save_adv(&self, skill: &str) -> i8 {
        self.save_effects
            .get(skill)
            .map_or(0, |args| Args::parse(args).adv(false))
    }

    /// Own resistances merged with those granted by effects.
    pub fn resists(&self) -> Resistances {
        let mut out = self.resistances.clone();
        out.merge(&Resistances {
            resist: self.active_effects("resist"),
            immune: self.active_effects("immune"),
            vuln: self.active_effects("vuln"),
            neutral: self.active_effects("neutral"),
        });
        out
    }

    /// Adjust hit points.  Temporary hit points soak damage first; with
    /// `overheal` false healing stops at max.  No-op without tracked hp.
    pub fn mod_hp(&mut self, mut delta: i64, overheal: bool) {
        let Some(hp) = self.hp else { return };
        if delta < 0 && self.temp_hp > 0 {
            let absorbed = self.temp_hp.min(-delta);
            self.temp_hp -= absorbed;
            delta += absorbed;
        }
        let new = hp.saturating_add(delta);
        self.hp = Some(match self.max_hp {
            Some(max) if !overheal && delta > 0 => new.min(max.max(hp)),
            _ => new,
        });
    }

    pub fn set_temp_hp(&mut self, value: i64) {
        self.temp_hp = value.max(0);
    }

    /// `<12/20 HP>`, or a vague health label for private combatants unless
    /// `private` is set.
    pub fn hp_str(&self, private: bool) -> String {
        if !self.private || private {
            let mut out = match (self.hp, self.max_hp) {
                (Some(hp), Some(max)) => format!("<{hp}/{max} HP>"),
                (Some(hp), None) => format!("<{hp} HP>"),
                _ => String::new(),
            };
            if self.temp_hp > 0 {
                out.push_str(&format!(" (+{} temp)", self.temp_hp));
            }
            return out;
        }
        match (self.hp, self.max_hp) {
            (Some(hp), Some(max)) if max > 0 => {
                let ratio = hp as f64 / max as f64;
                let label = if ratio >= 1.0 {
                    "Healthy"
                } else if ratio > 0.5 {
                    "Injured"
                } else if ratio > 0.15 {
                    "Bloodied"
                } else if ratio > 0.0 {
                    "Critical"
                } else {
                    "Dead"
                };
                format!("<{label}>")
            }
            _ => String::new(),
        }
    }

    pub fn is_concentrating(&self) -> bool {
        self.effects.iter().any(|e| e.concentration)
    }

    pub fn concentration_effect(&self) -> Option<&StatusEffect> {
        self.effects.iter().find(|e| e.concentration)
    }

    pub fn effect(&self, id: u64) -> Option<&StatusEffect> {
        self.effects.iter().find(|e| e.id == id)
    }

    pub fn effect_named(&self, name: &str) -> Option<&StatusEffect> {
        self.effects.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).map_or(Value::None, Value::from_json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combat {
    pub channel: String,
    #[serde(default)]
    pub round: i64,
    #[serde(default)]
    pub combatants: Vec<Combatant>,
    #[serde(default)]
    next_effect_id: u64,
}

impl Combat {
    pub fn new(channel: impl Into<String>) -> Self {
        Combat {
            channel: channel.into(),
            round: 0,
            combatants: Vec::new(),
            next_effect_id: 0,
        }
    }

    pub fn add_combatant(&mut self, combatant: Combatant) -> usize {
        self.combatants.push(combatant);
        self.combatants.len() - 1
    }

    /// Case-insensitive lookup by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.combatants
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn combatant(&self, name: &str) -> Option<&Combatant> {
        self.index_of(name).map(|i| &self.combatants[i])
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_effect_id += 1;
        self.next_effect_id
    }

    /// Attach `effect` to combatant `idx`.  A concentration effect first ends
    /// any concentration the combatant already holds; those removed effects
    /// (and their linked children) are returned.
    pub fn add_effect(
        &mut self,
        idx: usize,
        mut effect: StatusEffect,
    ) -> Result<(EffectRef, Vec<StatusEffect>), GameError> {
        let name = self
            .combatants
            .get(idx)
            .map(|c| c.name.clone())
            .ok_or_else(|| GameError::NoSuchCombatant(format!("#{idx}")))?;
        let mut dropped = Vec::new();
        if effect.concentration {
            let held: Vec<u64> = self.combatants[idx]
                .effects
                .iter()
                .filter(|e| e.concentration)
                .map(|e| e.id)
                .collect();
            for id in held {
                dropped.extend(self.remove_effect(&EffectRef { combatant: name.clone(), id }));
            }
        }
        effect.id = self.allocate_id();
        let r = EffectRef { combatant: name, id: effect.id };
        if let Some(parent) = &effect.parent {
            match self.effect_mut(parent) {
                Some(p) => p.children.push(r.clone()),
                None => effect.parent = None,
            }
        }
        self.combatants[idx].effects.push(effect);
        Ok((r, dropped))
    }

    fn effect_mut(&mut self, r: &EffectRef) -> Option<&mut StatusEffect> {
        let idx = self.index_of(&r.combatant)?;
        self.combatants[idx].effects.iter_mut().find(|e| e.id == r.id)
    }

    pub fn effect(&self, r: &EffectRef) -> Option<&StatusEffect> {
        self.combatant(&r.combatant)?.effect(r.id)
    }

    /// Remove an effect and, recursively, every effect linked under it.
    pub fn remove_effect(&mut self, r: &EffectRef) -> Vec<StatusEffect> {
        let Some(idx) = self.index_of(&r.combatant) else {
            return Vec::new();
        };
        let Some(pos) = self.combatants[idx].effects.iter().position(|e| e.id == r.id) else {
            return Vec::new();
        };
        let effect = self.combatants[idx].effects.remove(pos);
        if let Some(parent) = &effect.parent {
            if let Some(p) = self.effect_mut(parent) {
                p.children.retain(|c| c != r);
            }
        }
        let mut removed = Vec::new();
        for child in &effect.children {
            removed.extend(self.remove_effect(child));
        }
        removed.insert(0, effect);
        removed
    }

    /// Start the next round, counting every timed effect down and removing
    /// the ones that run out.
    pub fn advance_round(&mut self) -> Vec<StatusEffect> {
        self.round += 1;
        let mut expired = Vec::new();
        for c in &mut self.combatants {
            for e in &mut c.effects {
                if e.tick() {
                    expired.push(EffectRef { combatant: c.name.clone(), id: e.id });
                }
            }
        }
        let mut removed = Vec::new();
        for r in expired {
            removed.extend(self.remove_effect(&r));
        }
        removed
    }

    /// Read-only sandbox view.
    pub fn to_value(&self) -> Value {
        Value::Dict(vec![
            (Value::str("round"), Value::Int(self.round)),
            (
                Value::str("combatants"),
                Value::List(self.combatants.iter().map(Combatant::to_value).collect()),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combat() -> Combat {
        let mut c = Combat::new("chan");
        c.add_combatant(Combatant::new("Wizard").with_hp(20).with_ac(12));
        c.add_combatant(Combatant::new("Orc").with_hp(15).with_ac(13));
        c
    }

    #[test]
    fn effects_feed_numbers() {
        let mut c = combat();
        c.add_effect(1, StatusEffect::new("Shield of Faith", 10, "-ac 2 -resist fire")).unwrap();
        let orc = &c.combatants[1];
        assert_eq!(orc.armor_class(), Some(15));
        assert_eq!(orc.resists().resist, ["fire"]);
        assert_eq!(orc.active_effects("ac"), ["2"]);
    }

    #[test]
    fn concentration_replaces_previous() {
        let mut c = combat();
        let (first, dropped) = c.add_effect(0, StatusEffect::new("Bless", 10, "").concentration(true)).unwrap();
        assert!(dropped.is_empty());
        let (_, dropped) = c.add_effect(0, StatusEffect::new("Hex", 10, "").concentration(true)).unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].name, "Bless");
        assert!(c.effect(&first).is_none());
    }

    #[test]
    fn ending_concentration_removes_children_everywhere() {
        let mut c = combat();
        let (conc, _) = c.add_effect(0, StatusEffect::new("Hold Person", 10, "").concentration(true)).unwrap();
        let mut child = StatusEffect::new("Paralyzed", 10, "");
        child.parent = Some(conc.clone());
        let (child_ref, _) = c.add_effect(1, child).unwrap();
        assert_eq!(c.effect(&conc).unwrap().children, [child_ref.clone()]);

        let removed = c.remove_effect(&conc);
        assert_eq!(removed.len(), 2);
        assert!(c.effect(&child_ref).is_none());
        assert!(c.combatants[1].effects.is_empty());
    }

    #[test]
    fn removing_child_unlinks_from_parent() {
        let mut c = combat();
        let (conc, _) = c.add_effect(0, StatusEffect::new("Bane", 10, "").concentration(true)).unwrap();
        let mut child = StatusEffect::new("Baned", 10, "-b -1d4");
        child.parent = Some(conc.clone());
        let (child_ref, _) = c.add_effect(1, child).unwrap();
        c.remove_effect(&child_ref);
        assert!(c.effect(&conc).unwrap().children.is_empty());
    }

    #[test]
    fn effect_ids_increase() {
        let mut c = combat();
        let (a, _) = c.add_effect(0, StatusEffect::new("A", 1, "")).unwrap();
        let (b, _) = c.add_effect(1, StatusEffect::new("B", 1, "")).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn rounds_expire_effects() {
        let mut c = combat();
        c.add_effect(1, StatusEffect::new("Stunned", 1, "")).unwrap();
        c.add_effect(1, StatusEffect::new("Cursed", -1, "")).unwrap();
        let expired = c.advance_round();
        assert_eq!(c.round, 1);
        assert_eq!(expired.len(), 1);
        assert_eq!(c.combatants[1].effects.len(), 1);
    }

    #[test]
    fn hp_and_temp_hp() {
        let mut orc = Combatant::new("Orc").with_hp(15);
        orc.set_temp_hp(3);
        orc.mod_hp(-5, false);
        assert_eq!((orc.hp, orc.temp_hp), (Some(13), 0));
        orc.mod_hp(10, false);
        assert_eq!(orc.hp, Some(15));
        orc.mod_hp(10, true);
        assert_eq!(orc.hp, Some(25));
    }

    #[test]
    fn untracked_hp_is_noop() {
        let mut c = Combatant::new("Ghost");
        c.mod_hp(-5, false);
        assert_eq!(c.hp, None);
        assert_eq!(c.hp_str(false), "");
    }

    #[test]
    fn private_hp_string() {
        let mut orc = Combatant::new("Orc").with_hp(20);
        orc.private = true;
        orc.hp = Some(8);
        assert_eq!(orc.hp_str(false), "<Bloodied>");
        assert_eq!(orc.hp_str(true), "<8/20 HP>");
        orc.hp = Some(0);
        assert_eq!(orc.hp_str(false), "<Dead>");
    }

    #[test]
    fn round_trip_keeps_effect_counter() {
        let mut c = combat();
        c.add_effect(0, StatusEffect::new("A", 1, "")).unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let mut back: Combat = serde_json::from_str(&json).unwrap();
        let (r, _) = back.add_effect(0, StatusEffect::new("B", 1, "")).unwrap();
        assert_eq!(r.id, 2);
    }
}
