//! Who a cast affects, and how damage lands on them.

use crate::game::{Character, Combat, Combatant, GameError, Resistances, Spellbook};

use super::context::Context;

/// The entity casting.
#[derive(Debug, Clone, PartialEq)]
pub enum Caster {
    /// A character outside of initiative.
    Character(Box<Character>),
    /// Index into the encounter's combat.
    Combatant(usize),
}

/// One listed target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Index into the encounter's combat.
    Combatant(usize),
    Character(Box<Character>),
    /// A name with no game state behind it.
    Label(String),
}

/// The current target of a running effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSlot {
    /// Position in the target list.
    Listed(usize),
    Caster,
}

/// Everything a cast can read or change.  `None` entries in `targets` are
/// casts with no target.
#[derive(Debug, Clone, PartialEq)]
pub struct Encounter {
    caster: Caster,
    combat: Option<Combat>,
    targets: Vec<Option<Target>>,
}

impl Encounter {
    /// A character casting outside of combat.
    pub fn solo(caster: Character, targets: Vec<Option<Target>>) -> Self {
        Encounter {
            caster: Caster::Character(Box::new(caster)),
            combat: None,
            targets,
        }
    }

    /// Validate combatant indices against `combat`.
    pub fn new(caster: Caster, combat: Option<Combat>, targets: Vec<Option<Target>>) -> Result<Self, GameError> {
        let count = combat.as_ref().map_or(0, |c| c.combatants.len());
        let check = |idx: usize| {
            if idx < count {
                Ok(())
            } else {
                Err(GameError::NoSuchCombatant(format!("#{idx}")))
            }
        };
        if let Caster::Combatant(idx) = caster {
            check(idx)?;
        }
        for t in targets.iter().flatten() {
            if let Target::Combatant(idx) = t {
                check(*idx)?;
            }
        }
        Ok(Encounter { caster, combat, targets })
    }

    /// A combatant casting at other combatants by name.  Names not in the
    /// combat become labels.
    pub fn in_combat(combat: Combat, caster: &str, targets: &[&str]) -> Result<Self, GameError> {
        let caster_idx = combat
            .index_of(caster)
            .ok_or_else(|| GameError::NoSuchCombatant(caster.to_owned()))?;
        let targets = targets
            .iter()
            .map(|name| {
                Some(match combat.index_of(name) {
                    Some(idx) => Target::Combatant(idx),
                    None => Target::Label((*name).to_owned()),
                })
            })
            .collect();
        Ok(Encounter {
            caster: Caster::Combatant(caster_idx),
            combat: Some(combat),
            targets,
        })
    }

    pub fn caster(&self) -> &Caster {
        &self.caster
    }

    pub fn combat(&self) -> Option<&Combat> {
        self.combat.as_ref()
    }

    pub fn combat_mut(&mut self) -> Option<&mut Combat> {
        self.combat.as_mut()
    }

    pub fn targets(&self) -> &[Option<Target>] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut Vec<Option<Target>> {
        &mut self.targets
    }

    /// Consume the encounter, returning the combat and the listed targets.
    pub fn into_parts(self) -> (Caster, Option<Combat>, Vec<Option<Target>>) {
        (self.caster, self.combat, self.targets)
    }

    pub fn caster_spellbook_mut(&mut self) -> Option<&mut Spellbook> {
        match &mut self.caster {
            Caster::Character(c) => Some(&mut c.spellbook),
            Caster::Combatant(idx) => self
                .combat
                .as_mut()?
                .combatants
                .get_mut(*idx)
                .map(|c| &mut c.spellbook),
        }
    }

    fn combatant(&self, idx: usize) -> Option<&Combatant> {
        self.combat.as_ref()?.combatants.get(idx)
    }

    pub fn caster_view(&self) -> CasterView<'_> {
        match &self.caster {
            Caster::Character(c) => CasterView::Character(c),
            Caster::Combatant(idx) => match self.combatant(*idx) {
                Some(c) => CasterView::Combatant(c),
                None => CasterView::Missing,
            },
        }
    }

    /// The caster as a combatant, if it is one.
    pub fn caster_combatant_index(&self) -> Option<usize> {
        match self.caster {
            Caster::Combatant(idx) => Some(idx),
            Caster::Character(_) => None,
        }
    }

    pub fn view(&self, slot: Option<TargetSlot>) -> TargetView<'_> {
        match slot {
            None => TargetView::None,
            Some(TargetSlot::Caster) => match self.caster_view() {
                CasterView::Character(c) => TargetView::Character(c),
                CasterView::Combatant(c) => TargetView::Combatant(c),
                CasterView::Missing => TargetView::None,
            },
            Some(TargetSlot::Listed(i)) => match self.targets.get(i) {
                Some(Some(Target::Combatant(idx))) => {
                    self.combatant(*idx).map_or(TargetView::None, TargetView::Combatant)
                }
                Some(Some(Target::Character(c))) => TargetView::Character(c),
                Some(Some(Target::Label(name))) => TargetView::Label(name),
                Some(None) | None => TargetView::None,
            },
        }
    }

    /// Combat index of the combatant behind `slot`.
    pub fn combatant_index(&self, slot: Option<TargetSlot>) -> Option<usize> {
        match slot? {
            TargetSlot::Caster => self.caster_combatant_index(),
            TargetSlot::Listed(i) => match self.targets.get(i)? {
                Some(Target::Combatant(idx)) => Some(*idx),
                _ => None,
            },
        }
    }

    fn character_mut(&mut self, slot: Option<TargetSlot>) -> Option<&mut Character> {
        match slot? {
            TargetSlot::Caster => match &mut self.caster {
                Caster::Character(c) => Some(&mut **c),
                Caster::Combatant(_) => None,
            },
            TargetSlot::Listed(i) => match self.targets.get_mut(i)? {
                Some(Target::Character(c)) => Some(&mut **c),
                _ => None,
            },
        }
    }
}

// ── Views ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum CasterView<'a> {
    Character(&'a Character),
    Combatant(&'a Combatant),
    /// A combatant index that no longer resolves.
    Missing,
}

impl CasterView<'_> {
    pub fn name(&self) -> &str {
        match self {
            CasterView::Character(c) => &c.name,
            CasterView::Combatant(c) => &c.name,
            CasterView::Missing => "Unknown",
        }
    }

    pub fn spellbook(&self) -> Option<&Spellbook> {
        match self {
            CasterView::Character(c) => Some(&c.spellbook),
            CasterView::Combatant(c) => Some(&c.spellbook),
            CasterView::Missing => None,
        }
    }

    pub fn spell_ab(&self) -> Option<i64> {
        self.spellbook()?.attack_bonus
    }

    pub fn save_dc(&self) -> Option<i64> {
        self.spellbook()?.dc
    }

    pub fn caster_level(&self) -> i64 {
        self.spellbook().map_or(0, |b| b.caster_level)
    }

    /// Values of `-tag` across the caster's status effects.
    pub fn active_effects(&self, tag: &str) -> Vec<String> {
        match self {
            CasterView::Combatant(c) => c.active_effects(tag),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TargetView<'a> {
    None,
    Combatant(&'a Combatant),
    Character(&'a Character),
    Label(&'a str),
}

impl TargetView<'_> {
    /// Everything but "no target" is concrete.
    pub fn is_concrete(&self) -> bool {
        !matches!(self, TargetView::None)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            TargetView::None => None,
            TargetView::Combatant(c) => Some(&c.name),
            TargetView::Character(c) => Some(&c.name),
            TargetView::Label(name) => Some(name),
        }
    }

    pub fn ac(&self) -> Option<i64> {
        match self {
            TargetView::Combatant(c) => c.armor_class(),
            TargetView::Character(c) => Some(c.armor),
            _ => None,
        }
    }

    pub fn active_effects(&self, tag: &str) -> Vec<String> {
        match self {
            TargetView::Combatant(c) => c.active_effects(tag),
            _ => Vec::new(),
        }
    }

    fn save_bonus(&self, skill: &str) -> i64 {
        match self {
            TargetView::Combatant(c) => c.save_bonus(skill),
            TargetView::Character(c) => c.save_bonus(skill),
            _ => 0,
        }
    }

    /// Per-save advantage from the target's own save overrides.
    pub fn save_adv(&self, skill: &str) -> i8 {
        match self {
            TargetView::Combatant(c) => c.save_adv(skill),
            TargetView::Character(c) => c.save_adv(skill),
            _ => 0,
        }
    }

    /// `1d20+3`, plus any `-sb` effect bonuses.
    pub fn save_dice(&self, skill: &str) -> String {
        let mut dice = format!("1d20{:+}", self.save_bonus(skill));
        let sb = self.active_effects("sb");
        if !sb.is_empty() {
            dice.push('+');
            dice.push_str(&sb.join("+"));
        }
        dice
    }

    pub fn resists(&self) -> Resistances {
        match self {
            TargetView::Combatant(c) => c.resists(),
            TargetView::Character(c) => c.resistances.clone(),
            _ => Resistances::default(),
        }
    }
}

// ── Damage application ────────────────────────────────────────────────────────

/// Apply `amount` damage (negative heals) to the current target and queue
/// the resulting status lines.
pub fn apply_damage(ctx: &mut Context<'_>, amount: i64) {
    let slot = ctx.target;
    if let Some(idx) = ctx.encounter.combatant_index(slot) {
        let Some(c) = ctx.encounter.combat_mut().and_then(|c| c.combatants.get_mut(idx)) else {
            return;
        };
        let mut pm = None;
        let footer = if c.hp.is_some() {
            c.mod_hp(-amount, false);
            if c.private {
                pm = Some((c.controller.clone(), format!("{}'s HP: {}", c.name, c.hp_str(true))));
            }
            format!("{}: {}", c.name, c.hp_str(false))
        } else {
            format!("Dealt {amount} damage to {}!", c.name)
        };
        let concentrating = c.is_concentrating();
        ctx.footer_queue(footer);
        if let Some((user, message)) = pm {
            ctx.add_pm(user, message);
        }
        if concentrating && amount > 0 {
            ctx.queue(format!("**Concentration**: DC {}", (amount / 2).max(10)));
        }
        return;
    }
    if let Some(c) = ctx.encounter.character_mut(slot) {
        c.modify_hp(-amount);
        let line = format!("{}: {}", c.name, c.hp_str());
        ctx.footer_queue(line);
    }
}

/// Replace the current target's temporary hit points, floored at 0.
pub fn apply_temp_hp(ctx: &mut Context<'_>, amount: i64) {
    let slot = ctx.target;
    let amount = amount.max(0);
    let line = if let Some(idx) = ctx.encounter.combatant_index(slot) {
        ctx.encounter
            .combat_mut()
            .and_then(|c| c.combatants.get_mut(idx))
            .map(|c| {
                c.set_temp_hp(amount);
                format!("{}: {}", c.name, c.hp_str(false))
            })
    } else {
        ctx.encounter.character_mut(slot).map(|c| {
            c.set_temp_hp(amount);
            format!("{}: {}", c.name, c.hp_str())
        })
    };
    if let Some(line) = line {
        ctx.footer_queue(line);
    }
}
