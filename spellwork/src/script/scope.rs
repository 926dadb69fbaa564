//! Evaluators bound to persistent state.
//!
//! [`ScriptEvaluator`] layers user, character and combat state over the
//! sandbox and exposes the host function surface.  Every mutation is
//! recorded in a [`ChangeLog`] and reaches the store only through
//! [`ScriptEvaluator::commit`].
//!
//! [`SpellEvaluator`] is the lighter evaluator used while running spell
//! automation: builtins only, plus transient name overlays.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::dice::{RollOptions, RollOracle};
use crate::game::{Character, Combat, CounterDisplay, Spellbook};
use crate::store::{PersistentStore, StoreError};
use crate::var::validate_name;

use super::builtins::{arg, opt_arg};
use super::error::{EvaluationError, SandboxError};
use super::eval::{Evaluator, Host, Limits, NoHost, Scope};
use super::expand::{expand, substitute_tokens, Substitute};
use super::value::Value;

/// Who is running a script, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub author: String,
    pub channel: String,
    pub server: Option<String>,
}

/// What an evaluation has changed since the last commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    pub character: bool,
    pub combat: bool,
    /// User variables written or deleted.
    pub uvars: BTreeSet<String>,
}

impl ChangeLog {
    pub fn is_empty(&self) -> bool {
        !self.character && !self.combat && self.uvars.is_empty()
    }

    pub fn clear(&mut self) {
        *self = ChangeLog::default();
    }
}

/// Functions that need a bound character.
const CHARACTER_FUNCTIONS: &[&str] = &[
    "get_cc", "get_cc_max", "get_cc_min", "set_cc", "mod_cc", "delete_cc", "cc_exists",
    "create_cc_nx", "cc_str", "get_slots", "get_slots_max", "slots_str", "set_slots", "use_slot",
    "get_hp", "set_hp", "mod_hp", "hp_str", "get_temphp", "set_temphp", "set_cvar", "set_cvar_nx",
    "delete_cvar", "get_raw",
];

// ── Argument helpers ──────────────────────────────────────────────────────────

fn str_arg(args: &[Value], kwargs: &[(String, Value)], idx: usize, kw: &str, func: &str) -> Result<String, SandboxError> {
    Ok(arg(args, kwargs, idx, kw, func)?.to_string())
}

fn int_arg(args: &[Value], kwargs: &[(String, Value)], idx: usize, kw: &str, func: &str) -> Result<i64, SandboxError> {
    let v = arg(args, kwargs, idx, kw, func)?;
    v.as_int().ok_or_else(|| {
        SandboxError::TypeMismatch(format!("{func}() argument '{kw}' must be int, not {}", v.type_name()))
    })
}

fn opt_str(args: &[Value], kwargs: &[(String, Value)], idx: usize, kw: &str) -> Option<String> {
    match opt_arg(args, kwargs, idx, kw) {
        None | Some(Value::None) => None,
        Some(v) => Some(v.to_string()),
    }
}

fn flag_arg(args: &[Value], kwargs: &[(String, Value)], idx: usize, kw: &str, default: bool) -> bool {
    opt_arg(args, kwargs, idx, kw).map_or(default, Value::truthy)
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// The host half of a [`ScriptEvaluator`]: cached state plus the roller.
struct Bridge<'s, S> {
    store: &'s S,
    roller: Box<dyn RollOracle + 's>,
    invocation: Invocation,
    uvars: BTreeMap<String, String>,
    gvars: HashMap<String, Option<String>>,
    combat: Option<Combat>,
    character: Option<Character>,
    changes: ChangeLog,
}

impl<S: PersistentStore> Bridge<'_, S> {
    fn roll_total(&mut self, dice: &str) -> Result<i64, SandboxError> {
        Ok(self.roller.roll(dice, &RollOptions::default())?.total)
    }

    fn set_uvar(&mut self, name: String, value: String, names: &mut Scope) -> Result<(), SandboxError> {
        if !validate_name(&name) {
            return Err(SandboxError::InvalidVariableName(name));
        }
        names.set(name.clone(), value.as_str());
        self.uvars.insert(name.clone(), value);
        self.changes.uvars.insert(name);
        Ok(())
    }

    fn get_gvar(&mut self, key: &str) -> Result<Value, SandboxError> {
        if let Some(hit) = self.gvars.get(key) {
            return Ok(hit.clone().into());
        }
        let value = self
            .store
            .global_var(key)
            .map_err(|e| SandboxError::bad_arg("get_gvar", e.to_string()))?;
        self.gvars.insert(key.to_owned(), value.clone());
        Ok(value.into())
    }

    fn general(
        &mut self,
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        names: &mut Scope,
    ) -> Result<Option<Value>, SandboxError> {
        Ok(Some(match name {
            "roll" => {
                let dice = str_arg(args, kwargs, 0, "dice", name)?;
                Value::Int(self.roll_total(&dice)?)
            }
            "vroll" => {
                let dice = str_arg(args, kwargs, 0, "dice", name)?;
                let r = self.roller.roll(&dice, &RollOptions::default())?;
                Value::Dict(vec![
                    (Value::str("total"), Value::Int(r.total)),
                    (Value::str("full"), Value::str(r.result.as_str())),
                    (Value::str("dice"), Value::str(r.consolidated())),
                ])
            }
            "combat" => match &self.combat {
                Some(c) => {
                    self.changes.combat = true;
                    c.to_value()
                }
                None => Value::None,
            },
            "get_gvar" => {
                let key = str_arg(args, kwargs, 0, "address", name)?;
                self.get_gvar(&key)?
            }
            "set_uvar" => {
                let var = str_arg(args, kwargs, 0, "name", name)?;
                let value = str_arg(args, kwargs, 1, "value", name)?;
                self.set_uvar(var, value, names)?;
                Value::None
            }
            "set_uvar_nx" => {
                let var = str_arg(args, kwargs, 0, "name", name)?;
                let value = str_arg(args, kwargs, 1, "value", name)?;
                if !names.contains(&var) {
                    self.set_uvar(var, value, names)?;
                }
                Value::None
            }
            "delete_uvar" => {
                let var = str_arg(args, kwargs, 0, "name", name)?;
                if self.uvars.remove(&var).is_some() {
                    self.changes.uvars.insert(var);
                }
                Value::None
            }
            "uvar_exists" => {
                let var = str_arg(args, kwargs, 0, "name", name)?;
                Value::Bool(names.contains(&var) && self.uvars.contains_key(&var))
            }
            "chanid" => Value::str(self.invocation.channel.as_str()),
            "servid" => self.invocation.server.clone().into(),
            _ => return Ok(None),
        }))
    }

    fn character_fn(
        &mut self,
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        names: &mut Scope,
    ) -> Result<Value, SandboxError> {
        let Some(c) = self.character.as_mut() else {
            return Err(SandboxError::MissingCapability(name.to_owned()));
        };
        let mut changed = true;
        let out = match name {
            "get_cc" => {
                changed = false;
                Value::Int(c.counter(&str_arg(args, kwargs, 0, "name", name)?)?.value)
            }
            "get_cc_max" => {
                changed = false;
                Value::Int(c.counter_max(&str_arg(args, kwargs, 0, "name", name)?)?)
            }
            "get_cc_min" => {
                changed = false;
                Value::Int(c.counter_min(&str_arg(args, kwargs, 0, "name", name)?)?)
            }
            "set_cc" | "mod_cc" => {
                let cc = str_arg(args, kwargs, 0, "name", name)?;
                let mut value = int_arg(args, kwargs, 1, "value", name)?;
                if name == "mod_cc" {
                    value = value.saturating_add(c.counter(&cc)?.value);
                }
                c.set_counter(&cc, value, flag_arg(args, kwargs, 2, "strict", false))?;
                Value::None
            }
            "delete_cc" => {
                c.delete_counter(&str_arg(args, kwargs, 0, "name", name)?)?;
                Value::None
            }
            "cc_exists" => {
                changed = false;
                Value::Bool(c.counters.contains_key(&str_arg(args, kwargs, 0, "name", name)?))
            }
            "create_cc_nx" => {
                let cc = str_arg(args, kwargs, 0, "name", name)?;
                if c.counters.contains_key(&cc) {
                    changed = false;
                } else {
                    let display = match opt_str(args, kwargs, 4, "dispType").as_deref() {
                        Some("bubble") => CounterDisplay::Bubble,
                        _ => CounterDisplay::Default,
                    };
                    c.create_counter(
                        &cc,
                        opt_str(args, kwargs, 1, "minVal"),
                        opt_str(args, kwargs, 2, "maxVal"),
                        opt_str(args, kwargs, 3, "reset"),
                        display,
                    )?;
                }
                Value::None
            }
            "cc_str" => {
                changed = false;
                Value::str(c.counter_str(&str_arg(args, kwargs, 0, "name", name)?)?)
            }
            "get_slots" => {
                changed = false;
                Value::Int(c.spellbook.remaining(int_arg(args, kwargs, 0, "level", name)?))
            }
            "get_slots_max" => {
                changed = false;
                Value::Int(c.spellbook.max(int_arg(args, kwargs, 0, "level", name)?))
            }
            "slots_str" => {
                changed = false;
                Value::str(c.spellbook.slots_str(Some(int_arg(args, kwargs, 0, "level", name)?)))
            }
            "set_slots" => {
                let level = int_arg(args, kwargs, 0, "level", name)?;
                let value = int_arg(args, kwargs, 1, "value", name)?;
                c.spellbook.set_remaining(level, value)?;
                Value::None
            }
            "use_slot" => {
                c.spellbook.use_slot(int_arg(args, kwargs, 0, "level", name)?)?;
                Value::None
            }
            "get_hp" => {
                changed = false;
                Value::Int(c.hp)
            }
            "set_hp" => {
                c.set_hp(int_arg(args, kwargs, 0, "value", name)?);
                Value::None
            }
            "mod_hp" => {
                let delta = int_arg(args, kwargs, 0, "value", name)?;
                c.mod_hp(delta, flag_arg(args, kwargs, 1, "overflow", true));
                Value::None
            }
            "hp_str" => {
                changed = false;
                Value::str(c.hp_str())
            }
            "get_temphp" => {
                changed = false;
                Value::Int(c.temp_hp)
            }
            "set_temphp" => {
                c.set_temp_hp(int_arg(args, kwargs, 0, "value", name)?);
                Value::None
            }
            "set_cvar" | "set_cvar_nx" => {
                let var = str_arg(args, kwargs, 0, "name", name)?;
                let value = str_arg(args, kwargs, 1, "value", name)?;
                if name == "set_cvar_nx" && c.cvars.contains_key(&var) {
                    changed = false;
                } else {
                    names.set(var.clone(), value.as_str());
                    c.cvars.insert(var, value);
                }
                Value::None
            }
            "delete_cvar" => {
                let var = str_arg(args, kwargs, 0, "name", name)?;
                changed = c.cvars.remove(&var).is_some();
                Value::None
            }
            "get_raw" => {
                changed = false;
                c.to_value()
            }
            _ => return Err(SandboxError::UnknownFunction(name.to_owned())),
        };
        if changed {
            self.changes.character = true;
        }
        Ok(out)
    }
}

impl<S: PersistentStore> Host for Bridge<'_, S> {
    fn call(
        &mut self,
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        names: &mut Scope,
    ) -> Option<Result<Value, SandboxError>> {
        if CHARACTER_FUNCTIONS.contains(&name) {
            return Some(self.character_fn(name, args, kwargs, names));
        }
        self.general(name, args, kwargs, names).transpose()
    }
}

/// Resolves markup for [`ScriptEvaluator::parse`].
struct ScriptMarkup<'a, 's, S> {
    ev: &'a mut Evaluator,
    bridge: &'a mut Bridge<'s, S>,
}

impl<S: PersistentStore> Substitute for ScriptMarkup<'_, '_, S> {
    fn eval(&mut self, expr: &str) -> Result<Value, SandboxError> {
        self.ev.eval_raw(expr, &mut *self.bridge)
    }

    fn lookup(&mut self, name: &str) -> Result<String, SandboxError> {
        Ok(self
            .ev
            .names
            .get(name)
            .map_or_else(|| name.to_owned(), ToString::to_string))
    }

    fn roll(&mut self, expr: &str) -> Result<String, SandboxError> {
        let names = &self.ev.names;
        let formula = substitute_tokens(expr, |tok| names.get(tok).map(ToString::to_string));
        Ok(self.bridge.roll_total(&formula)?.to_string())
    }
}

// ── ScriptEvaluator ───────────────────────────────────────────────────────────

/// Sandbox evaluator with access to the invoking user's persistent state.
pub struct ScriptEvaluator<'s, S> {
    ev: Evaluator,
    bridge: Bridge<'s, S>,
}

impl<'s, S: PersistentStore> ScriptEvaluator<'s, S> {
    /// Prefetch the author's user variables and the channel's combat.
    pub async fn new(
        store: &'s S,
        invocation: Invocation,
        roller: Box<dyn RollOracle + 's>,
        limits: Limits,
    ) -> Result<Self, StoreError> {
        let uvars = store.user_vars(&invocation.author).await?;
        let combat = store.load_combat(&invocation.channel).await?;
        let mut ev = Evaluator::with_limits(limits);
        ev.names.layer(uvars.iter().map(|(k, v)| (k.clone(), v.as_str())));
        Ok(ScriptEvaluator {
            ev,
            bridge: Bridge {
                store,
                roller,
                invocation,
                uvars,
                gvars: HashMap::new(),
                combat,
                character: None,
                changes: ChangeLog::default(),
            },
        })
    }

    /// Bind a character: its variables shadow user variables and the
    /// character functions become callable.
    pub fn with_character(mut self, character: Character) -> Self {
        let names = &mut self.ev.names;
        names.layer(character.cvar_names());
        names.layer(character.stat_vars());
        if let Some(ab) = character.spell_ab() {
            names.set("spell", ab - character.prof_bonus);
        }
        names.set("color", format!("{:x}", character.color));
        names.set("currentHp", character.hp);
        self.bridge.character = Some(character);
        self
    }

    pub fn eval(&mut self, src: &str) -> Result<Value, EvaluationError> {
        self.ev.eval(src, &mut self.bridge)
    }

    /// Expand `{{expr}}`, `<name>` and `{roll}` markup in `text`.
    pub fn parse(&mut self, text: &str) -> Result<String, EvaluationError> {
        let mut markup = ScriptMarkup { ev: &mut self.ev, bridge: &mut self.bridge };
        expand(text, &mut markup)
    }

    pub fn names(&self) -> &Scope {
        &self.ev.names
    }

    pub fn names_mut(&mut self) -> &mut Scope {
        &mut self.ev.names
    }

    pub fn changes(&self) -> &ChangeLog {
        &self.bridge.changes
    }

    pub fn character(&self) -> Option<&Character> {
        self.bridge.character.as_ref()
    }

    pub fn combat(&self) -> Option<&Combat> {
        self.bridge.combat.as_ref()
    }

    /// Flush tracked changes.  The log is cleared only after every write
    /// succeeds.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        let b = &mut self.bridge;
        if b.changes.character {
            if let Some(c) = &b.character {
                log::debug!("saving character {}", c.name);
                b.store.save_character(c).await?;
            }
        }
        if b.changes.combat {
            if let Some(c) = &b.combat {
                log::debug!("saving combat in {}", c.channel);
                b.store.save_combat(c).await?;
            }
        }
        let owner = &b.invocation.author;
        for name in &b.changes.uvars {
            match b.uvars.get(name) {
                Some(value) => b.store.set_user_var(owner, name, value).await?,
                None => b.store.delete_user_var(owner, name).await?,
            }
        }
        if !b.changes.uvars.is_empty() {
            log::debug!("flushed {} user variables for {owner}", b.changes.uvars.len());
        }
        b.changes.clear();
        Ok(())
    }
}

// ── SpellEvaluator ────────────────────────────────────────────────────────────

/// Proficiency bonus implied by a total level.
pub fn proficiency_for_level(level: i64) -> i64 {
    (level + 7).div_euclid(4)
}

/// Builtins-only evaluator used inside automation.
#[derive(Debug, Clone, Default)]
pub struct SpellEvaluator {
    ev: Evaluator,
}

/// Resolves markup for [`SpellEvaluator::parse`].
struct SpellMarkup<'a> {
    ev: &'a mut Evaluator,
}

impl Substitute for SpellMarkup<'_> {
    fn eval(&mut self, expr: &str) -> Result<Value, SandboxError> {
        self.ev.eval_raw(expr, &mut NoHost)
    }

    fn lookup(&mut self, name: &str) -> Result<String, SandboxError> {
        Ok(self
            .ev
            .names
            .get(name)
            .map_or_else(|| name.to_owned(), ToString::to_string))
    }

    fn roll(&mut self, expr: &str) -> Result<String, SandboxError> {
        Ok(self
            .ev
            .names
            .get(expr)
            .map_or_else(|| format!("{{{expr}}}"), ToString::to_string))
    }
}

impl SpellEvaluator {
    pub fn new(limits: Limits) -> Self {
        SpellEvaluator { ev: Evaluator::with_limits(limits) }
    }

    /// Character variables plus `spell`, the spellcasting modifier.
    pub fn with_character(character: &Character, spell_override: Option<i64>, limits: Limits) -> Self {
        let mut out = Self::new(limits);
        out.ev.names.layer(character.cvar_names());
        out.ev.names.layer(character.stat_vars());
        let spell = spell_override.or_else(|| character.spell_ab().map(|ab| ab - character.prof_bonus));
        if let Some(spell) = spell {
            out.ev.names.set("spell", spell);
        }
        out
    }

    /// Only `spell`, derived from a bare spellbook.
    pub fn with_caster(spellbook: &Spellbook, spell_override: Option<i64>, limits: Limits) -> Self {
        let mut out = Self::new(limits);
        let spell = spell_override.or_else(|| {
            spellbook
                .attack_bonus
                .map(|ab| ab - proficiency_for_level(spellbook.caster_level))
        });
        if let Some(spell) = spell {
            out.ev.names.set("spell", spell);
        }
        out
    }

    pub fn names(&self) -> &Scope {
        &self.ev.names
    }

    pub fn names_mut(&mut self) -> &mut Scope {
        &mut self.ev.names
    }

    pub fn eval(&mut self, src: &str) -> Result<Value, EvaluationError> {
        self.ev.eval(src, &mut NoHost)
    }

    /// Expand spell text.  `extra_names` are visible only for this call; the
    /// scope is restored afterwards whether or not expansion succeeds.
    pub fn parse(&mut self, text: &str, extra_names: &[(String, Value)]) -> Result<String, EvaluationError> {
        if extra_names.is_empty() {
            return expand(text, &mut SpellMarkup { ev: &mut self.ev });
        }
        let saved = self.ev.names.clone();
        self.ev.names.layer(extra_names.iter().cloned());
        let out = expand(text, &mut SpellMarkup { ev: &mut self.ev });
        self.ev.names = saved;
        out
    }

    pub fn parse_dicecloud(&mut self, text: &str) -> Result<String, EvaluationError> {
        self.ev.parse_dicecloud(text, &mut NoHost)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
