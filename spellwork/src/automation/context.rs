//! Per-cast state: output queues, meta variables and the current target.

use crate::args::Args;
use crate::config::EngineConfig;
use crate::dice::{RollOptions, RollOracle, RollResult};
use crate::game::EffectRef;
use crate::script::{Limits, SpellEvaluator, Value};

use super::target::{CasterView, Encounter, TargetSlot, TargetView};
use super::AutomationError;

/// One titled block of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            value: value.into(),
            inline: false,
        }
    }
}

/// The rendered result of a cast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CastReport {
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<Field>,
    pub footer: Option<String>,
    pub image: Option<String>,
}

/// Queued output once a run finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub fields: Vec<Field>,
    pub footer: Option<String>,
    /// Private messages per user, in the order first queued.
    pub private: Vec<(String, Vec<String>)>,
}

pub struct Context<'a> {
    pub(crate) encounter: &'a mut Encounter,
    pub(crate) roller: &'a mut dyn RollOracle,
    pub args: &'a Args,
    pub config: &'a EngineConfig,
    pub evaluator: SpellEvaluator,
    pub spell_name: String,
    pub spell_level: i64,
    /// The caster's concentration effect started by this cast.
    pub conc_effect: Option<EffectRef>,
    pub ab_override: Option<i64>,
    pub dc_override: Option<i64>,
    pub target: Option<TargetSlot>,
    pub in_crit: bool,
    metavars: Vec<(String, Value)>,
    embed_queue: Vec<String>,
    meta_queue: Vec<String>,
    effect_queue: Vec<String>,
    fields: Vec<Field>,
    footer_queue: Vec<String>,
    pm_queue: Vec<(String, Vec<String>)>,
}

impl<'a> Context<'a> {
    pub fn new(
        encounter: &'a mut Encounter,
        args: &'a Args,
        roller: &'a mut dyn RollOracle,
        config: &'a EngineConfig,
        spell_name: impl Into<String>,
        spell_level: i64,
    ) -> Self {
        let evaluator = caster_evaluator(encounter, None, Limits::from(config));
        Context {
            encounter,
            roller,
            args,
            config,
            evaluator,
            spell_name: spell_name.into(),
            spell_level,
            conc_effect: None,
            ab_override: None,
            dc_override: None,
            target: None,
            in_crit: false,
            metavars: Vec::new(),
            embed_queue: Vec::new(),
            meta_queue: Vec::new(),
            effect_queue: Vec::new(),
            fields: Vec::new(),
            footer_queue: Vec::new(),
            pm_queue: Vec::new(),
        }
    }

    /// Caller-supplied spellcasting numbers; `spell_mod` rebinds `spell`.
    pub fn with_overrides(mut self, attack_bonus: Option<i64>, dc: Option<i64>, spell_mod: Option<i64>) -> Self {
        self.ab_override = attack_bonus;
        self.dc_override = dc;
        if spell_mod.is_some() {
            self.evaluator = caster_evaluator(&*self.encounter, spell_mod, Limits::from(self.config));
        }
        self
    }

    pub fn with_concentration(mut self, effect: Option<EffectRef>) -> Self {
        self.conc_effect = effect;
        self
    }

    pub fn encounter(&self) -> &Encounter {
        &*self.encounter
    }

    pub fn caster(&self) -> CasterView<'_> {
        self.encounter.caster_view()
    }

    pub fn current(&self) -> TargetView<'_> {
        self.encounter.view(self.target)
    }

    /// `-l` from the cast options, else the spell's own level.
    pub fn cast_level(&self) -> Result<i64, AutomationError> {
        Ok(self.args.last_int("l")?.unwrap_or(self.spell_level))
    }

    /// Expand spell text with the meta variables overlaid.
    pub fn parse_annostr(&mut self, text: &str) -> Result<String, AutomationError> {
        Ok(self.evaluator.parse(text, &self.metavars)?)
    }

    /// Expand and require an integer.
    pub fn parse_int(&mut self, text: &str, what: &str) -> Result<i64, AutomationError> {
        let expanded = self.parse_annostr(text)?;
        expanded
            .trim()
            .parse()
            .map_err(|_| AutomationError::InvalidOverride(format!("{what} `{expanded}` is not an integer")))
    }

    pub fn roll(&mut self, formula: &str, opts: &RollOptions) -> Result<RollResult, AutomationError> {
        Ok(self.roller.roll(formula, opts)?)
    }

    pub fn metavars(&self) -> &[(String, Value)] {
        &self.metavars
    }

    pub fn set_metavar(&mut self, name: &str, value: Value) {
        match self.metavars.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.metavars.push((name.to_owned(), value)),
        }
    }

    // ── Output queues ─────────────────────────────────────────────────────────

    /// Line for the section currently being built.
    pub fn queue(&mut self, text: impl Into<String>) {
        self.embed_queue.push(text.into());
    }

    pub fn meta_queue(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !self.meta_queue.contains(&text) {
            self.meta_queue.push(text);
        }
    }

    pub fn effect_queue(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !self.effect_queue.contains(&text) {
            self.effect_queue.push(text);
        }
    }

    pub fn footer_queue(&mut self, text: impl Into<String>) {
        self.footer_queue.push(text.into());
    }

    pub fn add_pm(&mut self, user: impl Into<String>, message: impl Into<String>) {
        let user = user.into();
        let message = message.into();
        match self.pm_queue.iter_mut().find(|(u, _)| *u == user) {
            Some((_, msgs)) => msgs.push(message),
            None => self.pm_queue.push((user, vec![message])),
        }
    }

    /// Close the current section: a titled field, or the meta section when
    /// untitled.
    pub fn push_field(&mut self, title: Option<&str>) {
        if self.embed_queue.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut self.embed_queue);
        match title {
            Some(name) => self.fields.push(Field::new(name, lines.join("\n"))),
            None => self.meta_queue.extend(lines),
        }
    }

    /// Drain all queues.  Unclosed section lines join the meta section,
    /// which leads; each effect line becomes its own field.
    pub fn finish(&mut self) -> RunOutput {
        let mut meta = std::mem::take(&mut self.meta_queue);
        for line in std::mem::take(&mut self.embed_queue) {
            if !meta.contains(&line) {
                meta.push(line);
            }
        }
        let mut fields = Vec::new();
        if !meta.is_empty() {
            fields.push(Field::new("Meta", meta.join("\n")));
        }
        fields.append(&mut self.fields);
        fields.extend(
            std::mem::take(&mut self.effect_queue)
                .into_iter()
                .map(|e| Field::new("Effect", e)),
        );
        let footer = std::mem::take(&mut self.footer_queue);
        RunOutput {
            fields,
            footer: (!footer.is_empty()).then(|| footer.join("\n")),
            private: std::mem::take(&mut self.pm_queue),
        }
    }
}

fn caster_evaluator(encounter: &Encounter, spell_mod: Option<i64>, limits: Limits) -> SpellEvaluator {
    match encounter.caster_view() {
        CasterView::Character(c) => SpellEvaluator::with_character(c, spell_mod, limits),
        CasterView::Combatant(c) => SpellEvaluator::with_caster(&c.spellbook, spell_mod, limits),
        CasterView::Missing => SpellEvaluator::new(limits),
    }
}
