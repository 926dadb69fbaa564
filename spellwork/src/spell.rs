//! Spells and the cast workflow.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::args::Args;
use crate::automation::{
    deliver_private, Automation, AutomationError, CastReport, Context, Encounter, Field,
};
use crate::automation::target::CasterView;
use crate::config::EngineConfig;
use crate::dice::RollOracle;
use crate::game::{StatusEffect, Stats};
use crate::script::scope::proficiency_for_level;
use crate::store::Notifier;

static COMBAT_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Concentration, up to )?(\d+) (\w+)")
        .unwrap_or_else(|e| panic!("duration regex: {e}"))
});

const STAT_FLAGS: [(&str, &str); 6] = [
    ("str", "Strength"),
    ("dex", "Dexterity"),
    ("con", "Constitution"),
    ("int", "Intelligence"),
    ("wis", "Wisdom"),
    ("cha", "Charisma"),
];

// ── Components ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Material {
    Flag(bool),
    Text(String),
}

/// Structured components, as homebrew spells carry them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Components {
    #[serde(default)]
    pub verbal: bool,
    #[serde(default)]
    pub somatic: bool,
    #[serde(default)]
    pub material: Option<Material>,
}

/// `V, S, M (a pinch of sulfur)`.
impl fmt::Display for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.verbal {
            parts.push("V".to_owned());
        }
        if self.somatic {
            parts.push("S".to_owned());
        }
        match &self.material {
            Some(Material::Flag(true)) => parts.push("M".to_owned()),
            Some(Material::Text(text)) if !text.is_empty() => parts.push(format!("M ({text})")),
            _ => {}
        }
        f.write_str(&parts.join(", "))
    }
}

fn components_field<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Parts(Components),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Text(s) => s,
        Raw::Parts(c) => c.to_string(),
    })
}

/// A list, or a comma-separated string.
fn name_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::List(v) => v,
        Raw::Text(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
    })
}

// ── Spell ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spell {
    pub name: String,
    pub level: i64,
    /// Single-letter school code (`V` for evocation) or a full name.
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub casttime: String,
    #[serde(default)]
    pub range: String,
    #[serde(default, deserialize_with = "components_field")]
    pub components: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "name_list")]
    pub classes: Vec<String>,
    #[serde(default, deserialize_with = "name_list")]
    pub subclasses: Vec<String>,
    #[serde(default)]
    pub ritual: bool,
    #[serde(default)]
    pub higherlevels: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub concentration: bool,
    #[serde(default)]
    pub automation: Option<Automation>,
    #[serde(default)]
    pub srd: bool,
    #[serde(default)]
    pub image: Option<String>,
}

impl Spell {
    pub fn new(name: impl Into<String>, level: i64) -> Self {
        Spell {
            name: name.into(),
            level,
            ..Spell::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut spell: Spell = serde_json::from_str(json)?;
        spell.normalize();
        Ok(spell)
    }

    /// Concentration spells say so in their duration.
    pub fn normalize(&mut self) {
        if self.concentration && !self.duration.contains("Concentration") {
            self.duration = format!("Concentration, up to {}", self.duration);
        }
    }

    pub fn school_name(&self) -> &str {
        match self.school.as_str() {
            "A" => "Abjuration",
            "V" => "Evocation",
            "E" => "Enchantment",
            "I" => "Illusion",
            "D" => "Divination",
            "N" => "Necromancy",
            "T" => "Transmutation",
            "C" => "Conjuration",
            other => other,
        }
    }

    pub fn level_name(&self) -> String {
        match self.level {
            0 => "cantrip".to_owned(),
            1 => "1st level".to_owned(),
            2 => "2nd level".to_owned(),
            3 => "3rd level".to_owned(),
            n => format!("{n}th level"),
        }
    }

    /// Duration in rounds: `N rounds` is N, `1 minute` is 10, anything else
    /// is indefinite (-1).
    pub fn combat_duration(&self) -> i64 {
        let Some(caps) = COMBAT_DURATION.captures(&self.duration) else {
            return -1;
        };
        let Ok(num) = caps[1].parse::<i64>() else {
            return -1;
        };
        let unit = &caps[2];
        if unit.contains("round") {
            num
        } else if unit.contains("minute") && num == 1 {
            10
        } else {
            -1
        }
    }

    pub fn has_automation(&self) -> bool {
        self.automation.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Cast this spell.
    ///
    /// Recognised options: `-l` cast level, `-i` ignore slots and the known
    /// spell list, `-phrase`, `-title` (`[sname]` and `[charname]` are
    /// replaced), `-mod` or one of `-str`/`-dex`/... to cast with another
    /// ability, `-dur` concentration duration.  Everything else is read by
    /// the automation nodes.
    ///
    /// An automation error aborts the cast and the report is discarded; game
    /// state in `encounter` may already have changed and should not be
    /// persisted.
    pub async fn cast<N: Notifier + ?Sized>(
        &self,
        encounter: &mut Encounter,
        args: &Args,
        roller: &mut dyn RollOracle,
        notifier: &N,
        config: &EngineConfig,
    ) -> Result<CastReport, AutomationError> {
        let level = args.last_int("l")?.unwrap_or(self.level);
        let ignore = args.flag("i");
        let phrase = args.join("phrase", "\n");

        if !(self.level..=9).contains(&level) {
            return Err(AutomationError::Spell("Invalid spell level.".into()));
        }

        if !ignore {
            let Some(book) = encounter.caster_spellbook_mut() else {
                return Err(AutomationError::Spell("caster is not in this combat".into()));
            };
            if !(book.knows(&self.name) && book.can_cast(level)) {
                let mut report = CastReport {
                    title: "Cannot cast spell!".into(),
                    description: Some(
                        "Not enough spell slots remaining, or spell not in known spell list!\n\
                         Pass `-i` to ignore restrictions."
                            .into(),
                    ),
                    ..CastReport::default()
                };
                if level > 0 {
                    report.fields.push(Field::new("Spell Slots", book.slots_str(Some(level))));
                }
                return Ok(report);
            }
            book.use_slot(level)
                .map_err(|e| AutomationError::Spell(e.to_string()))?;
        }

        let (overrides, stat_note) = self.stat_overrides(encounter, args)?;
        let caster_name = encounter.caster_view().name().to_owned();

        let mut report = CastReport {
            title: self.title(args, &caster_name, &stat_note, !encounter.targets().is_empty()),
            description: phrase.map(|p| format!("*{p}*")),
            image: self.image.clone(),
            ..CastReport::default()
        };
        if encounter.targets().is_empty() {
            encounter.targets_mut().push(None);
        }

        let mut conc_effect = None;
        let mut dropped = Vec::new();
        if self.concentration {
            if let Some(idx) = encounter.caster_combatant_index() {
                let duration = args.last_int("dur")?.unwrap_or_else(|| self.combat_duration());
                if let Some(combat) = encounter.combat_mut() {
                    let effect = StatusEffect::new(self.name.as_str(), duration, "").concentration(true);
                    let (added, conflicts) = combat
                        .add_effect(idx, effect)
                        .map_err(|e| AutomationError::Spell(e.to_string()))?;
                    conc_effect = Some(added);
                    dropped = conflicts;
                }
            }
        }

        let mut private = Vec::new();
        match &self.automation {
            Some(automation) if !automation.is_empty() => {
                let mut ctx = Context::new(encounter, args, roller, config, self.name.as_str(), self.level)
                    .with_overrides(overrides.attack_bonus, overrides.dc, overrides.spell_mod)
                    .with_concentration(conc_effect);
                let output = automation.run(&mut ctx)?;
                report.fields.extend(output.fields);
                report.footer = output.footer;
                private = output.private;
            }
            _ => {
                report.fields.push(Field::new(
                    "Description",
                    truncate(&self.description, config.max_text_length),
                ));
                if level != self.level && !self.higherlevels.is_empty() {
                    report.fields.push(Field::new("At Higher Levels", self.higherlevels.as_str()));
                }
                report.footer = Some("No spell automation found.".into());
            }
        }

        if level > 0 && !ignore {
            if let Some(book) = encounter.caster_spellbook_mut() {
                report.fields.push(Field::new("Spell Slots", book.slots_str(Some(level))));
            }
        }

        if !dropped.is_empty() {
            let names: Vec<&str> = dropped.iter().map(|e| e.name.as_str()).collect();
            report.fields.push(Field::new(
                "Concentration",
                format!("Dropped {} due to concentration.", names.join(", ")),
            ));
        }

        deliver_private(notifier, &caster_name, &self.name, &private).await;
        Ok(report)
    }

    fn title(&self, args: &Args, caster: &str, stat_note: &str, has_targets: bool) -> String {
        match args.last("title") {
            Some(t) => t.replace("[sname]", &self.name).replace("[charname]", caster),
            None if has_targets => format!("{caster} casts {}{stat_note} at...", self.name),
            None => format!("{caster} casts {}{stat_note}!", self.name),
        }
    }

    /// `-mod N` or `-str` etc. recompute the attack bonus, DC and `spell`.
    fn stat_overrides(&self, encounter: &Encounter, args: &Args) -> Result<(Overrides, String), AutomationError> {
        let caster = encounter.caster_view();
        let prof = match caster {
            CasterView::Character(c) => c.prof_bonus,
            _ => proficiency_for_level(caster.caster_level()),
        };
        let from_mod = |m: i64| Overrides {
            attack_bonus: Some(m + prof),
            dc: Some(8 + m + prof),
            spell_mod: Some(m),
        };
        if let Some(m) = args.last_int("mod")? {
            return Ok((from_mod(m), String::new()));
        }
        if let CasterView::Character(c) = caster {
            if let Some((flag, name)) = STAT_FLAGS.iter().find(|(flag, _)| args.flag(flag)) {
                let score = c.stats.by_prefix(flag).unwrap_or(10);
                return Ok((from_mod(Stats::modifier(score)), format!(" with {name}")));
            }
        }
        Ok((Overrides::default(), String::new()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Overrides {
    attack_bonus: Option<i64>,
    dc: Option<i64>,
    spell_mod: Option<i64>,
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let mut cut: String = text.chars().take(limit).collect();
        cut.push_str("...");
        cut
    } else {
        text.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_levels() {
        let mut s = Spell::new("Fireball", 3);
        s.school = "V".into();
        assert_eq!(s.school_name(), "Evocation");
        assert_eq!(s.level_name(), "3rd level");
        s.level = 0;
        assert_eq!(s.level_name(), "cantrip");
        s.level = 7;
        assert_eq!(s.level_name(), "7th level");
        s.school = "Chronurgy".into();
        assert_eq!(s.school_name(), "Chronurgy");
    }

    #[test]
    fn combat_durations() {
        let mut s = Spell::new("Bless", 1);
        s.duration = "1 minute".into();
        s.concentration = true;
        s.normalize();
        assert_eq!(s.duration, "Concentration, up to 1 minute");
        assert_eq!(s.combat_duration(), 10);
        s.duration = "6 rounds".into();
        assert_eq!(s.combat_duration(), 6);
        s.duration = "10 minutes".into();
        assert_eq!(s.combat_duration(), -1);
        s.duration = "Instantaneous".into();
        assert_eq!(s.combat_duration(), -1);
    }

    #[test]
    fn homebrew_components_and_classes() {
        let spell = Spell::from_json(
            r#"{"name": "Sparkle", "level": 1, "classes": "Wizard, Sorcerer",
                "components": {"verbal": true, "somatic": false, "material": "glitter"}}"#,
        )
        .unwrap();
        assert_eq!(spell.components, "V, M (glitter)");
        assert_eq!(spell.classes, ["Wizard", "Sorcerer"]);

        let c = Components {
            verbal: true,
            somatic: true,
            material: Some(Material::Flag(true)),
        };
        assert_eq!(c.to_string(), "V, S, M");
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
