//! Timed status effects attached to combatants.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::args::Args;

/// Points at one effect on one combatant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectRef {
    pub combatant: String,
    pub id: u64,
}

fn indefinite() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    /// Assigned by the combat when the effect is added.
    #[serde(default)]
    pub id: u64,
    pub name: String,
    /// Rounds; negative means indefinite.
    #[serde(default = "indefinite")]
    pub duration: i64,
    #[serde(default = "indefinite")]
    pub remaining: i64,
    /// Argument string such as `-b 2 -resist fire`.
    #[serde(default)]
    pub effect: String,
    #[serde(default)]
    pub concentration: bool,
    #[serde(default)]
    pub tick_on_end: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EffectRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EffectRef>,
}

/// Human names for the effect argument tags.
const TAG_NAMES: &[(&str, &str)] = &[
    ("b", "Attack Bonus"),
    ("d", "Damage Bonus"),
    ("ac", "AC"),
    ("sb", "Save Bonus"),
    ("sadv", "Save Advantage"),
    ("sdis", "Save Disadvantage"),
    ("resist", "Resistance"),
    ("immune", "Immunity"),
    ("vuln", "Vulnerability"),
    ("neutral", "Ignored Resistance"),
];

impl StatusEffect {
    pub fn new(name: impl Into<String>, duration: i64, effect: impl Into<String>) -> Self {
        StatusEffect {
            id: 0,
            name: name.into(),
            duration,
            remaining: duration,
            effect: effect.into(),
            concentration: false,
            tick_on_end: false,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn concentration(mut self, conc: bool) -> Self {
        self.concentration = conc;
        self
    }

    pub fn args(&self) -> Args {
        Args::parse(&self.effect)
    }

    pub fn is_indefinite(&self) -> bool {
        self.duration < 0
    }

    /// Count down one round.  Returns true once the effect has run out.
    pub fn tick(&mut self) -> bool {
        if self.is_indefinite() {
            return false;
        }
        self.remaining -= 1;
        self.remaining <= 0
    }

    /// Readable summary of the effect arguments.
    pub fn describe(&self) -> String {
        let args = self.args();
        TAG_NAMES
            .iter()
            .filter_map(|(tag, label)| {
                let values = args.get(tag);
                match values.as_slice() {
                    [] => None,
                    ["True"] => Some((*label).to_owned()),
                    vs => Some(format!("{label}: {}", vs.join(", "))),
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for StatusEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.is_indefinite() {
            let unit = if self.remaining == 1 { "round" } else { "rounds" };
            write!(f, " [{} {unit}]", self.remaining)?;
        }
        if self.concentration {
            f.write_str(" <C>")?;
        }
        let desc = self.describe();
        if !desc.is_empty() {
            write!(f, " ({desc})")?;
        }
        Ok(())
    }
}
