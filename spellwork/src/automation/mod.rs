//! Spell automation: a declarative effect tree walked against a cast.
//!
//! A spell's automation is a list of [`Effect`] nodes.  Running it against a
//! [`Context`] rolls dice through the context's oracle, mutates the
//! [`Encounter`] (hit points, temp hit points, status effects) and queues
//! display output, which [`Context::finish`] drains into fields and a footer.
//!
//! Any error aborts the whole run.  Game state already changed stays changed;
//! the caller is expected to discard queued output and not persist.

pub mod context;
pub mod effect;
pub mod formula;
pub mod nodes;
pub mod target;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::args::ArgError;
use crate::dice::RollError;
use crate::script::EvaluationError;
use crate::store::{notify, Notifier};

pub use context::{CastReport, Context, Field, RunOutput};
pub use effect::{Effect, TargetSelector};
pub use target::{Caster, Encounter, Target, TargetSlot};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutomationError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("this spell needs a save DC; pass -dc or set one on the caster")]
    MissingDc,

    #[error("this spell needs an attack bonus; pass -b or set one on the caster")]
    MissingAttackBonus,

    #[error("`{0}` does not roll any dice")]
    InvalidDiceExpression(String),

    #[error("`{0}` is not a saving throw")]
    InvalidSaveType(String),

    #[error("invalid override: {0}")]
    InvalidOverride(String),

    #[error("no target #{0}")]
    TargetIndexOutOfRange(usize),

    #[error(transparent)]
    Roll(#[from] RollError),

    #[error("{0}")]
    Spell(String),
}

impl From<ArgError> for AutomationError {
    fn from(e: ArgError) -> Self {
        AutomationError::InvalidOverride(e.to_string())
    }
}

/// A spell's effect list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Automation {
    pub effects: Vec<Effect>,
}

impl Automation {
    pub fn new(effects: Vec<Effect>) -> Self {
        Automation { effects }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Run every top-level node, then drain the context's output.
    pub fn run(&self, ctx: &mut Context<'_>) -> Result<RunOutput, AutomationError> {
        nodes::run_all(&self.effects, ctx)?;
        Ok(ctx.finish())
    }
}

/// Send each user their queued private lines as one message.
pub async fn deliver_private<N: Notifier + ?Sized>(
    notifier: &N,
    caster: &str,
    spell: &str,
    private: &[(String, Vec<String>)],
) {
    for (user, lines) in private {
        let message = format!("{caster} cast {spell}!\n{}", lines.join("\n"));
        notify(notifier, user, &message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNotifier;

    #[test]
    fn automation_is_a_bare_list() {
        let auto = Automation::from_json(r#"[{"type": "text", "text": "Boom."}]"#).unwrap();
        assert_eq!(auto.effects.len(), 1);
        assert_eq!(serde_json::to_string(&auto).unwrap(), r#"[{"type":"text","text":"Boom."}]"#);
    }

    #[tokio::test]
    async fn private_lines_are_grouped_per_user() {
        let notifier = MemoryNotifier::new();
        let private = vec![("u1".to_owned(), vec!["Orc's HP: <Injured>".to_owned(), "again".to_owned()])];
        deliver_private(&notifier, "Vex", "Fireball", &private).await;
        assert_eq!(
            notifier.sent().await,
            [("u1".to_owned(), "Vex cast Fireball!\nOrc's HP: <Injured>\nagain".to_owned())]
        );
    }
}
