//! Effect tree nodes, as stored in spell data.
//!
//! Each node serializes as `{"type": ..., "meta": [...], ...}`:
//!
//! ```json
//! {"type": "target", "target": "all", "effects": [
//!     {"type": "save", "stat": "dex", "fail": [
//!         {"type": "damage", "damage": "8d6 [fire]", "higher": {"4": "1d6"}}
//!     ], "success": [
//!         {"type": "damage", "damage": "(8d6) / 2 [fire]"}
//!     ]}
//! ]}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// One automation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Effect {
    Target(TargetEffect),
    Attack(AttackEffect),
    Save(SaveEffect),
    Damage(DamageEffect),
    #[serde(rename = "temphp")]
    TempHp(TempHpEffect),
    #[serde(rename = "ieffect")]
    InflictEffect(InflictEffect),
    Roll(RollEffect),
    Text(TextEffect),
}

impl Effect {
    /// Nodes run before this node's own logic.
    pub fn meta(&self) -> &[Effect] {
        match self {
            Effect::Target(e) => &e.meta,
            Effect::Attack(e) => &e.meta,
            Effect::Save(e) => &e.meta,
            Effect::Damage(e) => &e.meta,
            Effect::TempHp(e) => &e.meta,
            Effect::InflictEffect(e) => &e.meta,
            Effect::Roll(e) => &e.meta,
            Effect::Text(e) => &e.meta,
        }
    }

    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Target(_) => "target",
            Effect::Attack(_) => "attack",
            Effect::Save(_) => "save",
            Effect::Damage(_) => "damage",
            Effect::TempHp(_) => "temphp",
            Effect::InflictEffect(_) => "ieffect",
            Effect::Roll(_) => "roll",
            Effect::Text(_) => "text",
        }
    }
}

// ── Target selection ──────────────────────────────────────────────────────────

/// Which of the cast's targets a [`TargetEffect`] runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelector", into = "RawSelector")]
pub enum TargetSelector {
    /// 1-based position in the target list.
    Index(usize),
    All,
    Each,
    /// The caster.
    Caster,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Index(i64),
    Name(String),
}

impl TryFrom<RawSelector> for TargetSelector {
    type Error = String;

    fn try_from(raw: RawSelector) -> Result<Self, Self::Error> {
        match raw {
            RawSelector::Index(i) if i >= 1 => usize::try_from(i)
                .map(TargetSelector::Index)
                .map_err(|e| e.to_string()),
            RawSelector::Index(i) => Err(format!("target index {i} must be at least 1")),
            RawSelector::Name(s) => match s.to_lowercase().as_str() {
                "all" => Ok(TargetSelector::All),
                "each" => Ok(TargetSelector::Each),
                "self" => Ok(TargetSelector::Caster),
                other => Err(format!("unknown target `{other}`")),
            },
        }
    }
}

impl From<TargetSelector> for RawSelector {
    fn from(s: TargetSelector) -> Self {
        match s {
            TargetSelector::Index(i) => RawSelector::Index(i64::try_from(i).unwrap_or(i64::MAX)),
            TargetSelector::All => RawSelector::Name("all".into()),
            TargetSelector::Each => RawSelector::Name("each".into()),
            TargetSelector::Caster => RawSelector::Name("self".into()),
        }
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelector::Index(i) => write!(f, "{i}"),
            TargetSelector::All => f.write_str("all"),
            TargetSelector::Each => f.write_str("each"),
            TargetSelector::Caster => f.write_str("self"),
        }
    }
}

// ── Node payloads ─────────────────────────────────────────────────────────────

/// Field deserializer that reads an explicit `null` as the default.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEffect {
    pub target: TargetSelector,
    #[serde(default, deserialize_with = "null_default")]
    pub effects: Vec<Effect>,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<Effect>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackEffect {
    #[serde(default, deserialize_with = "null_default")]
    pub hit: Vec<Effect>,
    #[serde(default, deserialize_with = "null_default")]
    pub miss: Vec<Effect>,
    /// Replaces the caster's spell attack bonus; must evaluate to an int.
    #[serde(rename = "attackBonus", default, skip_serializing_if = "Option::is_none")]
    pub attack_bonus: Option<String>,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<Effect>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveEffect {
    /// Substring of a save skill, e.g. `dex`.
    pub stat: String,
    #[serde(default, deserialize_with = "null_default")]
    pub fail: Vec<Effect>,
    #[serde(default, deserialize_with = "null_default")]
    pub success: Vec<Effect>,
    /// Replaces the caster's save DC; must evaluate to an int.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dc: Option<String>,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<Effect>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageEffect {
    pub damage: String,
    /// Extra dice keyed by cast level.
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub higher: BTreeMap<String, String>,
    #[serde(rename = "cantripScale", default, deserialize_with = "null_default")]
    pub cantrip_scale: bool,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<Effect>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempHpEffect {
    pub amount: String,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub higher: BTreeMap<String, String>,
    #[serde(rename = "cantripScale", default, deserialize_with = "null_default")]
    pub cantrip_scale: bool,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<Effect>,
}

/// Rounds, either literal or a formula evaluated at cast time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Duration {
    Rounds(i64),
    Formula(String),
}

impl Default for Duration {
    fn default() -> Self {
        Duration::Rounds(-1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InflictEffect {
    pub name: String,
    #[serde(default)]
    pub duration: Duration,
    /// Status effect arguments, e.g. `-ac 2 -sb 1d4`.
    #[serde(default)]
    pub effects: String,
    /// Tick at the end of the turn instead of the start.
    #[serde(rename = "end", default)]
    pub tick_on_end: bool,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<Effect>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollEffect {
    pub dice: String,
    /// Meta variable the consolidated result is stored under.
    pub name: String,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub higher: BTreeMap<String, String>,
    #[serde(rename = "cantripScale", default, deserialize_with = "null_default")]
    pub cantrip_scale: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<Effect>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextEffect {
    pub text: String,
    #[serde(default, deserialize_with = "null_default", skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<Effect>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_tree() {
        let json = r#"{"type": "target", "target": "all", "effects": [
            {"type": "save", "stat": "dex", "fail": [
                {"type": "damage", "damage": "8d6 [fire]", "higher": {"4": "1d6"}}
            ], "success": []}
        ]}"#;
        let effect: Effect = serde_json::from_str(json).unwrap();
        let Effect::Target(t) = &effect else { panic!("not a target: {effect:?}") };
        assert_eq!(t.target, TargetSelector::All);
        let Effect::Save(s) = &t.effects[0] else { panic!() };
        assert_eq!(s.stat, "dex");
        let Effect::Damage(d) = &s.fail[0] else { panic!() };
        assert_eq!(d.higher.get("4").map(String::as_str), Some("1d6"));
        assert!(!d.cantrip_scale);
    }

    #[test]
    fn original_field_names() {
        let attack: Effect = serde_json::from_str(
            r#"{"type": "attack", "attackBonus": "spell + 2", "hit": [], "miss": [],
                "meta": [{"type": "roll", "dice": "1d4", "name": "bonus", "hidden": true}]}"#,
        )
        .unwrap();
        assert_eq!(attack.kind(), "attack");
        assert_eq!(attack.meta().len(), 1);
        let Effect::Attack(a) = attack else { panic!() };
        assert_eq!(a.attack_bonus.as_deref(), Some("spell + 2"));

        let ie: Effect = serde_json::from_str(
            r#"{"type": "ieffect", "name": "Burning", "duration": "{dur}", "effects": "", "end": true}"#,
        )
        .unwrap();
        let Effect::InflictEffect(ie) = ie else { panic!() };
        assert_eq!(ie.duration, Duration::Formula("{dur}".into()));
        assert!(ie.tick_on_end);
    }

    #[test]
    fn explicit_nulls_read_as_defaults() {
        let effect: Effect = serde_json::from_str(
            r#"{"type": "damage", "damage": "1d10 [fire]", "higher": null, "cantripScale": null, "meta": null}"#,
        )
        .unwrap();
        let Effect::Damage(d) = effect else { panic!() };
        assert!(d.higher.is_empty());
        assert!(!d.cantrip_scale);
        assert!(d.meta.is_empty());

        let save: Effect =
            serde_json::from_str(r#"{"type": "save", "stat": "wis", "fail": null, "success": null}"#).unwrap();
        assert_eq!(save.meta().len(), 0);
        let Effect::Save(s) = save else { panic!() };
        assert!(s.fail.is_empty() && s.success.is_empty());
    }

    #[test]
    fn selectors() {
        let sel: TargetSelector = serde_json::from_str("2").unwrap();
        assert_eq!(sel, TargetSelector::Index(2));
        let sel: TargetSelector = serde_json::from_str(r#""self""#).unwrap();
        assert_eq!(sel, TargetSelector::Caster);
        assert!(serde_json::from_str::<TargetSelector>("0").is_err());
        assert!(serde_json::from_str::<TargetSelector>(r#""others""#).is_err());
        assert_eq!(serde_json::to_string(&TargetSelector::Each).unwrap(), r#""each""#);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<Effect>(r#"{"type": "teleport"}"#).is_err());
    }
}
