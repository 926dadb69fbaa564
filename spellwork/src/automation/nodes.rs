//! Node execution.  Every node runs its `meta` children first, then itself.

use log::debug;

use crate::dice::RollOptions;
use crate::game::{save_abbrev, Resistances, StatusEffect, SAVE_SKILLS};
use crate::script::Value;

use super::context::Context;
use super::effect::{
    AttackEffect, DamageEffect, Duration, Effect, InflictEffect, RollEffect, SaveEffect, TargetEffect,
    TargetSelector, TempHpEffect, TextEffect,
};
use super::formula::{apply_resistances, cantrip_scale, double_dice, maximize, minimum, upcast};
use super::target::{apply_damage, apply_temp_hp, TargetSlot, TargetView};
use super::AutomationError;

impl Effect {
    pub fn run(&self, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
        debug!("automation: {} node", self.kind());
        run_all(self.meta(), ctx)?;
        match self {
            Effect::Target(e) => run_target(e, ctx),
            Effect::Attack(e) => run_attack(e, ctx),
            Effect::Save(e) => run_save(e, ctx),
            Effect::Damage(e) => run_damage(e, ctx),
            Effect::TempHp(e) => run_temp_hp(e, ctx),
            Effect::InflictEffect(e) => run_ieffect(e, ctx),
            Effect::Roll(e) => run_roll(e, ctx),
            Effect::Text(e) => run_text(e, ctx),
        }
    }
}

pub(crate) fn run_all(effects: &[Effect], ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    for effect in effects {
        effect.run(ctx)?;
    }
    Ok(())
}

// ── Target ────────────────────────────────────────────────────────────────────

fn run_target(node: &TargetEffect, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    let result = match node.target {
        TargetSelector::All | TargetSelector::Each => {
            let count = ctx.encounter().targets().len();
            (0..count).try_for_each(|i| run_against(node, ctx, TargetSlot::Listed(i)))
        }
        TargetSelector::Caster => run_against(node, ctx, TargetSlot::Caster),
        TargetSelector::Index(n) => match resolve_index(ctx, n) {
            Ok(slot) => run_against(node, ctx, slot),
            Err(AutomationError::TargetIndexOutOfRange(n)) => {
                debug!("automation: no target #{n}, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        },
    };
    ctx.target = None;
    result
}

fn resolve_index(ctx: &Context<'_>, n: usize) -> Result<TargetSlot, AutomationError> {
    if (1..=ctx.encounter().targets().len()).contains(&n) {
        Ok(TargetSlot::Listed(n - 1))
    } else {
        Err(AutomationError::TargetIndexOutOfRange(n))
    }
}

fn run_against(node: &TargetEffect, ctx: &mut Context<'_>, slot: TargetSlot) -> Result<(), AutomationError> {
    ctx.target = Some(slot);
    run_all(&node.effects, ctx)?;
    let title = ctx.current().name().map(str::to_owned);
    ctx.push_field(title.as_deref());
    Ok(())
}

// ── Attack ────────────────────────────────────────────────────────────────────

enum Outcome {
    Hit,
    Crit,
    Miss,
}

/// A bonus or DC of zero counts as unset.
fn nonzero(v: Option<i64>) -> Option<i64> {
    v.filter(|&n| n != 0)
}

fn run_attack(node: &AttackEffect, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    let args = ctx.args;
    let adv = args.adv(true);
    let crit = args.flag("crit");
    let hit = args.flag("hit");
    let miss = args.flag("miss") && !hit;
    let rolls = args
        .last_int("rr")?
        .unwrap_or(1)
        .min(ctx.config.max_attack_rolls);
    let reroll = args.last_int("reroll")?.filter(|&r| r != 0);
    let crit_on = args.last_int("criton")?.unwrap_or(ctx.config.default_crit_on);

    let mut bonuses: Vec<String> = args.get("b").into_iter().map(str::to_owned).collect();
    bonuses.extend(ctx.caster().active_effects("b"));

    let explicit = match &node.attack_bonus {
        Some(formula) => Some(ctx.parse_int(formula, "attack bonus")?),
        None => None,
    };
    let sab = nonzero(explicit)
        .or(nonzero(ctx.ab_override))
        .or_else(|| nonzero(ctx.caster().spell_ab()));
    if sab.is_none() && bonuses.is_empty() {
        return Err(AutomationError::MissingAttackBonus);
    }

    let d20 = match adv {
        1 => "2d20kh1",
        2 => "3d20kh1",
        -1 => "2d20kl1",
        _ => "1d20",
    };
    let mut formula = d20.to_owned();
    if let Some(r) = reroll {
        formula.push_str(&format!("ro{r}"));
    }
    if let Some(sab) = sab {
        formula.push_str(&format!("{sab:+}"));
    }
    for b in &bonuses {
        formula.push('+');
        formula.push_str(b);
    }

    for n in 1..=rolls {
        if rolls > 1 {
            ctx.queue(format!("**Attack {n}**"));
        }
        let outcome = if hit {
            ctx.queue("**To Hit**: Automatic hit!");
            if crit {
                Outcome::Crit
            } else {
                Outcome::Hit
            }
        } else if miss {
            ctx.queue("**To Hit**: Automatic miss!");
            Outcome::Miss
        } else {
            let to_hit = ctx.roll(&formula, &RollOptions::labeled("To Hit"))?;
            ctx.queue(to_hit.result.clone());
            let natural = to_hit.natural(20).unwrap_or(0);
            let target = ctx.current();
            if natural >= crit_on {
                Outcome::Crit
            } else if natural == 1 {
                Outcome::Miss
            } else if target.is_concrete() && target.ac().is_some_and(|ac| to_hit.total < ac) {
                Outcome::Miss
            } else {
                Outcome::Hit
            }
        };
        match outcome {
            Outcome::Hit => run_all(&node.hit, ctx)?,
            Outcome::Crit => {
                let was = ctx.in_crit;
                ctx.in_crit = true;
                let result = run_all(&node.hit, ctx);
                ctx.in_crit = was;
                result?;
            }
            Outcome::Miss => {
                ctx.queue("**Miss!**");
                run_all(&node.miss, ctx)?;
            }
        }
    }
    Ok(())
}

// ── Save ──────────────────────────────────────────────────────────────────────

/// Net advantage from `-sadv` / `-sdis` status effects on `skill`.
fn effect_save_adv(target: &TargetView<'_>, skill: &str) -> i8 {
    let skill = skill.to_lowercase();
    let applies = |values: Vec<String>| {
        values.iter().any(|v| {
            let v = v.trim().to_lowercase();
            v == "true" || v == "all" || skill.contains(&v)
        })
    };
    i8::from(applies(target.active_effects("sadv"))) - i8::from(applies(target.active_effects("sdis")))
}

fn run_save(node: &SaveEffect, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    let args = ctx.args;
    let save = args.last("save").unwrap_or(node.stat.as_str()).to_owned();
    let adv = args.adv(false);

    let node_dc = match &node.dc {
        Some(formula) => Some(ctx.parse_int(formula, "DC")?),
        None => None,
    };
    let dc = nonzero(args.last_int("dc")?)
        .or(nonzero(node_dc))
        .or(nonzero(ctx.dc_override))
        .or_else(|| nonzero(ctx.caster().save_dc()))
        .ok_or(AutomationError::MissingDc)?;

    let wanted = save.to_lowercase();
    let skill = SAVE_SKILLS
        .iter()
        .find(|s| s.to_lowercase().contains(&wanted))
        .ok_or_else(|| AutomationError::InvalidSaveType(save.clone()))?;
    let abbrev = save_abbrev(skill);

    ctx.meta_queue(format!("**DC**: {dc}"));

    let target = ctx.current();
    let success = if target.is_concrete() {
        let adv = (adv + target.save_adv(skill) + effect_save_adv(&target, skill)).clamp(-1, 1);
        let dice = target.save_dice(skill);
        let opts = RollOptions {
            adv,
            roll_for: Some(format!("{abbrev} Save")),
        };
        let rolled = ctx.roll(&dice, &opts)?;
        let success = rolled.total >= dc;
        let verdict = if success { "Success!" } else { "Failure!" };
        ctx.queue(format!("{}; {verdict}", rolled.result));
        success
    } else {
        ctx.meta_queue(format!("{abbrev} Save"));
        false
    };

    if success {
        run_all(&node.success, ctx)
    } else {
        run_all(&node.fail, ctx)
    }
}

// ── Damage / temp HP ──────────────────────────────────────────────────────────

/// True when `text` is exactly one `{metavar}` reference.
fn is_single_metavar(ctx: &Context<'_>, text: &str) -> bool {
    ctx.metavars().iter().any(|(name, _)| text == format!("{{{name}}}"))
}

fn references_metavar(ctx: &Context<'_>, text: &str) -> bool {
    ctx.metavars()
        .iter()
        .any(|(name, _)| text.contains(&format!("{{{name}}}")))
}

/// `-d` from the cast options plus the caster's `-d` effects.
fn extra_damage(ctx: &Context<'_>) -> Option<String> {
    let mut parts: Vec<String> = ctx.args.get("d").into_iter().map(str::to_owned).collect();
    parts.extend(ctx.caster().active_effects("d"));
    (!parts.is_empty()).then(|| parts.join("+"))
}

/// The target's resistances, each list replaceable from the cast options.
fn effective_resists(ctx: &Context<'_>) -> Resistances {
    let mut resists = ctx.current().resists();
    let args = ctx.args;
    let replace = |key: &str, list: &mut Vec<String>| {
        let given = args.get(key);
        if !given.is_empty() {
            *list = given.into_iter().map(str::to_owned).collect();
        }
    };
    replace("resist", &mut resists.resist);
    replace("immune", &mut resists.immune);
    replace("vuln", &mut resists.vuln);
    replace("neutral", &mut resists.neutral);
    resists
}

fn run_damage(node: &DamageEffect, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    let args = ctx.args;
    let crit_damage = args.join("c", "+");
    let crit = args.flag("crit");
    let max = args.flag("max");
    let min_die = args.last_int("mi")?.filter(|&m| m > 0 && !max);

    if !ctx.current().is_concrete() && is_single_metavar(ctx, &node.damage) {
        return Ok(());
    }
    let extra = if references_metavar(ctx, &node.damage) {
        None
    } else {
        extra_damage(ctx)
    };
    let resists = effective_resists(ctx);

    let mut damage = ctx.parse_annostr(&node.damage)?;
    if node.cantrip_scale {
        damage = cantrip_scale(&damage, ctx.caster().caster_level());
    }
    damage = upcast(&damage, &node.higher, ctx.cast_level()?, ctx.spell_level);
    if let Some(m) = min_die {
        damage = minimum(&damage, m);
    }
    if let Some(d) = extra {
        damage = format!("{damage}+{d}");
    }
    let label = if ctx.in_crit || crit {
        damage = double_dice(&damage);
        if let Some(c) = crit_damage {
            damage = format!("{damage}+{c}");
        }
        "Damage (CRIT!)"
    } else {
        "Damage"
    };
    if max {
        damage = maximize(&damage);
    }
    damage = apply_resistances(&damage, &resists);

    let rolled = ctx.roll(&damage, &RollOptions::labeled(label))?;
    ctx.queue(rolled.result.clone());
    apply_damage(ctx, rolled.total);
    Ok(())
}

fn run_temp_hp(node: &TempHpEffect, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    let max = ctx.args.flag("max");
    if !ctx.current().is_concrete() && is_single_metavar(ctx, &node.amount) {
        return Ok(());
    }
    let mut amount = ctx.parse_annostr(&node.amount)?;
    if node.cantrip_scale {
        amount = cantrip_scale(&amount, ctx.caster().caster_level());
    }
    amount = upcast(&amount, &node.higher, ctx.cast_level()?, ctx.spell_level);
    if max {
        amount = maximize(&amount);
    }
    let rolled = ctx.roll(&amount, &RollOptions::labeled("THP"))?;
    ctx.queue(rolled.result.clone());
    apply_temp_hp(ctx, rolled.total);
    Ok(())
}

// ── Status effects ────────────────────────────────────────────────────────────

fn run_ieffect(node: &InflictEffect, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    let mut duration = match &node.duration {
        Duration::Rounds(n) => *n,
        Duration::Formula(f) => ctx.parse_int(f, "duration")?,
    };
    if let Some(dur) = ctx.args.last_int("dur")? {
        duration = dur;
    }
    let text = ctx.parse_annostr(&node.effects)?;
    let mut effect = StatusEffect::new(node.name.as_str(), duration, text);
    effect.tick_on_end = node.tick_on_end;

    let shown = match ctx.encounter.combatant_index(ctx.target) {
        Some(idx) => {
            effect.parent = ctx.conc_effect.clone();
            let combat = ctx
                .encounter
                .combat_mut()
                .ok_or_else(|| AutomationError::Spell("combatant target outside of combat".into()))?;
            let (added, _) = combat
                .add_effect(idx, effect)
                .map_err(|e| AutomationError::Spell(e.to_string()))?;
            combat.effect(&added).map(ToString::to_string).unwrap_or_default()
        }
        None => effect.to_string(),
    };
    ctx.queue(format!("**Effect**: {shown}"));
    Ok(())
}

// ── Roll / text ───────────────────────────────────────────────────────────────

/// `fire bolt` → `Fire Bolt`.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if boundary {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        boundary = !c.is_alphabetic();
    }
    out
}

fn run_roll(node: &RollEffect, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    let extra = extra_damage(ctx);
    let max = ctx.args.flag("max");
    let min_die = ctx.args.last_int("mi")?.filter(|&m| m > 0 && !max);

    let mut dice = ctx.parse_annostr(&node.dice)?;
    if node.cantrip_scale {
        dice = cantrip_scale(&dice, ctx.caster().caster_level());
    }
    dice = upcast(&dice, &node.higher, ctx.cast_level()?, ctx.spell_level);
    if !node.hidden {
        if let Some(m) = min_die {
            dice = minimum(&dice, m);
        }
        if let Some(d) = extra {
            dice = format!("{dice}+{d}");
        }
    }
    if max {
        dice = maximize(&dice);
    }

    let rolled = ctx.roll(&dice, &RollOptions::labeled(title_case(&node.name)))?;
    if !rolled.has_dice() {
        return Err(AutomationError::InvalidDiceExpression(dice));
    }
    if !node.hidden {
        ctx.meta_queue(rolled.result.clone());
    }
    ctx.set_metavar(&node.name, Value::str(rolled.consolidated()));
    Ok(())
}

fn run_text(node: &TextEffect, ctx: &mut Context<'_>) -> Result<(), AutomationError> {
    if node.text.is_empty() {
        return Ok(());
    }
    let limit = ctx.config.max_text_length;
    let text = if node.text.chars().count() > limit {
        let mut cut: String = node.text.chars().take(limit).collect();
        cut.push_str("...");
        cut
    } else {
        node.text.clone()
    };
    ctx.effect_queue(text);
    Ok(())
}
