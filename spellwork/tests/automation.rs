//! End-to-end automation runs with scripted dice.

use std::collections::BTreeMap;

use spellwork::args::Args;
use spellwork::automation::{Automation, AutomationError, Context, Encounter, Field, RunOutput, Target};
use spellwork::config::EngineConfig;
use spellwork::dice::Roller;
use spellwork::game::{Character, Combat, Combatant, Spellbook, StatusEffect};
use spellwork::spell::Spell;
use spellwork::store::MemoryNotifier;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn wizard() -> Combatant {
    let mut c = Combatant::new("Wizard").with_hp(20);
    c.controller = "u-wiz".into();
    c.spellbook = Spellbook {
        attack_bonus: Some(7),
        dc: Some(15),
        caster_level: 5,
        max_slots: BTreeMap::from([(1, 4), (3, 2)]),
        ..Spellbook::default()
    };
    c
}

fn orc() -> Combatant {
    let mut c = Combatant::new("Orc").with_hp(30).with_ac(13);
    c.saves.insert("dexteritySave".into(), 1);
    c
}

fn goblin() -> Combatant {
    let mut c = Combatant::new("Goblin").with_hp(7).with_ac(15);
    c.private = true;
    c.controller = "dm".into();
    c
}

fn combat() -> Combat {
    let mut combat = Combat::new("chan");
    combat.add_combatant(wizard());
    combat.add_combatant(orc());
    combat.add_combatant(goblin());
    combat
}

fn at(targets: &[&str]) -> Encounter {
    Encounter::in_combat(combat(), "Wizard", targets).unwrap()
}

fn vex() -> Character {
    let mut c = Character::new("Vex", 24);
    c.owner = "u1".into();
    c.spellbook.attack_bonus = Some(5);
    c.spellbook.dc = Some(13);
    c.spellbook.caster_level = 5;
    c
}

fn run(json: &str, enc: &mut Encounter, args: &str, faces: &[i64]) -> Result<RunOutput, AutomationError> {
    let automation = Automation::from_json(json).unwrap();
    let args = Args::parse(args);
    let mut roller = Roller::scripted(faces.iter().copied());
    let config = EngineConfig::default();
    let mut ctx = Context::new(enc, &args, &mut roller, &config, "Test Spell", 1);
    automation.run(&mut ctx)
}

fn field<'a>(fields: &'a [Field], name: &str) -> &'a str {
    fields
        .iter()
        .find(|f| f.name == name)
        .map(|f| f.value.as_str())
        .unwrap_or_else(|| panic!("no field {name} in {fields:?}"))
}

fn hp(enc: &Encounter, name: &str) -> Option<i64> {
    enc.combat().unwrap().combatant(name).unwrap().hp
}

// ── Attacks ───────────────────────────────────────────────────────────────────

const FIRE_BOLT: &str = r#"[{"type": "target", "target": 1, "effects": [
    {"type": "attack", "hit": [{"type": "damage", "damage": "1d10 [fire]"}], "miss": []}
]}]"#;

#[test]
fn natural_twenty_doubles_damage_dice() {
    let mut enc = at(&["Orc"]);
    let out = run(FIRE_BOLT, &mut enc, "", &[20, 4, 6]).unwrap();
    assert_eq!(
        field(&out.fields, "Orc"),
        "**To Hit**: 1d20 (20) + 7 = `27`\n**Damage (CRIT!)**: 2d10 (4, 6) [fire] = `10`"
    );
    assert_eq!(out.footer.as_deref(), Some("Orc: <20/30 HP>"));
    assert_eq!(hp(&enc, "Orc"), Some(20));
}

#[test]
fn below_armor_class_misses() {
    let mut enc = at(&["Orc"]);
    let out = run(FIRE_BOLT, &mut enc, "", &[5]).unwrap();
    assert_eq!(field(&out.fields, "Orc"), "**To Hit**: 1d20 (5) + 7 = `12`\n**Miss!**");
    assert_eq!(out.footer, None);
    assert_eq!(hp(&enc, "Orc"), Some(30));
}

#[test]
fn natural_one_always_misses() {
    let mut enc = at(&["Orc"]);
    let out = run(FIRE_BOLT, &mut enc, "-b 100", &[1]).unwrap();
    assert!(field(&out.fields, "Orc").ends_with("**Miss!**"));
    assert_eq!(hp(&enc, "Orc"), Some(30));
}

#[test]
fn lower_crit_threshold() {
    let mut enc = at(&["Orc"]);
    let out = run(FIRE_BOLT, &mut enc, "-criton 19", &[19, 1, 1]).unwrap();
    assert!(field(&out.fields, "Orc").contains("Damage (CRIT!)"));
    assert_eq!(hp(&enc, "Orc"), Some(28));
}

#[test]
fn repeated_automatic_hits() {
    let mut enc = at(&["Orc"]);
    let out = run(FIRE_BOLT, &mut enc, "-rr 2 -hit", &[3, 5]).unwrap();
    let orc = field(&out.fields, "Orc");
    assert!(orc.starts_with("**Attack 1**\n**To Hit**: Automatic hit!\n**Damage**: 1d10 (3) [fire] = `3`"));
    assert!(orc.contains("**Attack 2**"));
    assert_eq!(hp(&enc, "Orc"), Some(22));
}

#[test]
fn automatic_miss_runs_miss_branch() {
    let json = r#"[{"type": "target", "target": "all", "effects": [
        {"type": "attack", "hit": [], "miss": [{"type": "text", "text": "The bolt fizzles."}]}
    ]}]"#;
    let mut enc = at(&["Orc"]);
    let out = run(json, &mut enc, "-miss", &[]).unwrap();
    assert_eq!(field(&out.fields, "Orc"), "**To Hit**: Automatic miss!\n**Miss!**");
    assert_eq!(field(&out.fields, "Effect"), "The bolt fizzles.");
}

#[test]
fn advantage_and_effect_bonuses() {
    let mut c = combat();
    c.add_effect(0, StatusEffect::new("Bless", 10, "-b 1d4")).unwrap();
    let mut enc = Encounter::in_combat(c, "Wizard", &["Orc"]).unwrap();
    let out = run(FIRE_BOLT, &mut enc, "-adv", &[2, 9, 3, 7]).unwrap();
    assert_eq!(
        field(&out.fields, "Orc").lines().next(),
        Some("**To Hit**: 2d20kh1 (~~2~~, 9) + 7 + 1d4 (3) = `19`")
    );
    assert_eq!(hp(&enc, "Orc"), Some(23));
}

#[test]
fn attack_needs_some_bonus() {
    let json = r#"[{"type": "attack", "hit": [], "miss": []}]"#;
    let mut enc = Encounter::solo(Character::new("Pip", 8), vec![None]);
    assert_eq!(run(json, &mut enc, "", &[]), Err(AutomationError::MissingAttackBonus));
    assert!(run(json, &mut enc, "-b 3", &[10]).is_ok());
}

#[test]
fn attack_bonus_formula_must_be_an_integer() {
    let json = r#"[{"type": "attack", "attackBonus": "{{spell + 2}}", "hit": [], "miss": []}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    let out = run(json, &mut enc, "", &[10]).unwrap();
    // spell = attack bonus 5 - proficiency 2
    assert!(field(&out.fields, "Meta").contains("1d20 (10) + 5 = `15`"));

    let zero = r#"[{"type": "attack", "attackBonus": "0", "hit": [], "miss": []}]"#;
    let out = run(zero, &mut enc, "", &[10]).unwrap();
    assert!(field(&out.fields, "Meta").contains("1d20 (10) + 5 = `15`"));

    let bad = r#"[{"type": "attack", "attackBonus": "lots", "hit": [], "miss": []}]"#;
    assert!(matches!(run(bad, &mut enc, "", &[]), Err(AutomationError::InvalidOverride(_))));
}

// ── Damage pipeline ───────────────────────────────────────────────────────────

#[test]
fn cantrips_scale_with_caster_level() {
    let json = r#"[{"type": "damage", "damage": "1d10 [fire]", "cantripScale": true}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    let out = run(json, &mut enc, "", &[3, 4]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**Damage**: 2d10 (3, 4) [fire] = `7`");
}

#[test]
fn upcast_adds_higher_level_dice() {
    let json = r#"[{"type": "damage", "damage": "3d6", "higher": {"2": "1d6"}}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    let out = run(json, &mut enc, "-l 2", &[1, 1, 1, 6]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**Damage**: 3d6 (1, 1, 1) + 1d6 (6) = `9`");
}

#[test]
fn max_and_minimum_options() {
    let json = r#"[{"type": "damage", "damage": "2d6"}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    let out = run(json, &mut enc, "-max", &[1, 1]).unwrap();
    assert!(field(&out.fields, "Meta").ends_with("= `12`"));
    let out = run(json, &mut enc, "-mi 3", &[1, 5]).unwrap();
    assert!(field(&out.fields, "Meta").ends_with("= `8`"));
}

#[test]
fn resistances_from_target_and_options() {
    let json = r#"[{"type": "target", "target": 1, "effects": [
        {"type": "damage", "damage": "2d6 [fire] + 1d4 [cold]"}
    ]}]"#;
    let mut c = combat();
    c.combatants[1].resistances.resist = vec!["fire".into()];
    let mut enc = Encounter::in_combat(c.clone(), "Wizard", &["Orc"]).unwrap();
    run(json, &mut enc, "", &[6, 6, 4]).unwrap();
    assert_eq!(hp(&enc, "Orc"), Some(20));

    let mut enc = Encounter::in_combat(c, "Wizard", &["Orc"]).unwrap();
    run(json, &mut enc, "-resist cold", &[6, 6, 4]).unwrap();
    assert_eq!(hp(&enc, "Orc"), Some(16));
}

#[test]
fn crit_doubles_before_resistance() {
    let mut c = combat();
    c.combatants[1].resistances.resist = vec!["fire".into()];
    let mut enc = Encounter::in_combat(c, "Wizard", &["Orc"]).unwrap();
    // (2d10) / 2 + (1d6) / 2: crit dice are doubled first, then every fire term is halved
    let out = run(FIRE_BOLT, &mut enc, "-c \"1d6 [fire]\"", &[20, 4, 6, 3]).unwrap();
    let orc = field(&out.fields, "Orc");
    assert!(orc.contains("**Damage (CRIT!)**"), "{orc}");
    assert!(orc.ends_with("= `6`"), "{orc}");
    assert_eq!(hp(&enc, "Orc"), Some(24));
}

#[test]
fn concentration_check_on_damage() {
    let json = r#"[{"type": "target", "target": 1, "effects": [{"type": "damage", "damage": "24"}]}]"#;
    let mut c = combat();
    c.add_effect(1, StatusEffect::new("Hold Person", 10, "").concentration(true)).unwrap();
    let mut enc = Encounter::in_combat(c, "Wizard", &["Orc"]).unwrap();
    let out = run(json, &mut enc, "", &[]).unwrap();
    assert_eq!(
        field(&out.fields, "Orc"),
        "**Damage**: 24 = `24`\n**Concentration**: DC 12"
    );
}

#[test]
fn temp_hp_replaces_and_floors() {
    let json = r#"[{"type": "target", "target": "self", "effects": [{"type": "temphp", "amount": "1d4+4"}]}]"#;
    let mut c = combat();
    c.combatants[0].temp_hp = 10;
    let mut enc = Encounter::in_combat(c, "Wizard", &[]).unwrap();
    let out = run(json, &mut enc, "", &[2]).unwrap();
    assert_eq!(field(&out.fields, "Wizard"), "**THP**: 1d4 (2) + 4 = `6`");
    assert_eq!(out.footer.as_deref(), Some("Wizard: <20/20 HP> (+6 temp)"));

    let negative = r#"[{"type": "target", "target": "self", "effects": [{"type": "temphp", "amount": "-3"}]}]"#;
    run(negative, &mut enc, "", &[]).unwrap();
    assert_eq!(enc.combat().unwrap().combatants[0].temp_hp, 0);
}

#[test]
fn bare_character_takes_damage_directly() {
    let json = r#"[{"type": "target", "target": "all", "effects": [{"type": "damage", "damage": "1d8"}]}]"#;
    let mut target = Character::new("Scanlan", 20);
    target.temp_hp = 3;
    let mut enc = Encounter::solo(vex(), vec![Some(Target::Character(Box::new(target)))]);
    let out = run(json, &mut enc, "", &[8]).unwrap();
    assert_eq!(out.footer.as_deref(), Some("Scanlan: 15/20"));
    assert_eq!(field(&out.fields, "Scanlan"), "**Damage**: 1d8 (8) = `8`");
}

#[test]
fn labels_are_concrete_but_stateless() {
    let json = r#"[{"type": "target", "target": "all", "effects": [
        {"type": "save", "stat": "con", "fail": [{"type": "damage", "damage": "1d6"}]}
    ]}]"#;
    let mut enc = at(&["Statue"]);
    let out = run(json, &mut enc, "", &[3, 4]).unwrap();
    assert_eq!(
        field(&out.fields, "Statue"),
        "**CON Save**: 1d20 (3) + 0 = `3`; Failure!\n**Damage**: 1d6 (4) = `4`"
    );
    assert_eq!(out.footer, None);
}

// ── Saves ─────────────────────────────────────────────────────────────────────

const HOLD: &str = r#"[{"type": "target", "target": "all", "effects": [
    {"type": "save", "stat": "dex", "fail": [{"type": "text", "text": "Held."}], "success": []}
]}]"#;

#[test]
fn save_against_caster_dc() {
    let mut enc = at(&["Orc"]);
    let out = run(HOLD, &mut enc, "", &[14]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**DC**: 15");
    assert_eq!(field(&out.fields, "Orc"), "**DEX Save**: 1d20 (14) + 1 = `15`; Success!");
    assert!(out.fields.iter().all(|f| f.name != "Effect"));
}

#[test]
fn dc_precedence() {
    let json = r#"[{"type": "target", "target": "all", "effects": [
        {"type": "save", "stat": "dex", "dc": "{{10 + 2}}", "fail": [], "success": []}
    ]}]"#;
    let mut enc = at(&["Orc"]);
    let out = run(json, &mut enc, "", &[1]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**DC**: 12");
    let out = run(json, &mut enc, "-dc 9", &[1]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**DC**: 9");
}

#[test]
fn zero_dc_falls_through() {
    let json = r#"[{"type": "target", "target": "all", "effects": [
        {"type": "save", "stat": "dex", "dc": "0", "fail": [], "success": []}
    ]}]"#;
    let mut enc = at(&["Orc"]);
    let out = run(json, &mut enc, "-dc 0", &[1]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**DC**: 15");
}

#[test]
fn save_advantage_from_effects_and_options() {
    let mut c = combat();
    c.add_effect(1, StatusEffect::new("Foresight", 10, "-sadv")).unwrap();
    let mut enc = Encounter::in_combat(c.clone(), "Wizard", &["Orc"]).unwrap();
    let out = run(HOLD, &mut enc, "", &[4, 15]).unwrap();
    assert!(field(&out.fields, "Orc").ends_with("Success!"));

    let mut enc = Encounter::in_combat(c, "Wizard", &["Orc"]).unwrap();
    let out = run(HOLD, &mut enc, "-dis", &[4, 15]).unwrap();
    assert_eq!(field(&out.fields, "Orc"), "**DEX Save**: 1d20 (4) + 1 = `5`; Failure!");
}

#[test]
fn save_without_target_fails_into_meta() {
    let json = r#"[{"type": "save", "stat": "wis", "fail": [{"type": "text", "text": "Frightened."}]}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    let out = run(json, &mut enc, "", &[]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**DC**: 13\nWIS Save");
    assert_eq!(field(&out.fields, "Effect"), "Frightened.");
}

#[test]
fn save_errors() {
    let luck = r#"[{"type": "save", "stat": "luck"}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    assert_eq!(
        run(luck, &mut enc, "", &[]),
        Err(AutomationError::InvalidSaveType("luck".into()))
    );
    let mut enc = Encounter::solo(Character::new("Pip", 8), vec![None]);
    assert_eq!(run(HOLD, &mut enc, "", &[]), Err(AutomationError::MissingDc));
}

// ── Targets, rolls and text ───────────────────────────────────────────────────

#[test]
fn out_of_range_target_is_skipped() {
    let json = r#"[{"type": "target", "target": 3, "effects": [{"type": "text", "text": "never"}]}]"#;
    let mut enc = at(&["Orc"]);
    let out = run(json, &mut enc, "", &[]).unwrap();
    assert!(out.fields.is_empty());
}

#[test]
fn roll_defines_meta_variable() {
    let json = r#"[
        {"type": "roll", "dice": "1d4", "name": "bonus", "hidden": true},
        {"type": "damage", "damage": "{bonus}"},
        {"type": "target", "target": 1, "effects": [{"type": "damage", "damage": "1d6+{bonus}"}]}
    ]"#;
    let mut enc = at(&["Orc"]);
    let out = run(json, &mut enc, "-d 1d4", &[3, 2]).unwrap();
    assert!(out.fields.iter().all(|f| f.name != "Meta"));
    assert_eq!(field(&out.fields, "Orc"), "**Damage**: 1d6 (2) + 3 = `5`");
    assert_eq!(hp(&enc, "Orc"), Some(25));
}

#[test]
fn visible_roll_is_shown_and_needs_dice() {
    let json = r#"[{"type": "roll", "dice": "2d4", "name": "healing surge"}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    let out = run(json, &mut enc, "", &[1, 2]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**Healing Surge**: 2d4 (1, 2) = `3`");

    let flat = r#"[{"type": "roll", "dice": "5", "name": "x"}]"#;
    assert_eq!(
        run(flat, &mut enc, "", &[]),
        Err(AutomationError::InvalidDiceExpression("5".into()))
    );
}

#[test]
fn text_is_truncated_and_deduplicated() {
    let long = "a".repeat(1100);
    let json = format!(
        r#"[{{"type": "text", "text": "{long}"}}, {{"type": "text", "text": "{long}"}}]"#
    );
    let mut enc = Encounter::solo(vex(), vec![None]);
    let out = run(&json, &mut enc, "", &[]).unwrap();
    assert_eq!(out.fields.len(), 1);
    let text = field(&out.fields, "Effect");
    assert_eq!(text.len(), 1023);
    assert!(text.ends_with("a..."));
}

#[test]
fn meta_children_run_first() {
    let json = r#"[{"type": "text", "text": "{{x}}",
        "meta": [{"type": "roll", "dice": "1d6", "name": "x"}]}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    let out = run(json, &mut enc, "", &[4]).unwrap();
    assert_eq!(field(&out.fields, "Meta"), "**X**: 1d6 (4) = `4`");
}

#[test]
fn evaluation_errors_abort() {
    let json = r#"[{"type": "damage", "damage": "{{1 / 0}}"}]"#;
    let mut enc = Encounter::solo(vex(), vec![None]);
    assert!(matches!(run(json, &mut enc, "", &[]), Err(AutomationError::Evaluation(_))));
}

// ── Spell casting ─────────────────────────────────────────────────────────────

const FIREBALL: &str = r#"{
    "name": "Fireball", "level": 3, "school": "V", "duration": "Instantaneous",
    "automation": [{"type": "target", "target": "all", "effects": [
        {"type": "save", "stat": "dex",
         "fail": [{"type": "damage", "damage": "8d6 [fire]"}],
         "success": [{"type": "damage", "damage": "(8d6) / 2 [fire]"}]}
    ]}]
}"#;

async fn cast(spell: &Spell, enc: &mut Encounter, args: &str, faces: &[i64], notifier: &MemoryNotifier)
    -> Result<spellwork::automation::CastReport, AutomationError>
{
    let args = Args::parse(args);
    let mut roller = Roller::scripted(faces.iter().copied());
    spell
        .cast(enc, &args, &mut roller, notifier, &EngineConfig::default())
        .await
}

#[tokio::test]
async fn fireball_hits_everyone_and_whispers_private_hp() {
    let spell = Spell::from_json(FIREBALL).unwrap();
    let mut enc = at(&["Orc", "Goblin"]);
    let notifier = MemoryNotifier::new();
    let mut faces = vec![5];
    faces.extend([3; 8]);
    faces.push(18);
    faces.extend([2; 8]);

    let report = cast(&spell, &mut enc, "", &faces, &notifier).await.unwrap();
    assert_eq!(report.title, "Wizard casts Fireball at...");
    assert_eq!(field(&report.fields, "Meta"), "**DC**: 15");
    assert!(field(&report.fields, "Orc").contains("Failure!"));
    assert!(field(&report.fields, "Orc").ends_with("= `24`"));
    assert!(field(&report.fields, "Goblin").contains("Success!"));
    assert!(field(&report.fields, "Goblin").ends_with("= `8`"));
    assert_eq!(field(&report.fields, "Spell Slots"), "3: \u{25c9}\u{3007}");
    assert_eq!(report.footer.as_deref(), Some("Orc: <6/30 HP>\nGoblin: <Dead>"));

    assert_eq!(hp(&enc, "Orc"), Some(6));
    assert_eq!(hp(&enc, "Goblin"), Some(-1));
    assert_eq!(
        notifier.sent().await,
        [("dm".to_owned(), "Wizard cast Fireball!\nGoblin's HP: <-1/7 HP>".to_owned())]
    );
}

#[tokio::test]
async fn identical_casts_give_identical_results() {
    let spell = Spell::from_json(FIREBALL).unwrap();
    let mut faces = vec![5];
    faces.extend([3, 1, 6, 2, 5, 4, 1, 6]);
    faces.push(12);
    faces.extend([2, 2, 6, 1, 3, 5, 4, 2]);

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let mut enc = at(&["Orc", "Goblin"]);
        let notifier = MemoryNotifier::new();
        let report = cast(&spell, &mut enc, "", &faces, &notifier).await.unwrap();
        let (_, combat, _) = enc.into_parts();
        outcomes.push((report, combat, notifier.sent().await));
    }
    assert_eq!(outcomes[0], outcomes[1]);
    let combat = outcomes[0].1.as_ref().unwrap();
    assert!(combat.combatant("Orc").unwrap().hp < Some(30));
}

#[tokio::test]
async fn no_slots_left() {
    let spell = Spell::from_json(FIREBALL).unwrap();
    let mut c = combat();
    c.combatants[0].spellbook.slots.insert(3, 0);
    let mut enc = Encounter::in_combat(c, "Wizard", &["Orc"]).unwrap();
    let notifier = MemoryNotifier::new();
    let report = cast(&spell, &mut enc, "", &[], &notifier).await.unwrap();
    assert_eq!(report.title, "Cannot cast spell!");
    assert_eq!(field(&report.fields, "Spell Slots"), "3: \u{3007}\u{3007}");
    assert_eq!(hp(&enc, "Orc"), Some(30));

    let report = cast(&spell, &mut enc, "-i", &[20], &notifier).await.unwrap();
    assert_eq!(report.title, "Wizard casts Fireball at...");
    assert!(report.fields.iter().all(|f| f.name != "Spell Slots"));
}

#[tokio::test]
async fn cast_level_bounds() {
    let spell = Spell::from_json(FIREBALL).unwrap();
    let notifier = MemoryNotifier::new();
    for level in ["2", "10"] {
        let mut enc = at(&["Orc"]);
        let err = cast(&spell, &mut enc, &format!("-l {level}"), &[], &notifier).await;
        assert_eq!(err, Err(AutomationError::Spell("Invalid spell level.".into())));
    }
}

#[tokio::test]
async fn concentration_links_inflicted_effects() {
    let hex = Spell::from_json(
        r#"{"name": "Hex", "level": 1, "duration": "1 hour", "concentration": true,
            "automation": [{"type": "target", "target": "all", "effects": [
                {"type": "ieffect", "name": "Hexed", "duration": "{{2 * 5}}", "effects": "-d 1d6"}
            ]}]}"#,
    )
    .unwrap();
    assert_eq!(hex.duration, "Concentration, up to 1 hour");

    let mut c = combat();
    let (bless, _) = c
        .add_effect(0, StatusEffect::new("Bless", 10, "").concentration(true))
        .unwrap();
    let mut blessed = StatusEffect::new("Blessed", 10, "-b 1d4");
    blessed.parent = Some(bless);
    c.add_effect(1, blessed).unwrap();

    let mut enc = Encounter::in_combat(c, "Wizard", &["Orc"]).unwrap();
    let notifier = MemoryNotifier::new();
    let report = cast(&hex, &mut enc, "", &[], &notifier).await.unwrap();

    assert!(field(&report.fields, "Orc").starts_with("**Effect**: Hexed [10 rounds]"));
    assert!(field(&report.fields, "Concentration").starts_with("Dropped Bless"));

    let combat = enc.combat().unwrap();
    let conc = combat.combatant("Wizard").unwrap().concentration_effect().unwrap();
    assert_eq!(conc.name, "Hex");
    assert_eq!(conc.duration, -1);
    let hexed = combat.combatant("Orc").unwrap().effect_named("Hexed").unwrap();
    assert_eq!(hexed.parent.as_ref().map(|p| p.id), Some(conc.id));
    assert!(combat.combatant("Orc").unwrap().effect_named("Blessed").is_none());

    let conc_ref = hexed.parent.clone().unwrap();
    let (_, combat, _) = enc.into_parts();
    let mut combat = combat.unwrap();
    let removed = combat.remove_effect(&conc_ref);
    assert_eq!(removed.len(), 2);
    assert!(combat.combatant("Orc").unwrap().effects.is_empty());
}

#[tokio::test]
async fn stat_overrides_and_titles() {
    let sleep = Spell::from_json(
        r#"{"name": "Sleep", "level": 1, "automation": [
            {"type": "save", "stat": "wis", "fail": []}
        ]}"#,
    )
    .unwrap();
    let notifier = MemoryNotifier::new();

    let mut enc = Encounter::solo(vex(), vec![]);
    let report = cast(&sleep, &mut enc, "-i -mod 4", &[], &notifier).await.unwrap();
    assert_eq!(report.title, "Vex casts Sleep!");
    assert_eq!(field(&report.fields, "Meta"), "**DC**: 14\nWIS Save");

    let mut caster = vex();
    caster.stats.strength = 16;
    let mut enc = Encounter::solo(caster, vec![]);
    let report = cast(&sleep, &mut enc, "-i -str -phrase zzz", &[], &notifier).await.unwrap();
    assert_eq!(report.title, "Vex casts Sleep with Strength!");
    assert_eq!(report.description.as_deref(), Some("*zzz*"));
    assert!(field(&report.fields, "Meta").starts_with("**DC**: 13"));

    let report = cast(&sleep, &mut enc, "-i -title \"[charname] naps ([sname])\"", &[], &notifier)
        .await
        .unwrap();
    assert_eq!(report.title, "Vex naps (Sleep)");
}

#[tokio::test]
async fn spells_without_automation_show_their_text() {
    let mut spell = Spell::new("Light", 1);
    spell.description = "A glow.".into();
    spell.higherlevels = "Brighter.".into();
    let mut caster = vex();
    caster.spellbook.max_slots = BTreeMap::from([(1, 2), (2, 1)]);
    let mut enc = Encounter::solo(caster, vec![]);
    let notifier = MemoryNotifier::new();

    let report = cast(&spell, &mut enc, "-l 2", &[], &notifier).await.unwrap();
    assert_eq!(field(&report.fields, "Description"), "A glow.");
    assert_eq!(field(&report.fields, "At Higher Levels"), "Brighter.");
    assert_eq!(field(&report.fields, "Spell Slots"), "2: \u{3007}");
    assert_eq!(report.footer.as_deref(), Some("No spell automation found."));
}
