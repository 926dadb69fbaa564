//! Scripts and casts against the on-disk store.

use std::collections::BTreeMap;

use spellwork::args::Args;
use spellwork::automation::Encounter;
use spellwork::config::EngineConfig;
use spellwork::dice::Roller;
use spellwork::game::{Character, Combat, Combatant, Spellbook};
use spellwork::script::{Invocation, Limits, ScriptEvaluator};
use spellwork::spell::Spell;
use spellwork::store::{FileStore, NullNotifier, PersistentStore};
use spellwork::Value;

fn invocation() -> Invocation {
    Invocation {
        author: "u1".into(),
        channel: "c1".into(),
        server: None,
    }
}

async fn evaluator(store: &FileStore) -> ScriptEvaluator<'_, FileStore> {
    ScriptEvaluator::new(store, invocation(), Box::new(Roller::scripted([3])), Limits::default())
        .await
        .unwrap()
}

fn vex() -> Character {
    let mut c = Character::new("Vex", 20);
    c.owner = "u1".into();
    c.spellbook.max_slots = BTreeMap::from([(1, 2)]);
    c
}

#[tokio::test]
async fn committed_uvars_reach_the_next_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());

    let mut ev = evaluator(&store).await;
    ev.eval("set_uvar('hits', roll('1d6') + 1)").unwrap();
    ev.commit().await.unwrap();
    drop(ev);

    let mut ev = evaluator(&store).await;
    assert_eq!(ev.eval("hits"), Ok(Value::str("4")));
    assert_eq!(ev.eval("int(hits) * 2"), Ok(Value::Int(8)));
}

#[tokio::test]
async fn uncommitted_changes_are_lost() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    store.set_user_var("u1", "keep", "1").await.unwrap();

    let mut ev = evaluator(&store).await;
    ev.eval("set_uvar('temp', 'x')").unwrap();
    ev.eval("delete_uvar('keep')").unwrap();
    assert!(ev.eval("1 / 0").is_err());
    drop(ev);

    let vars = store.user_vars("u1").await.unwrap();
    assert_eq!(vars.get("keep").map(String::as_str), Some("1"));
    assert!(!vars.contains_key("temp"));
}

#[tokio::test]
async fn deleted_uvars_disappear_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    store.set_user_var("u1", "old", "1").await.unwrap();
    store.set_user_var("u1", "new", "2").await.unwrap();

    let mut ev = evaluator(&store).await;
    ev.eval("delete_uvar('old')").unwrap();
    ev.commit().await.unwrap();
    assert_eq!(
        store.user_vars("u1").await.unwrap(),
        BTreeMap::from([("new".to_owned(), "2".to_owned())])
    );
}

#[tokio::test]
async fn character_state_is_saved_on_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());

    let mut ev = evaluator(&store).await.with_character(vex());
    ev.eval("mod_hp(-3)").unwrap();
    ev.eval("use_slot(1)").unwrap();
    ev.eval("set_cvar('oath', 'vengeance')").unwrap();
    assert_eq!(ev.eval("slots_str(1)"), Ok(Value::str("1: \u{25c9}\u{3007}")));
    assert!(ev.changes().character);
    ev.commit().await.unwrap();

    let saved = store.load_character("u1", "Vex").await.unwrap();
    assert_eq!(saved.hp, 17);
    assert_eq!(saved.spellbook.remaining(1), 1);
    assert_eq!(saved.cvars.get("oath").map(String::as_str), Some("vengeance"));
}

#[tokio::test]
async fn globals_are_read_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    store.set_global("motd", "Roll well").await.unwrap();
    let mut ev = evaluator(&store).await;
    assert_eq!(ev.eval("get_gvar('motd')"), Ok(Value::str("Roll well")));
}

#[tokio::test]
async fn cast_results_persist_with_the_combat() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());

    let mut combat = Combat::new("c1");
    let mut cleric = Combatant::new("Cleric").with_hp(18);
    cleric.spellbook = Spellbook {
        dc: Some(13),
        max_slots: BTreeMap::from([(1, 3)]),
        ..Spellbook::default()
    };
    combat.add_combatant(cleric);
    combat.add_combatant(Combatant::new("Zombie").with_hp(22));
    store.save_combat(&combat).await.unwrap();

    let spell = Spell::from_json(
        r#"{"name": "Bane", "level": 1, "duration": "1 minute", "concentration": true,
            "automation": [{"type": "target", "target": "all", "effects": [
                {"type": "save", "stat": "cha",
                 "fail": [{"type": "ieffect", "name": "Baned", "duration": 10, "effects": "-b -2"}]}
            ]}]}"#,
    )
    .unwrap();

    let loaded = store.load_combat("c1").await.unwrap().unwrap();
    let mut enc = Encounter::in_combat(loaded, "Cleric", &["Zombie"]).unwrap();
    let mut roller = Roller::scripted([2]);
    let report = spell
        .cast(&mut enc, &Args::new(), &mut roller, &NullNotifier, &EngineConfig::default())
        .await
        .unwrap();
    let zombie = report.fields.iter().find(|f| f.name == "Zombie").unwrap();
    assert!(zombie
        .value
        .ends_with("Failure!\n**Effect**: Baned [10 rounds] (Attack Bonus: -2)"));

    let (_, combat, _) = enc.into_parts();
    store.save_combat(&combat.unwrap()).await.unwrap();

    let reloaded = store.load_combat("c1").await.unwrap().unwrap();
    let cleric = reloaded.combatant("Cleric").unwrap();
    assert_eq!(cleric.spellbook.remaining(1), 2);
    let bane = cleric.concentration_effect().unwrap();
    assert_eq!((bane.name.as_str(), bane.duration), ("Bane", 10));
    let baned = reloaded.combatant("Zombie").unwrap().effect_named("Baned").unwrap();
    assert_eq!(baned.parent.as_ref().map(|p| p.id), Some(bane.id));

    let mut ev = evaluator(&store).await;
    assert_eq!(
        ev.eval("combat()['combatants'][1]['effects'][0]['name']"),
        Ok(Value::str("Baned"))
    );
}
