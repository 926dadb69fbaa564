use criterion::{black_box, criterion_group, criterion_main, Criterion};
use spellwork::args::Args;
use spellwork::automation::formula::apply_resistances;
use spellwork::automation::{Automation, Context, Encounter};
use spellwork::config::EngineConfig;
use spellwork::dice::Roller;
use spellwork::game::{Combat, Combatant, Resistances, Spellbook};
use spellwork::script::{Evaluator, NoHost};

const FIREBALL: &str = r#"[{"type": "target", "target": "all", "effects": [
    {"type": "save", "stat": "dex",
     "fail": [{"type": "damage", "damage": "8d6 [fire]"}],
     "success": [{"type": "damage", "damage": "(8d6) / 2 [fire]"}]}
]}]"#;

fn combat(targets: usize) -> Combat {
    let mut combat = Combat::new("bench");
    let mut wizard = Combatant::new("Wizard").with_hp(30);
    wizard.spellbook = Spellbook { dc: Some(15), caster_level: 5, ..Spellbook::default() };
    combat.add_combatant(wizard);
    for i in 0..targets {
        combat.add_combatant(Combatant::new(format!("Goblin {i}")).with_hp(500).with_ac(15));
    }
    combat
}

fn bench_eval(c: &mut Criterion) {
    let mut g = c.benchmark_group("evaluator");
    g.bench_function("arithmetic", |b| {
        let mut ev = Evaluator::new();
        b.iter(|| ev.eval(black_box("(3 + 4) * 12 // 5 - 2 ** 3"), &mut NoHost))
    });
    g.bench_function("comprehension", |b| {
        let mut ev = Evaluator::new();
        b.iter(|| ev.eval(black_box("sum([x * x for x in range(100) if x % 3 == 0])"), &mut NoHost))
    });
    g.bench_function("fstring", |b| {
        let mut ev = Evaluator::new();
        ev.eval("name = 'Vex'", &mut NoHost).ok();
        b.iter(|| ev.eval(black_box("f'{name} has {3 * 7} hp'"), &mut NoHost))
    });
    g.finish();
}

fn bench_automation(c: &mut Criterion) {
    let automation = Automation::from_json(FIREBALL).unwrap_or_else(|e| panic!("{e}"));
    let config = EngineConfig::default();
    let args = Args::new();
    let names: Vec<String> = (0..8).map(|i| format!("Goblin {i}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let mut g = c.benchmark_group("automation");
    g.bench_function("fireball_8_targets", |b| {
        b.iter(|| {
            let mut enc = Encounter::in_combat(combat(8), "Wizard", &names).unwrap_or_else(|e| panic!("{e}"));
            let mut roller = Roller::random();
            let mut ctx = Context::new(&mut enc, &args, &mut roller, &config, "Fireball", 3);
            black_box(automation.run(&mut ctx).is_ok())
        })
    });
    g.bench_function("resistances", |b| {
        let resists = Resistances {
            resist: vec!["fire".into(), "nonmagical slashing".into()],
            vuln: vec!["cold".into()],
            ..Resistances::default()
        };
        b.iter(|| {
            apply_resistances(
                black_box("2d6 [fire] + 1d8 [magical slashing] + 3d4 [cold] + (1d6 + 2) [necrotic]"),
                &resists,
            )
        })
    });
    g.finish();
}

criterion_group!(benches, bench_eval, bench_automation);
criterion_main!(benches);
