//! Dice formula rewriting: scaling, upcasting, crits and resistances.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use regex::{Captures, Regex};

use crate::game::Resistances;

static DICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)d(\d+)").unwrap_or_else(|e| panic!("dice regex: {e}"))
});

/// Die-count multiplier for cantrips at `caster_level`.
pub fn cantrip_multiplier(caster_level: i64) -> i64 {
    match caster_level {
        i64::MIN..=4 => 1,
        5..=10 => 2,
        11..=16 => 3,
        _ => 4,
    }
}

fn map_counts(formula: &str, f: impl Fn(i64, &str) -> String) -> String {
    DICE.replace_all(formula, |caps: &Captures<'_>| {
        let count = caps[1].parse::<i64>().unwrap_or(1);
        f(count, &caps[2])
    })
    .into_owned()
}

/// `1d10` at caster level 5 becomes `2d10`.
pub fn cantrip_scale(formula: &str, caster_level: i64) -> String {
    let mult = cantrip_multiplier(caster_level);
    if mult == 1 {
        return formula.to_owned();
    }
    map_counts(formula, |n, sides| format!("{}d{sides}", n.saturating_mul(mult)))
}

/// Append the upcast bonus for `cast_level`, if the spell defines one.
pub fn upcast(formula: &str, higher: &BTreeMap<String, String>, cast_level: i64, spell_level: i64) -> String {
    if cast_level == spell_level {
        return formula.to_owned();
    }
    match higher.get(&cast_level.to_string()) {
        Some(extra) if !extra.is_empty() => format!("{formula}+{extra}"),
        _ => formula.to_owned(),
    }
}

/// Every die rolls at least `min`.
pub fn minimum(formula: &str, min: i64) -> String {
    map_counts(formula, |n, sides| format!("{n}d{sides}mi{min}"))
}

/// Double every die count.
pub fn double_dice(formula: &str) -> String {
    map_counts(formula, |n, sides| format!("{}d{sides}", n.saturating_mul(2)))
}

/// Every die rolls its maximum.
pub fn maximize(formula: &str) -> String {
    map_counts(formula, |n, sides| format!("{n}d{sides}mi{sides}"))
}

// ── Resistances ───────────────────────────────────────────────────────────────

fn matcher(keywords: &[String]) -> Option<AhoCorasick> {
    let keywords: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return None;
    }
    Some(
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(keywords),
    )
}

struct ResistMatchers {
    resist: Option<AhoCorasick>,
    immune: Option<AhoCorasick>,
    vuln: Option<AhoCorasick>,
    neutral: Option<AhoCorasick>,
}

impl ResistMatchers {
    fn new(r: &Resistances) -> Self {
        ResistMatchers {
            resist: matcher(&r.resist),
            immune: matcher(&r.immune),
            vuln: matcher(&r.vuln),
            neutral: matcher(&r.neutral),
        }
    }

    /// Wrap `term` according to the damage type in `annotation`.
    fn apply(&self, term: &str, annotation: &str) -> Option<String> {
        let hit = |m: &Option<AhoCorasick>| m.as_ref().is_some_and(|ac| ac.is_match(annotation));
        if hit(&self.neutral) {
            return None;
        }
        let (resist, vuln) = (hit(&self.resist), hit(&self.vuln));
        if hit(&self.immune) {
            Some(format!("({term}) * 0"))
        } else if resist && vuln {
            None
        } else if resist {
            Some(format!("({term}) / 2"))
        } else if vuln {
            Some(format!("({term}) * 2"))
        } else {
            None
        }
    }
}

/// Rewrite each annotated term of `formula` (`2d6 [fire]`) for the target's
/// resistances.  A term is the stretch since the last top-level `+`/`-` or
/// annotation.
pub fn apply_resistances(formula: &str, resists: &Resistances) -> String {
    let matchers = ResistMatchers::new(resists);
    let mut out = String::with_capacity(formula.len() + 16);
    let mut cursor = 0;
    let mut term_start = 0;
    let mut depth = 0i32;
    let mut iter = formula.char_indices();
    while let Some((i, c)) = iter.next() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '+' | '-' if depth == 0 => term_start = i + 1,
            '[' => {
                let Some(len) = formula[i..].find(']') else {
                    break;
                };
                let end = i + len;
                let annotation = &formula[i + 1..end];
                let term = &formula[term_start..i];
                if let Some(rewritten) = matchers.apply(term.trim(), annotation).filter(|_| !term.trim().is_empty()) {
                    let lead = term.len() - term.trim_start().len();
                    out.push_str(&formula[cursor..term_start]);
                    out.push_str(&term[..lead]);
                    out.push_str(&rewritten);
                    out.push(' ');
                    out.push_str(&formula[i..=end]);
                    cursor = end + 1;
                }
                term_start = end + 1;
                // Skip the annotation body.
                for _ in formula[i + 1..=end].chars() {
                    iter.next();
                }
            }
            _ => {}
        }
    }
    out.push_str(&formula[cursor..]);
    out
}
