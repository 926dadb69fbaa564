//! Dice rolling.
//!
//! The engine never rolls dice itself; it asks a [`RollOracle`].  [`Roller`]
//! is a small implementation covering the subset of dice notation the
//! automation layer produces:
//!
//! | Form        | Meaning                                   |
//! |-------------|-------------------------------------------|
//! | `NdM`       | roll N dice with M sides (`dM` = `1dM`)   |
//! | `khK`/`klK` | keep the K highest / lowest               |
//! | `roX`       | reroll once any die showing X             |
//! | `miX`       | treat any die below X as X                |
//! | `+ - * /`   | integer arithmetic, `/` floors            |
//! | `( )`       | grouping                                  |
//! | `[text]`    | annotation, carried into the output       |

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Most dice a single formula may roll.
pub const MAX_DICE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RollError {
    #[error("invalid dice formula `{formula}`: {message}")]
    Syntax { formula: String, message: String },

    #[error("too many dice in one roll (limit {MAX_DICE})")]
    TooManyDice,

    #[error("division by zero in dice formula")]
    DivisionByZero,

    #[error("dice total out of range")]
    Overflow,
}

/// Options accompanying a roll request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollOptions {
    /// 1 advantage, -1 disadvantage, 0 straight.  Applies to the first `1d20`.
    pub adv: i8,
    /// Label shown in front of the result.
    pub roll_for: Option<String>,
}

impl RollOptions {
    pub fn labeled(roll_for: impl Into<String>) -> Self {
        RollOptions {
            adv: 0,
            roll_for: Some(roll_for.into()),
        }
    }
}

/// Natural-roll classification of the first d20 in a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Crit {
    #[default]
    None,
    /// Natural 20.
    Success,
    /// Natural 1.
    Fail,
}

/// One `NdM` term as rolled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceGroup {
    pub sides: i64,
    pub values: Vec<i64>,
    pub kept: Vec<bool>,
}

impl DiceGroup {
    pub fn kept_values(&self) -> impl Iterator<Item = i64> + '_ {
        self.values
            .iter()
            .zip(&self.kept)
            .filter(|(_, k)| **k)
            .map(|(v, _)| *v)
    }

    pub fn total(&self) -> i64 {
        self.kept_values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollResult {
    pub total: i64,
    /// Display form, e.g. ``**Damage**: 1d6 (4) + 2 = `6` ``.
    pub result: String,
    pub parts: Vec<DiceGroup>,
    pub crit: Crit,
    simplified: String,
}

impl RollResult {
    /// The formula with every dice term replaced by its kept sum; still a
    /// valid formula, annotations included.
    pub fn consolidated(&self) -> String {
        self.simplified.clone()
    }

    pub fn has_dice(&self) -> bool {
        !self.parts.is_empty()
    }

    /// First kept value of the first group with `sides` sides.
    pub fn natural(&self, sides: i64) -> Option<i64> {
        self.parts
            .iter()
            .find(|g| g.sides == sides)
            .and_then(|g| g.kept_values().next())
    }
}

/// Rolls dice formulas.
pub trait RollOracle {
    fn roll(&mut self, formula: &str, opts: &RollOptions) -> Result<RollResult, RollError>;
}

// ── Die sources ───────────────────────────────────────────────────────────────

/// Produces single die faces.
pub trait DieSource {
    fn die(&mut self, sides: i64) -> i64;
}

/// Uniformly random faces.
#[derive(Debug, Clone)]
pub struct RandomDice {
    rng: StdRng,
}

impl RandomDice {
    pub fn new() -> Self {
        RandomDice {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        RandomDice {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomDice {
    fn default() -> Self {
        Self::new()
    }
}

impl DieSource for RandomDice {
    fn die(&mut self, sides: i64) -> i64 {
        self.rng.gen_range(1..=sides)
    }
}

/// Faces taken from a queue, then a fixed fallback.  Values are clamped to
/// the die's range.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    queue: VecDeque<i64>,
    fallback: Option<i64>,
}

impl ScriptedDice {
    pub fn new(faces: impl IntoIterator<Item = i64>) -> Self {
        ScriptedDice {
            queue: faces.into_iter().collect(),
            fallback: None,
        }
    }

    /// Once the queue runs dry, every die shows `face` (the die's maximum
    /// when no fallback is set).
    pub fn with_fallback(mut self, face: i64) -> Self {
        self.fallback = Some(face);
        self
    }

    pub fn push(&mut self, face: i64) {
        self.queue.push_back(face);
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl DieSource for ScriptedDice {
    fn die(&mut self, sides: i64) -> i64 {
        let face = self
            .queue
            .pop_front()
            .or(self.fallback)
            .unwrap_or(sides);
        face.clamp(1, sides)
    }
}

// ── Roller ────────────────────────────────────────────────────────────────────

/// Reference [`RollOracle`].
#[derive(Debug, Clone, Default)]
pub struct Roller<D: DieSource> {
    source: D,
}

impl<D: DieSource> Roller<D> {
    pub fn new(source: D) -> Self {
        Roller { source }
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut D {
        &mut self.source
    }
}

impl Roller<RandomDice> {
    pub fn random() -> Self {
        Roller::new(RandomDice::new())
    }
}

impl Roller<ScriptedDice> {
    pub fn scripted(faces: impl IntoIterator<Item = i64>) -> Self {
        Roller::new(ScriptedDice::new(faces))
    }
}

impl<D: DieSource> RollOracle for Roller<D> {
    fn roll(&mut self, formula: &str, opts: &RollOptions) -> Result<RollResult, RollError> {
        let formula = match opts.adv {
            1 => formula.replacen("1d20", "2d20kh1", 1),
            -1 => formula.replacen("1d20", "2d20kl1", 1),
            _ => formula.to_owned(),
        };
        let mut eval = Eval {
            formula: &formula,
            chars: formula.chars().collect(),
            pos: 0,
            source: &mut self.source,
            parts: Vec::new(),
            rolled: 0,
        };
        let piece = eval.run()?;
        let parts = eval.parts;

        let crit = parts
            .iter()
            .find(|g| g.sides == 20)
            .and_then(|g| g.kept_values().next())
            .map_or(Crit::None, |v| match v {
                20 => Crit::Success,
                1 => Crit::Fail,
                _ => Crit::None,
            });
        let label = match &opts.roll_for {
            Some(rf) => format!("**{rf}**: "),
            None => String::new(),
        };
        Ok(RollResult {
            total: piece.value,
            result: format!("{label}{} = `{}`", piece.display, piece.value),
            parts,
            crit,
            simplified: piece.simple,
        })
    }
}

/// A partially evaluated sub-formula.
struct Piece {
    value: i64,
    display: String,
    simple: String,
}

struct Eval<'a, D: DieSource> {
    formula: &'a str,
    chars: Vec<char>,
    pos: usize,
    source: &'a mut D,
    parts: Vec<DiceGroup>,
    rolled: u32,
}

impl<D: DieSource> Eval<'_, D> {
    fn syntax(&self, message: impl Into<String>) -> RollError {
        RollError::Syntax {
            formula: self.formula.to_owned(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i).is_some_and(|h| h.eq_ignore_ascii_case(&c)))
    }

    fn read_number(&mut self) -> Option<i64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.chars[start..self.pos].iter().collect::<String>().parse().ok()
    }

    fn run(&mut self) -> Result<Piece, RollError> {
        self.skip_ws();
        if self.peek().is_none() {
            return Err(self.syntax("empty formula"));
        }
        let piece = self.expr()?;
        self.skip_ws();
        match self.peek() {
            None => Ok(piece),
            Some(c) => Err(self.syntax(format!("unexpected `{c}`"))),
        }
    }

    fn expr(&mut self) -> Result<Piece, RollError> {
        let mut acc = self.term()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some(c @ ('+' | '-')) => c,
                _ => return Ok(acc),
            };
            self.pos += 1;
            let rhs = self.term()?;
            let value = if op == '+' {
                acc.value.checked_add(rhs.value)
            } else {
                acc.value.checked_sub(rhs.value)
            };
            acc = Piece {
                value: value.ok_or(RollError::Overflow)?,
                display: format!("{} {op} {}", acc.display, rhs.display),
                simple: format!("{} {op} {}", acc.simple, rhs.simple),
            };
        }
    }

    fn term(&mut self) -> Result<Piece, RollError> {
        let mut acc = self.factor()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some(c @ ('*' | '/')) => c,
                _ => return Ok(acc),
            };
            self.pos += 1;
            let rhs = self.factor()?;
            let value = if op == '*' {
                acc.value.checked_mul(rhs.value).ok_or(RollError::Overflow)?
            } else {
                floor_div(acc.value, rhs.value)?
            };
            acc = Piece {
                value,
                display: format!("{} {op} {}", acc.display, rhs.display),
                simple: format!("{} {op} {}", acc.simple, rhs.simple),
            };
        }
    }

    fn factor(&mut self) -> Result<Piece, RollError> {
        self.skip_ws();
        if self.peek() == Some('-') {
            self.pos += 1;
            let inner = self.factor()?;
            return Ok(Piece {
                value: inner.value.checked_neg().ok_or(RollError::Overflow)?,
                display: format!("-{}", inner.display),
                simple: format!("-{}", inner.simple),
            });
        }
        if self.peek() == Some('+') {
            self.pos += 1;
            return self.factor();
        }
        let mut piece = self.atom()?;
        loop {
            self.skip_ws();
            if self.peek() != Some('[') {
                return Ok(piece);
            }
            let start = self.pos;
            while self.peek().is_some_and(|c| c != ']') {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Err(self.syntax("unclosed annotation"));
            }
            self.pos += 1;
            let note: String = self.chars[start..self.pos].iter().collect();
            piece.display = format!("{} {note}", piece.display);
            piece.simple = format!("{} {note}", piece.simple);
        }
    }

    fn atom(&mut self) -> Result<Piece, RollError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    return Err(self.syntax("expected `)`"));
                }
                self.pos += 1;
                Ok(Piece {
                    value: inner.value,
                    display: format!("({})", inner.display),
                    simple: format!("({})", inner.simple),
                })
            }
            Some(c) if c.is_ascii_digit() || c == 'd' || c == 'D' => {
                let start = self.pos;
                let count = self.read_number();
                if matches!(self.peek(), Some('d' | 'D')) {
                    self.pos += 1;
                    return self.dice(start, count.unwrap_or(1));
                }
                let n = count.ok_or_else(|| self.syntax("number too large"))?;
                Ok(Piece {
                    value: n,
                    display: n.to_string(),
                    simple: n.to_string(),
                })
            }
            Some(c) => Err(self.syntax(format!("unexpected `{c}`"))),
            None => Err(self.syntax("unexpected end of formula")),
        }
    }

    /// Roll one `NdM...` term; `pos` sits just past the `d`.
    fn dice(&mut self, start: usize, count: i64) -> Result<Piece, RollError> {
        let sides = self
            .read_number()
            .filter(|s| *s >= 1)
            .ok_or_else(|| self.syntax("expected die size"))?;

        let mut keep: Option<(bool, usize)> = None;
        let mut reroll: Option<i64> = None;
        let mut minimum: Option<i64> = None;
        loop {
            let (width, kind) = if self.starts_with("kh") {
                (2, "kh")
            } else if self.starts_with("kl") {
                (2, "kl")
            } else if self.starts_with("ro") {
                (2, "ro")
            } else if self.starts_with("mi") {
                (2, "mi")
            } else if self.starts_with("k") && self.chars.get(self.pos + 1).is_some_and(char::is_ascii_digit) {
                (1, "kh")
            } else {
                break;
            };
            self.pos += width;
            let n = self
                .read_number()
                .ok_or_else(|| self.syntax(format!("expected a number after `{kind}`")))?;
            match kind {
                "kh" => keep = Some((true, usize::try_from(n).unwrap_or(usize::MAX))),
                "kl" => keep = Some((false, usize::try_from(n).unwrap_or(usize::MAX))),
                "ro" => reroll = Some(n),
                _ => minimum = Some(n),
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();

        let count = u32::try_from(count).map_err(|_| RollError::TooManyDice)?;
        self.rolled = self.rolled.saturating_add(count);
        if self.rolled > MAX_DICE {
            return Err(RollError::TooManyDice);
        }

        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut v = self.source.die(sides);
            if reroll == Some(v) {
                v = self.source.die(sides);
            }
            if let Some(m) = minimum {
                v = v.max(m.min(sides));
            }
            values.push(v);
        }

        let mut kept = vec![true; values.len()];
        if let Some((highest, n)) = keep {
            let mut order: Vec<usize> = (0..values.len()).collect();
            order.sort_by_key(|&i| values[i]);
            if highest {
                order.reverse();
            }
            kept = vec![false; values.len()];
            for &i in order.iter().take(n) {
                kept[i] = true;
            }
        }

        let shown: Vec<String> = values
            .iter()
            .zip(&kept)
            .map(|(v, k)| if *k { v.to_string() } else { format!("~~{v}~~") })
            .collect();
        let group = DiceGroup { sides, values, kept };
        let total = group.total();
        self.parts.push(group);
        Ok(Piece {
            value: total,
            display: format!("{text} ({})", shown.join(", ")),
            simple: total.to_string(),
        })
    }
}

fn floor_div(a: i64, b: i64) -> Result<i64, RollError> {
    if b == 0 {
        return Err(RollError::DivisionByZero);
    }
    let q = a.checked_div(b).ok_or(RollError::Overflow)?;
    Ok(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn roll(faces: &[i64], formula: &str) -> RollResult {
        Roller::scripted(faces.iter().copied())
            .roll(formula, &RollOptions::default())
            .expect("roll failed")
    }

    #[test]
    fn flat_arithmetic() {
        let r = roll(&[], "2 + 3 * 4");
        assert_eq!(r.total, 14);
        assert!(!r.has_dice());
        assert_eq!(r.result, "2 + 3 * 4 = `14`");
    }

    #[test]
    fn floor_division() {
        assert_eq!(roll(&[], "7 / 2").total, 3);
        assert_eq!(roll(&[], "-7 / 2").total, -4);
    }

    #[test]
    fn basic_dice() {
        let r = roll(&[3, 5], "2d6+1");
        assert_eq!(r.total, 9);
        assert_eq!(r.result, "2d6 (3, 5) + 1 = `9`");
        assert_eq!(r.consolidated(), "8 + 1");
    }

    #[test]
    fn keep_highest_and_lowest() {
        let r = roll(&[4, 17], "2d20kh1");
        assert_eq!(r.total, 17);
        assert_eq!(r.natural(20), Some(17));
        assert!(r.result.contains("~~4~~"));
        assert_eq!(roll(&[4, 17], "2d20kl1").total, 4);
    }

    #[test]
    fn reroll_once_and_minimum() {
        assert_eq!(roll(&[1, 1], "1d20ro1").total, 1);
        assert_eq!(roll(&[1, 6], "1d20ro1").total, 6);
        assert_eq!(roll(&[1, 2, 6], "3d6mi3").total, 12);
    }

    #[test]
    fn annotations_are_kept() {
        let r = roll(&[4], "1d6 [fire] + 2");
        assert_eq!(r.total, 6);
        assert_eq!(r.consolidated(), "4 [fire] + 2");
        let r = roll(&[4], "(1d6)/2 [fire]");
        assert_eq!(r.total, 2);
        assert_eq!(r.consolidated(), "(4) / 2 [fire]");
    }

    #[test]
    fn crit_detection() {
        assert_eq!(roll(&[20], "1d20+5").crit, Crit::Success);
        assert_eq!(roll(&[1], "1d20+5").crit, Crit::Fail);
        assert_eq!(roll(&[12], "1d20+5").crit, Crit::None);
    }

    #[test]
    fn advantage_rewrites_first_d20() {
        let mut r = Roller::scripted([3, 18]);
        let opts = RollOptions { adv: 1, roll_for: None };
        assert_eq!(r.roll("1d20+2", &opts).unwrap().total, 20);
    }

    #[test]
    fn labeled_result() {
        let mut r = Roller::scripted([4]);
        let out = r.roll("1d6", &RollOptions::labeled("Damage")).unwrap();
        assert_eq!(out.result, "**Damage**: 1d6 (4) = `4`");
    }

    #[test]
    fn errors() {
        let mut r = Roller::scripted([]);
        let opts = RollOptions::default();
        assert!(matches!(r.roll("", &opts), Err(RollError::Syntax { .. })));
        assert!(matches!(r.roll("1d", &opts), Err(RollError::Syntax { .. })));
        assert!(matches!(r.roll("2 +", &opts), Err(RollError::Syntax { .. })));
        assert!(matches!(r.roll("1d6 [x", &opts), Err(RollError::Syntax { .. })));
        assert_eq!(r.roll("5/0", &opts), Err(RollError::DivisionByZero));
        assert_eq!(r.roll("2000d6", &opts), Err(RollError::TooManyDice));
    }

    #[test]
    fn random_dice_stay_in_range() {
        let mut r = Roller::new(RandomDice::seeded(7));
        for _ in 0..50 {
            let t = r.roll("3d6", &RollOptions::default()).unwrap().total;
            assert!((3..=18).contains(&t));
        }
    }

    #[test]
    fn scripted_fallback_is_max() {
        assert_eq!(roll(&[], "2d8").total, 16);
    }
}
