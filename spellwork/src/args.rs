//! Cast and effect argument parsing.
//!
//! Arguments look like `-l 3 -b 2 -d "1d6 [fire]" adv -i`:
//!
//! | Form            | Meaning                                          |
//! |-----------------|--------------------------------------------------|
//! | `-key value`    | `key` gets `value` (repeatable)                  |
//! | `-key`          | flag; followed by another `-key` or nothing      |
//! | `word`          | bare flag (`adv`, `dis`, `ea`, `crit`, ...)      |
//!
//! A negative number after `-key` is a value, not another key.

use std::fmt;

/// A malformed typed argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgError {
    pub key: String,
    pub value: String,
}

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value `{}` for -{}", self.value, self.key)
    }
}

impl std::error::Error for ArgError {}

const FLAG: &str = "True";

/// Parsed arguments, in the order given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    entries: Vec<(String, String)>,
}

fn is_number(s: &str) -> bool {
    s.parse::<f64>().is_ok()
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(s: &str) -> Self {
        let tokens = split_args(s);
        let mut entries = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let tok = &tokens[i];
            match tok.strip_prefix('-') {
                Some(key) if !key.is_empty() && !is_number(tok) => {
                    match tokens.get(i + 1) {
                        Some(next) if !next.starts_with('-') || is_number(next) => {
                            entries.push((key.to_owned(), next.clone()));
                            i += 1;
                        }
                        _ => entries.push((key.to_owned(), FLAG.to_owned())),
                    }
                }
                _ => entries.push((tok.clone(), FLAG.to_owned())),
            }
            i += 1;
        }
        Args { entries }
    }

    /// Append a value for `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Replace every value of `key` with `value`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.remove(key);
        self.entries.push((key.to_owned(), value.into()));
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// Every value given for `key`, in order.
    pub fn get(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn last(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn last_int(&self, key: &str) -> Result<Option<i64>, ArgError> {
        match self.last(key) {
            None => Ok(None),
            Some(v) => v.trim().parse().map(Some).map_err(|_| ArgError {
                key: key.to_owned(),
                value: v.to_owned(),
            }),
        }
    }

    /// True if `key` was given at all.
    pub fn flag(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// All values of `key` joined by `sep`, or `None` if absent.
    pub fn join(&self, key: &str, sep: &str) -> Option<String> {
        let values = self.get(key);
        if values.is_empty() {
            None
        } else {
            Some(values.join(sep))
        }
    }

    /// 2 elven accuracy (when `ea` is honoured), 1 advantage,
    /// -1 disadvantage, 0 otherwise.  `adv` and `dis` cancel.
    pub fn adv(&self, ea: bool) -> i8 {
        let adv = self.flag("adv");
        let dis = self.flag("dis");
        let elven = ea && self.flag("ea");
        match (adv, dis, elven) {
            (_, false, true) => 2,
            (false, true, _) => -1,
            (true, false, _) => 1,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring single- and
/// double-quoted strings and `\` escapes within them.
pub fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match (ch, quote) {
            ('"' | '\'', None) => {
                quote = Some(ch);
                quoted = true;
            }
            (c, Some(q)) if c == q => quote = None,
            ('\\', Some(_)) => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            (c, None) if c.is_whitespace() => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                }
                quoted = false;
            }
            (c, _) => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_simple() {
        assert_eq!(split_args("foo bar  baz"), ["foo", "bar", "baz"]);
    }

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#"-d "1d6 [fire]" -t 'Big Orc'"#), ["-d", "1d6 [fire]", "-t", "Big Orc"]);
    }

    #[test]
    fn split_escaped_quote_inside_quotes() {
        assert_eq!(split_args(r#""say \"hi\"""#), [r#"say "hi""#]);
    }

    #[test]
    fn split_empty_quotes_is_a_token() {
        assert_eq!(split_args(r#"-title "" x"#), ["-title", "", "x"]);
    }

    #[test]
    fn key_values_and_flags() {
        let a = Args::parse("-l 3 -b 2 -b 1d4 adv -i");
        assert_eq!(a.last_int("l"), Ok(Some(3)));
        assert_eq!(a.get("b"), ["2", "1d4"]);
        assert_eq!(a.join("b", "+").as_deref(), Some("2+1d4"));
        assert!(a.flag("adv"));
        assert!(a.flag("i"));
        assert!(!a.flag("dis"));
    }

    #[test]
    fn negative_number_is_a_value() {
        let a = Args::parse("-b -2 -d 1d4");
        assert_eq!(a.last("b"), Some("-2"));
        assert_eq!(a.last("d"), Some("1d4"));
    }

    #[test]
    fn key_followed_by_key_is_a_flag() {
        let a = Args::parse("-i -l 2");
        assert_eq!(a.last("i"), Some("True"));
        assert_eq!(a.last_int("l"), Ok(Some(2)));
    }

    #[test]
    fn bad_int_reports_key() {
        let a = Args::parse("-l three");
        assert_eq!(
            a.last_int("l"),
            Err(ArgError { key: "l".into(), value: "three".into() })
        );
    }

    #[test]
    fn advantage_states() {
        assert_eq!(Args::parse("adv").adv(false), 1);
        assert_eq!(Args::parse("dis").adv(false), -1);
        assert_eq!(Args::parse("adv dis").adv(false), 0);
        assert_eq!(Args::parse("ea").adv(true), 2);
        assert_eq!(Args::parse("ea").adv(false), 0);
        assert_eq!(Args::parse("ea dis").adv(true), -1);
    }

    #[test]
    fn set_replaces() {
        let mut a = Args::parse("-d 1 -d 2");
        a.set("d", "3");
        assert_eq!(a.get("d"), ["3"]);
    }
}
