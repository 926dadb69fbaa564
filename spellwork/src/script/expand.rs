//! Markup expansion for free text.
//!
//! Three forms are recognised; the leftmost match wins and an opening
//! character preceded by a backslash is left alone (the backslash is kept):
//!
//! | Sequence   | Meaning                                                    |
//! |------------|------------------------------------------------------------|
//! | `{{expr}}` | Evaluate `expr` in the sandbox and substitute the result   |
//! | `<name>`   | Substitute the value of `name` (chat mentions pass through)|
//! | `{expr}`   | Substitute variables into `expr`, roll it, insert the total|
//!
//! Bodies are non-empty and never span a line.  `{{..}}` and `{..}` take the
//! shortest body; `<..>` takes the longest whitespace-free body ending at a
//! `>`.  The expander only finds the markup; what each form turns into is
//! decided by a [`Substitute`] implementation.

use std::sync::LazyLock;

use regex::Regex;

use super::error::{EvaluationError, SandboxError};
use super::value::Value;

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<a?(?:[@#]|:.+:)[&!]{0,2}\d+>$")
        .unwrap_or_else(|e| panic!("invalid mention regex: {e}"))
});

static ROLL_DELIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+*/().<>=]").unwrap_or_else(|e| panic!("invalid delimiter regex: {e}"))
});

/// A piece of scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup<'a> {
    Text(&'a str),
    /// `{{expr}}`
    Eval(&'a str),
    /// `<name>`
    Lookup(&'a str),
    /// `{expr}`
    Roll(&'a str),
}

/// How each markup form is resolved.
pub trait Substitute {
    fn eval(&mut self, expr: &str) -> Result<Value, SandboxError>;
    fn lookup(&mut self, name: &str) -> Result<String, SandboxError>;
    fn roll(&mut self, expr: &str) -> Result<String, SandboxError>;
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Length of the line-bounded body that starts at `body`, ending just before
/// the first occurrence of `close` at offset ≥ 1.
fn shortest_body(body: &str, close: &str) -> Option<usize> {
    let line = &body[..body.find('\n').unwrap_or(body.len())];
    let bytes = line.as_bytes();
    (1..bytes.len()).find(|&k| bytes[k..].starts_with(close.as_bytes()))
}

fn match_double(src: &str, i: usize) -> Option<(Markup<'_>, usize)> {
    if !src[i..].starts_with("{{") {
        return None;
    }
    let body = &src[i + 2..];
    let k = shortest_body(body, "}}")?;
    Some((Markup::Eval(&body[..k]), i + 2 + k + 2))
}

fn match_single(src: &str, i: usize) -> Option<(Markup<'_>, usize)> {
    if i > 0 && src.as_bytes()[i - 1] == b'{' {
        return None;
    }
    let body = &src[i + 1..];
    let k = shortest_body(body, "}")?;
    Some((Markup::Roll(&body[..k]), i + 1 + k + 1))
}

fn match_angle(src: &str, i: usize) -> Option<(Markup<'_>, usize)> {
    let body = &src[i + 1..];
    let run = body
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map_or(body.len(), |(p, _)| p);
    let k = body[..run].rfind('>').filter(|&k| k >= 1)?;
    Some((Markup::Lookup(&body[..k]), i + 1 + k + 1))
}

/// Split `src` into literal text and markup.
pub fn scan(src: &str) -> Vec<Markup<'_>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let escaped = i > 0 && bytes[i - 1] == b'\\';
        let found = match bytes[i] {
            _ if escaped => None,
            b'{' => match_double(src, i).or_else(|| match_single(src, i)),
            b'<' => match_angle(src, i),
            _ => None,
        };
        match found {
            Some((markup, end)) => {
                if text_start < i {
                    out.push(Markup::Text(&src[text_start..i]));
                }
                out.push(markup);
                i = end;
                text_start = end;
            }
            None => i += 1,
        }
    }
    if text_start < src.len() {
        out.push(Markup::Text(&src[text_start..]));
    }
    out
}

/// True for `<@123>`, `<#123>`, `<@&123>`, `<:name:123>` and friends.
pub fn is_mention(markup: &str) -> bool {
    MENTION_RE.is_match(markup)
}

fn display(v: Value) -> String {
    match v {
        Value::None => String::new(),
        v => v.to_string(),
    }
}

// ── Expansion ─────────────────────────────────────────────────────────────────

/// Expand every markup occurrence in `src`.  The first failure aborts the
/// whole expansion.
pub fn expand(src: &str, sub: &mut dyn Substitute) -> Result<String, EvaluationError> {
    let mut out = String::with_capacity(src.len());
    for piece in scan(src) {
        match piece {
            Markup::Text(t) => out.push_str(t),
            Markup::Eval(expr) => {
                let v = sub.eval(expr).map_err(|e| EvaluationError::new(expr, e))?;
                out.push_str(&display(v));
            }
            Markup::Lookup(name) => {
                let whole = format!("<{name}>");
                if is_mention(&whole) {
                    out.push_str(&whole);
                } else {
                    let v = sub.lookup(name).map_err(|e| EvaluationError::new(name, e))?;
                    out.push_str(&v);
                }
            }
            Markup::Roll(expr) => {
                let v = sub.roll(expr).map_err(|e| EvaluationError::new(expr, e))?;
                out.push_str(&v);
            }
        }
    }
    Ok(out)
}

/// Evaluate every unescaped `{expr}` in `src` (shortest body, single line).
pub fn expand_braces(
    src: &str,
    mut eval: impl FnMut(&str) -> Result<Value, SandboxError>,
) -> Result<String, EvaluationError> {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let escaped = i > 0 && bytes[i - 1] == b'\\';
        let body_len = if bytes[i] == b'{' && !escaped {
            shortest_body(&src[i + 1..], "}")
        } else {
            None
        };
        match body_len {
            Some(k) => {
                let expr = &src[i + 1..i + 1 + k];
                out.push_str(&src[text_start..i]);
                let v = eval(expr).map_err(|e| EvaluationError::new(expr, e))?;
                out.push_str(&display(v));
                i += k + 2;
                text_start = i;
            }
            None => i += 1,
        }
    }
    out.push_str(&src[text_start..]);
    Ok(out)
}

/// Rewrite a `{..}` body for rolling: split on arithmetic delimiters
/// (keeping them), replace each trimmed token through `resolve`, join with
/// spaces.
pub fn substitute_tokens(expr: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(expr.len() * 2);
    let mut push = |token: &str| {
        let t = token.trim();
        match resolve(t) {
            Some(v) => out.push_str(&v),
            None => out.push_str(t),
        }
        out.push(' ');
    };
    let mut last = 0;
    for m in ROLL_DELIM_RE.find_iter(expr) {
        push(&expr[last..m.start()]);
        push(m.as_str());
        last = m.end();
    }
    push(&expr[last..]);
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
