//! Runtime value type for the sandbox language.
//!
//! Values follow the conventions of the scripting language users actually
//! write: `True`/`False`/`None`, integer and float arithmetic with floor
//! division and sign-of-divisor modulo, and insertion-ordered dicts and
//! sets.  `Display` renders the `str()` form, [`Value::repr`] the `repr()`
//! form.

use std::cmp::Ordering;
use std::fmt;

use super::error::SandboxError;

/// A sandbox runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered, deduplicated by [`Value::py_eq`].
    Set(Vec<Value>),
    /// Insertion-ordered key/value pairs with unique keys.
    Dict(Vec<(Value, Value)>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

fn float_repr(x: f64) -> String {
    if x.is_nan() {
        "nan".into()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".into() } else { "-inf".into() }
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn join_repr<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items.map(Value::repr).collect::<Vec<_>>().join(", ")
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// The `repr()` rendering.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) => float_repr(*x),
            Value::Str(s) => str_repr(s),
            Value::List(items) => format!("[{}]", join_repr(items.iter())),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items.iter())),
            Value::Set(items) if items.is_empty() => "set()".into(),
            Value::Set(items) => format!("{{{}}}", join_repr(items.iter())),
            Value::Dict(pairs) => {
                let body = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{body}}}")
            }
        }
    }

    /// Name of the type, as returned by `typeof()`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::Dict(_) => "dict",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) | Value::Set(v) => !v.is_empty(),
            Value::Dict(d) => !d.is_empty(),
        }
    }

    /// Integer view of `Bool` and `Int`; floats are not silently truncated.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            other => other.as_int().map(|n| n as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    fn is_hashable(&self) -> bool {
        match self {
            Value::List(_) | Value::Set(_) | Value::Dict(_) => false,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => true,
        }
    }

    pub(crate) fn check_hashable(&self) -> Result<(), SandboxError> {
        if self.is_hashable() {
            Ok(())
        } else {
            Err(SandboxError::TypeMismatch(format!(
                "unhashable type: '{}'",
                self.type_name()
            )))
        }
    }

    // ── Collections ───────────────────────────────────────────────────────────

    /// Build a set, dropping duplicates while keeping first-seen order.
    pub fn set_from(items: Vec<Value>) -> Result<Value, SandboxError> {
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            item.check_hashable()?;
            if !out.iter().any(|v| v.py_eq(&item)) {
                out.push(item);
            }
        }
        Ok(Value::Set(out))
    }

    /// Build a dict; later duplicate keys overwrite earlier values in place.
    pub fn dict_from(pairs: Vec<(Value, Value)>) -> Result<Value, SandboxError> {
        let mut out = Value::Dict(Vec::with_capacity(pairs.len()));
        for (k, v) in pairs {
            out.set_item(k, v)?;
        }
        Ok(out)
    }

    /// Elements produced by iterating over this value.
    pub fn iter_values(&self) -> Result<Vec<Value>, SandboxError> {
        match self {
            Value::List(v) | Value::Tuple(v) | Value::Set(v) => Ok(v.clone()),
            Value::Dict(d) => Ok(d.iter().map(|(k, _)| k.clone()).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(SandboxError::TypeMismatch(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    pub fn len(&self) -> Result<usize, SandboxError> {
        match self {
            Value::List(v) | Value::Tuple(v) | Value::Set(v) => Ok(v.len()),
            Value::Dict(d) => Ok(d.len()),
            Value::Str(s) => Ok(s.chars().count()),
            other => Err(SandboxError::TypeMismatch(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    /// Dict lookup by key.
    pub fn dict_get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Dict(pairs) => pairs.iter().find(|(k, _)| k.py_eq(key)).map(|(_, v)| v),
            _ => None,
        }
    }

    /// `container[key]`.
    pub fn get_item(&self, key: &Value) -> Result<Value, SandboxError> {
        match self {
            Value::List(items) | Value::Tuple(items) => {
                let idx = index_arg(key)?;
                let pos = normalize_index(idx, items.len())?;
                Ok(items[pos].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = index_arg(key)?;
                let pos = normalize_index(idx, chars.len())?;
                Ok(Value::Str(chars[pos].to_string()))
            }
            Value::Dict(_) => self
                .dict_get(key)
                .cloned()
                .ok_or_else(|| SandboxError::KeyNotFound(key.repr())),
            other => Err(SandboxError::TypeMismatch(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    /// `container[key] = value`.
    pub fn set_item(&mut self, key: Value, value: Value) -> Result<(), SandboxError> {
        match self {
            Value::List(items) => {
                let idx = index_arg(&key)?;
                let pos = normalize_index(idx, items.len())?;
                items[pos] = value;
                Ok(())
            }
            Value::Dict(pairs) => {
                key.check_hashable()?;
                match pairs.iter_mut().find(|(k, _)| k.py_eq(&key)) {
                    Some(slot) => slot.1 = value,
                    None => pairs.push((key, value)),
                }
                Ok(())
            }
            other => Err(SandboxError::TypeMismatch(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    /// `container[lower:upper:step]`.
    pub fn slice(
        &self,
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    ) -> Result<Value, SandboxError> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(SandboxError::bad_arg("slice", "slice step cannot be zero"));
        }
        let pick = |len: usize| -> Vec<usize> { slice_indices(len, lower, upper, step) };
        match self {
            Value::List(items) => Ok(Value::List(pick(items.len()).into_iter().map(|i| items[i].clone()).collect())),
            Value::Tuple(items) => Ok(Value::Tuple(pick(items.len()).into_iter().map(|i| items[i].clone()).collect())),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::Str(pick(chars.len()).into_iter().map(|i| chars[i]).collect()))
            }
            other => Err(SandboxError::TypeMismatch(format!(
                "'{}' object is not sliceable",
                other.type_name()
            ))),
        }
    }

    /// `needle in self`.
    pub fn contains(&self, needle: &Value) -> Result<bool, SandboxError> {
        match self {
            Value::Str(hay) => match needle {
                Value::Str(n) => Ok(hay.contains(n.as_str())),
                other => Err(SandboxError::TypeMismatch(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
                Ok(items.iter().any(|v| v.py_eq(needle)))
            }
            Value::Dict(_) => Ok(self.dict_get(needle).is_some()),
            other => Err(SandboxError::TypeMismatch(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    // ── Comparison ────────────────────────────────────────────────────────────

    /// Equality with numeric cross-type comparison (`1 == 1.0 == True`).
    pub fn py_eq(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::None, Value::None) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
            }
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.py_eq(y)))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| rhs.dict_get(k).is_some_and(|w| v.py_eq(w)))
                    && b.iter().all(|(k, _)| self.dict_get(k).is_some())
            }
            _ => false,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=` and `sorted()`.
    pub fn py_cmp(&self, rhs: &Value) -> Result<Ordering, SandboxError> {
        match (self, rhs) {
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => {
                    let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
                    Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
                }
            },
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.py_cmp(y)? {
                        Ordering::Equal => {}
                        other => return Ok(other),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            (a, b) => Err(SandboxError::TypeMismatch(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    fn type_error(op: &str, a: &Value, b: &Value) -> SandboxError {
        SandboxError::TypeMismatch(format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))
    }

    /// Apply an integer operation with overflow detection, falling back to
    /// floats when either side is a float.
    fn numeric(
        &self,
        rhs: &Value,
        op: &str,
        int_op: impl Fn(i64, i64) -> Option<i64>,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, SandboxError> {
        match (self.as_int(), rhs.as_int()) {
            (Some(a), Some(b)) => int_op(a, b)
                .map(Value::Int)
                .ok_or_else(|| SandboxError::ValueTooLarge(format!("integer overflow in {op}"))),
            _ => match (self.as_float(), rhs.as_float()) {
                (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
                _ => Err(Self::type_error(op, self, rhs)),
            },
        }
    }

    pub fn add(&self, rhs: &Value, max_len: usize) -> Result<Value, SandboxError> {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => {
                check_len(a.len() + b.len(), max_len)?;
                Ok(Value::Str(format!("{a}{b}")))
            }
            (Value::List(a), Value::List(b)) => {
                check_len(a.len() + b.len(), max_len)?;
                Ok(Value::List(a.iter().chain(b).cloned().collect()))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                check_len(a.len() + b.len(), max_len)?;
                Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
            }
            _ => self.numeric(rhs, "+", i64::checked_add, |a, b| a + b),
        }
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value, SandboxError> {
        self.numeric(rhs, "-", i64::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, rhs: &Value, max_len: usize) -> Result<Value, SandboxError> {
        let repeat = |n: i64| -> Result<usize, SandboxError> { Ok(n.max(0) as usize) };
        match (self, rhs) {
            (Value::Str(s), n) | (n, Value::Str(s)) if n.as_int().is_some() => {
                let times = repeat(n.as_int().unwrap_or(0))?;
                check_len(s.len().saturating_mul(times), max_len)?;
                Ok(Value::Str(s.repeat(times)))
            }
            (Value::List(v), n) | (n, Value::List(v)) if n.as_int().is_some() => {
                let times = repeat(n.as_int().unwrap_or(0))?;
                check_len(v.len().saturating_mul(times), max_len)?;
                Ok(Value::List(repeat_items(v, times)))
            }
            (Value::Tuple(v), n) | (n, Value::Tuple(v)) if n.as_int().is_some() => {
                let times = repeat(n.as_int().unwrap_or(0))?;
                check_len(v.len().saturating_mul(times), max_len)?;
                Ok(Value::Tuple(repeat_items(v, times)))
            }
            _ => self.numeric(rhs, "*", i64::checked_mul, |a, b| a * b),
        }
    }

    /// True division; always yields a float.
    pub fn div(&self, rhs: &Value) -> Result<Value, SandboxError> {
        match (self.as_float(), rhs.as_float()) {
            (Some(_), Some(b)) if b == 0.0 => Err(SandboxError::DivisionByZero),
            (Some(a), Some(b)) => Ok(Value::Float(a / b)),
            _ => Err(Self::type_error("/", self, rhs)),
        }
    }

    pub fn floor_div(&self, rhs: &Value) -> Result<Value, SandboxError> {
        if rhs.as_float() == Some(0.0) {
            return Err(SandboxError::DivisionByZero);
        }
        self.numeric(
            rhs,
            "//",
            |a, b| {
                let q = a.checked_div(b)?;
                Some(if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q })
            },
            |a, b| (a / b).floor(),
        )
    }

    /// Modulo with the sign of the divisor.
    pub fn rem(&self, rhs: &Value) -> Result<Value, SandboxError> {
        if rhs.as_float() == Some(0.0) {
            return Err(SandboxError::DivisionByZero);
        }
        self.numeric(
            rhs,
            "%",
            |a, b| {
                let r = a.checked_rem(b)?;
                Some(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
            },
            |a, b| {
                let r = a % b;
                if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
            },
        )
    }

    /// Exponentiation; exponents above `max_power` are refused.
    pub fn pow(&self, rhs: &Value, max_power: i64) -> Result<Value, SandboxError> {
        if let Some(e) = rhs.as_float() {
            if e.abs() > max_power as f64 {
                return Err(SandboxError::ValueTooLarge(format!(
                    "exponent {} exceeds {max_power}",
                    rhs.repr()
                )));
            }
        }
        match (self.as_int(), rhs.as_int()) {
            (Some(a), Some(b)) if b >= 0 => u32::try_from(b)
                .ok()
                .and_then(|b| a.checked_pow(b))
                .map(Value::Int)
                .ok_or_else(|| SandboxError::ValueTooLarge("integer overflow in **".into())),
            (Some(0), Some(_)) => Err(SandboxError::DivisionByZero),
            _ => match (self.as_float(), rhs.as_float()) {
                (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
                _ => Err(Self::type_error("**", self, rhs)),
            },
        }
    }

    pub fn neg(&self) -> Result<Value, SandboxError> {
        match self {
            Value::Float(x) => Ok(Value::Float(-x)),
            other => other
                .as_int()
                .and_then(i64::checked_neg)
                .map(Value::Int)
                .ok_or_else(|| {
                    SandboxError::TypeMismatch(format!(
                        "bad operand type for unary -: '{}'",
                        other.type_name()
                    ))
                }),
        }
    }

    pub fn pos(&self) -> Result<Value, SandboxError> {
        match self {
            Value::Float(x) => Ok(Value::Float(*x)),
            other => other.as_int().map(Value::Int).ok_or_else(|| {
                SandboxError::TypeMismatch(format!(
                    "bad operand type for unary +: '{}'",
                    other.type_name()
                ))
            }),
        }
    }
}

/// `items` concatenated `times` times.
fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    items.iter().cloned().cycle().take(items.len().saturating_mul(times)).collect()
}

fn check_len(len: usize, max_len: usize) -> Result<(), SandboxError> {
    if len > max_len {
        Err(SandboxError::ValueTooLarge(format!(
            "sequence of length {len} exceeds {max_len}"
        )))
    } else {
        Ok(())
    }
}

fn index_arg(key: &Value) -> Result<i64, SandboxError> {
    key.as_int().ok_or_else(|| {
        SandboxError::TypeMismatch(format!(
            "indices must be integers, not {}",
            key.type_name()
        ))
    })
}

fn normalize_index(idx: i64, len: usize) -> Result<usize, SandboxError> {
    let len_i = len as i64;
    let pos = if idx < 0 { idx + len_i } else { idx };
    if (0..len_i).contains(&pos) {
        Ok(pos as usize)
    } else {
        Err(SandboxError::IndexOutOfRange(idx))
    }
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let resolve = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |v| clamp(resolve(v), 0, len));
        let stop = upper.map_or(len, |v| clamp(resolve(v), 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |v| clamp(resolve(v), -1, len - 1));
        let stop = upper.map_or(-1, |v| clamp(resolve(v), -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl Value {
    /// Convert a JSON document; objects become dicts with string keys.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Dict(
                map.into_iter()
                    .map(|(k, v)| (Value::Str(k), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
