//! Tree-walking evaluator for parsed sandbox snippets.
//!
//! One [`Evaluator`] owns a flat [`Scope`] and a cumulative comprehension
//! iteration counter.  Function calls resolve in a fixed order: the scope
//! functions (`set`, `exists`, `get`), then the pure builtins, then whatever
//! the caller's [`Host`] exposes.  Nothing else is callable.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::EngineConfig;

use super::builtins::{self, arg, opt_arg};
use super::error::{EvaluationError, SandboxError};
use super::expand::expand_braces;
use super::expr::{
    parse_stmt, BinOp, BoolOp, CmpOp, CompKind, Expr, FPart, Generator, Index, Stmt, Target,
    UnaryOp,
};
use super::value::Value;

// ── Limits ────────────────────────────────────────────────────────────────────

/// Resource caps enforced during evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Cumulative comprehension iterations per evaluator.
    pub max_iterations: usize,
    /// Longest string or sequence an operator may build.
    pub max_string_length: usize,
    /// Largest exponent accepted by `**`.
    pub max_power: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for Limits {
    fn from(cfg: &EngineConfig) -> Self {
        Limits {
            max_iterations: cfg.max_iterations,
            max_string_length: cfg.max_string_length,
            max_power: cfg.max_power,
        }
    }
}

// ── Scope ─────────────────────────────────────────────────────────────────────

/// The flat name table visible to one evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    names: HashMap<String, Value>,
}

impl Default for Scope {
    fn default() -> Self {
        let mut names = HashMap::new();
        names.insert("True".to_owned(), Value::Bool(true));
        names.insert("False".to_owned(), Value::Bool(false));
        names.insert("None".to_owned(), Value::None);
        Scope { names }
    }
}

impl Scope {
    /// A scope holding only the builtin names.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.names.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.names.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Overlay a layer of names; later layers shadow earlier ones.
    pub fn layer<K, V>(&mut self, layer: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (k, v) in layer {
            self.set(k, v);
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ── Host ──────────────────────────────────────────────────────────────────────

/// Functions supplied by the embedding layer (persistence, dice, character
/// state).
///
/// Returns `None` when `name` is not one of the host's functions so that the
/// evaluator can report [`SandboxError::UnknownFunction`].
pub trait Host {
    fn call(
        &mut self,
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        names: &mut Scope,
    ) -> Option<Result<Value, SandboxError>>;
}

/// A host that exposes nothing beyond the builtins.
pub struct NoHost;

impl Host for NoHost {
    fn call(
        &mut self,
        _name: &str,
        _args: &[Value],
        _kwargs: &[(String, Value)],
        _names: &mut Scope,
    ) -> Option<Result<Value, SandboxError>> {
        None
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Values produced while walking a comprehension.
enum Acc {
    Items(Vec<Value>),
    Pairs(Vec<(Value, Value)>),
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    pub names: Scope,
    loops: usize,
    limits: Limits,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Evaluator {
            names: Scope::new(),
            loops: 0,
            limits,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Comprehension iterations consumed so far.
    pub fn loops(&self) -> usize {
        self.loops
    }

    /// Evaluate one expression or assignment.  Assignments yield `None`.
    pub fn eval(&mut self, src: &str, host: &mut dyn Host) -> Result<Value, EvaluationError> {
        self.eval_raw(src, host)
            .map_err(|e| EvaluationError::new(src, e))
    }

    /// [`eval`](Self::eval) without the boundary wrapping, for callers that
    /// wrap a larger unit of work themselves.
    pub fn eval_raw(&mut self, src: &str, host: &mut dyn Host) -> Result<Value, SandboxError> {
        let stmt = parse_stmt(src)?;
        self.exec(&stmt, host)
    }

    /// Replace every unescaped `{expr}` in `text` with its evaluated value.
    pub fn parse_dicecloud(&mut self, text: &str, host: &mut dyn Host) -> Result<String, EvaluationError> {
        expand_braces(text, |expr| self.eval_raw(expr, host))
    }

    pub fn exec(&mut self, stmt: &Stmt, host: &mut dyn Host) -> Result<Value, SandboxError> {
        match stmt {
            Stmt::Expr(e) => self.eval_expr(e, host),
            Stmt::Assign(target, rhs) => {
                let value = self.eval_expr(rhs, host)?;
                self.assign(target, value, host)?;
                Ok(Value::None)
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, SandboxError> {
        self.names
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::UndefinedName(name.to_owned()))
    }

    pub fn eval_expr(&mut self, expr: &Expr, host: &mut dyn Host) -> Result<Value, SandboxError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),

            Expr::Name(name) => self.lookup(name),

            Expr::Unary(op, inner) => {
                let v = self.eval_expr(inner, host)?;
                match op {
                    UnaryOp::Neg => v.neg(),
                    UnaryOp::Pos => v.pos(),
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                }
            }

            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval_expr(lhs, host)?;
                let r = self.eval_expr(rhs, host)?;
                self.binop(*op, &l, &r)
            }

            Expr::Bool(op, lhs, rhs) => {
                let l = self.eval_expr(lhs, host)?;
                match (op, l.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => Ok(l),
                    _ => self.eval_expr(rhs, host),
                }
            }

            Expr::Compare(first, chain) => {
                let mut left = self.eval_expr(first, host)?;
                for (op, rhs) in chain {
                    let right = self.eval_expr(rhs, host)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }

            Expr::Call { func, args, kwargs } => {
                let mut argv = Vec::with_capacity(args.len());
                for a in args {
                    argv.push(self.eval_expr(a, host)?);
                }
                let mut kwv = Vec::with_capacity(kwargs.len());
                for (k, e) in kwargs {
                    kwv.push((k.clone(), self.eval_expr(e, host)?));
                }
                self.call(func, &argv, &kwv, host)
            }

            Expr::Subscript(container, index) => {
                let c = self.eval_expr(container, host)?;
                match index.as_ref() {
                    Index::Item(key) => {
                        let k = self.eval_expr(key, host)?;
                        c.get_item(&k)
                    }
                    Index::Slice { lower, upper, step } => {
                        let lower = self.slice_bound(lower.as_ref(), host)?;
                        let upper = self.slice_bound(upper.as_ref(), host)?;
                        let step = self.slice_bound(step.as_ref(), host)?;
                        c.slice(lower, upper, step)
                    }
                }
            }

            Expr::IfElse { cond, then, otherwise } => {
                if self.eval_expr(cond, host)?.truthy() {
                    self.eval_expr(then, host)
                } else {
                    self.eval_expr(otherwise, host)
                }
            }

            Expr::List(items) => Ok(Value::List(self.eval_all(items, host)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, host)?)),
            Expr::Set(items) => {
                let items = self.eval_all(items, host)?;
                Value::set_from(items)
            }
            Expr::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let k = self.eval_expr(k, host)?;
                    let v = self.eval_expr(v, host)?;
                    out.push((k, v));
                }
                Value::dict_from(out)
            }

            Expr::Comprehension(kind, generators) => {
                let mut acc = match kind {
                    CompKind::Dict(..) => Acc::Pairs(Vec::new()),
                    _ => Acc::Items(Vec::new()),
                };
                self.comprehension(kind, generators, &mut acc, host)?;
                match (kind, acc) {
                    (CompKind::List(_), Acc::Items(v)) => Ok(Value::List(v)),
                    (CompKind::Set(_), Acc::Items(v)) => Value::set_from(v),
                    (_, Acc::Pairs(p)) => Value::dict_from(p),
                    (_, Acc::Items(v)) => Ok(Value::List(v)),
                }
            }

            Expr::FString(parts) => Ok(Value::Str(self.render_fstring(parts, host)?)),
        }
    }

    fn eval_all(&mut self, items: &[Expr], host: &mut dyn Host) -> Result<Vec<Value>, SandboxError> {
        let mut out = Vec::with_capacity(items.len());
        for e in items {
            out.push(self.eval_expr(e, host)?);
        }
        Ok(out)
    }

    fn slice_bound(&mut self, e: Option<&Expr>, host: &mut dyn Host) -> Result<Option<i64>, SandboxError> {
        let Some(e) = e else { return Ok(None) };
        match self.eval_expr(e, host)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                SandboxError::TypeMismatch(format!(
                    "slice indices must be integers or None, not {}",
                    v.type_name()
                ))
            }),
        }
    }

    fn binop(&self, op: BinOp, l: &Value, r: &Value) -> Result<Value, SandboxError> {
        match op {
            BinOp::Add => l.add(r, self.limits.max_string_length),
            BinOp::Sub => l.sub(r),
            BinOp::Mul => l.mul(r, self.limits.max_string_length),
            BinOp::Div => l.div(r),
            BinOp::FloorDiv => l.floor_div(r),
            BinOp::Mod => l.rem(r),
            BinOp::Pow => l.pow(r, self.limits.max_power),
        }
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    fn call(
        &mut self,
        func: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        host: &mut dyn Host,
    ) -> Result<Value, SandboxError> {
        match func {
            "set" => {
                let name = arg(args, kwargs, 0, "name", func)?.to_string();
                let value = arg(args, kwargs, 1, "value", func)?.clone();
                self.names.set(name, value);
                return Ok(Value::None);
            }
            "exists" => {
                let name = arg(args, kwargs, 0, "name", func)?.to_string();
                return Ok(Value::Bool(self.names.contains(&name)));
            }
            "get" => {
                let name = arg(args, kwargs, 0, "name", func)?.to_string();
                let default = opt_arg(args, kwargs, 1, "default").cloned().unwrap_or_default();
                return Ok(self.names.get(&name).cloned().unwrap_or(default));
            }
            _ => {}
        }
        if let Some(result) = builtins::call_builtin(func, args, kwargs, &self.limits) {
            return result;
        }
        if let Some(result) = host.call(func, args, kwargs, &mut self.names) {
            return result;
        }
        Err(SandboxError::UnknownFunction(func.to_owned()))
    }

    // ── Assignment ────────────────────────────────────────────────────────────

    fn assign(&mut self, target: &Target, value: Value, host: &mut dyn Host) -> Result<(), SandboxError> {
        match target {
            Target::Name(name) => {
                self.names.set(name.clone(), value);
                Ok(())
            }
            Target::Unpack(names) => {
                let values = match value {
                    Value::Tuple(v) | Value::List(v) => v,
                    _ => {
                        return Err(SandboxError::UnpackArityMismatch {
                            names: names.len(),
                            values: 1,
                        })
                    }
                };
                if values.len() != names.len() {
                    return Err(SandboxError::UnpackArityMismatch {
                        names: names.len(),
                        values: values.len(),
                    });
                }
                for (name, v) in names.iter().zip(values) {
                    self.names.set(name.clone(), v);
                }
                Ok(())
            }
            Target::Subscript(base, key) => {
                let mut container = self.target_value(base, host)?;
                let key = self.eval_expr(key, host)?;
                container.set_item(key, value)?;
                self.assign(base, container, host)
            }
        }
    }

    /// Current value held by an assignable target.
    fn target_value(&mut self, target: &Target, host: &mut dyn Host) -> Result<Value, SandboxError> {
        match target {
            Target::Name(name) => self.lookup(name),
            Target::Subscript(base, key) => {
                let container = self.target_value(base, host)?;
                let key = self.eval_expr(key, host)?;
                container.get_item(&key)
            }
            Target::Unpack(_) => Err(SandboxError::UnknownAssignmentTarget(
                "subscript of a tuple".into(),
            )),
        }
    }

    // ── Comprehensions ────────────────────────────────────────────────────────

    /// Walk the generators left to right.  Each generator charges its full
    /// iterable length against the budget before its first iteration.
    fn comprehension(
        &mut self,
        kind: &CompKind,
        generators: &[Generator],
        acc: &mut Acc,
        host: &mut dyn Host,
    ) -> Result<(), SandboxError> {
        let Some((gen, rest)) = generators.split_first() else {
            match (kind, acc) {
                (CompKind::Dict(k, v), Acc::Pairs(pairs)) => {
                    let k = self.eval_expr(k, host)?;
                    let v = self.eval_expr(v, host)?;
                    pairs.push((k, v));
                }
                (CompKind::List(elt) | CompKind::Set(elt), Acc::Items(items)) => {
                    items.push(self.eval_expr(elt, host)?);
                }
                _ => {}
            }
            return Ok(());
        };

        let items = self.eval_expr(&gen.iter, host)?.iter_values()?;
        if self.loops + items.len() > self.limits.max_iterations {
            return Err(SandboxError::IterationBudgetExceeded {
                used: self.loops,
                requested: items.len(),
                limit: self.limits.max_iterations,
            });
        }
        self.loops += items.len();

        'items: for item in items {
            self.assign(&gen.target, item, host)?;
            for cond in &gen.ifs {
                if !self.eval_expr(cond, host)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(kind, rest, acc, host)?;
        }
        Ok(())
    }

    // ── f-strings ─────────────────────────────────────────────────────────────

    fn render_fstring(&mut self, parts: &[FPart], host: &mut dyn Host) -> Result<String, SandboxError> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Text(t) => out.push_str(t),
                FPart::Field { expr, conversion, spec } => {
                    let mut v = self.eval_expr(expr, host)?;
                    v = match conversion {
                        Some('r' | 'a') => Value::Str(v.repr()),
                        Some(_) => Value::Str(v.to_string()),
                        None => v,
                    };
                    let spec = match spec {
                        Some(spec) => self.render_fstring(spec, host)?,
                        None => String::new(),
                    };
                    out.push_str(&format_value(&v, &spec, self.limits.max_string_length)?);
                }
            }
            if out.len() > self.limits.max_string_length {
                return Err(SandboxError::ValueTooLarge("f-string result".into()));
            }
        }
        Ok(out)
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, SandboxError> {
    Ok(match op {
        CmpOp::Eq => l.py_eq(r),
        CmpOp::Ne => !l.py_eq(r),
        CmpOp::Lt => l.py_cmp(r)? == Ordering::Less,
        CmpOp::Le => l.py_cmp(r)? != Ordering::Greater,
        CmpOp::Gt => l.py_cmp(r)? == Ordering::Greater,
        CmpOp::Ge => l.py_cmp(r)? != Ordering::Less,
        CmpOp::In => r.contains(l)?,
        CmpOp::NotIn => !r.contains(l)?,
        CmpOp::Is => l.type_name() == r.type_name() && l.py_eq(r),
        CmpOp::IsNot => !(l.type_name() == r.type_name() && l.py_eq(r)),
    })
}

// ── Format specs ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    ty: Option<char>,
}

fn parse_spec(spec: &str) -> Result<FormatSpec, SandboxError> {
    let bad = || SandboxError::bad_arg("format", format!("invalid format specifier '{spec}'"));
    let chars: Vec<char> = spec.chars().collect();
    let mut fs = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        fs.fill = Some(chars[0]);
        fs.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        fs.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        fs.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        fs.zero = true;
        i += 1;
    }
    let digits = |i: &mut usize| -> Option<usize> {
        let start = *i;
        while chars.get(*i).is_some_and(char::is_ascii_digit) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>().parse().ok()
    };
    fs.width = digits(&mut i).unwrap_or(0);
    if matches!(chars.get(i), Some(',' | '_')) {
        fs.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        fs.precision = Some(digits(&mut i).ok_or_else(bad)?);
    }
    if let Some(&c) = chars.get(i) {
        fs.ty = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(bad());
    }
    Ok(fs)
}

fn group_thousands(digits: &str) -> String {
    let (int_part, frac) = match digits.find('.') {
        Some(p) => digits.split_at(p),
        None => (digits, ""),
    };
    let mut out = String::new();
    for (n, c) in int_part.chars().enumerate() {
        if n > 0 && (int_part.len() - n) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str(frac);
    out
}

fn exp_notation(x: f64, precision: usize) -> String {
    let s = format!("{x:.precision$e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s,
    }
}

fn general_notation(x: f64, precision: usize) -> String {
    let p = precision.max(1);
    if x == 0.0 {
        return "0".into();
    }
    let exp = x.abs().log10().floor() as i64;
    if exp < -4 || exp >= p as i64 {
        exp_notation(x, p - 1)
    } else {
        let decimals = (p as i64 - 1 - exp).max(0) as usize;
        let s = format!("{x:.decimals$}");
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_owned()
        } else {
            s
        }
    }
}

/// Render `v` according to a format-spec mini-language string.
pub fn format_value(v: &Value, spec: &str, max_len: usize) -> Result<String, SandboxError> {
    if spec.is_empty() {
        return Ok(v.to_string());
    }
    let fs = parse_spec(spec)?;
    if fs.width > max_len {
        return Err(SandboxError::ValueTooLarge(format!("format width {}", fs.width)));
    }
    let unsupported = || {
        SandboxError::TypeMismatch(format!(
            "unsupported format string '{spec}' for {}",
            v.type_name()
        ))
    };

    let numeric = v.as_float().is_some() && !matches!(fs.ty, Some('s'));
    let (negative, body) = if numeric {
        let x = v.as_float().unwrap_or(0.0);
        let int = v.as_int();
        let body = match (fs.ty, int) {
            (None | Some('d'), Some(n)) if fs.precision.is_none() || fs.ty.is_some() => n.unsigned_abs().to_string(),
            (Some('d'), None) => return Err(unsupported()),
            (Some('x'), Some(n)) => format!("{:x}", n.unsigned_abs()),
            (Some('X'), Some(n)) => format!("{:X}", n.unsigned_abs()),
            (Some('o'), Some(n)) => format!("{:o}", n.unsigned_abs()),
            (Some('b'), Some(n)) => format!("{:b}", n.unsigned_abs()),
            (Some('f' | 'F'), _) => format!("{:.*}", fs.precision.unwrap_or(6), x.abs()),
            (Some('e'), _) => exp_notation(x.abs(), fs.precision.unwrap_or(6)),
            (Some('%'), _) => format!("{:.*}%", fs.precision.unwrap_or(6), x.abs() * 100.0),
            (Some('g'), _) => general_notation(x.abs(), fs.precision.unwrap_or(6)),
            (None, _) => match fs.precision {
                Some(p) => general_notation(x.abs(), p),
                None => Value::Float(x.abs()).to_string(),
            },
            _ => return Err(unsupported()),
        };
        (x.is_sign_negative() && x != 0.0, body)
    } else {
        match (v, fs.ty) {
            (Value::Str(_), None | Some('s')) | (_, Some('s')) => {
                let s = v.to_string();
                let s = match fs.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                };
                (false, s)
            }
            _ => return Err(unsupported()),
        }
    };

    let body = if fs.grouping { group_thousands(&body) } else { body };
    let sign = match (negative, fs.sign) {
        (true, _) => "-",
        (false, Some('+')) if numeric => "+",
        (false, Some(' ')) if numeric => " ",
        _ => "",
    };

    let len = sign.chars().count() + body.chars().count();
    let pad = fs.width.saturating_sub(len);
    let (fill, align) = match (fs.fill, fs.align) {
        (f, Some(a)) => (f.unwrap_or(' '), a),
        (_, None) if fs.zero && numeric => ('0', '='),
        (_, None) if numeric => (' ', '>'),
        _ => (' ', '<'),
    };
    let padding = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(match align {
        '<' => format!("{sign}{body}{}", padding(pad)),
        '^' => format!("{}{sign}{body}{}", padding(pad / 2), padding(pad - pad / 2)),
        '=' => format!("{sign}{}{body}", padding(pad)),
        _ => format!("{}{sign}{body}", padding(pad)),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str) -> Value {
        Evaluator::new().eval(src, &mut NoHost).expect("eval failed")
    }

    fn eval_err(src: &str) -> SandboxError {
        Evaluator::new()
            .eval(src, &mut NoHost)
            .expect_err("expected failure")
            .source
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("2 + 3 * 4"), Value::Int(14));
        assert_eq!(eval("7 // 2"), Value::Int(3));
        assert_eq!(eval("7 / 2"), Value::Float(3.5));
        assert_eq!(eval("-7 % 3"), Value::Int(2));
        assert_eq!(eval("-2 ** 2"), Value::Int(-4));
        assert_eq!(eval("2 ** -1"), Value::Float(0.5));
    }

    #[test]
    fn boolean_ops_return_operands() {
        assert_eq!(eval("0 or 'x'"), Value::str("x"));
        assert_eq!(eval("'' and 1"), Value::str(""));
        assert_eq!(eval("not []"), Value::Bool(true));
    }

    #[test]
    fn chained_comparison() {
        assert_eq!(eval("1 < 2 < 3"), Value::Bool(true));
        assert_eq!(eval("1 < 3 < 2"), Value::Bool(false));
        assert_eq!(eval("'a' in 'cat'"), Value::Bool(true));
        assert_eq!(eval("3 not in [1, 2]"), Value::Bool(true));
        assert_eq!(eval("None is None"), Value::Bool(true));
    }

    #[test]
    fn conditional() {
        assert_eq!(eval("'yes' if 1 > 0 else 'no'"), Value::str("yes"));
    }

    #[test]
    fn assignment_yields_none_and_binds() {
        let mut ev = Evaluator::new();
        assert_eq!(ev.eval("x = 5", &mut NoHost), Ok(Value::None));
        assert_eq!(ev.eval("x * 2", &mut NoHost), Ok(Value::Int(10)));
    }

    #[test]
    fn tuple_unpack() {
        let mut ev = Evaluator::new();
        ev.eval("a, b = 1, 2", &mut NoHost).unwrap();
        assert_eq!(ev.names.get("a"), Some(&Value::Int(1)));
        assert_eq!(ev.names.get("b"), Some(&Value::Int(2)));
        let err = ev.eval("(a, b) = (1, 2, 3)", &mut NoHost).unwrap_err();
        assert_eq!(err.source, SandboxError::UnpackArityMismatch { names: 2, values: 3 });
    }

    #[test]
    fn unpack_scalar_is_arity_error() {
        assert_eq!(
            eval_err("a, b = 1"),
            SandboxError::UnpackArityMismatch { names: 2, values: 1 }
        );
    }

    #[test]
    fn subscript_assignment_writes_back() {
        let mut ev = Evaluator::new();
        ev.eval("d = {'a': [1, 2]}", &mut NoHost).unwrap();
        ev.eval("d['a'][1] = 9", &mut NoHost).unwrap();
        ev.eval("d['b'] = 'new'", &mut NoHost).unwrap();
        assert_eq!(ev.eval("d", &mut NoHost).unwrap().repr(), "{'a': [1, 9], 'b': 'new'}");
    }

    #[test]
    fn undefined_name() {
        assert_eq!(eval_err("nope + 1"), SandboxError::UndefinedName("nope".into()));
    }

    #[test]
    fn unknown_function() {
        assert_eq!(eval_err("open('x')"), SandboxError::UnknownFunction("open".into()));
    }

    #[test]
    fn scope_functions() {
        let mut ev = Evaluator::new();
        ev.eval("set('hp', 12)", &mut NoHost).unwrap();
        assert_eq!(ev.eval("exists('hp')", &mut NoHost), Ok(Value::Bool(true)));
        assert_eq!(ev.eval("get('hp')", &mut NoHost), Ok(Value::Int(12)));
        assert_eq!(ev.eval("get('mp', 3)", &mut NoHost), Ok(Value::Int(3)));
        assert_eq!(ev.eval("get('mp')", &mut NoHost), Ok(Value::None));
    }

    #[test]
    fn comprehensions() {
        assert_eq!(eval("[x * 2 for x in [1, 2, 3] if x != 2]").repr(), "[2, 6]");
        assert_eq!(eval("{x % 2 for x in [1, 2, 3]}").repr(), "{1, 0}");
        assert_eq!(eval("{k: v for k, v in [('a', 1), ('b', 2)]}").repr(), "{'a': 1, 'b': 2}");
        assert_eq!(eval("[(x, y) for x in 'ab' for y in [1, 2] if y > 1]").repr(), "[('a', 2), ('b', 2)]");
    }

    #[test]
    fn comprehension_variable_leaks_into_scope() {
        let mut ev = Evaluator::new();
        ev.eval("[i for i in [4, 5]]", &mut NoHost).unwrap();
        assert_eq!(ev.names.get("i"), Some(&Value::Int(5)));
    }

    #[test]
    fn iteration_budget_is_cumulative() {
        let mut ev = Evaluator::with_limits(Limits {
            max_iterations: 10,
            ..Limits::default()
        });
        ev.eval("[x for x in range(6)]", &mut NoHost).unwrap();
        assert_eq!(ev.loops(), 6);
        ev.eval("[x for x in range(4)]", &mut NoHost).unwrap();
        let err = ev.eval("[x for x in [1]]", &mut NoHost).unwrap_err();
        assert!(matches!(
            err.source,
            SandboxError::IterationBudgetExceeded { used: 10, requested: 1, limit: 10 }
        ));
    }

    #[test]
    fn budget_charged_per_inner_generator_run() {
        let mut ev = Evaluator::with_limits(Limits {
            max_iterations: 8,
            ..Limits::default()
        });
        // outer 2 + inner 3 twice = 8
        ev.eval("[(a, b) for a in [1, 2] for b in [1, 2, 3]]", &mut NoHost).unwrap();
        assert_eq!(ev.loops(), 8);
    }

    #[test]
    fn fstrings() {
        let mut ev = Evaluator::new();
        ev.eval("n = 'Bob'", &mut NoHost).unwrap();
        ev.eval("w = 6", &mut NoHost).unwrap();
        assert_eq!(ev.eval("f'hi {n}!'", &mut NoHost), Ok(Value::str("hi Bob!")));
        assert_eq!(ev.eval("f'{n!r}'", &mut NoHost), Ok(Value::str("'Bob'")));
        assert_eq!(ev.eval("f'[{n:>{w}}]'", &mut NoHost), Ok(Value::str("[   Bob]")));
        assert_eq!(ev.eval("f'{3.14159:.2f}'", &mut NoHost), Ok(Value::str("3.14")));
        assert_eq!(ev.eval("f'{{literal}}'", &mut NoHost), Ok(Value::str("{literal}")));
    }

    #[test]
    fn format_specs() {
        let max = 1000;
        assert_eq!(format_value(&Value::Int(5), "+d", max), Ok("+5".into()));
        assert_eq!(format_value(&Value::Int(42), "05", max), Ok("00042".into()));
        assert_eq!(format_value(&Value::Int(1234567), ",", max), Ok("1,234,567".into()));
        assert_eq!(format_value(&Value::Float(0.25), ".0%", max), Ok("25%".into()));
        assert_eq!(format_value(&Value::str("ab"), "*^6", max), Ok("**ab**".into()));
        assert_eq!(format_value(&Value::Int(-3), "4", max), Ok("  -3".into()));
        assert_eq!(format_value(&Value::Int(255), "x", max), Ok("ff".into()));
        assert!(format_value(&Value::List(vec![]), "d", max).is_err());
        assert!(matches!(
            format_value(&Value::Int(1), "5000", max),
            Err(SandboxError::ValueTooLarge(_))
        ));
    }

    #[test]
    fn eval_is_repeatable() {
        let mut ev = Evaluator::new();
        ev.names.set("x", 3i64);
        let a = ev.eval("[x * i for i in [1, 2]]", &mut NoHost).unwrap();
        let b = ev.eval("[x * i for i in [1, 2]]", &mut NoHost).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dicecloud_braces() {
        let mut ev = Evaluator::new();
        ev.names.set("wisdomMod", 3i64);
        assert_eq!(
            ev.parse_dicecloud("DC {8 + wisdomMod + 2}, \\{kept}", &mut NoHost),
            Ok("DC 13, \\{kept}".to_owned())
        );
        let err = ev.parse_dicecloud("{nope}", &mut NoHost).unwrap_err();
        assert_eq!(err.text, "nope");
    }
}
