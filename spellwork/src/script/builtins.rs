//! Pure built-in functions of the sandbox.
//!
//! Each function receives already-evaluated positional and keyword
//! arguments.  The dispatcher is called from the evaluator after the scope
//! functions and before any host functions.

use std::cmp::Ordering;

use super::error::SandboxError;
use super::eval::Limits;
use super::value::Value;

/// Dispatch a built-in function call.
///
/// Returns `None` if `name` is not a builtin (caller should then try the
/// host's functions or report an unknown function).
pub fn call_builtin(
    name: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    limits: &Limits,
) -> Option<Result<Value, SandboxError>> {
    // Ok(None) means "not a builtin"; `.transpose()` turns that into None.
    fn inner(
        name: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
        limits: &Limits,
    ) -> Result<Option<Value>, SandboxError> {
        Ok(Some(match name {
            // ── Math ─────────────────────────────────────────────────────────
            "abs" => match arg(args, kwargs, 0, "x", name)? {
                Value::Float(x) => Value::Float(x.abs()),
                v => {
                    let n = get_int(args, 0, name)?;
                    n.checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| SandboxError::ValueTooLarge(format!("abs({v})")))?
                }
            },
            "ceil" => Value::Int(to_int_checked(get_float(args, 0, name)?.ceil(), name)?),
            "floor" => Value::Int(to_int_checked(get_float(args, 0, name)?.floor(), name)?),
            "round" => {
                let x = arg(args, kwargs, 0, "number", name)?;
                match opt_arg(args, kwargs, 1, "ndigits") {
                    None | Some(Value::None) => match x {
                        Value::Float(f) => Value::Int(to_int_checked(round_half_even(*f), name)?),
                        _ => Value::Int(get_int(args, 0, name)?),
                    },
                    Some(nd) => {
                        let nd = nd.as_int().ok_or_else(|| {
                            SandboxError::bad_arg(name, "ndigits must be an integer")
                        })?;
                        match x {
                            Value::Float(f) => {
                                let scale = 10f64.powi(nd.clamp(-308, 308) as i32);
                                Value::Float(round_half_even(f * scale) / scale)
                            }
                            _ => Value::Int(get_int(args, 0, name)?),
                        }
                    }
                }
            }
            "sqrt" => {
                let x = get_float(args, 0, name)?;
                if x < 0.0 {
                    return Err(SandboxError::bad_arg(name, "math domain error"));
                }
                Value::Float(x.sqrt())
            }
            "max" | "min" => {
                let items = match args {
                    [single] => single.iter_values()?,
                    many => many.to_vec(),
                };
                let want = if name == "max" { Ordering::Greater } else { Ordering::Less };
                let mut best: Option<Value> = None;
                for item in items {
                    best = Some(match best {
                        Some(b) if item.py_cmp(&b)? != want => b,
                        _ => item,
                    });
                }
                best.ok_or_else(|| SandboxError::bad_arg(name, "arg is an empty sequence"))?
            }
            "sum" => {
                let items = arg(args, kwargs, 0, "iterable", name)?.iter_values()?;
                let mut total = opt_arg(args, kwargs, 1, "start").cloned().unwrap_or(Value::Int(0));
                for item in &items {
                    total = total.add(item, limits.max_string_length)?;
                }
                total
            }

            // ── Conversions ──────────────────────────────────────────────────
            "int" => match opt_arg(args, kwargs, 0, "x") {
                None => Value::Int(0),
                Some(Value::Str(s)) => Value::Int(s.trim().parse::<i64>().map_err(|_| {
                    SandboxError::bad_arg(
                        name,
                        format!("invalid literal for int() with base 10: {}", Value::str(s.as_str()).repr()),
                    )
                })?),
                Some(Value::Float(f)) => Value::Int(to_int_checked(f.trunc(), name)?),
                Some(v) => Value::Int(v.as_int().ok_or_else(|| {
                    SandboxError::TypeMismatch(format!(
                        "int() argument must be a string or a number, not '{}'",
                        v.type_name()
                    ))
                })?),
            },
            "float" => match opt_arg(args, kwargs, 0, "x") {
                None => Value::Float(0.0),
                Some(Value::Str(s)) => Value::Float(s.trim().parse::<f64>().map_err(|_| {
                    SandboxError::bad_arg(
                        name,
                        format!("could not convert string to float: {}", Value::str(s.as_str()).repr()),
                    )
                })?),
                Some(v) => Value::Float(v.as_float().ok_or_else(|| {
                    SandboxError::TypeMismatch(format!(
                        "float() argument must be a string or a number, not '{}'",
                        v.type_name()
                    ))
                })?),
            },
            "str" => Value::Str(opt_arg(args, kwargs, 0, "object").map(Value::to_string).unwrap_or_default()),
            "bool" => Value::Bool(opt_arg(args, kwargs, 0, "x").is_some_and(Value::truthy)),
            "list" => Value::List(match opt_arg(args, kwargs, 0, "iterable") {
                Some(v) => v.iter_values()?,
                None => Vec::new(),
            }),
            "typeof" => Value::str(arg(args, kwargs, 0, "inst", name)?.type_name()),

            // ── Sequences ────────────────────────────────────────────────────
            "len" => Value::Int(arg(args, kwargs, 0, "obj", name)?.len()? as i64),
            "range" => {
                let (start, stop, step) = match args.len() {
                    0 => return Err(SandboxError::bad_arg(name, "expected at least 1 argument")),
                    1 => (0, get_int(args, 0, name)?, 1),
                    2 => (get_int(args, 0, name)?, get_int(args, 1, name)?, 1),
                    _ => (get_int(args, 0, name)?, get_int(args, 1, name)?, get_int(args, 2, name)?),
                };
                if step == 0 {
                    return Err(SandboxError::bad_arg(name, "arg 3 must not be zero"));
                }
                let span = if step > 0 { stop.saturating_sub(start) } else { start.saturating_sub(stop) };
                let count = if span <= 0 { 0 } else { (span - 1) / step.saturating_abs() + 1 };
                if count as u64 > limits.max_iterations as u64 {
                    return Err(SandboxError::IterationBudgetExceeded {
                        used: 0,
                        requested: usize::try_from(count).unwrap_or(usize::MAX),
                        limit: limits.max_iterations,
                    });
                }
                Value::List((0..count).map(|i| Value::Int(start + i * step)).collect())
            }
            "sorted" => {
                let mut items = arg(args, kwargs, 0, "iterable", name)?.iter_values()?;
                let reverse = opt_arg(args, kwargs, 1, "reverse").is_some_and(Value::truthy);
                let mut failure = None;
                items.sort_by(|a, b| {
                    a.py_cmp(b).unwrap_or_else(|e| {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    })
                });
                if let Some(e) = failure {
                    return Err(e);
                }
                if reverse {
                    items.reverse();
                }
                Value::List(items)
            }

            // ── Control ──────────────────────────────────────────────────────
            "err" => {
                let msg = arg(args, kwargs, 0, "reason", name)?.to_string();
                return Err(SandboxError::Raised(msg));
            }

            _ => return Ok(None),
        }))
    }

    inner(name, args, kwargs, limits).transpose()
}

/// Round to nearest, ties to even.
fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

fn to_int_checked(x: f64, name: &str) -> Result<i64, SandboxError> {
    if x.is_finite() && x.abs() < 9.2e18 {
        Ok(x as i64)
    } else {
        Err(SandboxError::bad_arg(name, format!("cannot convert {x} to integer")))
    }
}

// ── Argument accessors ────────────────────────────────────────────────────────

/// Positional argument `idx`, or keyword `kw`.
pub(crate) fn opt_arg<'a>(
    args: &'a [Value],
    kwargs: &'a [(String, Value)],
    idx: usize,
    kw: &str,
) -> Option<&'a Value> {
    args.get(idx)
        .or_else(|| kwargs.iter().find(|(k, _)| k == kw).map(|(_, v)| v))
}

pub(crate) fn arg<'a>(
    args: &'a [Value],
    kwargs: &'a [(String, Value)],
    idx: usize,
    kw: &str,
    name: &str,
) -> Result<&'a Value, SandboxError> {
    opt_arg(args, kwargs, idx, kw)
        .ok_or_else(|| SandboxError::bad_arg(name, format!("missing required argument '{kw}'")))
}

pub(crate) fn get_int(args: &[Value], idx: usize, name: &str) -> Result<i64, SandboxError> {
    match args.get(idx) {
        Some(v) => v.as_int().ok_or_else(|| {
            SandboxError::TypeMismatch(format!(
                "{name}() argument {} must be int, not {}",
                idx + 1,
                v.type_name()
            ))
        }),
        None => Err(SandboxError::bad_arg(name, format!("argument {} missing", idx + 1))),
    }
}

pub(crate) fn get_float(args: &[Value], idx: usize, name: &str) -> Result<f64, SandboxError> {
    match args.get(idx) {
        Some(v) => v.as_float().ok_or_else(|| {
            SandboxError::TypeMismatch(format!(
                "must be real number, not {}",
                v.type_name()
            ))
        }),
        None => Err(SandboxError::bad_arg(name, format!("argument {} missing", idx + 1))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Value {
        call_builtin(name, &args, &[], &Limits::default())
            .expect("not a builtin")
            .expect("call failed")
    }

    fn call_err(name: &str, args: Vec<Value>) -> SandboxError {
        call_builtin(name, &args, &[], &Limits::default())
            .expect("not a builtin")
            .expect_err("call succeeded")
    }

    #[test]
    fn abs_int_and_float() {
        assert_eq!(call("abs", vec![Value::Int(-4)]), Value::Int(4));
        assert_eq!(call("abs", vec![Value::Float(-1.5)]), Value::Float(1.5));
    }

    #[test]
    fn ceil_floor() {
        assert_eq!(call("ceil", vec![Value::Float(1.2)]), Value::Int(2));
        assert_eq!(call("floor", vec![Value::Float(-1.2)]), Value::Int(-2));
        assert_eq!(call("floor", vec![Value::Int(7)]), Value::Int(7));
    }

    #[test]
    fn round_ties_to_even() {
        assert_eq!(call("round", vec![Value::Float(2.5)]), Value::Int(2));
        assert_eq!(call("round", vec![Value::Float(3.5)]), Value::Int(4));
        assert_eq!(call("round", vec![Value::Float(-0.4)]), Value::Int(0));
        assert_eq!(call("round", vec![Value::Float(1.2345), Value::Int(2)]), Value::Float(1.23));
    }

    #[test]
    fn sqrt_domain() {
        assert_eq!(call("sqrt", vec![Value::Int(9)]), Value::Float(3.0));
        assert!(matches!(call_err("sqrt", vec![Value::Int(-1)]), SandboxError::BadArgument { .. }));
    }

    #[test]
    fn max_min_varargs_and_iterable() {
        assert_eq!(call("max", vec![Value::Int(1), Value::Int(5), Value::Int(3)]), Value::Int(5));
        assert_eq!(
            call("min", vec![Value::List(vec![Value::Int(4), Value::Float(2.5)])]),
            Value::Float(2.5)
        );
        assert!(matches!(call_err("max", vec![Value::List(vec![])]), SandboxError::BadArgument { .. }));
    }

    #[test]
    fn sum_with_start() {
        let l = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(call("sum", vec![l.clone()]), Value::Int(3));
        assert_eq!(call("sum", vec![l, Value::Int(10)]), Value::Int(13));
    }

    #[test]
    fn conversions() {
        assert_eq!(call("int", vec![Value::str(" 42 ")]), Value::Int(42));
        assert_eq!(call("int", vec![Value::Float(-3.9)]), Value::Int(-3));
        assert_eq!(call("float", vec![Value::str("1.5")]), Value::Float(1.5));
        assert_eq!(call("str", vec![Value::None]), Value::str("None"));
        assert_eq!(call("bool", vec![Value::str("")]), Value::Bool(false));
        assert!(matches!(call_err("int", vec![Value::str("abc")]), SandboxError::BadArgument { .. }));
    }

    #[test]
    fn typeof_names() {
        assert_eq!(call("typeof", vec![Value::Int(1)]), Value::str("int"));
        assert_eq!(call("typeof", vec![Value::Dict(vec![])]), Value::str("dict"));
    }

    #[test]
    fn range_forms() {
        assert_eq!(call("range", vec![Value::Int(3)]).repr(), "[0, 1, 2]");
        assert_eq!(call("range", vec![Value::Int(1), Value::Int(4)]).repr(), "[1, 2, 3]");
        assert_eq!(call("range", vec![Value::Int(5), Value::Int(0), Value::Int(-2)]).repr(), "[5, 3, 1]");
        assert_eq!(call("range", vec![Value::Int(3), Value::Int(1)]).repr(), "[]");
    }

    #[test]
    fn range_is_capped() {
        let err = call_err("range", vec![Value::Int(1_000_000)]);
        assert!(matches!(err, SandboxError::IterationBudgetExceeded { requested: 1_000_000, .. }));
    }

    #[test]
    fn sorted_with_reverse_kwarg() {
        let l = Value::List(vec![Value::Int(2), Value::Int(9), Value::Int(1)]);
        let kw = vec![("reverse".to_owned(), Value::Bool(true))];
        let out = call_builtin("sorted", &[l], &kw, &Limits::default()).unwrap().unwrap();
        assert_eq!(out.repr(), "[9, 2, 1]");
    }

    #[test]
    fn sorted_mixed_types_fails() {
        let l = Value::List(vec![Value::Int(2), Value::str("a")]);
        assert!(matches!(call_err("sorted", vec![l]), SandboxError::TypeMismatch(_)));
    }

    #[test]
    fn err_raises_message() {
        assert_eq!(call_err("err", vec![Value::str("nope")]), SandboxError::Raised("nope".into()));
    }

    #[test]
    fn unknown_builtin_returns_none() {
        assert!(call_builtin("open", &[], &[], &Limits::default()).is_none());
    }
}
