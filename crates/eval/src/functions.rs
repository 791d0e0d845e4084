//! Built-in function library.
//!
//! A fixed registry built once on first use. Every function is pure over its
//! already-evaluated arguments. The evaluator only evaluates the branch of
//! `IF` it takes; the other branch reaches the function as null.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use formulary_model::Value;

use crate::error::EvaluationError;

pub type NativeFn = fn(&[Option<Value>]) -> Option<Value>;

/// Declared argument or return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Number,
    Text,
    Boolean,
    List,
    /// Text or list.
    Sequence,
    Any,
}

impl ArgType {
    /// Null is accepted everywhere; each function decides what null means.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ArgType::Number => matches!(value, Value::Number { .. }),
            ArgType::Text => matches!(value, Value::Text { .. }),
            ArgType::Boolean => matches!(value, Value::Boolean { .. }),
            ArgType::List => matches!(value, Value::List { .. }),
            ArgType::Sequence => matches!(value, Value::Text { .. } | Value::List { .. }),
            ArgType::Any => true,
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArgType::Number => "number",
            ArgType::Text => "text",
            ArgType::Boolean => "boolean",
            ArgType::List => "list",
            ArgType::Sequence => "text or list",
            ArgType::Any => "any",
        };
        f.write_str(s)
    }
}

pub struct FunctionDef {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    /// Per-position types; variadic positions repeat the last entry.
    pub arg_types: &'static [ArgType],
    pub returns: ArgType,
    pub call: NativeFn,
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("returns", &self.returns)
            .finish()
    }
}

impl FunctionDef {
    pub fn arg_type(&self, index: usize) -> ArgType {
        self.arg_types
            .get(index)
            .or_else(|| self.arg_types.last())
            .copied()
            .unwrap_or(ArgType::Any)
    }

    pub fn check_arity(&self, count: usize) -> Result<(), EvaluationError> {
        let ok = count >= self.min_args && self.max_args.map_or(true, |max| count <= max);
        if ok {
            return Ok(());
        }
        let expected = match self.max_args {
            Some(max) if max == self.min_args => format!("{}", max),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        };
        Err(EvaluationError::invalid_arguments(format!(
            "{} expects {} argument{}, got {}",
            self.name,
            expected,
            if self.max_args.unwrap_or(self.min_args) == 1 {
                ""
            } else {
                "s"
            },
            count
        )))
    }

    pub fn check_types(&self, args: &[Option<Value>]) -> Result<(), EvaluationError> {
        for (i, arg) in args.iter().enumerate() {
            let Some(value) = arg else { continue };
            let expected = self.arg_type(i);
            if !expected.accepts(value) {
                return Err(EvaluationError::invalid_arguments(format!(
                    "{}: argument {} expects {}, got {}",
                    self.name,
                    i + 1,
                    expected,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Check arity and types, then apply.
    pub fn invoke(&self, args: &[Option<Value>]) -> Result<Option<Value>, EvaluationError> {
        self.check_arity(args.len())?;
        self.check_types(args)?;
        Ok((self.call)(args))
    }
}

// ──────────────────────────────────────────────
// Registry
// ──────────────────────────────────────────────

static REGISTRY: OnceLock<HashMap<&'static str, FunctionDef>> = OnceLock::new();

const LIST: &[ArgType] = &[ArgType::List];
const NUM: &[ArgType] = &[ArgType::Number];
const NUM2: &[ArgType] = &[ArgType::Number, ArgType::Number];
const TEXT: &[ArgType] = &[ArgType::Text];
const TEXT2: &[ArgType] = &[ArgType::Text, ArgType::Text];
const ANY: &[ArgType] = &[ArgType::Any];
const SEQ: &[ArgType] = &[ArgType::Sequence];
const COND: &[ArgType] = &[ArgType::Any, ArgType::Any, ArgType::Any];

fn def(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    arg_types: &'static [ArgType],
    returns: ArgType,
    call: NativeFn,
) -> FunctionDef {
    FunctionDef {
        name,
        min_args,
        max_args,
        arg_types,
        returns,
        call,
    }
}

fn registry() -> &'static HashMap<&'static str, FunctionDef> {
    REGISTRY.get_or_init(|| {
        use ArgType::*;
        [
            def("SUM", 1, Some(1), LIST, Number, sum),
            def("AVG", 1, Some(1), LIST, Number, avg),
            def("MIN", 1, Some(1), LIST, Number, min),
            def("MAX", 1, Some(1), LIST, Number, max),
            def("COUNT", 1, Some(1), LIST, Number, count),
            def("ROUND", 1, Some(2), NUM2, Number, round),
            def("SQRT", 1, Some(1), NUM, Number, sqrt),
            def("ABS", 1, Some(1), NUM, Number, abs),
            def("FLOOR", 1, Some(1), NUM, Number, floor),
            def("CEIL", 1, Some(1), NUM, Number, ceil),
            def("POWER", 2, Some(2), NUM2, Number, power),
            def("CONCAT", 1, None, ANY, Text, concat),
            def("UPPER", 1, Some(1), TEXT, Text, upper),
            def("LOWER", 1, Some(1), TEXT, Text, lower),
            def("TRIM", 1, Some(1), TEXT, Text, trim),
            def("LEN", 1, Some(1), SEQ, Number, len),
            def("CONTAINS", 2, Some(2), TEXT2, Boolean, contains),
            def("IF", 3, Some(3), COND, Any, choose),
            def("COALESCE", 1, None, ANY, Any, coalesce),
        ]
        .into_iter()
        .map(|d| (d.name, d))
        .collect()
    })
}

/// Case-insensitive lookup.
pub fn lookup(name: &str) -> Option<&'static FunctionDef> {
    registry().get(name.to_ascii_uppercase().as_str())
}

/// Registered names, sorted.
pub fn function_names() -> Vec<&'static str> {
    let mut names: Vec<_> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

// ──────────────────────────────────────────────
// Implementations
// ──────────────────────────────────────────────

fn arg(args: &[Option<Value>], i: usize) -> Option<&Value> {
    args.get(i).and_then(Option::as_ref)
}

/// Numeric items of a list argument; non-numbers are skipped, null is empty.
fn numbers(args: &[Option<Value>]) -> Vec<&Value> {
    arg(args, 0)
        .and_then(Value::as_list)
        .map(|items| {
            items
                .iter()
                .filter(|v| matches!(v, Value::Number { .. }))
                .collect()
        })
        .unwrap_or_default()
}

/// A number carrying `like`'s dimension and unit.
fn number_like(value: f64, like: Option<&Value>) -> Value {
    match like {
        Some(Value::Number {
            dimension, unit, ..
        }) => Value::Number {
            value,
            dimension: dimension.clone(),
            unit: unit.clone(),
        },
        _ => Value::number(value),
    }
}

fn map_number(args: &[Option<Value>], f: impl Fn(f64) -> f64) -> Option<Value> {
    let v = arg(args, 0)?;
    let n = v.as_number()?;
    Some(number_like(f(n), Some(v)))
}

fn map_text(args: &[Option<Value>], f: impl Fn(&str) -> String) -> Option<Value> {
    Some(Value::text(f(arg(args, 0)?.as_text()?)))
}

fn sum(args: &[Option<Value>]) -> Option<Value> {
    let items = numbers(args);
    let total = items.iter().filter_map(|v| v.as_number()).sum();
    Some(number_like(total, items.first().copied()))
}

fn avg(args: &[Option<Value>]) -> Option<Value> {
    let items = numbers(args);
    let first = *items.first()?;
    let total: f64 = items.iter().filter_map(|v| v.as_number()).sum();
    Some(number_like(total / items.len() as f64, Some(first)))
}

fn extreme(args: &[Option<Value>], pick: fn(f64, f64) -> f64) -> Option<Value> {
    let items = numbers(args);
    let first = *items.first()?;
    let best = items
        .iter()
        .filter_map(|v| v.as_number())
        .reduce(pick)?;
    Some(number_like(best, Some(first)))
}

fn min(args: &[Option<Value>]) -> Option<Value> {
    extreme(args, f64::min)
}

fn max(args: &[Option<Value>]) -> Option<Value> {
    extreme(args, f64::max)
}

fn count(args: &[Option<Value>]) -> Option<Value> {
    let n = arg(args, 0).and_then(Value::as_list).map_or(0, <[Value]>::len);
    Some(Value::number(n as f64))
}

fn round(args: &[Option<Value>]) -> Option<Value> {
    let v = arg(args, 0)?;
    let n = v.as_number()?;
    let digits = arg(args, 1).and_then(Value::as_number).unwrap_or(0.0).trunc() as i32;
    let rounded = if digits >= 0 {
        let factor = 10f64.powi(digits);
        (n * factor).round() / factor
    } else {
        let factor = 10f64.powi(-digits);
        (n / factor).round() * factor
    };
    rounded.is_finite().then(|| number_like(rounded, Some(v)))
}

fn sqrt(args: &[Option<Value>]) -> Option<Value> {
    let n = arg(args, 0)?.as_number()?;
    (n >= 0.0).then(|| Value::number(n.sqrt()))
}

fn abs(args: &[Option<Value>]) -> Option<Value> {
    map_number(args, f64::abs)
}

fn floor(args: &[Option<Value>]) -> Option<Value> {
    map_number(args, f64::floor)
}

fn ceil(args: &[Option<Value>]) -> Option<Value> {
    map_number(args, f64::ceil)
}

fn power(args: &[Option<Value>]) -> Option<Value> {
    let base = arg(args, 0)?.as_number()?;
    let exp = arg(args, 1)?.as_number()?;
    let r = base.powf(exp);
    r.is_finite().then(|| Value::number(r))
}

fn concat(args: &[Option<Value>]) -> Option<Value> {
    let s: String = args
        .iter()
        .map(|a| match a {
            Some(v) => v.display_text(),
            None => "null".to_string(),
        })
        .collect();
    Some(Value::text(s))
}

fn upper(args: &[Option<Value>]) -> Option<Value> {
    map_text(args, str::to_uppercase)
}

fn lower(args: &[Option<Value>]) -> Option<Value> {
    map_text(args, str::to_lowercase)
}

fn trim(args: &[Option<Value>]) -> Option<Value> {
    map_text(args, |s| s.trim().to_string())
}

fn len(args: &[Option<Value>]) -> Option<Value> {
    let n = match arg(args, 0)? {
        Value::Text { value } => value.chars().count(),
        Value::List { items, .. } => items.len(),
        _ => return None,
    };
    Some(Value::number(n as f64))
}

fn contains(args: &[Option<Value>]) -> Option<Value> {
    let haystack = arg(args, 0)?.as_text()?;
    let needle = arg(args, 1)?.as_text()?;
    Some(Value::boolean(haystack.contains(needle)))
}

fn choose(args: &[Option<Value>]) -> Option<Value> {
    let chosen = if crate::evaluator::is_truthy(args.first().and_then(Option::as_ref)) {
        1
    } else {
        2
    };
    args.get(chosen).cloned().flatten()
}

fn coalesce(args: &[Option<Value>]) -> Option<Value> {
    args.iter().flatten().next().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvaluationErrorKind;

    fn nums(ns: &[f64]) -> Option<Value> {
        Some(Value::list(ns.iter().map(|n| Value::number(*n)).collect()))
    }

    fn call(name: &str, args: &[Option<Value>]) -> Result<Option<Value>, EvaluationError> {
        lookup(name).unwrap().invoke(args)
    }

    #[test]
    fn if_returns_the_branch_its_condition_picks() {
        let yes = Some(Value::text("yes"));
        let no = Some(Value::text("no"));
        assert_eq!(call("IF", &[Some(Value::boolean(true)), yes.clone(), None]).unwrap(), yes);
        assert_eq!(call("IF", &[Some(Value::number(0.0)), None, no.clone()]).unwrap(), no);
        assert_eq!(call("IF", &[None, yes, None]).unwrap(), None);
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(lookup("sum").unwrap().name, "SUM");
        assert_eq!(lookup("Concat").unwrap().name, "CONCAT");
        assert!(lookup("FROB").is_none());
    }

    #[test]
    fn aggregates() {
        assert_eq!(call("SUM", &[nums(&[10.0, 20.0, 30.0])]).unwrap(), Some(Value::number(60.0)));
        assert_eq!(call("SUM", &[nums(&[])]).unwrap(), Some(Value::number(0.0)));
        assert_eq!(call("AVG", &[nums(&[])]).unwrap(), None);
        assert_eq!(call("AVG", &[nums(&[1.0, 2.0])]).unwrap(), Some(Value::number(1.5)));
        assert_eq!(call("MIN", &[nums(&[])]).unwrap(), None);
        assert_eq!(call("COUNT", &[None]).unwrap(), Some(Value::number(0.0)));
    }

    #[test]
    fn aggregates_skip_non_numbers() {
        let mixed = Some(Value::list(vec![
            Value::number(10.0),
            Value::text("x"),
            Value::number(30.0),
        ]));
        assert_eq!(call("MAX", &[mixed.clone()]).unwrap(), Some(Value::number(30.0)));
        assert_eq!(call("COUNT", &[mixed]).unwrap(), Some(Value::number(3.0)));
    }

    #[test]
    fn aggregates_keep_first_unit() {
        let list = Some(Value::list(vec![
            Value::quantity(2.0, "mass", "kg"),
            Value::quantity(3.0, "mass", "kg"),
        ]));
        assert_eq!(
            call("SUM", &[list]).unwrap(),
            Some(Value::quantity(5.0, "mass", "kg"))
        );
    }

    #[test]
    fn rounding() {
        let n = Some(Value::number(2.346));
        assert_eq!(call("ROUND", &[n.clone()]).unwrap(), Some(Value::number(2.0)));
        assert_eq!(
            call("ROUND", &[n, Some(Value::number(2.0))]).unwrap(),
            Some(Value::number(2.35))
        );
        assert_eq!(
            call("ROUND", &[Some(Value::number(1234.0)), Some(Value::number(-2.0))]).unwrap(),
            Some(Value::number(1200.0))
        );
    }

    #[test]
    fn math_edge_cases() {
        assert_eq!(call("SQRT", &[Some(Value::number(-1.0))]).unwrap(), None);
        assert_eq!(call("SQRT", &[Some(Value::number(9.0))]).unwrap(), Some(Value::number(3.0)));
        assert_eq!(
            call("POWER", &[Some(Value::number(10.0)), Some(Value::number(400.0))]).unwrap(),
            None
        );
        assert_eq!(call("ABS", &[Some(Value::number(-4.0))]).unwrap(), Some(Value::number(4.0)));
        assert_eq!(call("CEIL", &[Some(Value::number(1.2))]).unwrap(), Some(Value::number(2.0)));
    }

    #[test]
    fn concat_renders_null_as_word() {
        assert_eq!(call("CONCAT", &[None]).unwrap(), Some(Value::text("null")));
        assert_eq!(
            call("CONCAT", &[Some(Value::text("n=")), Some(Value::number(3.0))]).unwrap(),
            Some(Value::text("n=3"))
        );
    }

    #[test]
    fn text_functions() {
        assert_eq!(call("UPPER", &[Some(Value::text("ab"))]).unwrap(), Some(Value::text("AB")));
        assert_eq!(call("TRIM", &[Some(Value::text("  x "))]).unwrap(), Some(Value::text("x")));
        assert_eq!(call("LEN", &[Some(Value::text("héllo"))]).unwrap(), Some(Value::number(5.0)));
        assert_eq!(
            call("CONTAINS", &[Some(Value::text("bolt-m8")), Some(Value::text("m8"))]).unwrap(),
            Some(Value::boolean(true))
        );
        assert_eq!(call("LOWER", &[None]).unwrap(), None);
    }

    #[test]
    fn coalesce_picks_first_present() {
        assert_eq!(
            call("COALESCE", &[None, Some(Value::number(2.0)), Some(Value::number(3.0))]).unwrap(),
            Some(Value::number(2.0))
        );
        assert_eq!(call("COALESCE", &[None]).unwrap(), None);
    }

    #[test]
    fn arity_errors_share_one_shape() {
        let err = call("ROUND", &[None, None, None]).unwrap_err();
        assert_eq!(err.kind, EvaluationErrorKind::InvalidArguments);
        assert_eq!(err.message, "ROUND expects 1 to 2 arguments, got 3");

        let err = call("SQRT", &[]).unwrap_err();
        assert_eq!(err.message, "SQRT expects 1 argument, got 0");

        let err = call("CONCAT", &[]).unwrap_err();
        assert_eq!(err.message, "CONCAT expects at least 1 argument, got 0");
    }

    #[test]
    fn type_errors_name_position() {
        let err = call("SUM", &[Some(Value::number(1.0))]).unwrap_err();
        assert_eq!(err.kind, EvaluationErrorKind::InvalidArguments);
        assert_eq!(err.message, "SUM: argument 1 expects list, got number");
    }

    #[test]
    fn variadic_types_repeat_last() {
        let def = lookup("CONCAT").unwrap();
        assert_eq!(def.arg_type(7), ArgType::Any);
        assert_eq!(lookup("POWER").unwrap().arg_type(1), ArgType::Number);
    }

    #[test]
    fn registry_is_complete() {
        assert_eq!(function_names().len(), 19);
    }
}
