//! Arithmetic, comparison and equality over runtime values.
//!
//! All arithmetic is `f64`. A result that is not finite is an error and never
//! escapes as a value. Dimension/unit metadata follows these rules:
//!
//! - `+` / `-`: operands must agree on the unit when both carry one; the
//!   result carries the shared (or only) unit.
//! - `*` / `/`: the result keeps a unit only when exactly one operand has one.

use std::cmp::Ordering;

use formulary_core::BinaryOp;
use formulary_model::Value;

use crate::error::{EvaluationError, EvaluationErrorKind};

struct Quantity<'a> {
    value: f64,
    dimension: Option<&'a str>,
    unit: Option<&'a str>,
}

fn quantity(v: &Value) -> Option<Quantity<'_>> {
    match v {
        Value::Number {
            value,
            dimension,
            unit,
        } => Some(Quantity {
            value: *value,
            dimension: dimension.as_deref(),
            unit: unit.as_deref(),
        }),
        _ => None,
    }
}

fn make(value: f64, dimension: Option<&str>, unit: Option<&str>) -> Value {
    Value::Number {
        value,
        dimension: dimension.map(str::to_string),
        unit: unit.map(str::to_string),
    }
}

fn units_conflict(l: &Quantity<'_>, r: &Quantity<'_>) -> bool {
    matches!((l.unit, r.unit), (Some(a), Some(b)) if a != b)
}

/// Apply `+ - * /` to two present numbers.
pub fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    let (Some(l), Some(r)) = (quantity(left), quantity(right)) else {
        return Err(EvaluationError::unsupported(format!(
            "operator {} is not defined for {} and {}",
            op,
            left.type_name(),
            right.type_name()
        )));
    };

    let result = match op {
        BinaryOp::Add | BinaryOp::Sub => {
            if units_conflict(&l, &r) {
                return Err(EvaluationError::unsupported(format!(
                    "cannot apply {} to {} and {}",
                    op,
                    l.unit.unwrap_or_default(),
                    r.unit.unwrap_or_default()
                )));
            }
            let v = if op == BinaryOp::Add {
                l.value + r.value
            } else {
                l.value - r.value
            };
            make(v, l.dimension.or(r.dimension), l.unit.or(r.unit))
        }
        BinaryOp::Mul | BinaryOp::Div => {
            if op == BinaryOp::Div && r.value == 0.0 {
                return Err(EvaluationError::new(
                    EvaluationErrorKind::Division,
                    "division by zero",
                ));
            }
            let v = if op == BinaryOp::Mul {
                l.value * r.value
            } else {
                l.value / r.value
            };
            match (l.unit, r.unit) {
                (Some(u), None) => make(v, l.dimension, Some(u)),
                (None, Some(u)) => make(v, r.dimension, Some(u)),
                _ => Value::number(v),
            }
        }
        other => {
            return Err(EvaluationError::unsupported(format!(
                "{} is not an arithmetic operator",
                other
            )))
        }
    };

    match result.as_number() {
        Some(n) if !n.is_finite() => Err(EvaluationError::new(
            EvaluationErrorKind::NonFinite,
            format!("result of {} is not a finite number", op),
        )),
        _ => Ok(result),
    }
}

/// Ordering comparison of two present values: numbers, text, datetimes.
pub fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    let ordering = match (left, right) {
        (Value::Number { .. }, Value::Number { .. }) => {
            let (Some(l), Some(r)) = (quantity(left), quantity(right)) else {
                return Ok(false);
            };
            if units_conflict(&l, &r) {
                return Err(EvaluationError::unsupported(format!(
                    "cannot compare {} with {}",
                    l.unit.unwrap_or_default(),
                    r.unit.unwrap_or_default()
                )));
            }
            match l.value.partial_cmp(&r.value) {
                Some(o) => o,
                // NaN compares false with everything
                None => return Ok(false),
            }
        }
        (Value::Text { value: l }, Value::Text { value: r }) => l.cmp(r),
        (Value::DateTime { value: l }, Value::DateTime { value: r }) => l.cmp(r),
        _ => {
            return Err(EvaluationError::unsupported(format!(
                "cannot compare {} {} {}",
                left.type_name(),
                op,
                right.type_name()
            )))
        }
    };
    Ok(match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Lte => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Gte => ordering != Ordering::Less,
        other => {
            return Err(EvaluationError::unsupported(format!(
                "{} is not an ordering operator",
                other
            )))
        }
    })
}

/// Structural equality; null equals only null. Numbers compare by value and
/// are unequal when both carry different units. References compare by id.
pub fn values_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(l), Some(r)) => value_eq(l, r),
        _ => false,
    }
}

fn value_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number { .. }, Value::Number { .. }) => match (quantity(left), quantity(right)) {
            (Some(l), Some(r)) => l.value == r.value && !units_conflict(&l, &r),
            _ => false,
        },
        (Value::Reference { entity_id: l, .. }, Value::Reference { entity_id: r, .. }) => l == r,
        (Value::List { items: l, .. }, Value::List { items: r, .. }) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| value_eq(a, b))
        }
        (Value::Record { fields: l }, Value::Record { fields: r }) => {
            l.len() == r.len()
                && l.iter()
                    .zip(r)
                    .all(|((ka, va), (kb, vb))| ka == kb && value_eq(va, vb))
        }
        _ => left == right,
    }
}
