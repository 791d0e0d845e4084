//! Runtime value types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Value type tags
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Number,
    Boolean,
    #[serde(rename = "datetime")]
    DateTime,
    Duration,
    Reference,
    List,
    Record,
    /// Element tag of a list whose items do not share one type.
    Any,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Text => "text",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::DateTime => "datetime",
            ValueType::Duration => "duration",
            ValueType::Reference => "reference",
            ValueType::List => "list",
            ValueType::Record => "record",
            ValueType::Any => "any",
        };
        f.write_str(s)
    }
}

// ──────────────────────────────────────────────
// Runtime values
// ──────────────────────────────────────────────

/// A runtime value. "No value" is `Option<Value>::None`, never a variant.
///
/// A `List` claims one element type but nothing stops heterogeneous items
/// from reaching it; consumers must tolerate mixed content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Text {
        value: String,
    },
    Number {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dimension: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Boolean {
        value: bool,
    },
    /// ISO-8601 timestamp
    #[serde(rename = "datetime")]
    DateTime {
        value: String,
    },
    /// ISO-8601 duration, e.g. `P3DT4H`
    Duration {
        value: String,
    },
    Reference {
        entity_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entity_type: Option<String>,
    },
    List {
        element_type: ValueType,
        items: Vec<Value>,
    },
    Record {
        fields: BTreeMap<String, Value>,
    },
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text { value: s.into() }
    }

    pub fn number(n: f64) -> Self {
        Value::Number {
            value: n,
            dimension: None,
            unit: None,
        }
    }

    pub fn quantity(n: f64, dimension: impl Into<String>, unit: impl Into<String>) -> Self {
        Value::Number {
            value: n,
            dimension: Some(dimension.into()),
            unit: Some(unit.into()),
        }
    }

    pub fn boolean(b: bool) -> Self {
        Value::Boolean { value: b }
    }

    pub fn reference(entity_id: impl Into<String>) -> Self {
        Value::Reference {
            entity_id: entity_id.into(),
            entity_type: None,
        }
    }

    /// Build a list, tagging it with the items' common type or `Any`.
    pub fn list(items: Vec<Value>) -> Self {
        let mut tags = items.iter().map(Value::value_type);
        let element_type = match tags.next() {
            None => ValueType::Any,
            Some(first) if tags.all(|t| t == first) => first,
            Some(_) => ValueType::Any,
        };
        Value::List {
            element_type,
            items,
        }
    }

    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Record {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Text { .. } => ValueType::Text,
            Value::Number { .. } => ValueType::Number,
            Value::Boolean { .. } => ValueType::Boolean,
            Value::DateTime { .. } => ValueType::DateTime,
            Value::Duration { .. } => ValueType::Duration,
            Value::Reference { .. } => ValueType::Reference,
            Value::List { .. } => ValueType::List,
            Value::Record { .. } => ValueType::Record,
        }
    }

    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text { .. } => "text",
            Value::Number { .. } => "number",
            Value::Boolean { .. } => "boolean",
            Value::DateTime { .. } => "datetime",
            Value::Duration { .. } => "duration",
            Value::Reference { .. } => "reference",
            Value::List { .. } => "list",
            Value::Record { .. } => "record",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text { value } => Some(value),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Value::Reference { entity_id, .. } => Some(entity_id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Dimension and unit of a number, if any.
    pub fn unit(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Value::Number {
                dimension, unit, ..
            } => (dimension.as_deref(), unit.as_deref()),
            _ => (None, None),
        }
    }

    /// Text rendering used by string concatenation and templates.
    ///
    /// Numbers print without a trailing `.0`; lists join their items with
    /// `,`; references render as their entity id.
    pub fn display_text(&self) -> String {
        match self {
            Value::Text { value } => value.clone(),
            Value::Number { value, .. } => format_number(*value),
            Value::Boolean { value } => value.to_string(),
            Value::DateTime { value } | Value::Duration { value } => value.clone(),
            Value::Reference { entity_id, .. } => entity_id.clone(),
            Value::List { items, .. } => items
                .iter()
                .map(Value::display_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Record { fields } => {
                let inner = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.display_text()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", inner)
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n == 0.0 {
        // covers -0.0
        return "0".to_string();
    }
    format!("{}", n)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}
