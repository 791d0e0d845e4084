//! Formula AST types.
//!
//! Produced by the parser and consumed by the dependency extractor and the
//! evaluator. No name resolution happens at parse time: an unknown function
//! or a reference to a property that does not exist is still a valid tree.

use std::fmt;

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Literals
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Number(f64),
    Text(String),
    Boolean(bool),
    Null,
}

// ──────────────────────────────────────────────
// Operators
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => f.write_str("-"),
            UnaryOp::Not => f.write_str("!"),
        }
    }
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

/// A parsed formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Literal {
        value: Literal,
    },
    /// `#name`
    SelfProperty {
        name: String,
    },
    /// `self`
    SelfEntity,
    /// Bare UUID or `@"id"`
    EntityRef {
        id: String,
    },
    /// `object.member`: property, record field or relationship hop
    Member {
        object: Box<Expression>,
        member: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Call {
        name: String,
        args: Vec<Expression>,
    },
    List {
        items: Vec<Expression>,
    },
    Record {
        fields: Vec<(String, Expression)>,
    },
}

impl Expression {
    pub fn number(n: f64) -> Self {
        Expression::Literal {
            value: Literal::Number(n),
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Expression::Literal {
            value: Literal::Text(s.into()),
        }
    }

    pub fn self_property(name: impl Into<String>) -> Self {
        Expression::SelfProperty { name: name.into() }
    }

    pub fn member(object: Expression, member: impl Into<String>) -> Self {
        Expression::Member {
            object: Box::new(object),
            member: member.into(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

// ──────────────────────────────────────────────
// Templates
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplatePart {
    Text { text: String },
    Interpolation { source: String, expression: Expression },
}

/// A string with `${...}` interpolations, e.g. `"Order ${#number} for ${#customer.name}"`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Template {
    pub parts: Vec<TemplatePart>,
}

impl Template {
    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.parts.iter().filter_map(|p| match p {
            TemplatePart::Interpolation { expression, .. } => Some(expression),
            TemplatePart::Text { .. } => None,
        })
    }

    /// True when the template has no interpolations.
    pub fn is_static(&self) -> bool {
        self.expressions().next().is_none()
    }
}
