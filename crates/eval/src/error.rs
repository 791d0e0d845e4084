//! Evaluation and computation errors.

use std::fmt;

use serde::Serialize;

use formulary_storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationErrorKind {
    UnknownFunction,
    /// Wrong arity or argument type.
    InvalidArguments,
    UnsupportedOperator,
    /// Member access on a value that has no members (strict mode).
    InvalidAccess,
    /// Unresolvable property, entity or field (strict mode).
    MissingReference,
    /// Division by zero.
    Division,
    /// Arithmetic overflowed to infinity or produced NaN.
    NonFinite,
    DepthExceeded,
    Circular,
}

impl fmt::Display for EvaluationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvaluationErrorKind::UnknownFunction => "unknown_function",
            EvaluationErrorKind::InvalidArguments => "invalid_arguments",
            EvaluationErrorKind::UnsupportedOperator => "unsupported_operator",
            EvaluationErrorKind::InvalidAccess => "invalid_access",
            EvaluationErrorKind::MissingReference => "missing_reference",
            EvaluationErrorKind::Division => "division",
            EvaluationErrorKind::NonFinite => "non_finite",
            EvaluationErrorKind::DepthExceeded => "depth_exceeded",
            EvaluationErrorKind::Circular => "circular",
        };
        f.write_str(s)
    }
}

/// A failed evaluation. `cycle` is non-empty only for `Circular` and holds
/// the property path with the repeated name at both ends.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct EvaluationError {
    pub kind: EvaluationErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cycle: Vec<String>,
}

impl EvaluationError {
    pub fn new(kind: EvaluationErrorKind, message: impl Into<String>) -> Self {
        EvaluationError {
            kind,
            message: message.into(),
            cycle: Vec::new(),
        }
    }

    pub fn circular(cycle: Vec<String>) -> Self {
        EvaluationError {
            kind: EvaluationErrorKind::Circular,
            message: format!("circular reference: {}", cycle.join(" -> ")),
            cycle,
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(EvaluationErrorKind::InvalidArguments, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(EvaluationErrorKind::UnsupportedOperator, message)
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self::new(EvaluationErrorKind::MissingReference, message)
    }

    /// True when `property` is itself a member of the reported cycle, as
    /// opposed to merely depending on one.
    pub fn is_cycle_member(&self, property: &str) -> bool {
        self.kind == EvaluationErrorKind::Circular && self.cycle.iter().any(|p| p == property)
    }
}

/// Failure of a load-compute-persist pass as a whole. Per-property failures
/// are statuses in the outcome, never this type.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to persist {entity_id}.{property_name}: {source}")]
    Persist {
        entity_id: String,
        property_name: String,
        #[source]
        source: StorageError,
    },
}
