//! Computation status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a computed (or inherited) property's cached value.
///
/// ```text
/// pending ──► valid | error | circular
/// valid   ──► stale | valid | error | circular
/// stale   ──► stale | valid | error | circular
/// error   ──► stale | valid | error | circular
/// circular  (terminal until the expression is redefined)
/// ```
///
/// Every live state may repeat itself, so a second notification for an
/// already stale property is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationStatus {
    #[default]
    Pending,
    Valid,
    Stale,
    Error,
    Circular,
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ComputationStatus,
    pub to: ComputationStatus,
}

impl ComputationStatus {
    pub fn can_transition_to(self, next: ComputationStatus) -> bool {
        use ComputationStatus::*;
        match (self, next) {
            (Circular, _) => false,
            (Pending, Valid | Error | Circular) => true,
            (Pending, _) => false,
            (Valid, Stale | Valid | Error | Circular) => true,
            (Stale, Valid | Error | Circular | Stale) => true,
            (Error, Stale | Valid | Error | Circular) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: ComputationStatus) -> Result<ComputationStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Whether a value in this state is known to be outdated or missing.
    pub fn needs_recompute(self) -> bool {
        matches!(self, ComputationStatus::Pending | ComputationStatus::Stale)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComputationStatus::Pending => "pending",
            ComputationStatus::Valid => "valid",
            ComputationStatus::Stale => "stale",
            ComputationStatus::Error => "error",
            ComputationStatus::Circular => "circular",
        }
    }
}

impl fmt::Display for ComputationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ComputationStatus::*;
    use super::*;

    #[test]
    fn first_evaluation_outcomes() {
        for next in [Valid, Error, Circular] {
            assert_eq!(Pending.transition(next), Ok(next));
        }
        assert!(Pending.transition(Stale).is_err());
    }

    #[test]
    fn valid_goes_stale_and_back() {
        let s = Valid.transition(Stale).unwrap();
        assert_eq!(s.transition(Valid), Ok(Valid));
        assert_eq!(Stale.transition(Error), Ok(Error));
    }

    #[test]
    fn live_states_may_repeat() {
        for s in [Valid, Stale, Error] {
            assert_eq!(s.transition(s), Ok(s));
        }
        assert!(Pending.transition(Pending).is_err());
    }

    #[test]
    fn circular_is_sticky() {
        for next in [Pending, Valid, Stale, Error, Circular] {
            let err = Circular.transition(next).unwrap_err();
            assert_eq!(err.from, Circular);
        }
        assert_eq!(
            Circular.transition(Valid).unwrap_err().to_string(),
            "invalid status transition circular -> valid"
        );
    }

    #[test]
    fn any_live_state_can_become_circular() {
        for from in [Pending, Valid, Stale, Error] {
            assert!(from.can_transition_to(Circular));
        }
    }

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_value(Stale).unwrap(), "stale");
        let s: ComputationStatus = serde_json::from_value(serde_json::json!("circular")).unwrap();
        assert_eq!(s, Circular);
    }
}
