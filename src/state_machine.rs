//! State machine traits for lifecycle aggregates
//!
//! Aggregates expose their lifecycle as an enum implementing [`State`] and
//! [`StateTransitions`]. The transition table is data on the state type
//! itself, so illegal moves are rejected uniformly wherever a transition is
//! attempted, and the engine layered on top only decides *when* to move.

use crate::errors::{CoreError, CoreResult};
use std::fmt::Debug;

/// Trait for types that can be used as states in a state machine
pub trait State: Debug + Clone + PartialEq + Eq + Send + Sync {
    /// Get the name of this state for logging/debugging
    fn name(&self) -> &'static str;

    /// Check if this is a terminal state
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Transition table for a state type
pub trait StateTransitions: State {
    /// Check if a transition to the target state is valid
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Get all valid target states from this state
    fn valid_transitions(&self) -> Vec<Self>;

    /// Validate a transition, producing the uniform error on an illegal move
    fn validate_transition(&self, target: &Self) -> CoreResult<()> {
        if self.is_terminal() || !self.can_transition_to(target) {
            return Err(CoreError::InvalidStateTransition {
                from: self.name().to_string(),
                to: target.name().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Yellow,
        Off,
    }

    impl State for Light {
        fn name(&self) -> &'static str {
            match self {
                Light::Red => "Red",
                Light::Green => "Green",
                Light::Yellow => "Yellow",
                Light::Off => "Off",
            }
        }

        fn is_terminal(&self) -> bool {
            matches!(self, Light::Off)
        }
    }

    impl StateTransitions for Light {
        fn can_transition_to(&self, target: &Self) -> bool {
            self.valid_transitions().contains(target)
        }

        fn valid_transitions(&self) -> Vec<Self> {
            match self {
                Light::Red => vec![Light::Green, Light::Off],
                Light::Green => vec![Light::Yellow],
                Light::Yellow => vec![Light::Red],
                Light::Off => vec![],
            }
        }
    }

    #[test]
    fn test_valid_transition_passes_validation() {
        assert!(Light::Red.validate_transition(&Light::Green).is_ok());
        assert!(Light::Green.validate_transition(&Light::Yellow).is_ok());
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let err = Light::Red.validate_transition(&Light::Yellow).unwrap_err();
        match err {
            CoreError::InvalidStateTransition { from, to } => {
                assert_eq!(from, "Red");
                assert_eq!(to, "Yellow");
            }
            other => panic!("expected InvalidStateTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_terminal_state_rejects_everything() {
        assert!(Light::Off.validate_transition(&Light::Red).is_err());
        assert!(Light::Off.valid_transitions().is_empty());
    }
}
