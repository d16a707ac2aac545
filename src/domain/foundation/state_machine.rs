//! Lifecycle enums with a closed set of allowed moves.

use std::fmt::Debug;

use super::ValidationError;

/// A lifecycle enum. Implementors list the states reachable from each
/// state; checked transitions and terminal detection follow from that.
pub trait StateMachine: Sized + Copy + PartialEq + Debug {
    /// States reachable in one move from `self`.
    fn valid_transitions(&self) -> Vec<Self>;

    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Returns `target` when the move is allowed.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if !self.can_transition_to(&target) {
            return Err(ValidationError::invalid_format(
                "state",
                format!("{:?} cannot move to {:?}", self, target),
            ));
        }
        Ok(target)
    }

    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}
