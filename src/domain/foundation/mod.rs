//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, timestamps, the state machine trait and the error
//! types that form the vocabulary of the rest of the crate.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{Shortfall, ValidationError};
pub use ids::{PrivateId, RequestId, ServerUid, Sid};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
