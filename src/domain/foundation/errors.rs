//! Error types shared across the domain layer.

use std::error::Error;
use std::fmt;
use thiserror::Error;

/// Errors that occur during value object construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A round trip whose deadline fired before every expected response arrived.
///
/// Carries whatever was collected, so callers can still act on partial
/// results (e.g. the acknowledgements of the clients that did answer).
#[derive(Debug, Clone, PartialEq)]
pub struct Shortfall<T> {
    /// Number of responses expected when the operation started.
    pub expected: usize,
    /// Number of responders that answered before the deadline.
    pub received: usize,
    /// Responses collected before the deadline.
    pub responses: Vec<T>,
}

impl<T> Shortfall<T> {
    /// Creates a shortfall where every responder contributed one response.
    pub fn new(expected: usize, responses: Vec<T>) -> Self {
        Self {
            expected,
            received: responses.len(),
            responses,
        }
    }

    /// Creates a shortfall where responders may contribute several items each.
    pub fn with_received(expected: usize, received: usize, responses: Vec<T>) -> Self {
        Self {
            expected,
            received,
            responses,
        }
    }

    /// Number of responses actually received.
    pub fn received(&self) -> usize {
        self.received
    }
}

impl<T> fmt::Display for Shortfall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation has timed out: only {} responses received out of {}",
            self.received(),
            self.expected
        )
    }
}

impl<T: fmt::Debug> Error for Shortfall<T> {}
