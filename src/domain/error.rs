//! Domain Layer - Error Taxonomy

use serde::{Deserialize, Serialize};

/// Common result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainError {
    /// Bad input, rejected before any optimistic update or network call
    Validation(String),
    /// Mutation targets an item not owned by the current session
    Authorization(String),
    /// Target id is absent from the local cache
    NotFound(String),
    /// The backend call failed or returned an error payload
    Remote(String),
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainError::Validation(msg) => write!(f, "Invalid input: {}", msg),
            DomainError::Authorization(msg) => write!(f, "Not authorized: {}", msg),
            DomainError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DomainError::Remote(msg) => write!(f, "Remote error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}
