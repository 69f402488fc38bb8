//! Error types for the route authorization engine

use thiserror::Error;

/// Authorization engine errors
///
/// These are infrastructure and input failures. Per-request outcomes such as
/// "no rule" or "forbidden" are never errors; they are carried by
/// [`crate::Decision`].
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Rule or role store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Role name or id does not exist
    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// Rule record failed validation
    #[error("Invalid rule {id}: {reason}")]
    InvalidRule { id: String, reason: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Rule document could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthzError {
    /// Build an [`AuthzError::InvalidRule`] for the rule with the given id
    pub fn invalid_rule(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
