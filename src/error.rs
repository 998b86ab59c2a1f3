//! Error taxonomy for the contact reconciliation core
//!
//! Collaborators (contact source, checkpoint persistence) report their own
//! narrow error types; the manager maps them into [`ReconError`] at its
//! boundary so hosts only ever match on one enum.

use thiserror::Error;

use crate::types::ContactId;

/// Main error type surfaced to hosts.
///
/// `Clone` because a single failed check is delivered to every caller that
/// was coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconError {
    #[error("Contact source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    #[error("Delete failed for {} contact(s) ({} deleted): {reason}", .failed.len(), .deleted.len())]
    DeleteFailed {
        /// Raw record ids the source refused to delete.
        failed: Vec<ContactId>,
        /// Raw record ids that were removed before the failure was reported.
        deleted: Vec<ContactId>,
        reason: String,
    },

    #[error("A contact check is already in progress")]
    CheckAlreadyInProgress,

    #[error("Contact check cancelled")]
    Cancelled,

    #[error("Contact '{0}' not found in the current snapshot")]
    ContactNotFound(ContactId),

    #[error("Contact '{id}' merges {} linked records; remove them together", .members.len())]
    MergedContact {
        id: ContactId,
        /// Raw record ids collapsed into the person.
        members: Vec<ContactId>,
    },

    #[error("Checkpoint persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors reported by a [`crate::source::ContactSource`].
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Access to the contact source was denied")]
    AccessDenied,

    #[error("Contact '{0}' does not exist in the source")]
    NotFound(ContactId),

    #[error("Source rejected the operation: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors reported by a [`crate::persistence::CheckpointPersistence`].
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp for key '{key}': {value}")]
    InvalidTimestamp { key: String, value: String },
}

impl From<PersistenceError> for ReconError {
    fn from(error: PersistenceError) -> Self {
        ReconError::Persistence(error.to_string())
    }
}

impl ReconError {
    /// Map a failed source listing into the check-level error.
    pub fn source_unavailable(error: &SourceError) -> Self {
        ReconError::SourceUnavailable {
            reason: error.to_string(),
        }
    }
}

/// Result alias for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_failed_message_counts() {
        let err = ReconError::DeleteFailed {
            failed: vec![ContactId::from("c3")],
            deleted: vec![ContactId::from("c1"), ContactId::from("c2")],
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Delete failed for 1 contact(s) (2 deleted): permission denied"
        );
    }

    #[test]
    fn test_merged_contact_message_counts_members() {
        let err = ReconError::MergedContact {
            id: ContactId::from("m1"),
            members: vec![ContactId::from("m1"), ContactId::from("m2")],
        };
        assert_eq!(
            err.to_string(),
            "Contact 'm1' merges 2 linked records; remove them together"
        );
    }

    #[test]
    fn test_source_error_maps_to_unavailable() {
        let err = ReconError::source_unavailable(&SourceError::AccessDenied);
        assert!(matches!(err, ReconError::SourceUnavailable { .. }));
        assert!(err.to_string().contains("denied"));
    }
}
