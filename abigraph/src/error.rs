//! errors raised while building and canonicalizing type graphs

use crate::descriptor::ForeignId;
use thiserror::Error;

/// Everything the engine can fail with.
///
/// `UnresolvedReference` and `MalformedDescriptor` are local to a single type:
/// the builder records them as diagnostics and moves on with the rest of the
/// unit. `InvariantViolation` means the engine itself is inconsistent, and the
/// corpus being processed must be abandoned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// a referenced id has no usable descriptor
    #[error("unresolved reference {id}: {reason}")]
    UnresolvedReference { id: ForeignId, reason: String },

    /// a kind-specific required field is missing or inconsistent
    #[error("malformed descriptor {id}: {reason}")]
    MalformedDescriptor { id: ForeignId, reason: String },

    /// internal bookkeeping is inconsistent (comparison stack, dependency sets)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl GraphError {
    pub fn unresolved(id: ForeignId, reason: impl Into<String>) -> Self {
        GraphError::UnresolvedReference {
            id,
            reason: reason.into(),
        }
    }

    pub fn malformed(id: ForeignId, reason: impl Into<String>) -> Self {
        GraphError::MalformedDescriptor {
            id,
            reason: reason.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        GraphError::InvariantViolation(message.into())
    }

    /// true for errors that only cost the type being built
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GraphError::InvariantViolation(_))
    }

    /// the foreign id the error is about, if any
    pub fn foreign_id(&self) -> Option<ForeignId> {
        match self {
            GraphError::UnresolvedReference { id, .. } => Some(*id),
            GraphError::MalformedDescriptor { id, .. } => Some(*id),
            GraphError::InvariantViolation(_) => None,
        }
    }
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(GraphError::unresolved(ForeignId(1), "missing").is_recoverable());
        assert!(GraphError::malformed(ForeignId(2), "no bits").is_recoverable());
        assert!(!GraphError::invariant("stack mismatch").is_recoverable());
    }

    #[test]
    fn test_display_names_the_id() {
        let err = GraphError::unresolved(ForeignId(0x2a), "no descriptor");
        assert_eq!(
            err.to_string(),
            "unresolved reference 0x0000002a: no descriptor"
        );
        assert_eq!(err.foreign_id(), Some(ForeignId(0x2a)));
    }
}
