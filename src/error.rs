//! Error types for dynfx.
//!
//! Only hard failures surface here. Degenerate geometry, NaN particles and
//! runups that have nothing to do are handled in place and logged.

use thiserror::Error;

/// Kinds of entity a handle or name can refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// A particle system.
    System,
    /// A force field.
    Field,
    /// A particle emitter.
    Emitter,
    /// A collision surface.
    Collision,
    /// A spring network.
    SpringNetwork,
    /// A rigid body.
    RigidBody,
    /// A particle inside a system.
    Particle,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::System => "particle system",
            EntityKind::Field => "field",
            EntityKind::Emitter => "emitter",
            EntityKind::Collision => "collision surface",
            EntityKind::SpringNetwork => "spring network",
            EntityKind::RigidBody => "rigid body",
            EntityKind::Particle => "particle",
        };
        f.write_str(name)
    }
}

/// Errors returned by the dynamics evaluator.
#[derive(Error, Debug)]
pub enum DynamicsError {
    /// A per-particle attribute was read or written before being declared.
    #[error("Attribute not found: '{0}'")]
    AttributeNotFound(String),

    /// An attribute exists but holds a different value type.
    #[error("Attribute '{name}' is {actual}, not {expected}")]
    AttributeTypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// An attribute with the same name was declared twice with different types.
    #[error("Attribute '{0}' is already declared with a different type")]
    AttributeExists(String),

    /// A handle or name does not resolve to a live entity.
    #[error("Reference not found: {kind} '{id}'")]
    ReferenceNotFound { kind: EntityKind, id: String },

    /// A configuration value is outside its legal range.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A spring between the same two points already exists in a no-duplicate network.
    #[error("Duplicate spring between {0} and {1}")]
    DuplicateSpring(String, String),

    /// A runup was aborted between frames.
    #[error("Runup aborted before frame {frame}")]
    Aborted { frame: i64 },

    /// Checkpoint file was malformed.
    #[error("Checkpoint format error: {0}")]
    CheckpointFormat(String),

    /// I/O error while reading or writing checkpoints or scene files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading or writing scene files or ASCII checkpoints.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DynamicsError {
    pub(crate) fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        DynamicsError::ReferenceNotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        DynamicsError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Result type using [`DynamicsError`].
pub type Result<T> = std::result::Result<T, DynamicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_not_found_message() {
        let err = DynamicsError::not_found(EntityKind::Field, "gravity1");
        assert_eq!(err.to_string(), "Reference not found: field 'gravity1'");
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(DynamicsError::Io(_))));
    }
}
