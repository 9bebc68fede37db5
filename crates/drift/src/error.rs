//! Error types for drafting operations.

use crate::Path;
use thiserror::Error;

/// Result type alias for drafting operations.
pub type DriftResult<T> = Result<T, DriftError>;

/// Errors that can occur while drafting, finalizing, or replaying changes.
#[derive(Debug, Error)]
pub enum DriftError {
    /// A drafting operation was attempted with no session open.
    #[error("no drafting session is active")]
    NoActiveSession,

    /// The draft belongs to a session that was rolled back.
    #[error("draft was revoked when its session rolled back")]
    RevokedDraft,

    /// The draft was already converted into a finalized result.
    #[error("draft has already been finalized")]
    DraftAlreadyFinalized,

    /// A finish call was made on a draft not created with `begin_draft`.
    #[error("draft was not created manually; finalize it by returning from its recipe")]
    NotManualDraft,

    /// A recipe returned a replacement value and also mutated its draft.
    #[error("recipe returned a replacement value and also mutated its draft")]
    ReplacedAndMutated,

    /// The value cannot be drafted.
    #[error("value of kind {kind} cannot be drafted")]
    NotDraftable {
        /// Kind name of the offending value.
        kind: &'static str,
    },

    /// An operation was applied to a value of the wrong kind.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The expected kind.
        expected: &'static str,
        /// The actual kind found.
        found: &'static str,
    },

    /// Sequence index out of bounds.
    #[error("index {index} out of bounds (len: {len})")]
    IndexOutOfBounds {
        /// The index that was accessed.
        index: usize,
        /// The actual length of the sequence.
        len: usize,
    },

    /// A path did not resolve to a position in the tree.
    #[error("path not found: {path}")]
    PathNotFound {
        /// The path that was not found.
        path: Path,
    },

    /// Mutation attempted on a frozen container.
    #[error("cannot mutate frozen {kind}")]
    FrozenMutation {
        /// Kind name of the frozen container.
        kind: &'static str,
    },

    /// A capability was looked up but never registered.
    #[error("capability not registered: {name}")]
    CapabilityMissing {
        /// The capability name that was requested.
        name: String,
    },

    /// Transparent draft interception was requested.
    #[error("transparent draft interception is not supported by this runtime")]
    InterceptionUnsupported,

    /// Catch-all for operations that are invalid in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of what went wrong.
        message: String,
    },
}

impl DriftError {
    /// Create a not-draftable error for the given value kind.
    #[inline]
    pub fn not_draftable(kind: &'static str) -> Self {
        DriftError::NotDraftable { kind }
    }

    /// Create a type mismatch error.
    #[inline]
    pub fn type_mismatch(expected: &'static str, found: &'static str) -> Self {
        DriftError::TypeMismatch { expected, found }
    }

    /// Create an index out of bounds error.
    #[inline]
    pub fn index_out_of_bounds(index: usize, len: usize) -> Self {
        DriftError::IndexOutOfBounds { index, len }
    }

    /// Create a path not found error.
    #[inline]
    pub fn path_not_found(path: Path) -> Self {
        DriftError::PathNotFound { path }
    }

    /// Create a frozen mutation error.
    #[inline]
    pub fn frozen(kind: &'static str) -> Self {
        DriftError::FrozenMutation { kind }
    }

    /// Create a capability missing error.
    #[inline]
    pub fn capability_missing(name: impl Into<String>) -> Self {
        DriftError::CapabilityMissing { name: name.into() }
    }

    /// Create an invalid operation error.
    #[inline]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        DriftError::InvalidOperation {
            message: message.into(),
        }
    }
}
