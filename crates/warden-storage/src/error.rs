//! Adapter error types.
//!
//! Every variant carries enough context to diagnose the failure without a
//! debugger. The core never constructs these directly — they come back from
//! whatever `Adapter` implementation the caller plugged in.

/// Errors that can occur during adapter operations.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Loading the full policy set failed.
    #[error("failed to load policy: {reason}")]
    Load { reason: String },

    /// Persisting the full policy set failed.
    #[error("failed to save policy: {reason}")]
    Save { reason: String },

    /// An incremental add failed.
    #[error("failed to add policy ({sec}, {ptype}): {reason}")]
    Add {
        sec: String,
        ptype: String,
        reason: String,
    },

    /// An incremental remove failed.
    #[error("failed to remove policy ({sec}, {ptype}): {reason}")]
    Remove {
        sec: String,
        ptype: String,
        reason: String,
    },

    /// An incremental update failed.
    #[error("failed to update policy ({sec}, {ptype}): {reason}")]
    Update {
        sec: String,
        ptype: String,
        reason: String,
    },

    /// The adapter does not support the filtered-load capability that was
    /// requested of it.
    #[error("adapter does not support filtered loading")]
    FilteringUnsupported,

    /// A filter was rejected by the adapter as malformed or unsupported.
    #[error("invalid policy filter: {reason}")]
    InvalidFilter { reason: String },
}
