//! Typed error surface of the core
//!
//! Every core operation returns either a success value or exactly one of
//! these variants. Per-target transport and timeout failures during task
//! fan-out are *not* surfaced through this type — they are recorded in the
//! affected `TaskLog` row so sibling dispatches keep running.

use crate::vault::VaultError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input to a create/update, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Metric sample with a non-finite value or zero-valued timestamp.
    #[error("invalid metric sample: {0}")]
    InvalidSample(String),

    /// Referenced id does not exist.
    #[error("{0} {1} not found")]
    NotFound(&'static str, u64),

    /// Uniqueness violation (duplicate server name, SSH key name, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Vault key-length / decoding failure.
    #[error("credential error: {0}")]
    Credential(#[from] VaultError),

    /// Group expansion revisited a group during target resolution.
    #[error("target resolution hit a cycle at group {0}")]
    TargetCycle(u64),

    /// A task resolved to an empty target set.
    #[error("task resolved to no target servers")]
    NoTargets,

    /// Persistence layer failure outside the semantic cases above.
    /// The in-memory store never produces this; durable backends map
    /// their driver errors into it.
    #[error("store error: {0}")]
    Store(String),
}
