//! Error types for the cognitive runtime

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, DawnError>;

/// Severity classification used by the tick loop to decide how an error
/// propagates. Errors never escape a tick except [`ErrorKind::Fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Recoverable: logged, attached to the tick result, loop continues
    Transient,
    /// Rejected input: counter incremented, loop continues
    Validation,
    /// Broken invariant: triggers emergency cooldown and an EMERGENCY_RESET sigil
    Invariant,
    /// Unrecoverable corruption: scheduler stops and writes a crash snapshot
    Fatal,
}

/// Errors that can occur in the cognitive runtime
#[derive(Error, Debug)]
pub enum DawnError {
    /// Tick scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Pulse controller error
    #[error("Pulse error: {0}")]
    Pulse(String),

    /// Entropy analyzer error
    #[error("Entropy error: {0}")]
    Entropy(String),

    /// Sigil engine error
    #[error("Sigil error: {0}")]
    Sigil(String),

    /// Memory router error
    #[error("Memory error: {0}")]
    Memory(String),

    /// Meta-reflex error
    #[error("Reflex error: {0}")]
    Reflex(String),

    /// Bloom manager error
    #[error("Bloom error: {0}")]
    Bloom(String),

    /// Snapshot export/import error
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected sample or chunk
    #[error("Validation error: {0}")]
    Validation(String),

    /// A state invariant no longer holds
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Subsystem callback exceeded its deadline
    #[error("Callback timeout: {stage} exceeded {timeout_ms} ms")]
    CallbackTimeout {
        /// Stage whose callback timed out
        stage: String,
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Unrecoverable corruption
    #[error("Fatal: {0}")]
    Fatal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("Runtime error: {0}")]
    Other(#[from] anyhow::Error),
}

impl DawnError {
    /// Classify this error for the tick loop's propagation policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Serialization(_) => {
                ErrorKind::Validation
            }
            Self::Invariant(_) => ErrorKind::Invariant,
            Self::Fatal(_) => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        }
    }

    /// Stable label for streak tracking (three consecutive transients of the
    /// same kind escalate to an invariant violation).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Scheduler(_) => "scheduler",
            Self::Pulse(_) => "pulse",
            Self::Entropy(_) => "entropy",
            Self::Sigil(_) => "sigil",
            Self::Memory(_) => "memory",
            Self::Reflex(_) => "reflex",
            Self::Bloom(_) => "bloom",
            Self::Snapshot(_) => "snapshot",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Invariant(_) => "invariant",
            Self::CallbackTimeout { .. } => "callback_timeout",
            Self::Fatal(_) => "fatal",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            DawnError::Validation("bad sample".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DawnError::Invariant("heat out of range".into()).kind(),
            ErrorKind::Invariant
        );
        assert_eq!(DawnError::Fatal("corrupt table".into()).kind(), ErrorKind::Fatal);
        assert_eq!(
            DawnError::CallbackTimeout {
                stage: "routing".into(),
                timeout_ms: 250
            }
            .kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_label_is_stable_per_variant() {
        assert_eq!(DawnError::Memory("x".into()).label(), "memory");
        assert_eq!(DawnError::Memory("y".into()).label(), "memory");
        assert_ne!(
            DawnError::Memory("x".into()).label(),
            DawnError::Sigil("x".into()).label()
        );
    }
}
