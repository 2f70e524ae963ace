//! Error taxonomy for the policy governance core.
//!
//! Mirrors the shape the wider corpus uses for tamper-evident ledgers
//! (`#[derive(thiserror::Error)]` with `#[from]` conversions for I/O and
//! serde failures, plus a structured variant carrying the offending index).

use thiserror::Error;

/// Errors surfaced across the governance core's public boundary.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A caller-supplied argument violated a documented precondition:
    /// null/empty inputs, wrong-length keys or hashes, a non-UTC timestamp,
    /// or an `effective_at` older than the previous seal's.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The hash chain failed `verify_chain`, or a previous-hash mismatch was
    /// detected while reloading a persisted log.
    #[error("chain integrity violation{}: {details}", broken_at_index.map(|i| format!(" at index {i}")).unwrap_or_default())]
    ChainIntegrity {
        /// Index of the first seal that failed verification, if known.
        broken_at_index: Option<u32>,
        /// Human-readable description of the failure.
        details: String,
    },

    /// A policy evaluation failed under strict enforcement, or a `DENY`
    /// action fired.
    #[error("policy violation: {policy}: {reason}")]
    PolicyViolation {
        /// Name of the policy that produced the violation.
        policy: String,
        /// Reason reported by the policy.
        reason: String,
    },

    /// An Ed25519 verify-only signer was asked to sign.
    #[error("key material missing: signer is verify-only")]
    KeyMaterialMissing,

    /// Underlying filesystem failure while appending to or reloading a
    /// persisted ledger.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure encoding or decoding a persisted ledger record.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GovernanceError>;
