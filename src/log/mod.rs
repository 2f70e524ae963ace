//! `PolicyLog`: the append-only, hash-chained, time-indexed ledger.
//!
//! Grounded on the append/verify_chain/reload shape of
//! `other_examples/c9078ead_..._audit_log.rs`'s `AuditLog`, generalized to
//! the two concurrency-bearing variants (`MemoryPolicyLog`,
//! `FilePolicyLog`) this core requires.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};

use crate::engine::rules::PolicyRecord;
use crate::error::Result;
use crate::observe::LogMetrics;
use crate::seal::PolicySeal;
use crate::signer::Signer;

pub use file::{FilePolicyLog, FilePolicyLogOptions};
pub use memory::MemoryPolicyLog;

/// Outcome of a full-chain integrity pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainValidationResult {
    /// Whether the entire chain verified.
    pub is_valid: bool,
    /// Index of the first seal that failed, if invalid.
    pub broken_at_index: Option<u32>,
    /// Human-readable failure detail, if invalid.
    pub details: Option<String>,
}

impl ChainValidationResult {
    /// Builds the canonical success result.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            broken_at_index: None,
            details: None,
        }
    }

    /// Builds a failure result pinned to the given index and detail.
    pub fn invalid(index: u32, details: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            broken_at_index: Some(index),
            details: Some(details.into()),
        }
    }
}

/// Capability set shared by the in-memory and file-backed ledgers.
///
/// Implementations own their seal sequence exclusively; a log is not
/// shared across processes, and within a process it is its own writer
/// authority.
pub trait PolicyLog: Send + Sync {
    /// Signs and appends a new seal for `policy`, effective at
    /// `effective_at`. Holds the log's write lock across signing,
    /// persistence (file variant), the in-memory push, and chain-cache
    /// invalidation.
    fn append(&self, policy: PolicyRecord, effective_at: DateTime<Utc>) -> Result<PolicySeal>;

    /// Returns the policy of the greatest-index seal whose `effective_at`
    /// is `<= timestamp`, or `None` if no such seal exists.
    fn get_policy_at(&self, timestamp: DateTime<Utc>) -> Option<PolicyRecord>;

    /// Returns a snapshot of every seal currently in the log, in index
    /// order.
    fn get_all_seals(&self) -> Vec<PolicySeal>;

    /// Performs (or returns the cached result of) a full-chain integrity
    /// pass. A successful result is memoized until the next `append`; a
    /// failing result is never cached.
    fn verify_chain(&self) -> ChainValidationResult;

    /// Number of seals currently in the log.
    fn count(&self) -> u32;

    /// Append-count/latency/seals-gauge/cache hit-miss counters.
    fn metrics(&self) -> &LogMetrics;

    /// Releases any resources the log holds open (file handles). Idempotent;
    /// repeated calls are a no-op. The default implementation covers logs
    /// with nothing to release, such as `MemoryPolicyLog`.
    fn close(&self) {}
}

/// Walks `seals` checking index sequencing, previous-hash linkage, and
/// signature validity, in that order, stopping at the first failure.
/// Shared by the memory and file log variants so both apply the exact
/// same `verify_chain` protocol.
pub(crate) fn verify_seals(seals: &[PolicySeal], signer: &dyn Signer) -> ChainValidationResult {
    let mut expected_previous_hash = [0u8; 32];
    for (i, seal) in seals.iter().enumerate() {
        let i = i as u32;
        if seal.index() != i {
            return ChainValidationResult::invalid(i, "Index mismatch");
        }
        if !seal.previous_hash_matches(&expected_previous_hash) {
            return ChainValidationResult::invalid(i, "PreviousHash mismatch");
        }
        if !seal.verify_signature(signer) {
            return ChainValidationResult::invalid(i, "Signature verification failed");
        }
        expected_previous_hash = crate::seal::link_hash(&seal.signature());
    }
    ChainValidationResult::valid()
}

/// Binary search for the largest index whose `effective_at <= timestamp`.
pub(crate) fn policy_at<'a>(
    seals: &'a [PolicySeal],
    timestamp: DateTime<Utc>,
) -> Option<&'a PolicyRecord> {
    let idx = seals.partition_point(|seal| seal.effective_at() <= timestamp);
    if idx == 0 {
        None
    } else {
        Some(seals[idx - 1].policy())
    }
}
