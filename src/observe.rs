//! Injected observer and metrics hooks.
//!
//! This crate carries no logging-facade dependency; it prints structured,
//! greppable single-line events directly
//! (`println!("ACORN|mod=LOG|evt=APPEND|index={index}")`). This module
//! routes that idiom through an injected [`Observer`] instead of a
//! process-wide static logger, so embedders can redirect or silence
//! events without a logging-facade dependency.

use std::sync::atomic::{AtomicU64, Ordering};

/// An event raised by the governance core.
#[derive(Debug, Clone)]
pub enum GovernanceEvent<'a> {
    /// A seal was appended to a log.
    SealAppended {
        /// Index of the newly appended seal.
        index: u32,
    },
    /// A full chain verification ran (cache hit or miss).
    ChainVerified {
        /// Whether the chain passed verification.
        valid: bool,
        /// Whether this result came from the cached memo.
        cache_hit: bool,
    },
    /// `PolicyEngine::apply_policies` finished evaluating an entity.
    PolicyEvaluated {
        /// Whether the entity passed every registered policy.
        passed: bool,
        /// Number of policies evaluated.
        policy_count: usize,
    },
    /// A register/unregister call bypassed the audit trail.
    UnauditedRegistration {
        /// Name of the policy being registered or unregistered.
        policy: &'a str,
    },
    /// A pipeline-stage chain state transition.
    ChainStateChanged {
        /// Name of the state entered (`Verifying`, `Verified`, `Invalid`).
        state: &'static str,
    },
}

/// Receives structured events from the governance core.
///
/// Implementors MUST NOT panic: the core treats observer failures as
/// non-fatal, but a panicking observer would still unwind through core
/// call sites.
pub trait Observer: Send + Sync {
    /// Handles a single event. The default no-op observer discards events.
    fn on_event(&self, event: GovernanceEvent<'_>);
}

/// Prints events using the `TAG|mod=MODULE|evt=EVENT|key=value` token
/// format used throughout the wider codebase.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutObserver;

impl Observer for StdoutObserver {
    fn on_event(&self, event: GovernanceEvent<'_>) {
        match event {
            GovernanceEvent::SealAppended { index } => {
                println!("ACORN|mod=LOG|evt=APPEND|index={index}");
            }
            GovernanceEvent::ChainVerified { valid, cache_hit } => {
                println!("ACORN|mod=LOG|evt=VERIFY|valid={valid}|cache_hit={cache_hit}");
            }
            GovernanceEvent::PolicyEvaluated {
                passed,
                policy_count,
            } => {
                println!("ACORN|mod=ENGINE|evt=EVALUATED|passed={passed}|policies={policy_count}");
            }
            GovernanceEvent::UnauditedRegistration { policy } => {
                eprintln!("ACORN|mod=GOVERNED|evt=UNAUDITED_REGISTER|policy={policy}");
            }
            GovernanceEvent::ChainStateChanged { state } => {
                println!("ACORN|mod=ENFORCE|evt=STATE|state={state}");
            }
        }
    }
}

/// An observer that discards every event; useful in tests and embedders
/// that don't want the default stdout chatter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&self, _event: GovernanceEvent<'_>) {}
}

/// Counters for the "record metrics" responsibility described for
/// `PolicyLog`: append count, cumulative append latency, a seals gauge,
/// and chain-verification cache hit/miss counters.
#[derive(Debug, Default)]
pub struct LogMetrics {
    appends: AtomicU64,
    append_nanos_total: AtomicU64,
    seals_gauge: AtomicU64,
    chain_verify_hits: AtomicU64,
    chain_verify_misses: AtomicU64,
}

impl LogMetrics {
    /// Creates a zeroed metrics block.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_append(&self, elapsed_nanos: u64, seals_after: u32) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.append_nanos_total
            .fetch_add(elapsed_nanos, Ordering::Relaxed);
        self.seals_gauge.store(seals_after as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_chain_verify(&self, cache_hit: bool) {
        if cache_hit {
            self.chain_verify_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.chain_verify_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total number of `append` calls observed so far.
    pub fn appends(&self) -> u64 {
        self.appends.load(Ordering::Relaxed)
    }

    /// Cumulative nanoseconds spent inside `append`.
    pub fn append_nanos_total(&self) -> u64 {
        self.append_nanos_total.load(Ordering::Relaxed)
    }

    /// Current number of sealed entries, as last observed by `append`.
    pub fn seals_gauge(&self) -> u32 {
        self.seals_gauge.load(Ordering::Relaxed) as u32
    }

    /// Number of `verify_chain` calls served from the cached memo.
    pub fn chain_verify_hits(&self) -> u64 {
        self.chain_verify_hits.load(Ordering::Relaxed)
    }

    /// Number of `verify_chain` calls that performed a full pass.
    pub fn chain_verify_misses(&self) -> u64 {
        self.chain_verify_misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_accumulate() {
        let metrics = LogMetrics::new();
        metrics.record_append(1000, 1);
        metrics.record_append(2000, 2);
        metrics.record_chain_verify(true);
        metrics.record_chain_verify(false);

        assert_eq!(metrics.appends(), 2);
        assert_eq!(metrics.append_nanos_total(), 3000);
        assert_eq!(metrics.seals_gauge(), 2);
        assert_eq!(metrics.chain_verify_hits(), 1);
        assert_eq!(metrics.chain_verify_misses(), 1);
    }

    #[test]
    fn null_observer_discards_events() {
        let observer = NullObserver;
        observer.on_event(GovernanceEvent::SealAppended { index: 0 });
    }
}
