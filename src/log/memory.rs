//! In-memory `PolicyLog` implementation.

use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::{policy_at, verify_seals, ChainValidationResult, PolicyLog};
use crate::engine::rules::PolicyRecord;
use crate::error::Result;
use crate::observe::{GovernanceEvent, LogMetrics, NullObserver, Observer};
use crate::seal::PolicySeal;
use crate::signer::Signer;

struct State {
    seals: Vec<PolicySeal>,
    cached_valid: bool,
}

/// A `PolicyLog` backed purely by process memory; seals do not survive
/// process restart.
pub struct MemoryPolicyLog {
    signer: Box<dyn Signer>,
    root_chain_hash: [u8; 32],
    state: RwLock<State>,
    metrics: LogMetrics,
    observer: Box<dyn Observer>,
}

impl MemoryPolicyLog {
    /// Creates an empty log using `signer` and a zeroed `root_chain_hash`.
    pub fn new(signer: Box<dyn Signer>) -> Self {
        Self::with_root_chain_hash(signer, [0u8; 32])
    }

    /// Creates an empty log pinned to a specific `root_chain_hash`
    /// (the externally supplied storage-pipeline fingerprint, see Open
    /// Question 2).
    pub fn with_root_chain_hash(signer: Box<dyn Signer>, root_chain_hash: [u8; 32]) -> Self {
        Self {
            signer,
            root_chain_hash,
            state: RwLock::new(State {
                seals: Vec::new(),
                cached_valid: false,
            }),
            metrics: LogMetrics::new(),
            observer: Box::new(NullObserver),
        }
    }

    /// Attaches a non-default observer (the default discards events; use
    /// [`StdoutObserver`](crate::observe::StdoutObserver) for the
    /// printed event stream).
    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }
}

impl PolicyLog for MemoryPolicyLog {
    fn append(&self, policy: PolicyRecord, effective_at: DateTime<Utc>) -> Result<PolicySeal> {
        // Rejecting a non-UTC `effective_at` is enforced by the type
        // system here: `DateTime<Utc>` cannot represent an offset
        // timestamp, so there is nothing left to validate at runtime.
        let start = Instant::now();
        let mut state = self.state.write().expect("policy log lock poisoned");
        let previous = state.seals.last();
        let seal = PolicySeal::create(
            policy,
            effective_at,
            previous,
            self.signer.as_ref(),
            Some(self.root_chain_hash),
        )?;
        state.seals.push(seal.clone());
        state.cached_valid = false;
        let seals_after = state.seals.len() as u32;
        drop(state);

        self.metrics
            .record_append(start.elapsed().as_nanos() as u64, seals_after);
        self.observer
            .on_event(GovernanceEvent::SealAppended { index: seal.index() });
        Ok(seal)
    }

    fn get_policy_at(&self, timestamp: DateTime<Utc>) -> Option<PolicyRecord> {
        let state = self.state.read().expect("policy log lock poisoned");
        policy_at(&state.seals, timestamp).cloned()
    }

    fn get_all_seals(&self) -> Vec<PolicySeal> {
        let state = self.state.read().expect("policy log lock poisoned");
        state.seals.clone()
    }

    fn verify_chain(&self) -> ChainValidationResult {
        {
            let state = self.state.read().expect("policy log lock poisoned");
            if state.cached_valid {
                self.metrics.record_chain_verify(true);
                self.observer.on_event(GovernanceEvent::ChainVerified {
                    valid: true,
                    cache_hit: true,
                });
                return ChainValidationResult::valid();
            }
        }

        let seals = self.get_all_seals();
        let result = verify_seals(&seals, self.signer.as_ref());
        self.metrics.record_chain_verify(false);
        self.observer.on_event(GovernanceEvent::ChainVerified {
            valid: result.is_valid,
            cache_hit: false,
        });

        if result.is_valid {
            let mut state = self.state.write().expect("policy log lock poisoned");
            state.cached_valid = true;
        }
        result
    }

    fn count(&self) -> u32 {
        self.state.read().expect("policy log lock poisoned").seals.len() as u32
    }

    fn metrics(&self) -> &LogMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rules::TtlRule;
    use crate::signer::HashChainSigner;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn rule(name: &str) -> PolicyRecord {
        PolicyRecord::Ttl(TtlRule {
            name: name.to_string(),
            description: String::new(),
            priority: 1,
        })
    }

    #[test]
    fn genesis_append_and_verify() {
        let log = MemoryPolicyLog::new(Box::new(HashChainSigner::new()));
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let seal = log.append(rule("R1"), at).unwrap();

        assert_eq!(log.count(), 1);
        assert_eq!(seal.index(), 0);
        assert_eq!(seal.previous_hash(), [0u8; 32]);
        assert!(log.verify_chain().is_valid);
    }

    #[test]
    fn three_seal_chain_tamper_detection() {
        let log = MemoryPolicyLog::new(Box::new(HashChainSigner::new()));
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        log.append(rule("R1"), t0).unwrap();
        log.append(rule("R2"), t0 + chrono::Duration::minutes(5)).unwrap();
        log.append(rule("R3"), t0 + chrono::Duration::minutes(10)).unwrap();
        assert!(log.verify_chain().is_valid);

        {
            let mut state = log.state.write().unwrap();
            let mut tampered = state.seals[1].clone();
            let mut sig = tampered.signature();
            sig[0] ^= 0xFF;
            tampered = PolicySeal::reconstruct(
                tampered.index(),
                tampered.effective_at(),
                tampered.previous_hash(),
                tampered.policy().clone(),
                tampered.root_chain_hash(),
                sig,
            );
            state.seals[1] = tampered;
            state.cached_valid = false;
        }

        let result = log.verify_chain();
        assert!(!result.is_valid);
        assert!(matches!(result.broken_at_index, Some(1) | Some(2)));
    }

    #[test]
    fn time_indexed_lookup() {
        let log = MemoryPolicyLog::new(Box::new(HashChainSigner::new()));
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        log.append(rule("RA"), t0).unwrap();
        log.append(rule("RB"), t0 + chrono::Duration::minutes(10)).unwrap();
        log.append(rule("RC"), t0 + chrono::Duration::minutes(20)).unwrap();

        assert_eq!(
            log.get_policy_at(t0 + chrono::Duration::minutes(5)).unwrap().name(),
            "RA"
        );
        assert_eq!(
            log.get_policy_at(t0 + chrono::Duration::minutes(15)).unwrap().name(),
            "RB"
        );
        assert_eq!(
            log.get_policy_at(t0 + chrono::Duration::minutes(25)).unwrap().name(),
            "RC"
        );
        assert!(log
            .get_policy_at(t0 - chrono::Duration::days(9999))
            .is_none());
    }

    proptest! {
        /// P5: flipping any single byte of any stored seal's signature
        /// makes `verify_chain` fail at or before that seal's index.
        #[test]
        fn tamper_detection_fails_at_or_before_mutated_index(
            n in 2usize..8,
            mutate_at in 0usize..8,
            byte_offset in 0usize..32,
        ) {
            let log = MemoryPolicyLog::new(Box::new(HashChainSigner::new()));
            let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            for i in 0..n {
                log.append(rule(&format!("r{i}")), t0 + chrono::Duration::seconds(i as i64 * 5)).unwrap();
            }
            let mutate_at = mutate_at % n;
            prop_assume!(log.verify_chain().is_valid);

            {
                let mut state = log.state.write().unwrap();
                let target = &state.seals[mutate_at];
                let mut sig = target.signature();
                let offset = byte_offset % sig.len();
                sig[offset] ^= 0xFF;
                let tampered = PolicySeal::reconstruct(
                    target.index(),
                    target.effective_at(),
                    target.previous_hash(),
                    target.policy().clone(),
                    target.root_chain_hash(),
                    sig,
                );
                state.seals[mutate_at] = tampered;
                state.cached_valid = false;
            }

            let result = log.verify_chain();
            prop_assert!(!result.is_valid);
            prop_assert!(result.broken_at_index.unwrap() as usize >= mutate_at);
        }
    }
}
