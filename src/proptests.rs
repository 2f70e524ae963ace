//! Property-based tests for the chain and Merkle invariants in spec.md §8
//! (P1-P3, P5, P6). Colocated under `#[cfg(test)]` rather than a `tests/`
//! integration directory, matching the teacher's test placement; `proptest`
//! is a teacher dev-dependency reused here for exactly the round-trip /
//! invariant style it's already pulled in for.

#![cfg(test)]

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::engine::rules::{PolicyRecord, TtlRule};
use crate::log::{MemoryPolicyLog, PolicyLog};
use crate::merkle::MerkleTree;
use crate::signer::HashChainSigner;

fn rule(name: &str) -> PolicyRecord {
    PolicyRecord::Ttl(TtlRule {
        name: name.to_string(),
        description: String::new(),
        priority: 1,
    })
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

proptest! {
    /// P2/P3: for any sequence of non-negative offsets, appending in order
    /// yields seals with sequential indices and non-decreasing
    /// `effective_at`, and the chain verifies.
    #[test]
    fn sequence_and_monotone_time_hold_for_any_append_order(offsets in proptest::collection::vec(0u32..3600, 1..12)) {
        let log = MemoryPolicyLog::new(Box::new(HashChainSigner::new()));
        let t0 = base_time();

        let mut cumulative = 0u32;
        for (i, offset) in offsets.iter().enumerate() {
            cumulative += offset;
            let at = t0 + chrono::Duration::seconds(cumulative as i64);
            let seal = log.append(rule(&format!("r{i}")), at).unwrap();
            prop_assert_eq!(seal.index(), i as u32);
        }

        let seals = log.get_all_seals();
        for i in 1..seals.len() {
            prop_assert!(seals[i].effective_at() >= seals[i - 1].effective_at());
            prop_assert_eq!(seals[i].index(), i as u32);
        }
        prop_assert!(log.verify_chain().is_valid);
    }

    /// P6: every leaf of a Merkle tree built from an arbitrary number of
    /// appended seals produces a proof that verifies against the tree's
    /// current root.
    #[test]
    fn merkle_proof_sound_for_any_seal_count(n in 1usize..40) {
        let log = MemoryPolicyLog::new(Box::new(HashChainSigner::new()));
        let t0 = base_time();
        for i in 0..n {
            log.append(rule(&format!("r{i}")), t0 + chrono::Duration::seconds(i as i64)).unwrap();
        }
        let seals = log.get_all_seals();
        let mut tree = MerkleTree::from_seals(&seals);
        let root = tree.root_hash().unwrap();

        for i in 0..n {
            let proof = tree.generate_proof(i).unwrap();
            prop_assert_eq!(proof.root_hash(), root);
            prop_assert!(proof.verify());
        }
    }
}
