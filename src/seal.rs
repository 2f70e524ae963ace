//! `PolicySeal`: an immutable, signed, hash-chained ledger entry.
//!
//! Grounded on the genesis/linkage conventions of
//! `other_examples/c9078ead_..._audit_log.rs`'s `AuditEntry` (the
//! `compute_hash`/`signing_data` split, zero-bytes genesis previous hash)
//! and on this crate's canonical-bytes-then-hash-then-sign proposal flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::rules::PolicyRecord;
use crate::error::{GovernanceError, Result};
use crate::signer::{constant_time_equals, Signer};

/// Links a seal to its predecessor's signature.
///
/// §3/S2 requires `previous_hash == seals[i-1].signature` verbatim, and the
/// default `HashChainSigner` already produces an exactly-32-byte signature,
/// so the common case is a straight copy. A signer can produce a wider
/// signature (Ed25519 produces 64 bytes), which the fixed-width
/// `previous_hash` field cannot hold verbatim; rather than truncate — which
/// would silently discard half the signature and let unrelated signatures
/// collide on their shared prefix — that case folds the full signature down
/// with SHA-256 instead.
pub fn link_hash(signature: &[u8]) -> [u8; 32] {
    if signature.len() == 32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(signature);
        return out;
    }
    let mut hasher = Sha256::new();
    hasher.update(signature);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Fixed canonical rendering for `effective_at` in the signature input and
/// in the persisted JSONL form: always UTC, always 7 fractional digits,
/// always a trailing `Z`.
pub fn format_effective_at(instant: &DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%.7fZ").to_string()
}

/// An immutable, signed entry in the policy ledger.
///
/// `PolicySeal` itself carries no interior mutability; every accessor that
/// would otherwise expose a `&[u8; 32]` returns an owned copy so callers
/// cannot corrupt chain state by mutating a borrowed array in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicySeal {
    index: u32,
    effective_at: DateTime<Utc>,
    previous_hash: [u8; 32],
    policy: PolicyRecord,
    root_chain_hash: [u8; 32],
    signature: Vec<u8>,
}

impl PolicySeal {
    /// Creates and signs a new seal extending `previous` (or a genesis seal
    /// if `previous` is `None`).
    ///
    /// Rejects `effective_at < previous.effective_at` with
    /// `InvalidArgument`. Computes `index` and `previous_hash` from
    /// `previous`, then signs the canonical encoding exactly once.
    pub fn create(
        policy: PolicyRecord,
        effective_at: DateTime<Utc>,
        previous: Option<&PolicySeal>,
        signer: &dyn Signer,
        root_chain_hash: Option<[u8; 32]>,
    ) -> Result<Self> {
        if let Some(previous) = previous {
            if effective_at < previous.effective_at {
                return Err(GovernanceError::InvalidArgument(format!(
                    "effective_at {} precedes previous seal's {}",
                    format_effective_at(&effective_at),
                    format_effective_at(&previous.effective_at)
                )));
            }
        }

        let index = previous.map(|p| p.index + 1).unwrap_or(0);
        let previous_hash = previous
            .map(|p| link_hash(&p.signature))
            .unwrap_or([0u8; 32]);
        let root_chain_hash = root_chain_hash.unwrap_or([0u8; 32]);

        let mut seal = PolicySeal {
            index,
            effective_at,
            previous_hash,
            policy,
            root_chain_hash,
            signature: Vec::new(),
        };
        let input = seal.canonical_signature_input();
        seal.signature = signer.sign(&input)?;
        Ok(seal)
    }

    /// Rebuilds a seal from persisted fields without re-signing. Used by
    /// `FilePolicyLog` to reconstruct seals on reload; signatures are
    /// trusted at load time per the documented trust-on-load policy and
    /// verified explicitly by a subsequent `verify_chain` call.
    pub fn reconstruct(
        index: u32,
        effective_at: DateTime<Utc>,
        previous_hash: [u8; 32],
        policy: PolicyRecord,
        root_chain_hash: [u8; 32],
        signature: Vec<u8>,
    ) -> Self {
        PolicySeal {
            index,
            effective_at,
            previous_hash,
            policy,
            root_chain_hash,
            signature,
        }
    }

    /// 0-based sequence position.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Instant this seal's policy became active.
    pub fn effective_at(&self) -> DateTime<Utc> {
        self.effective_at
    }

    /// Defensive copy of the previous seal's signature (or zero bytes at
    /// genesis).
    pub fn previous_hash(&self) -> [u8; 32] {
        self.previous_hash
    }

    /// The sealed policy rule.
    pub fn policy(&self) -> &PolicyRecord {
        &self.policy
    }

    /// Defensive copy of the storage-pipeline fingerprint at seal time.
    pub fn root_chain_hash(&self) -> [u8; 32] {
        self.root_chain_hash
    }

    /// Defensive copy of the signer output over the canonical signature
    /// input.
    pub fn signature(&self) -> Vec<u8> {
        self.signature.clone()
    }

    /// The deterministic byte encoding that is signed and verified.
    ///
    /// Field order and format are fixed: type id, name, description,
    /// priority, ISO-8601 `effective_at`, base64 `previous_hash`, index,
    /// base64 `root_chain_hash`. Any deviation in canonicalization between
    /// producer and verifier breaks chain validation by design.
    pub fn canonical_signature_input(&self) -> Vec<u8> {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

        let (type_id, name, description, priority) = match &self.policy {
            PolicyRecord::Ttl(rule) => ("ttl", rule.name.as_str(), rule.description.as_str(), rule.priority),
            PolicyRecord::TagAccess(rule) => {
                ("tag_access", rule.name.as_str(), rule.description.as_str(), rule.priority)
            }
            PolicyRecord::Custom(rule) => {
                ("custom", rule.name.as_str(), rule.description.as_str(), rule.priority)
            }
        };

        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(type_id.as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(name.as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(description.as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(priority.to_string().as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(format_effective_at(&self.effective_at).as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(BASE64.encode(self.previous_hash).as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(self.index.to_string().as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(BASE64.encode(self.root_chain_hash).as_bytes());
        buf
    }

    /// Re-encodes this seal and verifies its signature against `signer`.
    pub fn verify_signature(&self, signer: &dyn Signer) -> bool {
        let input = self.canonical_signature_input();
        signer.verify(&input, &self.signature)
    }

    /// Constant-time comparison of `previous_hash` against `expected`.
    pub fn previous_hash_matches(&self, expected: &[u8; 32]) -> bool {
        constant_time_equals(&self.previous_hash, expected)
    }
}
