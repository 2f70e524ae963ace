//! Pluggable signers over an opaque canonical byte string.
//!
//! Grounded on this crate's prior key-handling idiom (`load_or_derive_keypair`,
//! `sign_payload`, `verify_signature`), adapted to the two concrete
//! variants the governance core requires: a keyless SHA-256 hash chain
//! and Ed25519.

use ed25519_dalek::{Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{GovernanceError, Result};

/// Byte length of an Ed25519 public or private key.
pub const ED25519_KEY_LEN: usize = 32;
/// Byte length of a hash-chain signature (a raw SHA-256 digest).
pub const HASH_CHAIN_SIG_LEN: usize = 32;
/// Byte length of an Ed25519 signature.
pub const ED25519_SIG_LEN: usize = 64;

/// Produces and verifies signatures over an opaque canonical byte string.
///
/// `sign` and `verify` never panic on malformed input; length mismatches
/// and corrupt signatures fail verification by returning `false`, not by
/// raising an error. Only null/empty input is rejected with
/// [`GovernanceError::InvalidArgument`].
pub trait Signer: Send + Sync {
    /// Signs `data`, returning the raw signature bytes.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Verifies `signature` against `data`. Never panics; a malformed or
    /// wrong-length signature simply fails verification.
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;

    /// A stable, human-readable algorithm identifier (e.g. `"SHA256"`,
    /// `"ED25519"`), used as a discriminator in persisted records.
    fn algorithm_name(&self) -> &'static str;
}

/// Constant-time equality check for signature/hash comparisons.
///
/// Uses `subtle`'s vetted constant-time primitive rather than a manual
/// byte loop with early exit.
pub fn constant_time_equals(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Keyless signer: `sign(d) = SHA-256(d)`; `verify` re-hashes and compares
/// in constant time. Requires no key material at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashChainSigner;

impl HashChainSigner {
    /// Creates a new hash-chain signer.
    pub fn new() -> Self {
        Self
    }
}

impl Signer for HashChainSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(GovernanceError::InvalidArgument(
                "cannot sign empty data".into(),
            ));
        }
        let mut hasher = Sha256::new();
        hasher.update(data);
        Ok(hasher.finalize().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        if data.is_empty() || signature.len() != HASH_CHAIN_SIG_LEN {
            return false;
        }
        let mut hasher = Sha256::new();
        hasher.update(data);
        let expected = hasher.finalize();
        constant_time_equals(&expected, signature)
    }

    fn algorithm_name(&self) -> &'static str {
        "SHA256"
    }
}

/// Ed25519 signer. A signer constructed with [`Ed25519Signer::verify_only`]
/// holds no private key material and rejects `sign` with
/// [`GovernanceError::KeyMaterialMissing`].
pub struct Ed25519Signer {
    signing: Option<SigningKey>,
    verifying: VerifyingKey,
}

impl Ed25519Signer {
    /// Builds a signer from a 32-byte seed. Can both sign and verify.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let seed: [u8; ED25519_KEY_LEN] = seed.try_into().map_err(|_| {
            GovernanceError::InvalidArgument(format!(
                "ed25519 seed must be {ED25519_KEY_LEN} bytes, got {}",
                seed.len()
            ))
        })?;
        let signing = SigningKey::from_bytes(&seed);
        let verifying = signing.verifying_key();
        Ok(Self {
            signing: Some(signing),
            verifying,
        })
    }

    /// Generates a fresh random keypair using the OS RNG.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        Self {
            signing: Some(signing),
            verifying,
        }
    }

    /// Builds a verify-only signer from a 32-byte public key. `sign` on the
    /// returned signer always fails with `KeyMaterialMissing`.
    pub fn verify_only(public_key: &[u8]) -> Result<Self> {
        if public_key.len() != ED25519_KEY_LEN {
            return Err(GovernanceError::InvalidArgument(format!(
                "ed25519 public key must be {ED25519_KEY_LEN} bytes, got {}",
                public_key.len()
            )));
        }
        let verifying = VerifyingKey::try_from(public_key).map_err(|err| {
            GovernanceError::InvalidArgument(format!("invalid ed25519 public key: {err}"))
        })?;
        Ok(Self {
            signing: None,
            verifying,
        })
    }

    /// Returns the 32-byte public key associated with this signer.
    pub fn public_key_bytes(&self) -> [u8; ED25519_KEY_LEN] {
        self.verifying.to_bytes()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(GovernanceError::InvalidArgument(
                "cannot sign empty data".into(),
            ));
        }
        let signing = self.signing.as_ref().ok_or(GovernanceError::KeyMaterialMissing)?;
        Ok(signing.sign(data).to_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        if data.is_empty() || signature.len() != ED25519_SIG_LEN {
            return false;
        }
        let sig = match ed25519_dalek::Signature::from_slice(signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        self.verifying.verify(data, &sig).is_ok()
    }

    fn algorithm_name(&self) -> &'static str {
        "ED25519"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_chain_signs_and_verifies() {
        let signer = HashChainSigner::new();
        let sig = signer.sign(b"canonical-input").unwrap();
        assert_eq!(sig.len(), HASH_CHAIN_SIG_LEN);
        assert!(signer.verify(b"canonical-input", &sig));
        assert!(!signer.verify(b"different-input", &sig));
    }

    #[test]
    fn hash_chain_rejects_empty_input() {
        let signer = HashChainSigner::new();
        assert!(signer.sign(b"").is_err());
    }

    #[test]
    fn hash_chain_verify_rejects_wrong_length_signature() {
        let signer = HashChainSigner::new();
        assert!(!signer.verify(b"data", &[0u8; 10]));
    }

    #[test]
    fn ed25519_signs_and_verifies() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"payload").unwrap();
        assert_eq!(sig.len(), ED25519_SIG_LEN);
        assert!(signer.verify(b"payload", &sig));
        assert!(!signer.verify(b"tampered", &sig));
    }

    #[test]
    fn ed25519_verify_only_rejects_sign() {
        let full = Ed25519Signer::generate();
        let verify_only = Ed25519Signer::verify_only(&full.public_key_bytes()).unwrap();
        let sig = full.sign(b"payload").unwrap();

        assert!(verify_only.verify(b"payload", &sig));
        assert!(matches!(
            verify_only.sign(b"payload"),
            Err(GovernanceError::KeyMaterialMissing)
        ));
    }

    #[test]
    fn ed25519_rejects_malformed_length_inputs() {
        assert!(Ed25519Signer::from_seed(&[0u8; 4]).is_err());
        assert!(Ed25519Signer::verify_only(&[0u8; 4]).is_err());
    }

    #[test]
    fn constant_time_equals_matches_eq_semantics() {
        assert!(constant_time_equals(b"abcdef", b"abcdef"));
        assert!(!constant_time_equals(b"abcdef", b"abcdeg"));
        assert!(!constant_time_equals(b"abc", b"abcd"));
    }
}
