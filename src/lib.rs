#![deny(missing_docs)]

//! # acorn-governance
//!
//! The Policy Governance Core of AcornDB: a tamper-evident, append-only
//! ledger for administrative policy rules. Every policy change is signed
//! and hash-chained to its predecessor ([`seal`]); the chain as a whole
//! can be verified in one pass or proven to contain a specific entry via
//! a Merkle inclusion proof ([`merkle`]). A [`PolicyLog`](log::PolicyLog)
//! stores the chain in memory or on disk; a [`PolicyEngine`](engine::PolicyEngine)
//! evaluates registered rules against entities; [`GovernedPolicyEngine`](governed::GovernedPolicyEngine)
//! composes the two so policy changes are sealed before they take effect,
//! and [`PolicyEnforcement`](enforcement::PolicyEnforcement) wires the
//! whole thing into an external read/write pipeline.
//!
//! ## Usage
//!
//! ```rust
//! use acorn_governance::engine::rules::TtlRule;
//! use acorn_governance::engine::PolicyRule;
//! use acorn_governance::log::{MemoryPolicyLog, PolicyLog};
//! use acorn_governance::signer::HashChainSigner;
//! use chrono::Utc;
//!
//! let log = MemoryPolicyLog::new(Box::new(HashChainSigner::new()));
//! let rule = TtlRule::default();
//! log.append(rule.to_record(), Utc::now()).unwrap();
//! assert!(log.verify_chain().is_valid);
//! ```

pub mod enforcement;
pub mod engine;
pub mod error;
pub mod governed;
pub mod log;
pub mod merkle;
pub mod observe;
#[cfg(test)]
mod proptests;
pub mod seal;
pub mod signer;

pub use enforcement::{EnforcementOptions, PayloadView, PolicyEnforcement};
pub use engine::{Entity, EvalContext, EvaluationResult, PolicyEngine, PolicyEngineOptions, PolicyRule, ValidationResult};
pub use error::{GovernanceError, Result};
pub use governed::GovernedPolicyEngine;
pub use log::{ChainValidationResult, FilePolicyLog, FilePolicyLogOptions, MemoryPolicyLog, PolicyLog};
pub use merkle::{MerkleProof, MerkleTree};
pub use observe::{GovernanceEvent, LogMetrics, NullObserver, Observer, StdoutObserver};
pub use seal::PolicySeal;
pub use signer::{Ed25519Signer, HashChainSigner, Signer};
