//! `GovernedPolicyEngine`: a `PolicyEngine` wrapped around a `PolicyLog`
//! so policy changes are sealed before they take effect and every proxy
//! call refuses to serve results over a chain that hasn't verified.
//!
//! Grounded on this crate's decorator-over-trait-object composition
//! style (`StaticPolicy`/`MultisigPolicy`/`StakePolicy` all implemented
//! a common membership-policy trait and were composed by callers
//! identically); this wraps a `PolicyEngine` and a `PolicyLog` the same
//! way rather than subclassing either.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::engine::{Entity, PolicyEngine, PolicyRule, ValidationResult};
use crate::error::{GovernanceError, Result};
use crate::log::{ChainValidationResult, PolicyLog};
use crate::observe::{GovernanceEvent, NullObserver, Observer};
use crate::seal::PolicySeal;

/// Wraps a base [`PolicyEngine`] and a [`PolicyLog`] so that every policy
/// mutation is sealed and every read is gated on a verified chain.
pub struct GovernedPolicyEngine {
    base: PolicyEngine,
    log: Box<dyn PolicyLog>,
    chain_verified: AtomicBool,
    chain_tainted: AtomicBool,
    disposed: AtomicBool,
    observer: Box<dyn Observer>,
}

impl GovernedPolicyEngine {
    /// Bootstraps a `GovernedPolicyEngine` from an existing log.
    ///
    /// If `verify_on_startup`, verifies the whole chain before loading a
    /// single policy; a broken chain aborts construction with
    /// `ChainIntegrity`. Every sealed policy is then registered on the
    /// base engine in log order.
    pub fn bootstrap(
        base: PolicyEngine,
        log: Box<dyn PolicyLog>,
        verify_on_startup: bool,
    ) -> Result<Self> {
        let chain_verified = AtomicBool::new(false);
        if verify_on_startup {
            let result = log.verify_chain();
            if !result.is_valid {
                return Err(GovernanceError::ChainIntegrity {
                    broken_at_index: result.broken_at_index,
                    details: result.details.unwrap_or_default(),
                });
            }
            chain_verified.store(true, Ordering::SeqCst);
        }

        for seal in log.get_all_seals() {
            base.register_policy(seal.policy().clone().into_rule());
        }

        Ok(Self {
            base,
            log,
            chain_verified,
            chain_tainted: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            observer: Box::new(NullObserver),
        })
    }

    /// Attaches a non-default observer.
    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Signs, persists, and registers `rule` as the new policy effective
    /// at `effective_at`.
    pub fn append_policy(
        &self,
        rule: Box<dyn PolicyRule>,
        effective_at: DateTime<Utc>,
    ) -> Result<PolicySeal> {
        self.fail_if_disposed()?;
        let record = rule.to_record();
        let seal = self.log.append(record, effective_at)?;
        self.base.register_policy(rule);
        Ok(seal)
    }

    /// Delegates to the underlying log's `verify_chain`, recording the
    /// outcome as this engine's latched `chain_verified` state.
    pub fn verify_chain(&self) -> ChainValidationResult {
        let result = self.log.verify_chain();
        self.chain_verified.store(result.is_valid, Ordering::SeqCst);
        self.chain_tainted.store(!result.is_valid, Ordering::SeqCst);
        result
    }

    /// Clears the latched verification failure so the next proxy call
    /// re-verifies instead of failing fast. An external, deliberate reset
    /// (e.g. after an operator repairs the log).
    pub fn reset_chain_verification(&self) {
        self.chain_tainted.store(false, Ordering::SeqCst);
        self.chain_verified.store(false, Ordering::SeqCst);
    }

    /// Verifies the chain exactly once and caches success; once verification
    /// has failed, every subsequent call fails immediately without
    /// re-verifying until [`reset_chain_verification`](Self::reset_chain_verification).
    fn ensure_chain_verified(&self) -> Result<()> {
        if self.chain_tainted.load(Ordering::SeqCst) {
            return Err(GovernanceError::ChainIntegrity {
                broken_at_index: None,
                details: "chain failed verification; reset required".to_string(),
            });
        }
        if self.chain_verified.load(Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.verify_chain();
        if result.is_valid {
            Ok(())
        } else {
            Err(GovernanceError::ChainIntegrity {
                broken_at_index: result.broken_at_index,
                details: result.details.unwrap_or_default(),
            })
        }
    }

    fn fail_if_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(GovernanceError::InvalidArgument(
                "engine has been disposed".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Evaluates every registered policy against `entity`, gated on a
    /// verified chain.
    pub fn validate(&self, entity: Option<&Entity>) -> Result<ValidationResult> {
        self.ensure_chain_verified()?;
        Ok(self.base.validate(entity))
    }

    /// Evaluates and applies policy actions to `entity`, gated on a
    /// verified chain.
    pub fn apply_policies(&self, entity: &mut Entity) -> Result<ValidationResult> {
        self.ensure_chain_verified()?;
        self.base.apply_policies(entity)
    }

    /// Tag-based role check, gated on a verified chain.
    pub fn validate_access(&self, entity: Option<&Entity>, role: &str) -> Result<bool> {
        self.ensure_chain_verified()?;
        Ok(self.base.validate_access(entity, role))
    }

    /// TTL sweep, gated on a verified chain.
    pub fn enforce_ttl(&self, entities: &mut [Entity]) -> Result<()> {
        self.ensure_chain_verified()?;
        self.base.enforce_ttl(entities)
    }

    /// Passes through to the base engine's registration, but — unlike
    /// `append_policy` — bypasses the audit trail, so a warning is raised.
    pub fn register_policy(&self, rule: Box<dyn PolicyRule>) {
        self.observer.on_event(GovernanceEvent::UnauditedRegistration {
            policy: rule.name(),
        });
        self.base.register_policy(rule);
    }

    /// Passes through to the base engine's removal; also bypasses the
    /// audit trail.
    pub fn unregister_policy(&self, name: &str) {
        self.observer
            .on_event(GovernanceEvent::UnauditedRegistration { policy: name });
        self.base.unregister_policy(name);
    }

    /// Marks this engine disposed, forwarding to the log's own `close`, and
    /// fails fast on subsequent `append_policy` calls. Idempotent.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.log.close();
    }
}
