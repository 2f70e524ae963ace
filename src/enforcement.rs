//! `PolicyEnforcement`: a pipeline stage that gates reads/writes in an
//! external storage pipeline on chain integrity and policy evaluation.
//!
//! Grounded on `other_examples/f8a4cdd6_..._pipeline-stage.rs`'s
//! `GuardrailStage`/`StageOutcome` shape, adapted to this crate's
//! synchronous style — the core carries no async runtime dependency, so
//! this stage exposes plain `on_read`/`on_write` rather than futures.

use std::sync::RwLock;

use crate::engine::{Entity, PolicyEngine};
use crate::error::{GovernanceError, Result};
use crate::log::PolicyLog;
use crate::observe::{GovernanceEvent, NullObserver, Observer};

/// Deserializes a pipeline payload into the entity view policies are
/// evaluated against. Optional: a stage without one runs chain
/// verification only and treats every payload as policy-valid.
pub trait PayloadView: Send + Sync {
    /// Attempts to build an [`Entity`] view of `bytes`, or `None` if the
    /// payload isn't recognized as one.
    fn view(&self, bytes: &[u8]) -> Option<Entity>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    Unverified,
    Verifying,
    Verified,
    Invalid,
}

/// Construction-time behavior switches for [`PolicyEnforcement`].
#[derive(Debug, Clone, Copy)]
pub struct EnforcementOptions {
    /// Fail the call outright when policy evaluation is invalid.
    pub throw_on_violation: bool,
    /// On the read path, when the failure reason mentions expiry, return
    /// an empty payload instead of the original bytes.
    pub return_null_on_ttl_expired: bool,
}

impl Default for EnforcementOptions {
    fn default() -> Self {
        Self {
            throw_on_violation: true,
            return_null_on_ttl_expired: true,
        }
    }
}

/// A storage-pipeline stage gating reads/writes on chain integrity and
/// policy evaluation.
pub struct PolicyEnforcement {
    engine: PolicyEngine,
    log: Option<Box<dyn PolicyLog>>,
    view: Option<Box<dyn PayloadView>>,
    options: EnforcementOptions,
    chain_state: RwLock<ChainState>,
    observer: Box<dyn Observer>,
}

impl PolicyEnforcement {
    /// Builds a stage around `engine`, optionally wired to a `log` for
    /// chain verification and a `view` for entity extraction.
    pub fn new(
        engine: PolicyEngine,
        log: Option<Box<dyn PolicyLog>>,
        view: Option<Box<dyn PayloadView>>,
        options: EnforcementOptions,
    ) -> Self {
        Self {
            engine,
            log,
            view,
            options,
            chain_state: RwLock::new(ChainState::Unverified),
            observer: Box::new(NullObserver),
        }
    }

    /// Attaches a non-default observer.
    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Resets the cached chain-verification state; used after an append
    /// so the next call re-verifies instead of trusting a stale result.
    pub fn invalidate_chain_cache(&self) {
        *self.chain_state.write().expect("chain_state poisoned") = ChainState::Unverified;
    }

    fn set_state(&self, state: ChainState) {
        *self.chain_state.write().expect("chain_state poisoned") = state;
        let label = match state {
            ChainState::Unverified => "Unverified",
            ChainState::Verifying => "Verifying",
            ChainState::Verified => "Verified",
            ChainState::Invalid => "Invalid",
        };
        self.observer
            .on_event(GovernanceEvent::ChainStateChanged { state: label });
    }

    fn verify_chain_integrity(&self) -> Result<()> {
        let log = match &self.log {
            Some(log) => log,
            None => return Ok(()),
        };

        {
            let state = *self.chain_state.read().expect("chain_state poisoned");
            match state {
                ChainState::Verified => return Ok(()),
                ChainState::Invalid => {
                    return Err(GovernanceError::ChainIntegrity {
                        broken_at_index: None,
                        details: "chain previously failed verification".to_string(),
                    })
                }
                _ => {}
            }
        }

        self.set_state(ChainState::Verifying);
        let result = log.verify_chain();
        if result.is_valid {
            self.set_state(ChainState::Verified);
            Ok(())
        } else {
            self.set_state(ChainState::Invalid);
            Err(GovernanceError::ChainIntegrity {
                broken_at_index: result.broken_at_index,
                details: result.details.unwrap_or_default(),
            })
        }
    }

    fn run(&self, bytes: &[u8], is_read: bool) -> Result<Vec<u8>> {
        self.verify_chain_integrity()?;

        let entity = self.view.as_ref().and_then(|view| view.view(bytes));
        let validation = self.engine.validate(entity.as_ref());
        if validation.is_valid {
            return Ok(bytes.to_vec());
        }

        if self.options.throw_on_violation {
            return Err(GovernanceError::PolicyViolation {
                policy: entity.map(|e| e.identity).unwrap_or_default(),
                reason: validation.failure_reason.unwrap_or_default(),
            });
        }

        let is_expired = validation
            .failure_reason
            .as_deref()
            .map(|r| r.contains("expired"))
            .unwrap_or(false);
        if is_read && is_expired && self.options.return_null_on_ttl_expired {
            return Ok(Vec::new());
        }

        eprintln!(
            "ACORN|mod=ENFORCE|evt=VIOLATION|read={}|reason={}",
            is_read,
            validation.failure_reason.as_deref().unwrap_or("")
        );
        Ok(bytes.to_vec())
    }

    /// Gates a write payload on chain integrity and policy evaluation.
    pub fn on_write(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.run(bytes, false)
    }

    /// Gates a read payload on chain integrity and policy evaluation;
    /// may return an empty payload for an expired entity, see
    /// [`EnforcementOptions::return_null_on_ttl_expired`].
    pub fn on_read(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.run(bytes, true)
    }
}
