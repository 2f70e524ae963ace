//! `PolicyEngine`: policy registration, evaluation, tag-based access
//! control, TTL enforcement, and evaluation caching.
//!
//! Grounded on the capability-trait-with-default-registration shape of
//! this crate's prior membership-policy family
//! (`StaticPolicy`/`MultisigPolicy`/`StakePolicy` all implemented the
//! same trait and were composed by callers the same way), and on its
//! `Mutex<HashMap<...>>` concurrency precedent, generalized here to
//! `RwLock` per this core's explicit reader/writer lock requirement.

pub mod cache;
pub mod rules;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{Duration, Utc};

use self::cache::{cache_key, CacheEntry};
pub use self::rules::{CustomRule, EvalContext, Entity, EvaluationResult, PolicyRecord, PolicyRule, TagAccessRule, TtlRule, ValidationResult};
use crate::error::{GovernanceError, Result};
use crate::observe::{GovernanceEvent, NullObserver, Observer};

/// Construction-time behavior switches for [`PolicyEngine`].
#[derive(Debug, Clone)]
pub struct PolicyEngineOptions {
    /// If true, `apply_policies` fails with `PolicyViolation` on the first
    /// failing policy instead of merely reporting it.
    pub enforce_all: bool,
    /// Result of `validate_access` for an entity with no tags.
    pub default_access_when_no_tags: bool,
    /// Whether `validate` consults/populates the evaluation cache.
    pub enable_evaluation_cache: bool,
    /// Time-to-live for cached evaluation results.
    pub evaluation_cache_ttl: Duration,
}

impl Default for PolicyEngineOptions {
    fn default() -> Self {
        Self {
            enforce_all: true,
            default_access_when_no_tags: false,
            enable_evaluation_cache: true,
            evaluation_cache_ttl: Duration::seconds(30),
        }
    }
}

/// Registers and evaluates policy rules against entities.
///
/// `policies` and `evaluation_cache` are concurrent maps guarded by
/// `RwLock`; `tag_permissions` additionally gives each tag's role set its
/// own lock so concurrent grant/revoke on different tags don't contend.
/// `policy_version` is the cache's epoch: every register/unregister bumps
/// it and clears the cache.
pub struct PolicyEngine {
    policies: RwLock<HashMap<String, Box<dyn PolicyRule>>>,
    tag_permissions: RwLock<HashMap<String, RwLock<HashSet<String>>>>,
    evaluation_cache: RwLock<HashMap<String, CacheEntry>>,
    policy_version: AtomicU64,
    options: PolicyEngineOptions,
    observer: Box<dyn Observer>,
}

impl PolicyEngine {
    /// Builds an engine with the default TTL and tag-access rules already
    /// registered.
    pub fn new(options: PolicyEngineOptions) -> Self {
        let engine = Self {
            policies: RwLock::new(HashMap::new()),
            tag_permissions: RwLock::new(HashMap::new()),
            evaluation_cache: RwLock::new(HashMap::new()),
            policy_version: AtomicU64::new(0),
            options,
            observer: Box::new(NullObserver),
        };
        engine.register_policy(Box::new(TtlRule::default()));
        engine.register_policy(Box::new(TagAccessRule::default()));
        engine
    }

    /// Attaches a non-default observer.
    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Grants `role` (or `"*"` for any role) access to entities carrying
    /// `tag`.
    pub fn grant_tag_role(&self, tag: impl Into<String>, role: impl Into<String>) {
        let tag = tag.into();
        let permissions = self.tag_permissions.read().expect("tag_permissions poisoned");
        if let Some(roles) = permissions.get(&tag) {
            roles.write().expect("tag role set poisoned").insert(role.into());
            return;
        }
        drop(permissions);
        let mut permissions = self.tag_permissions.write().expect("tag_permissions poisoned");
        permissions
            .entry(tag)
            .or_insert_with(|| RwLock::new(HashSet::new()))
            .write()
            .expect("tag role set poisoned")
            .insert(role.into());
    }

    /// Current policy epoch, bumped on every register/unregister.
    pub fn policy_version(&self) -> u64 {
        self.policy_version.load(Ordering::SeqCst)
    }

    /// Registers `rule`, replacing any existing rule of the same name.
    /// Bumps `policy_version` and clears the evaluation cache.
    pub fn register_policy(&self, rule: Box<dyn PolicyRule>) {
        let name = rule.name().to_string();
        self.policies
            .write()
            .expect("policies poisoned")
            .insert(name, rule);
        self.bump_version_and_clear_cache();
    }

    /// Removes the policy named `name`, if present. Bumps `policy_version`
    /// and clears the evaluation cache regardless of whether a policy was
    /// actually removed.
    pub fn unregister_policy(&self, name: &str) {
        self.policies.write().expect("policies poisoned").remove(name);
        self.bump_version_and_clear_cache();
    }

    fn bump_version_and_clear_cache(&self) {
        self.policy_version.fetch_add(1, Ordering::SeqCst);
        self.evaluation_cache
            .write()
            .expect("evaluation_cache poisoned")
            .clear();
    }

    fn ordered_policies(&self) -> Vec<(String, i32)> {
        let policies = self.policies.read().expect("policies poisoned");
        let mut ordered: Vec<(String, i32)> = policies
            .values()
            .map(|rule| (rule.name().to_string(), rule.priority()))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ordered
    }

    /// Evaluates every registered policy against `entity`, highest
    /// priority first, pairing each result with the name of the policy
    /// that produced it so callers can attribute a failure to its rule.
    fn evaluate_all(&self, entity: &Entity, ctx: &EvalContext) -> Vec<(String, EvaluationResult)> {
        let order = self.ordered_policies();
        let policies = self.policies.read().expect("policies poisoned");
        order
            .into_iter()
            .filter_map(|(name, _)| {
                policies
                    .get(&name)
                    .map(|rule| (name.clone(), rule.evaluate(entity, ctx)))
            })
            .collect()
    }

    /// Evaluates every registered policy against `entity`, highest
    /// priority first, using the evaluation cache when enabled and fresh.
    pub fn validate(&self, entity: Option<&Entity>) -> ValidationResult {
        let entity = match entity {
            Some(entity) => entity,
            None => return ValidationResult::invalid("Entity is null"),
        };

        let current_version = self.policy_version();
        let key = cache_key(entity, current_version);
        let now = Utc::now();

        if self.options.enable_evaluation_cache {
            let cache = self.evaluation_cache.read().expect("evaluation_cache poisoned");
            if let Some(entry) = cache.get(&key) {
                if entry.policy_version == current_version && now < entry.expires_at {
                    return entry.result.clone();
                }
            }
        }

        let ctx = EvalContext::at(now);
        let results = self.evaluate_all(entity, &ctx);
        let validation = rules::aggregate(results.into_iter().map(|(_, result)| result).collect());

        if self.options.enable_evaluation_cache {
            let mut cache = self.evaluation_cache.write().expect("evaluation_cache poisoned");
            cache.insert(
                key,
                CacheEntry {
                    result: validation.clone(),
                    policy_version: current_version,
                    expires_at: now + self.options.evaluation_cache_ttl,
                },
            );
        }

        validation
    }

    /// Evaluates `entity`, raises a `PolicyEvaluated` observer event,
    /// executes the actions of every failing policy, and — if
    /// `enforce_all` is set — fails loudly on the first violation instead
    /// of merely reporting it.
    pub fn apply_policies(&self, entity: &mut Entity) -> Result<ValidationResult> {
        let now = Utc::now();
        let ctx = EvalContext::at(now);
        let results = self.evaluate_all(entity, &ctx);
        let validation = rules::aggregate(
            results.iter().map(|(_, result)| result.clone()).collect(),
        );

        self.observer.on_event(GovernanceEvent::PolicyEvaluated {
            passed: validation.is_valid,
            policy_count: results.len(),
        });

        for (name, result) in &results {
            if result.passed {
                continue;
            }
            if self.options.enforce_all {
                return Err(GovernanceError::PolicyViolation {
                    policy: name.clone(),
                    reason: result.reason.clone().unwrap_or_default(),
                });
            }
            self.run_actions(entity, name, result)?;
        }

        Ok(validation)
    }

    fn run_actions(&self, entity: &mut Entity, policy_name: &str, result: &EvaluationResult) -> Result<()> {
        for action in &result.actions {
            let (verb, target) = match action.split_once(':') {
                Some((v, t)) => (v, Some(t)),
                None => (action.as_str(), None),
            };
            match verb {
                "REDACT" => {
                    if let Some(field) = target {
                        entity.redact_field(field);
                    }
                }
                "DELETE" => {
                    // No-op in the engine; signaled to the caller via the
                    // returned `ValidationResult`/actions list.
                }
                "DENY" => {
                    return Err(GovernanceError::PolicyViolation {
                        policy: policy_name.to_string(),
                        reason: result.reason.clone().unwrap_or_default(),
                    });
                }
                "WARN" => {
                    eprintln!(
                        "ACORN|mod=ENGINE|evt=WARN|entity={}|reason={}",
                        entity.identity,
                        result.reason.as_deref().unwrap_or("")
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Tag-based role check. A `None` entity has no subject and is always
    /// permitted; an empty `role` is never permitted.
    pub fn validate_access(&self, entity: Option<&Entity>, role: &str) -> bool {
        if entity.is_none() {
            return true;
        }
        if role.is_empty() {
            return false;
        }
        let entity = entity.unwrap();
        match &entity.tags {
            None => self.options.default_access_when_no_tags,
            Some(tags) if tags.is_empty() => self.options.default_access_when_no_tags,
            Some(tags) => {
                let permissions = self.tag_permissions.read().expect("tag_permissions poisoned");
                tags.iter().any(|tag| {
                    permissions
                        .get(tag)
                        .map(|roles| {
                            let roles = roles.read().expect("tag role set poisoned");
                            roles.contains(role) || roles.contains("*")
                        })
                        .unwrap_or(false)
                })
            }
        }
    }

    /// Evaluates only the TTL rule against each entity in `entities` and
    /// runs the actions of any that fail; intended for background sweeps.
    pub fn enforce_ttl(&self, entities: &mut [Entity]) -> Result<()> {
        let now = Utc::now();
        let ctx = EvalContext::at(now);
        let ttl = TtlRule::default();
        for entity in entities.iter_mut() {
            let result = ttl.evaluate(entity, &ctx);
            if !result.passed {
                self.run_actions(entity, ttl.name(), &result)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_null_entity_is_invalid() {
        let engine = PolicyEngine::new(PolicyEngineOptions::default());
        let result = engine.validate(None);
        assert!(!result.is_valid);
        assert_eq!(result.failure_reason.as_deref(), Some("Entity is null"));
    }

    #[test]
    fn register_and_unregister_invalidate_cache() {
        let engine = PolicyEngine::new(PolicyEngineOptions::default());
        let entity = Entity::new("e1");
        let _ = engine.validate(Some(&entity));
        let version_before = engine.policy_version();

        engine.register_policy(Box::new(CustomRule {
            name: "needs-owner".to_string(),
            description: String::new(),
            priority: 10,
            tags: BTreeSet::new(),
            required_fields: vec!["owner".to_string()],
            on_violation_actions: vec![],
        }));

        assert!(engine.policy_version() > version_before);
        let result = engine.validate(Some(&entity));
        assert!(!result.is_valid);

        engine.unregister_policy("needs-owner");
        let result = engine.validate(Some(&entity));
        assert!(result.is_valid);
    }

    #[test]
    fn validate_access_tag_rules() {
        let engine = PolicyEngine::new(PolicyEngineOptions {
            default_access_when_no_tags: false,
            ..PolicyEngineOptions::default()
        });
        engine.grant_tag_role("admin", "root");
        engine.grant_tag_role("public", "*");

        let admin_entity = Entity::new("e1").with_tags(["admin".to_string()]);
        let public_entity = Entity::new("e2").with_tags(["public".to_string()]);
        let untagged = Entity::new("e3");

        assert!(engine.validate_access(Some(&admin_entity), "root"));
        assert!(!engine.validate_access(Some(&admin_entity), "guest"));
        assert!(engine.validate_access(Some(&public_entity), "anyone"));
        assert!(!engine.validate_access(Some(&untagged), "root"));
        assert!(engine.validate_access(None, "root"));
        assert!(!engine.validate_access(Some(&admin_entity), ""));
    }

    #[test]
    fn apply_policies_denies_under_enforce_all() {
        let engine = PolicyEngine::new(PolicyEngineOptions::default());
        engine.register_policy(Box::new(CustomRule {
            name: "deny-all".to_string(),
            description: String::new(),
            priority: 999,
            tags: BTreeSet::new(),
            required_fields: vec!["never-present".to_string()],
            on_violation_actions: vec!["DENY".to_string()],
        }));
        let mut entity = Entity::new("e1");
        let result = engine.apply_policies(&mut entity);
        assert!(matches!(result, Err(GovernanceError::PolicyViolation { .. })));
    }

    #[test]
    fn apply_policies_redacts_without_enforce_all() {
        let engine = PolicyEngine::new(PolicyEngineOptions {
            enforce_all: false,
            ..PolicyEngineOptions::default()
        });
        engine.register_policy(Box::new(CustomRule {
            name: "redact-ssn".to_string(),
            description: String::new(),
            priority: 999,
            tags: BTreeSet::new(),
            required_fields: vec!["never-present".to_string()],
            on_violation_actions: vec!["REDACT:ssn".to_string()],
        }));
        let mut entity =
            Entity::new("e1").with_field("ssn", serde_json::Value::String("secret".to_string()));
        let result = engine.apply_policies(&mut entity).unwrap();
        assert!(!result.is_valid);
        assert_eq!(
            entity.fields.get("ssn"),
            Some(&serde_json::Value::String("[REDACTED]".to_string()))
        );
    }

    #[test]
    fn enforce_ttl_sweeps_expired_entities() {
        let engine = PolicyEngine::new(PolicyEngineOptions::default());
        let mut entities = vec![Entity::new("e1").with_expiry(Utc::now() - Duration::seconds(5))];
        engine.enforce_ttl(&mut entities).unwrap();
    }
}
