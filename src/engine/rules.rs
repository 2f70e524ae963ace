//! Policy rules, the entity shape they evaluate, and built-in rules.
//!
//! Rather than a reflection-driven class hierarchy, rules here are a
//! tagged-variant type (`PolicyRecord`) carrying a stable schema tag,
//! wrapping a small `PolicyRule` trait with an `evaluate` method.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A schema-agnostic subject passed through policy evaluation.
///
/// Rather than language reflection over an arbitrary object graph, the
/// entity carries an explicit, flat field map; `REDACT:field` actions
/// operate on named entries in that map, and TTL/tag checks read the
/// dedicated `expires_at`/`tags` slots.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    /// Stable identity used in cache keys and audit messages.
    pub identity: String,
    /// Arbitrary named fields subject to redaction.
    pub fields: HashMap<String, Value>,
    /// Tags attached to this entity, if any (`PolicyTaggable` capability).
    pub tags: Option<BTreeSet<String>>,
    /// Expiry instant, if this entity carries one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Builds an entity with just an identity; no fields, tags, or expiry.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            fields: HashMap::new(),
            tags: None,
            expires_at: None,
        }
    }

    /// Builder-style helper to attach tags.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = Some(tags.into_iter().collect());
        self
    }

    /// Builder-style helper to attach an expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Builder-style helper to set a field.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub(crate) fn redact_field(&mut self, field: &str) {
        if let Some(value) = self.fields.get_mut(field) {
            *value = match value {
                Value::String(_) => Value::String("[REDACTED]".to_string()),
                Value::Number(_) => Value::Number(0.into()),
                Value::Bool(_) => Value::Bool(false),
                Value::Null | Value::Array(_) | Value::Object(_) => Value::Null,
            };
        }
        // Missing field: silent no-op, per spec.
    }
}

/// Ambient data available to a rule during evaluation.
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// The instant evaluation is occurring at (used for TTL checks).
    pub now: DateTime<Utc>,
}

impl EvalContext {
    /// Builds a context pinned to `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

/// Outcome of evaluating a single policy against an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationResult {
    /// Whether the entity passed this policy.
    pub passed: bool,
    /// Human-readable reason, present on failure (and optionally on pass).
    pub reason: Option<String>,
    /// Action strings of the form `ACTION` or `ACTION:target`.
    pub actions: Vec<String>,
}

impl EvaluationResult {
    /// A passing result with no actions.
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
            actions: Vec::new(),
        }
    }

    /// A failing result with the given reason and actions.
    pub fn fail(reason: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            actions,
        }
    }
}

/// Aggregate result of evaluating every registered policy against an
/// entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    /// True iff every per-policy result passed.
    pub is_valid: bool,
    /// Per-policy results, in evaluation order.
    pub results: Vec<EvaluationResult>,
    /// Reason for the first failure, if any.
    pub failure_reason: Option<String>,
}

impl ValidationResult {
    fn from_results(results: Vec<EvaluationResult>) -> Self {
        let failure_reason = results
            .iter()
            .find(|r| !r.passed)
            .and_then(|r| r.reason.clone());
        let is_valid = results.iter().all(|r| r.passed);
        Self {
            is_valid,
            results,
            failure_reason,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            results: Vec::new(),
            failure_reason: Some(reason.into()),
        }
    }
}

pub(crate) fn aggregate(results: Vec<EvaluationResult>) -> ValidationResult {
    ValidationResult::from_results(results)
}

/// Behavior shared by every policy rule.
///
/// Implementations must be deterministic and side-effect free; `evaluate`
/// is called under the engine's read path and may run concurrently with
/// other evaluations.
pub trait PolicyRule: Send + Sync {
    /// Unique name within an engine.
    fn name(&self) -> &str;
    /// Free-form description.
    fn description(&self) -> &str;
    /// Higher runs first among registered policies.
    fn priority(&self) -> i32;
    /// Evaluates this rule against `entity` in `ctx`.
    fn evaluate(&self, entity: &Entity, ctx: &EvalContext) -> EvaluationResult;
    /// `PolicyTaggable` capability: tags this rule cares about, if any.
    /// Used by `validate_access`'s tag permission lookups; most rules
    /// don't participate and return `None`.
    fn tags(&self) -> Option<&BTreeSet<String>> {
        None
    }
    /// Serializes this rule's identity and parameters to its persisted
    /// `PolicyRecord` form, for appending to a log.
    fn to_record(&self) -> PolicyRecord;
}

/// A rule that rejects entities whose `expires_at` has passed `ctx.now`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TtlRule {
    /// Rule name, defaults to `"ttl"`.
    pub name: String,
    /// Rule description.
    pub description: String,
    /// Evaluation priority.
    pub priority: i32,
}

impl Default for TtlRule {
    fn default() -> Self {
        Self {
            name: "ttl".to_string(),
            description: "rejects entities whose embedded expiry has passed".to_string(),
            priority: 1000,
        }
    }
}

impl PolicyRule for TtlRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn evaluate(&self, entity: &Entity, ctx: &EvalContext) -> EvaluationResult {
        match entity.expires_at {
            Some(expiry) if expiry <= ctx.now => {
                EvaluationResult::fail("entity has expired", vec!["DELETE".to_string()])
            }
            _ => EvaluationResult::pass(),
        }
    }

    fn to_record(&self) -> PolicyRecord {
        PolicyRecord::Ttl(self.clone())
    }
}

/// A rule that checks an entity's tags against a `tag -> role set` map.
///
/// This rule itself always passes `evaluate` (tag-based access is exposed
/// through `PolicyEngine::validate_access`, a separate entry point per
/// spec); it exists as a registered rule so its name/priority participate
/// in the standard evaluation listing and can be unregistered like any
/// other policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagAccessRule {
    /// Rule name, defaults to `"tag-access"`.
    pub name: String,
    /// Rule description.
    pub description: String,
    /// Evaluation priority.
    pub priority: i32,
}

impl Default for TagAccessRule {
    fn default() -> Self {
        Self {
            name: "tag-access".to_string(),
            description: "tag-based role access control".to_string(),
            priority: 500,
        }
    }
}

impl PolicyRule for TagAccessRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn evaluate(&self, _entity: &Entity, _ctx: &EvalContext) -> EvaluationResult {
        EvaluationResult::pass()
    }

    fn to_record(&self) -> PolicyRecord {
        PolicyRecord::TagAccess(self.clone())
    }
}

/// A caller-defined rule with a name/description/priority and a set of
/// tags it participates in, evaluated by a simple allow-list of required
/// fields. Covers the "custom" branch of the tagged-variant rule type
/// without requiring the embedder to implement a new Rust type for every
/// administrative rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomRule {
    /// Rule name.
    pub name: String,
    /// Rule description.
    pub description: String,
    /// Evaluation priority.
    pub priority: i32,
    /// Tags this rule is scoped to.
    pub tags: BTreeSet<String>,
    /// Fields that must be present (and non-null) on the entity for it
    /// to pass.
    pub required_fields: Vec<String>,
    /// Action strings applied when a required field is missing.
    pub on_violation_actions: Vec<String>,
}

impl PolicyRule for CustomRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn evaluate(&self, entity: &Entity, _ctx: &EvalContext) -> EvaluationResult {
        let missing: Vec<&str> = self
            .required_fields
            .iter()
            .filter(|field| !matches!(entity.fields.get(field.as_str()), Some(v) if !v.is_null()))
            .map(|s| s.as_str())
            .collect();
        if missing.is_empty() {
            EvaluationResult::pass()
        } else {
            EvaluationResult::fail(
                format!("missing required fields: {}", missing.join(", ")),
                self.on_violation_actions.clone(),
            )
        }
    }

    fn tags(&self) -> Option<&BTreeSet<String>> {
        Some(&self.tags)
    }

    fn to_record(&self) -> PolicyRecord {
        PolicyRecord::Custom(self.clone())
    }
}

/// The persisted, polymorphic form of a policy rule.
///
/// Carries an explicit `type` discriminator (via serde's internal tagging)
/// rather than a language-qualified type name, so a seal persisted by one
/// implementation can be reloaded by another. Loading an unrecognized
/// `type` value fails to deserialize, which the file log's reload
/// protocol treats as corruption at that record (truncate-at-first-error).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PolicyRecord {
    /// A TTL enforcement rule.
    Ttl(TtlRule),
    /// A tag-access rule.
    TagAccess(TagAccessRule),
    /// A caller-defined required-fields rule.
    Custom(CustomRule),
}

impl PolicyRecord {
    /// Materializes this record into a boxed trait object.
    pub fn into_rule(self) -> Box<dyn PolicyRule> {
        match self {
            PolicyRecord::Ttl(rule) => Box::new(rule),
            PolicyRecord::TagAccess(rule) => Box::new(rule),
            PolicyRecord::Custom(rule) => Box::new(rule),
        }
    }

    /// The rule's name, without materializing a trait object.
    pub fn name(&self) -> &str {
        match self {
            PolicyRecord::Ttl(rule) => &rule.name,
            PolicyRecord::TagAccess(rule) => &rule.name,
            PolicyRecord::Custom(rule) => &rule.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ttl_rule_fails_past_expiry() {
        let rule = TtlRule::default();
        let now = Utc::now();
        let entity = Entity::new("e1").with_expiry(now - Duration::seconds(1));
        let result = rule.evaluate(&entity, &EvalContext::at(now));
        assert!(!result.passed);
        assert_eq!(result.actions, vec!["DELETE".to_string()]);
    }

    #[test]
    fn ttl_rule_passes_future_expiry() {
        let rule = TtlRule::default();
        let now = Utc::now();
        let entity = Entity::new("e1").with_expiry(now + Duration::seconds(60));
        assert!(rule.evaluate(&entity, &EvalContext::at(now)).passed);
    }

    #[test]
    fn custom_rule_flags_missing_fields() {
        let rule = CustomRule {
            name: "needs-owner".to_string(),
            description: String::new(),
            priority: 0,
            tags: BTreeSet::new(),
            required_fields: vec!["owner".to_string()],
            on_violation_actions: vec!["WARN".to_string()],
        };
        let entity = Entity::new("e1");
        let result = rule.evaluate(&entity, &EvalContext::at(Utc::now()));
        assert!(!result.passed);
        assert_eq!(result.actions, vec!["WARN".to_string()]);
    }

    #[test]
    fn redact_field_replaces_typed_value() {
        let mut entity =
            Entity::new("e1").with_field("ssn", Value::String("123-45-6789".to_string()));
        entity.redact_field("ssn");
        assert_eq!(
            entity.fields.get("ssn"),
            Some(&Value::String("[REDACTED]".to_string()))
        );
    }

    #[test]
    fn redact_field_missing_is_noop() {
        let mut entity = Entity::new("e1");
        entity.redact_field("missing");
        assert!(entity.fields.is_empty());
    }

    #[test]
    fn policy_record_roundtrips_through_json() {
        let record = PolicyRecord::Ttl(TtlRule::default());
        let json = serde_json::to_string(&record).unwrap();
        let parsed: PolicyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name(), "ttl");
    }
}
