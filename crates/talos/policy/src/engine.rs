//! Policy lifecycle: publish, fetch, evaluate.

use crate::error::{PolicyError, PolicyResult};
use crate::evaluator;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use talos_storage::PolicyStore;
use talos_types::policy::{PolicyDefinition, PolicyEvalResult, PolicyVersionRecord};
use tracing::info;

pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Publish a definition as the new active version of its `policy_id`.
    /// The store deactivates the prior active version in the same atomic
    /// step; nothing is ever edited in place.
    pub async fn publish(
        &self,
        definition: PolicyDefinition,
        published_by: &str,
    ) -> PolicyResult<PolicyVersionRecord> {
        validate_definition(&definition)?;
        let record = self.store.publish_version(definition, published_by).await?;
        info!(
            policy_id = %record.policy_id,
            version = %record.version,
            published_by,
            "policy version published"
        );
        Ok(record)
    }

    pub async fn get_active_policy(&self, policy_id: &str) -> PolicyResult<PolicyVersionRecord> {
        self.store
            .get_active(policy_id)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("no active version of {policy_id}")))
    }

    pub async fn get_policy_version(
        &self,
        policy_id: &str,
        version: &str,
    ) -> PolicyResult<PolicyVersionRecord> {
        self.store
            .get_version(policy_id, version)
            .await?
            .ok_or_else(|| PolicyError::NotFound(format!("{policy_id} version {version}")))
    }

    /// Evaluate one stored version against an input. Pure apart from the
    /// reported timestamp.
    pub fn evaluate(&self, version: &PolicyVersionRecord, input: &Value) -> PolicyEvalResult {
        evaluator::evaluate_definition(&version.definition, input, Utc::now())
    }

    /// Evaluate the active version of a policy id.
    pub async fn evaluate_active(
        &self,
        policy_id: &str,
        input: &Value,
    ) -> PolicyResult<PolicyEvalResult> {
        let version = self.get_active_policy(policy_id).await?;
        Ok(self.evaluate(&version, input))
    }
}

fn validate_definition(definition: &PolicyDefinition) -> PolicyResult<()> {
    if definition.policy_id.is_empty() {
        return Err(PolicyError::InvalidDefinition("policy_id is required".into()));
    }
    if definition.version.is_empty() {
        return Err(PolicyError::InvalidDefinition("version is required".into()));
    }
    if definition.rules.is_empty() {
        return Err(PolicyError::InvalidDefinition(
            "a policy needs at least one rule".into(),
        ));
    }
    let mut seen = HashSet::new();
    for rule in &definition.rules {
        if !seen.insert(rule.rule_id.as_str()) {
            return Err(PolicyError::InvalidDefinition(format!(
                "duplicate rule_id {}",
                rule.rule_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use talos_storage::memory::InMemoryTrustStorage;
    use talos_types::policy::{Action, ActionType, Condition, PolicyMetadata, PolicyRule};

    fn engine() -> PolicyEngine {
        PolicyEngine::new(Arc::new(InMemoryTrustStorage::new()))
    }

    fn rule(rule_id: &str, priority: Option<u32>, condition: Condition, action: ActionType) -> PolicyRule {
        PolicyRule {
            rule_id: rule_id.into(),
            name: None,
            priority,
            condition,
            action: Action::new(action),
            evidence_requirements: vec![],
            attestation_requirements: vec![],
        }
    }

    fn definition(policy_id: &str, version: &str, rules: Vec<PolicyRule>) -> PolicyDefinition {
        PolicyDefinition {
            policy_id: policy_id.into(),
            version: version.into(),
            name: "flight safety".into(),
            description: None,
            scope: None,
            rules,
            metadata: PolicyMetadata {
                created_at: Utc::now(),
                created_by: "safety-board".into(),
                authority_profile: Some("FAA".into()),
                references: vec![],
            },
        }
    }

    /// The drone flight-safety sample: deny on low battery, demand an
    /// attestation in high wind, allow otherwise.
    fn safety_policy() -> PolicyDefinition {
        definition(
            "flight-safety",
            "v1.0.0",
            vec![
                rule(
                    "low-battery",
                    Some(10),
                    Condition::Lt {
                        field: "input.battery_soh".into(),
                        value: json!(70),
                    },
                    ActionType::Deny,
                ),
                rule(
                    "high-wind",
                    Some(20),
                    Condition::Gt {
                        field: "input.wind_speed_kmh".into(),
                        value: json!(25),
                    },
                    ActionType::RequireAttestation,
                ),
                rule(
                    "default-allow",
                    Some(100),
                    Condition::And { operands: vec![] },
                    ActionType::Allow,
                ),
            ],
        )
    }

    fn input(soh: i64, wind: i64, visibility: &str) -> Value {
        json!({"input": {
            "battery_soh": soh,
            "wind_speed_kmh": wind,
            "visibility": visibility,
        }})
    }

    #[tokio::test]
    async fn publish_then_evaluate_active() {
        let engine = engine();
        engine.publish(safety_policy(), "ops").await.unwrap();

        let result = engine
            .evaluate_active("flight-safety", &input(94, 12, "GOOD"))
            .await
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.final_action, ActionType::Allow);
    }

    #[tokio::test]
    async fn deny_wins_over_later_rules() {
        let engine = engine();
        let version = engine.publish(safety_policy(), "ops").await.unwrap();

        let result = engine.evaluate(&version, &input(65, 10, "GOOD"));
        assert!(!result.allowed);
        assert_eq!(result.final_action, ActionType::Deny);
        // Every rule is still evaluated for the audit trail.
        assert_eq!(result.all_evaluations.len(), 3);
        assert_eq!(result.matched_rules[0].rule_id, "low-battery");
        assert_eq!(result.matched_rules[1].rule_id, "default-allow");
    }

    #[tokio::test]
    async fn deny_keeps_later_matches_and_their_requirements() {
        let engine = engine();
        let halt = rule(
            "halt",
            Some(1),
            Condition::And { operands: vec![] },
            ActionType::Deny,
        );
        let mut report = rule(
            "report",
            Some(2),
            Condition::And { operands: vec![] },
            ActionType::Allow,
        );
        report.evidence_requirements = vec!["INCIDENT_REPORT".to_string()];
        let version = engine
            .publish(definition("audit-trail", "v1.0.0", vec![halt, report]), "ops")
            .await
            .unwrap();

        let result = engine.evaluate(&version, &json!({"input": {}}));
        assert!(!result.allowed);
        assert_eq!(result.final_action, ActionType::Deny);
        assert_eq!(result.all_evaluations.len(), 2);
        assert_eq!(result.matched_rules.len(), 2);
        assert_eq!(result.evidence_requirements, vec!["INCIDENT_REPORT"]);
    }

    #[tokio::test]
    async fn attestation_required_in_high_wind() {
        let engine = engine();
        let version = engine.publish(safety_policy(), "ops").await.unwrap();

        let result = engine.evaluate(&version, &input(92, 30, "GOOD"));
        assert!(result.allowed);
        assert_eq!(result.final_action, ActionType::RequireAttestation);
    }

    #[tokio::test]
    async fn restrict_is_sticky_against_attestation_and_escalate() {
        let engine = engine();
        let version = engine
            .publish(
                definition(
                    "precedence",
                    "v1.0.0",
                    vec![
                        rule(
                            "restrict",
                            Some(1),
                            Condition::And { operands: vec![] },
                            ActionType::Restrict,
                        ),
                        rule(
                            "attest",
                            Some(2),
                            Condition::And { operands: vec![] },
                            ActionType::RequireAttestation,
                        ),
                        rule(
                            "escalate",
                            Some(3),
                            Condition::And { operands: vec![] },
                            ActionType::Escalate,
                        ),
                    ],
                ),
                "ops",
            )
            .await
            .unwrap();

        let result = engine.evaluate(&version, &json!({"input": {}}));
        assert!(!result.allowed);
        assert_eq!(result.final_action, ActionType::Restrict);
        assert_eq!(result.matched_rules.len(), 3);
    }

    #[tokio::test]
    async fn escalate_only_from_default_allow() {
        let engine = engine();
        let version = engine
            .publish(
                definition(
                    "escalation",
                    "v1.0.0",
                    vec![
                        rule(
                            "attest",
                            Some(1),
                            Condition::And { operands: vec![] },
                            ActionType::RequireAttestation,
                        ),
                        rule(
                            "escalate",
                            Some(2),
                            Condition::And { operands: vec![] },
                            ActionType::Escalate,
                        ),
                    ],
                ),
                "ops",
            )
            .await
            .unwrap();

        let result = engine.evaluate(&version, &json!({"input": {}}));
        assert_eq!(result.final_action, ActionType::RequireAttestation);
    }

    #[tokio::test]
    async fn unprioritized_rules_evaluate_last() {
        let engine = engine();
        let version = engine
            .publish(
                definition(
                    "ordering",
                    "v1.0.0",
                    vec![
                        rule(
                            "unprioritized-deny",
                            None,
                            Condition::And { operands: vec![] },
                            ActionType::Deny,
                        ),
                        rule(
                            "prioritized-allow",
                            Some(5),
                            Condition::And { operands: vec![] },
                            ActionType::Allow,
                        ),
                    ],
                ),
                "ops",
            )
            .await
            .unwrap();

        let result = engine.evaluate(&version, &json!({"input": {}}));
        assert_eq!(result.all_evaluations[0].rule_id, "prioritized-allow");
        assert_eq!(result.final_action, ActionType::Deny);
    }

    #[tokio::test]
    async fn requirements_union_without_duplicates() {
        let engine = engine();
        let mut first = rule(
            "a",
            Some(1),
            Condition::And { operands: vec![] },
            ActionType::RequireAttestation,
        );
        first.attestation_requirements = vec!["PILOT".into(), "DISPATCHER".into()];
        let mut second = rule(
            "b",
            Some(2),
            Condition::And { operands: vec![] },
            ActionType::Allow,
        );
        second.attestation_requirements = vec!["DISPATCHER".into()];
        second.evidence_requirements = vec!["WEATHER_BRIEF".into()];

        let version = engine
            .publish(definition("union", "v1.0.0", vec![first, second]), "ops")
            .await
            .unwrap();
        let result = engine.evaluate(&version, &json!({"input": {}}));
        assert_eq!(result.attestation_requirements, vec!["PILOT", "DISPATCHER"]);
        assert_eq!(result.evidence_requirements, vec!["WEATHER_BRIEF"]);
    }

    #[tokio::test]
    async fn validation_rejects_duplicate_rule_ids() {
        let engine = engine();
        let err = engine
            .publish(
                definition(
                    "dup",
                    "v1.0.0",
                    vec![
                        rule("r", Some(1), Condition::And { operands: vec![] }, ActionType::Allow),
                        rule("r", Some(2), Condition::And { operands: vec![] }, ActionType::Allow),
                    ],
                ),
                "ops",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidDefinition(_)));
    }

    #[tokio::test]
    async fn evaluation_is_deterministic() {
        let engine = engine();
        let version = engine.publish(safety_policy(), "ops").await.unwrap();
        let payload = input(92, 30, "GOOD");

        let a = engine.evaluate(&version, &payload);
        let b = engine.evaluate(&version, &payload);
        assert_eq!(a.final_action, b.final_action);
        assert_eq!(a.allowed, b.allowed);
        assert_eq!(a.matched_rules, b.matched_rules);
        assert_eq!(a.all_evaluations, b.all_evaluations);
    }
}
