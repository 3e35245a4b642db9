//! Pure rule evaluation.
//!
//! Everything here is a deterministic function of (definition, input). No
//! clock, no storage, no randomness: the reported `evaluated_at` timestamp is
//! stamped by the caller and is metadata, not decision input.

use chrono::{DateTime, Utc};
use serde_json::Value;
use talos_types::policy::{
    ActionType, Condition, PolicyDefinition, PolicyEvalResult, PolicyRule, RuleEvaluation,
};

/// Rules without a priority sort after every prioritized rule.
const UNPRIORITIZED: u32 = 999;

/// Resolve a dotted field path (`input.battery_soh`) against the evaluation
/// input. Any missing segment resolves to `None`.
pub fn resolve_field<'a>(input: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = input;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Recursive-descent condition evaluation. A comparison against a missing
/// field never matches, NEQ and NOT_IN included; absence is "unknown", not
/// "different".
pub fn evaluate_condition(condition: &Condition, input: &Value) -> bool {
    match condition {
        Condition::Eq { field, value } => resolve_field(input, field) == Some(value),
        Condition::Neq { field, value } => {
            matches!(resolve_field(input, field), Some(actual) if actual != value)
        }
        Condition::Gt { field, value } => compare_numeric(input, field, value, |a, b| a > b),
        Condition::Gte { field, value } => compare_numeric(input, field, value, |a, b| a >= b),
        Condition::Lt { field, value } => compare_numeric(input, field, value, |a, b| a < b),
        Condition::Lte { field, value } => compare_numeric(input, field, value, |a, b| a <= b),
        Condition::In { field, value } => match (resolve_field(input, field), value.as_array()) {
            (Some(actual), Some(set)) => set.contains(actual),
            _ => false,
        },
        Condition::NotIn { field, value } => match (resolve_field(input, field), value.as_array())
        {
            (Some(actual), Some(set)) => !set.contains(actual),
            _ => false,
        },
        // Vacuous truth for AND, vacuous falsity for OR.
        Condition::And { operands } => operands.iter().all(|c| evaluate_condition(c, input)),
        Condition::Or { operands } => operands.iter().any(|c| evaluate_condition(c, input)),
    }
}

/// Ordering comparisons are numeric-only: a non-numeric operand on either
/// side means no match rather than a coerced comparison.
fn compare_numeric(input: &Value, field: &str, literal: &Value, op: fn(f64, f64) -> bool) -> bool {
    match (
        resolve_field(input, field).and_then(Value::as_f64),
        literal.as_f64(),
    ) {
        (Some(actual), Some(expected)) => op(actual, expected),
        _ => false,
    }
}

fn priority(rule: &PolicyRule) -> u32 {
    rule.priority.unwrap_or(UNPRIORITIZED)
}

/// Evaluate a full definition against one input.
///
/// Two phases. First every rule is evaluated in ascending priority order and
/// recorded, matched or not, and the requirements of every matched rule are
/// unioned into the result. Then deny-wins aggregation runs over the matched
/// list: the first DENY terminates aggregation; RESTRICT flips `allowed` and
/// sticks against later non-DENY actions; REQUIRE_ATTESTATION applies only
/// while no RESTRICT has been seen; ESCALATE applies only while the action is
/// still the default ALLOW. The full audit trail and requirement unions are
/// kept whatever the final action.
pub fn evaluate_definition(
    definition: &PolicyDefinition,
    input: &Value,
    evaluated_at: DateTime<Utc>,
) -> PolicyEvalResult {
    let mut rules: Vec<&PolicyRule> = definition.rules.iter().collect();
    rules.sort_by_key(|r| priority(r));

    let mut matched_rules = Vec::new();
    let mut all_evaluations = Vec::new();
    let mut evidence_requirements: Vec<String> = Vec::new();
    let mut attestation_requirements: Vec<String> = Vec::new();

    for rule in rules {
        let condition_met = evaluate_condition(&rule.condition, input);
        let evaluation = RuleEvaluation {
            rule_id: rule.rule_id.clone(),
            rule_name: rule.name.clone(),
            condition_met,
            action: rule.action.clone(),
        };
        all_evaluations.push(evaluation.clone());
        if !condition_met {
            continue;
        }
        matched_rules.push(evaluation);
        union_into(&mut evidence_requirements, &rule.evidence_requirements);
        union_into(&mut attestation_requirements, &rule.attestation_requirements);
    }

    let mut allowed = true;
    let mut final_action = ActionType::Allow;
    for matched in &matched_rules {
        match matched.action.action_type {
            ActionType::Deny => {
                allowed = false;
                final_action = ActionType::Deny;
                break;
            }
            ActionType::Restrict => {
                allowed = false;
                final_action = ActionType::Restrict;
            }
            ActionType::RequireAttestation => {
                if final_action != ActionType::Restrict {
                    final_action = ActionType::RequireAttestation;
                }
            }
            ActionType::Escalate => {
                if final_action == ActionType::Allow {
                    final_action = ActionType::Escalate;
                }
            }
            ActionType::Allow => {}
        }
    }

    PolicyEvalResult {
        policy_id: definition.policy_id.clone(),
        policy_version: definition.version.clone(),
        allowed,
        final_action,
        matched_rules,
        all_evaluations,
        evaluated_at,
        evidence_requirements,
        attestation_requirements,
    }
}

fn union_into(acc: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !acc.iter().any(|existing| existing == item) {
            acc.push(item.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_path_resolution() {
        let input = json!({"input": {"env": {"wind": 12}}});
        assert_eq!(resolve_field(&input, "input.env.wind"), Some(&json!(12)));
        assert_eq!(resolve_field(&input, "input.env.rain"), None);
        assert_eq!(resolve_field(&input, "input.env.wind.gust"), None);
    }

    #[test]
    fn missing_field_never_matches() {
        let input = json!({"input": {}});
        let neq = Condition::Neq {
            field: "input.visibility".into(),
            value: json!("POOR"),
        };
        let not_in = Condition::NotIn {
            field: "input.visibility".into(),
            value: json!(["POOR"]),
        };
        assert!(!evaluate_condition(&neq, &input));
        assert!(!evaluate_condition(&not_in, &input));
    }

    #[test]
    fn ordering_comparisons_are_numeric_only() {
        let input = json!({"input": {"soh": "94"}});
        let gt = Condition::Gt {
            field: "input.soh".into(),
            value: json!(70),
        };
        assert!(!evaluate_condition(&gt, &input));

        let input = json!({"input": {"soh": 94}});
        assert!(evaluate_condition(&gt, &input));
    }

    #[test]
    fn vacuous_and_or() {
        let input = json!({});
        assert!(evaluate_condition(&Condition::And { operands: vec![] }, &input));
        assert!(!evaluate_condition(&Condition::Or { operands: vec![] }, &input));
    }

    #[test]
    fn in_requires_array_literal() {
        let input = json!({"input": {"visibility": "GOOD"}});
        let bad = Condition::In {
            field: "input.visibility".into(),
            value: json!("GOOD"),
        };
        assert!(!evaluate_condition(&bad, &input));
    }
}
