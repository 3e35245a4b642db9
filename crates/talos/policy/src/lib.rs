//! Policy engine.
//!
//! Versioned, immutable rule-sets evaluated deterministically against
//! structured input. The condition DSL is a recursive predicate tree; the
//! final decision aggregates matched rules under deny-wins precedence.

#![deny(unsafe_code)]

mod engine;
mod error;
pub mod evaluator;

pub use engine::PolicyEngine;
pub use error::{PolicyError, PolicyResult};

#[cfg(test)]
mod proptests {
    use crate::evaluator::evaluate_definition;
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;
    use talos_types::policy::{
        Action, ActionType, Condition, PolicyDefinition, PolicyMetadata, PolicyRule,
    };

    fn safety_policy() -> PolicyDefinition {
        PolicyDefinition {
            policy_id: "flight-safety".into(),
            version: "v1.0.0".into(),
            name: "flight safety".into(),
            description: None,
            scope: None,
            rules: vec![
                PolicyRule {
                    rule_id: "low-battery".into(),
                    name: None,
                    priority: Some(10),
                    condition: Condition::Lt {
                        field: "input.battery_soh".into(),
                        value: json!(70),
                    },
                    action: Action::new(ActionType::Deny),
                    evidence_requirements: vec![],
                    attestation_requirements: vec![],
                },
                PolicyRule {
                    rule_id: "high-wind".into(),
                    name: None,
                    priority: Some(20),
                    condition: Condition::Gt {
                        field: "input.wind_speed_kmh".into(),
                        value: json!(25),
                    },
                    action: Action::new(ActionType::RequireAttestation),
                    evidence_requirements: vec![],
                    attestation_requirements: vec![],
                },
            ],
            metadata: PolicyMetadata {
                created_at: Utc::now(),
                created_by: "safety-board".into(),
                authority_profile: None,
                references: vec![],
            },
        }
    }

    proptest! {
        /// Whatever the input, a matched DENY rule dominates the outcome and
        /// two evaluations of the same input agree.
        #[test]
        fn deny_wins_holds_for_all_inputs(soh in 0i64..120, wind in 0i64..60) {
            let definition = safety_policy();
            let input = json!({"input": {"battery_soh": soh, "wind_speed_kmh": wind}});
            let now = Utc::now();

            let result = evaluate_definition(&definition, &input, now);
            let again = evaluate_definition(&definition, &input, now);
            prop_assert_eq!(&result, &again);

            if soh < 70 {
                prop_assert_eq!(result.final_action, ActionType::Deny);
                prop_assert!(!result.allowed);
            } else if wind > 25 {
                prop_assert_eq!(result.final_action, ActionType::RequireAttestation);
                prop_assert!(result.allowed);
            } else {
                prop_assert_eq!(result.final_action, ActionType::Allow);
                prop_assert!(result.allowed);
            }
        }
    }
}
