//! Policy DSL contracts: condition trees, rules, versioned definitions and
//! evaluation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A boolean predicate over the evaluation input.
///
/// Comparison variants resolve `field` (a dotted path such as
/// `input.battery_soh`) against the input and compare it to `value`.
/// `And`/`Or` recurse over their operands; an empty `And` is vacuously true,
/// an empty `Or` vacuously false. Keeping this a tagged enum makes the
/// evaluator a structural recursion the compiler can check for
/// exhaustiveness.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    Eq {
        field: String,
        value: Value,
    },
    Neq {
        field: String,
        value: Value,
    },
    Gt {
        field: String,
        value: Value,
    },
    Gte {
        field: String,
        value: Value,
    },
    Lt {
        field: String,
        value: Value,
    },
    Lte {
        field: String,
        value: Value,
    },
    In {
        field: String,
        value: Value,
    },
    NotIn {
        field: String,
        value: Value,
    },
    And {
        #[serde(default)]
        operands: Vec<Condition>,
    },
    Or {
        #[serde(default)]
        operands: Vec<Condition>,
    },
}

/// What a matched rule contributes to the final decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Allow,
    Deny,
    Restrict,
    RequireAttestation,
    Escalate,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::Allow => "ALLOW",
            ActionType::Deny => "DENY",
            ActionType::Restrict => "RESTRICT",
            ActionType::RequireAttestation => "REQUIRE_ATTESTATION",
            ActionType::Escalate => "ESCALATE",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            params: None,
        }
    }
}

/// One policy clause. Lower priority evaluates first; rules without a
/// priority sort after every prioritized rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub rule_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    pub condition: Condition,
    pub action: Action,
    #[serde(default)]
    pub evidence_requirements: Vec<String>,
    #[serde(default)]
    pub attestation_requirements: Vec<String>,
}

/// Where a policy applies. Stored and reported; not interpreted by the
/// evaluator itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyScope {
    #[serde(default)]
    pub asset_types: Vec<String>,
    #[serde(default)]
    pub tenants: Vec<String>,
    #[serde(default)]
    pub state_machines: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Regulatory authority profile the policy encodes, e.g. `FAA` or `EASA`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_profile: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

/// A complete, versioned rule-set. Immutable once published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub policy_id: String,
    /// Semantic version, e.g. `v1.0.0`.
    pub version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<PolicyScope>,
    pub rules: Vec<PolicyRule>,
    pub metadata: PolicyMetadata,
}

/// Stored policy version row. Publishing a new version for the same
/// `policy_id` deactivates the prior active row but never deletes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersionRecord {
    pub policy_version_id: String,
    pub policy_id: String,
    pub version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub definition: PolicyDefinition,
    pub is_active: bool,
    pub published_at: DateTime<Utc>,
    pub published_by: String,
}

/// One rule's outcome within an evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    pub condition_met: bool,
    pub action: Action,
}

/// Full evaluation result. `evaluated_at` is reporting metadata only; the
/// decision itself is a deterministic function of (policy version, input).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvalResult {
    pub policy_id: String,
    pub policy_version: String,
    pub allowed: bool,
    pub final_action: ActionType,
    pub matched_rules: Vec<RuleEvaluation>,
    pub all_evaluations: Vec<RuleEvaluation>,
    pub evaluated_at: DateTime<Utc>,
    pub evidence_requirements: Vec<String>,
    pub attestation_requirements: Vec<String>,
}
