//! Override governance contracts: break-glass requests, approvals, KPIs.

use crate::common::{ActorKind, AssetRef, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    EmergencySafety,
    MaintenanceRequired,
    RegulatoryWaiver,
    OperationalNecessity,
    Other,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReasonCode::EmergencySafety => "EMERGENCY_SAFETY",
            ReasonCode::MaintenanceRequired => "MAINTENANCE_REQUIRED",
            ReasonCode::RegulatoryWaiver => "REGULATORY_WAIVER",
            ReasonCode::OperationalNecessity => "OPERATIONAL_NECESSITY",
            ReasonCode::Other => "OTHER",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactScope {
    SingleAsset,
    Fleet,
    System,
}

impl std::fmt::Display for ImpactScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImpactScope::SingleAsset => "single_asset",
            ImpactScope::Fleet => "fleet",
            ImpactScope::System => "system",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a break-glass request. One-directional, except that a
/// partially approved request stays in PENDING_APPROVAL until every required
/// role has approved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideStatus {
    Requested,
    PendingApproval,
    Approved,
    Rejected,
    Executed,
    Expired,
}

impl std::fmt::Display for OverrideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverrideStatus::Requested => "REQUESTED",
            OverrideStatus::PendingApproval => "PENDING_APPROVAL",
            OverrideStatus::Approved => "APPROVED",
            OverrideStatus::Rejected => "REJECTED",
            OverrideStatus::Executed => "EXECUTED",
            OverrideStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub tenant_id: TenantId,
    pub reason_code: ReasonCode,
    pub reason_text: String,
    pub impact_scope: ImpactScope,
    /// Authorization window, counted from `requested_at`.
    pub duration_minutes: i64,
    pub machine_id: String,
    pub asset_ref: AssetRef,
    pub from_state: String,
    pub to_state: String,
    /// Roles that must each approve before execution. Empty means the
    /// request is auto-approved on creation.
    pub required_approvals: Vec<String>,
    pub requested_by: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverrideApproval {
    pub role: String,
    pub actor_id: String,
    pub actor_kind: ActorKind,
    pub approved_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub override_id: String,
    pub tenant_id: TenantId,
    pub reason_code: ReasonCode,
    pub reason_text: String,
    pub impact_scope: ImpactScope,
    pub duration_minutes: i64,
    pub machine_id: String,
    pub asset_ref: AssetRef,
    pub from_state: String,
    pub to_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_record_id: Option<String>,
    pub required_approvals: Vec<String>,
    pub approvals: Vec<OverrideApproval>,
    pub status: OverrideStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_pack_id: Option<String>,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl OverrideRecord {
    /// When this override's authorization window closes.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.requested_at + chrono::Duration::minutes(self.duration_minutes)
    }
}

/// Tenant-level override metrics for oversight dashboards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverrideKpis {
    pub tenant_id: TenantId,
    pub total_count: usize,
    pub by_status: HashMap<String, usize>,
    pub by_reason_code: HashMap<String, usize>,
    pub by_impact_scope: HashMap<String, usize>,
    /// Mean minutes from request to resolution over approved/executed
    /// records; `None` when nothing has resolved yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_approval_minutes: Option<f64>,
}
