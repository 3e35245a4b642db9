use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use talos_types::gate::StateMachineDefinition;

/// Stored state-machine row. One per (machine_id, version); registering the
/// same pair again replaces the row wholesale.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MachineRecord {
    pub machine_id: String,
    pub version: String,
    pub name: String,
    pub domain: String,
    pub definition: StateMachineDefinition,
    pub registered_by: String,
    pub created_at: DateTime<Utc>,
}
