use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabourUpdateType {
    Status,
    Announcement,
}

/// Command envelope accepted by the command endpoint: `{ "type": ..., "payload": {...} }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum LabourCommand {
    StartContraction {
        labour_id: String,
        contraction_id: String,
        start_time: DateTime<Utc>,
    },
    EndContraction {
        labour_id: String,
        contraction_id: String,
        end_time: DateTime<Utc>,
        intensity: u8,
    },
    UpdateContraction {
        labour_id: String,
        contraction_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_time: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intensity: Option<u8>,
    },
    DeleteContraction {
        labour_id: String,
        contraction_id: String,
    },
    PostLabourUpdate {
        labour_id: String,
        update_id: String,
        update_type: LabourUpdateType,
        message: String,
        sent_time: DateTime<Utc>,
    },
}

impl LabourCommand {
    /// The labour this command applies to.
    pub fn aggregate_id(&self) -> &str {
        match self {
            Self::StartContraction { labour_id, .. }
            | Self::EndContraction { labour_id, .. }
            | Self::UpdateContraction { labour_id, .. }
            | Self::DeleteContraction { labour_id, .. }
            | Self::PostLabourUpdate { labour_id, .. } => labour_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StartContraction { .. } => "StartContraction",
            Self::EndContraction { .. } => "EndContraction",
            Self::UpdateContraction { .. } => "UpdateContraction",
            Self::DeleteContraction { .. } => "DeleteContraction",
            Self::PostLabourUpdate { .. } => "PostLabourUpdate",
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
