use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Module names under which audit entries are filed.
pub mod module {
    pub const SYSTEM: &str = "System";
    pub const AUTH: &str = "Auth";
    pub const VOTING: &str = "Voting";
    pub const VOTERS: &str = "Voters";
    pub const CANDIDATES: &str = "Candidates";
}

/// Actor recorded for transitions nobody asked for, like election expiry.
pub const SYSTEM_ACTOR: &str = "system";

/// An append-only record of a state-changing action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub description: String,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<String>,
        module: &str,
        action: impl Into<String>,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            timestamp,
            actor: actor.into(),
            module: module.to_string(),
            action: action.into(),
            description: description.into(),
        }
    }
}
