use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::audit::AuditEntry;

/// One audit entry, as shown to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub module: String,
    pub action: String,
    pub description: String,
}

impl From<AuditEntry> for AuditRecord {
    fn from(entry: AuditEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            actor: entry.actor,
            module: entry.module,
            action: entry.action,
            description: entry.description,
        }
    }
}
