use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::archive::{ArchiveEntry, ArchiveKind, ArchivedRecord};

/// A request to bring an archived record back, by username or candidate name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub key: String,
}

/// One archived record, as listed to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveListing {
    pub kind: ArchiveKind,
    pub key: String,
    /// Full name for voters, position for candidates.
    pub detail: String,
    pub grade: String,
    pub deleted_at: DateTime<Utc>,
}

impl From<ArchiveEntry> for ArchiveListing {
    fn from(entry: ArchiveEntry) -> Self {
        let (detail, grade) = match entry.record {
            ArchivedRecord::Voter(voter) => (voter.full_name, voter.grade),
            ArchivedRecord::Candidate(candidate) => (candidate.position, candidate.grade),
        };
        Self {
            kind: entry.kind,
            key: entry.key,
            detail,
            grade,
            deleted_at: entry.deleted_at,
        }
    }
}
