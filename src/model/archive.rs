use std::fmt::Display;

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, Binary};
use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Formatter, Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{Deserialize, Serialize};

use crate::model::{
    candidate::Candidate,
    mongodb::Id,
    user::{Role, User},
};

/// Archived records older than this are purged the next time the archive is read.
pub const RETENTION_DAYS: i64 = 30;

/// Entries deleted strictly before the returned instant are due for purging.
pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RETENTION_DAYS)
}

/// Which live collection an archived record came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Voter,
    Candidate,
}

impl ArchiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voter => "voter",
            Self::Candidate => "candidate",
        }
    }
}

impl Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'a> FromParam<'a> for ArchiveKind {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        match param {
            "voter" | "voters" => Ok(Self::Voter),
            "candidate" | "candidates" => Ok(Self::Candidate),
            _ => Err(param),
        }
    }
}

impl UriDisplay<Path> for ArchiveKind {
    fn fmt(&self, f: &mut Formatter<'_, Path>) -> std::fmt::Result {
        f.write_value(self.as_str())
    }
}

impl_from_uri_param_identity!([Path] ArchiveKind);

/// The fields of a user that survive archiving. The credential does not:
/// a restored voter signs in with their username as password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedVoter {
    pub id: Id,
    pub username: String,
    pub role: Role,
    pub full_name: String,
    pub grade: String,
    pub section: String,
}

impl From<&User> for ArchivedVoter {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            full_name: user.full_name.clone(),
            grade: user.grade.clone(),
            section: user.section.clone(),
        }
    }
}

/// The fields of a candidate that survive archiving. The vote counter is
/// recomputed on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedCandidate {
    pub id: Id,
    pub name: String,
    pub position: String,
    pub grade: String,
    #[serde(default)]
    pub image: Option<Binary>,
}

impl From<&Candidate> for ArchivedCandidate {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.id,
            name: candidate.name.clone(),
            position: candidate.position.clone(),
            grade: candidate.grade.clone(),
            image: candidate.image.clone(),
        }
    }
}

/// The archived copy itself, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivedRecord {
    Voter(ArchivedVoter),
    Candidate(ArchivedCandidate),
}

/// A soft-deleted record, kept for [`RETENTION_DAYS`] after deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    pub kind: ArchiveKind,
    /// What a restore request names the record by: username or candidate name.
    pub key: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub deleted_at: DateTime<Utc>,
    pub record: ArchivedRecord,
}

impl ArchiveEntry {
    pub fn voter(user: &User, deleted_at: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            kind: ArchiveKind::Voter,
            key: user.username.clone(),
            deleted_at,
            record: ArchivedRecord::Voter(user.into()),
        }
    }

    pub fn candidate(candidate: &Candidate, deleted_at: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            kind: ArchiveKind::Candidate,
            key: candidate.name.clone(),
            deleted_at,
            record: ArchivedRecord::Candidate(candidate.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::user::UserCore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn retention_is_thirty_days() {
        let cutoff = retention_cutoff(now());
        assert_eq!(cutoff, now() - Duration::days(30));
        // Purged are the entries deleted strictly before the cutoff.
        let purged = |age: Duration| now() - age < cutoff;
        assert!(!purged(Duration::days(29)));
        assert!(!purged(Duration::days(30)));
        assert!(purged(Duration::days(30) + Duration::seconds(1)));
        assert!(purged(Duration::days(45)));
    }

    #[test]
    fn voter_entry_is_keyed_by_username() {
        let user = User {
            id: Id::new(),
            user: UserCore::example_voter(),
        };
        let entry = ArchiveEntry::voter(&user, now());
        assert_eq!(entry.kind, ArchiveKind::Voter);
        assert_eq!(entry.key, user.username);
        match entry.record {
            ArchivedRecord::Voter(voter) => {
                assert_eq!(voter.id, user.id);
                assert_eq!(voter.full_name, user.full_name);
            }
            ArchivedRecord::Candidate(_) => panic!("voter archived as a candidate"),
        }
    }

    #[test]
    fn kind_from_param() {
        assert_eq!(ArchiveKind::from_param("voters"), Ok(ArchiveKind::Voter));
        assert_eq!(ArchiveKind::from_param("candidate"), Ok(ArchiveKind::Candidate));
        assert!(ArchiveKind::from_param("admins").is_err());
    }
}
