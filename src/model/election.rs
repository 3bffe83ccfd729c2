use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::setting::{key, Setting};

/// The stored election status. Expiry is never stored: it is derived from
/// the target end time, see [`ElectionConfig::state_at`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionStatus {
    Active,
    Inactive,
}

impl ElectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Anything other than "active" reads as inactive.
    fn parse(value: &str) -> Self {
        if value == "active" {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

/// The logical election state, derived from the stored status and the clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionState {
    Inactive,
    Active,
    /// Stored as active, but past its target end time. Corrected to
    /// inactive by the next evaluation.
    Expired,
}

/// Why an election stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Manual,
    Auto,
}

/// The target end time as stored: missing, valid, or unreadable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetTime {
    Unset,
    At(DateTime<Utc>),
    Malformed,
}

impl TargetTime {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Unset,
            Some(value) => DateTime::parse_from_rfc3339(value)
                .map(|time| Self::At(time.with_timezone(&Utc)))
                .unwrap_or(Self::Malformed),
        }
    }

    pub fn as_option(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(time) => Some(*time),
            _ => None,
        }
    }
}

/// Whether voting is currently permitted, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub active: bool,
    pub reason: String,
}

impl Activity {
    pub const ACTIVE: &'static str = "Active";
    pub const CLOSED: &'static str = "Election is manually closed.";
    pub const ENDED: &'static str = "Election time has ended.";
    pub const MALFORMED: &'static str = "Invalid time format.";

    fn new(active: bool, reason: &str) -> Self {
        Self {
            active,
            reason: reason.to_string(),
        }
    }
}

/// The singleton election record, assembled from the durable settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    pub name: String,
    pub status: ElectionStatus,
    pub target_end_time: TargetTime,
    pub duration_seconds: Option<i64>,
}

impl ElectionConfig {
    /// Assemble the election record from whatever settings exist.
    /// Missing settings read as an unnamed, inactive election.
    pub fn from_settings(settings: impl IntoIterator<Item = Setting>) -> Self {
        let settings: HashMap<String, String> = settings
            .into_iter()
            .map(|setting| (setting.key, setting.value))
            .collect();
        let get = |key: &str| settings.get(key).map(String::as_str);

        Self {
            name: get(key::ELECTION_NAME).unwrap_or_default().to_string(),
            status: get(key::ELECTION_STATUS)
                .map(ElectionStatus::parse)
                .unwrap_or(ElectionStatus::Inactive),
            target_end_time: TargetTime::parse(get(key::ELECTION_TARGET_TIME)),
            duration_seconds: get(key::ELECTION_DURATION).and_then(|d| d.parse().ok()),
        }
    }

    /// When an election started at `now` for `duration_seconds` ends, if
    /// that is a time the settings can hold.
    pub fn end_time(now: DateTime<Utc>, duration_seconds: i64) -> Option<DateTime<Utc>> {
        let duration = duration_seconds.checked_mul(1000).map(Duration::milliseconds)?;
        now.checked_add_signed(duration)
            .filter(|end| end.year() <= MAX_TARGET_YEAR)
    }

    /// The settings that make up a freshly started election.
    pub fn started(name: &str, now: DateTime<Utc>, duration: Duration) -> Vec<Setting> {
        vec![
            Setting::new(key::ELECTION_NAME, name),
            Setting::new(key::ELECTION_DURATION, duration.num_seconds().to_string()),
            Setting::new(key::ELECTION_TARGET_TIME, format_time(now + duration)),
            Setting::new(key::ELECTION_STATUS, ElectionStatus::Active.as_str()),
        ]
    }

    /// The settings that make up a stopped election.
    pub fn stopped() -> Vec<Setting> {
        vec![
            Setting::new(key::ELECTION_STATUS, ElectionStatus::Inactive.as_str()),
            Setting::new(key::ELECTION_TARGET_TIME, ""),
        ]
    }

    /// Derive the logical state at the given instant.
    pub fn state_at(&self, now: DateTime<Utc>) -> ElectionState {
        match (self.status, self.target_end_time) {
            (ElectionStatus::Inactive, _) => ElectionState::Inactive,
            (ElectionStatus::Active, TargetTime::At(end)) if now >= end => ElectionState::Expired,
            (ElectionStatus::Active, TargetTime::Malformed) => ElectionState::Inactive,
            (ElectionStatus::Active, _) => ElectionState::Active,
        }
    }

    /// Decide whether voting is permitted at the given instant.
    pub fn activity_at(&self, now: DateTime<Utc>) -> Activity {
        match self.state_at(now) {
            ElectionState::Active => Activity::new(true, Activity::ACTIVE),
            ElectionState::Expired => Activity::new(false, Activity::ENDED),
            ElectionState::Inactive if self.target_end_time == TargetTime::Malformed => {
                Activity::new(false, Activity::MALFORMED)
            }
            ElectionState::Inactive => Activity::new(false, Activity::CLOSED),
        }
    }

    /// Whole seconds left before the target end time, if one is set.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        match self.state_at(now) {
            ElectionState::Active => self
                .target_end_time
                .as_option()
                .map(|end| (end - now).num_seconds().max(0)),
            _ => None,
        }
    }
}

/// RFC 3339 has no room for a five digit year.
const MAX_TARGET_YEAR: i32 = 9999;

/// Timestamps in settings are stored as RFC 3339 UTC strings.
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + seconds, 0).unwrap()
    }

    fn started(duration: i64) -> ElectionConfig {
        ElectionConfig::from_settings(ElectionConfig::started(
            "Spring Vote",
            at(0),
            Duration::seconds(duration),
        ))
    }

    #[test]
    fn started_election_is_active_until_target() {
        let election = started(600);
        assert_eq!(election.name, "Spring Vote");
        assert_eq!(election.duration_seconds, Some(600));
        assert_eq!(election.target_end_time, TargetTime::At(at(600)));
        assert_eq!(election.state_at(at(0)), ElectionState::Active);
        assert_eq!(election.state_at(at(599)), ElectionState::Active);
        assert!(election.activity_at(at(599)).active);
    }

    #[test]
    fn expiry_is_inclusive_of_target() {
        let election = started(600);
        assert_eq!(election.state_at(at(600)), ElectionState::Expired);
        assert_eq!(election.state_at(at(601)), ElectionState::Expired);
        let activity = election.activity_at(at(601));
        assert!(!activity.active);
        assert_eq!(activity.reason, Activity::ENDED);
    }

    #[test]
    fn stopped_election_is_inactive_whatever_the_time() {
        let mut settings = ElectionConfig::started("Spring Vote", at(0), Duration::seconds(600));
        settings.extend(ElectionConfig::stopped());
        let election = ElectionConfig::from_settings(settings);
        assert_eq!(election.status, ElectionStatus::Inactive);
        assert_eq!(election.target_end_time, TargetTime::Unset);
        assert_eq!(election.state_at(at(10)), ElectionState::Inactive);
        assert_eq!(election.activity_at(at(10)).reason, Activity::CLOSED);
    }

    #[test]
    fn missing_settings_read_as_inactive() {
        let election = ElectionConfig::from_settings(Vec::new());
        assert_eq!(election.state_at(at(0)), ElectionState::Inactive);
        assert_eq!(election.remaining_seconds(at(0)), None);
    }

    #[test]
    fn active_without_target_has_no_deadline() {
        let election = ElectionConfig::from_settings(vec![Setting::new(
            key::ELECTION_STATUS,
            "active",
        )]);
        assert_eq!(election.state_at(at(1_000_000)), ElectionState::Active);
        assert_eq!(election.remaining_seconds(at(0)), None);
    }

    #[test]
    fn malformed_target_closes_without_expiring() {
        let election = ElectionConfig::from_settings(vec![
            Setting::new(key::ELECTION_STATUS, "active"),
            Setting::new(key::ELECTION_TARGET_TIME, "next tuesday"),
        ]);
        assert_eq!(election.state_at(at(0)), ElectionState::Inactive);
        assert_eq!(election.activity_at(at(0)).reason, Activity::MALFORMED);
    }

    #[test]
    fn end_time_must_fit_in_settings() {
        assert_eq!(ElectionConfig::end_time(at(0), 600), Some(at(600)));
        assert_eq!(ElectionConfig::end_time(at(0), 10_000_000_000_000), None);
        assert_eq!(ElectionConfig::end_time(at(0), i64::MAX), None);
        // About 250,000 years.
        assert_eq!(ElectionConfig::end_time(at(0), 8_000_000_000_000), None);
    }

    #[test]
    fn remaining_seconds_counts_down() {
        let election = started(600);
        assert_eq!(election.remaining_seconds(at(0)), Some(600));
        assert_eq!(election.remaining_seconds(at(450)), Some(150));
        assert_eq!(election.remaining_seconds(at(600)), None);
    }
}
