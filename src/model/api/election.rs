use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::election::{Activity, ElectionConfig, ElectionState};

/// A request to open voting for a given number of seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub name: String,
    pub duration_seconds: i64,
}

/// Wiping the votes is destructive, so the caller must say so explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub confirm: bool,
}

/// The election as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionStatusView {
    pub name: String,
    pub state: ElectionState,
    pub active: bool,
    pub reason: String,
    pub target_end_time: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
}

impl ElectionStatusView {
    /// Describe the election as of `now`. `activity` must already have been
    /// settled against the store, so any expiry has been applied.
    pub fn new(config: &ElectionConfig, activity: Activity, now: DateTime<Utc>) -> Self {
        Self {
            name: config.name.clone(),
            state: config.state_at(now),
            active: activity.active,
            reason: activity.reason,
            target_end_time: config.target_end_time.as_option(),
            remaining_seconds: config.remaining_seconds(now),
        }
    }
}
