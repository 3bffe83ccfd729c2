use serde::{Deserialize, Serialize};

/// Keys of the durable settings.
pub mod key {
    pub const ELECTION_NAME: &str = "election_name";
    pub const ELECTION_STATUS: &str = "election_status";
    pub const ELECTION_TARGET_TIME: &str = "election_target_time";
    pub const ELECTION_DURATION: &str = "election_duration";
}

/// One durable key/value setting. Last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    #[serde(rename = "_id")]
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Settings seeded into an empty store.
pub fn defaults() -> Vec<Setting> {
    vec![
        Setting::new(key::ELECTION_NAME, "School Election 2025"),
        Setting::new(key::ELECTION_STATUS, "inactive"),
        Setting::new(key::ELECTION_DURATION, "3600"),
        Setting::new(key::ELECTION_TARGET_TIME, ""),
    ]
}
