use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// One voter's choice for one position. Never modified once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    pub voter_id: Id,
    pub candidate_id: Id,
    pub position: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(voter_id: Id, candidate_id: Id, position: String, cast_at: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            voter_id,
            candidate_id,
            position,
            cast_at,
        }
    }
}
