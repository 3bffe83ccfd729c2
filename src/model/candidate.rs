use mongodb::bson::Binary;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A candidate standing for one position.
///
/// Not split into core and ID like users: the image payload is kept out of
/// `#[serde(flatten)]`, which buffers binary data badly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    pub name: String,
    /// Ballot grouping key: a voter picks exactly one candidate per position.
    pub position: String,
    #[serde(default)]
    pub grade: String,
    /// Running total; always equal to the number of votes referencing this candidate.
    #[serde(default)]
    pub votes: u32,
    #[serde(default)]
    pub image: Option<Binary>,
}

impl Candidate {
    /// A new candidate with no votes.
    pub fn new(name: String, position: String, grade: String, image: Option<Binary>) -> Self {
        Self {
            id: Id::new(),
            name,
            position,
            grade,
            votes: 0,
            image,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
pub mod examples {
    use super::*;

    impl Candidate {
        pub fn example(name: &str, position: &str) -> Self {
            Self::new(name.to_string(), position.to_string(), "12".to_string(), None)
        }

        /// Two positions, two candidates each.
        pub fn example_slate() -> Vec<Self> {
            vec![
                Self::example("Alice Santos", "President"),
                Self::example("Ben Cruz", "President"),
                Self::example("Carla Lim", "Secretary"),
                Self::example("Dan Uy", "Secretary"),
            ]
        }
    }
}
