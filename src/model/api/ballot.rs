use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{api::id::ApiId, candidate::Candidate};

/// A ballot that the voter wishes to cast: one candidate per position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotRequest {
    pub selections: HashMap<String, ApiId>,
}

/// A candidate as shown on the ballot. Tallies stay hidden from voters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub id: ApiId,
    pub name: String,
    pub grade: String,
    pub has_image: bool,
}

impl From<&Candidate> for CandidateSummary {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            name: candidate.name.clone(),
            grade: candidate.grade.clone(),
            has_image: candidate.image.is_some(),
        }
    }
}

/// One race on the ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    pub position: String,
    pub candidates: Vec<CandidateSummary>,
}

/// Everything needed to build the voting form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotView {
    pub election_name: String,
    pub positions: Vec<PositionView>,
}

impl BallotView {
    /// Group candidates by position, positions and candidates both sorted by name.
    pub fn new(election_name: String, candidates: &[Candidate]) -> Self {
        let mut by_position: BTreeMap<&str, Vec<CandidateSummary>> = BTreeMap::new();
        for candidate in candidates {
            by_position
                .entry(&candidate.position)
                .or_default()
                .push(candidate.into());
        }
        let positions = by_position
            .into_iter()
            .map(|(position, mut candidates)| {
                candidates.sort_by(|a, b| a.name.cmp(&b.name));
                PositionView {
                    position: position.to_string(),
                    candidates,
                }
            })
            .collect();
        Self {
            election_name,
            positions,
        }
    }
}
