use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{candidate::Candidate, election::StopReason};

/// How many candidates per position the leaderboard shows.
pub const LEADERBOARD_SIZE: usize = 3;

/// One candidate's tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub position: String,
    pub candidate: String,
    pub grade: String,
    pub votes: u32,
}

impl From<&Candidate> for ResultRow {
    fn from(candidate: &Candidate) -> Self {
        Self {
            position: candidate.position.clone(),
            candidate: candidate.name.clone(),
            grade: candidate.grade.clone(),
            votes: candidate.votes,
        }
    }
}

/// Sort tallies by position, then by votes descending, then by name.
pub fn sorted_rows(candidates: &[Candidate]) -> Vec<ResultRow> {
    let mut rows: Vec<ResultRow> = candidates.iter().map(ResultRow::from).collect();
    rows.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then(b.votes.cmp(&a.votes))
            .then(a.candidate.cmp(&b.candidate))
    });
    rows
}

/// The tallies of every candidate, read in one consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsSnapshot {
    pub election_name: String,
    pub taken_at: DateTime<Utc>,
    /// Set when the snapshot was taken because the election stopped.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    pub rows: Vec<ResultRow>,
}

impl ResultsSnapshot {
    pub fn new(
        election_name: String,
        taken_at: DateTime<Utc>,
        stop_reason: Option<StopReason>,
        candidates: &[Candidate],
    ) -> Self {
        Self {
            election_name,
            taken_at,
            stop_reason,
            rows: sorted_rows(candidates),
        }
    }

    pub fn total_votes(&self) -> u64 {
        self.rows.iter().map(|row| u64::from(row.votes)).sum()
    }
}

/// The front-runners for one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLeaders {
    pub position: String,
    pub leaders: Vec<ResultRow>,
}

/// The top candidates of every position, positions in order.
pub fn leaderboard(candidates: &[Candidate]) -> Vec<PositionLeaders> {
    let mut by_position: BTreeMap<String, Vec<ResultRow>> = BTreeMap::new();
    for row in sorted_rows(candidates) {
        let leaders = by_position.entry(row.position.clone()).or_default();
        if leaders.len() < LEADERBOARD_SIZE {
            leaders.push(row);
        }
    }
    by_position
        .into_iter()
        .map(|(position, leaders)| PositionLeaders { position, leaders })
        .collect()
}

/// How many registered voters have voted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turnout {
    pub registered: u64,
    pub voted: u64,
    pub percent: f64,
}

impl Turnout {
    pub fn new(registered: u64, voted: u64) -> Self {
        let percent = if registered == 0 {
            0.0
        } else {
            voted as f64 * 100.0 / registered as f64
        };
        Self {
            registered,
            voted,
            percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tallied(name: &str, position: &str, votes: u32) -> Candidate {
        let mut candidate = Candidate::example(name, position);
        candidate.votes = votes;
        candidate
    }

    #[test]
    fn rows_sort_by_position_then_votes() {
        let candidates = vec![
            tallied("Carla Lim", "Secretary", 4),
            tallied("Ben Cruz", "President", 2),
            tallied("Alice Santos", "President", 7),
            tallied("Dan Uy", "Secretary", 4),
        ];
        let order: Vec<_> = sorted_rows(&candidates)
            .into_iter()
            .map(|row| row.candidate)
            .collect();
        assert_eq!(order, vec!["Alice Santos", "Ben Cruz", "Carla Lim", "Dan Uy"]);
    }

    #[test]
    fn leaderboard_keeps_top_three() {
        let candidates = vec![
            tallied("A", "President", 1),
            tallied("B", "President", 5),
            tallied("C", "President", 3),
            tallied("D", "President", 9),
            tallied("E", "Treasurer", 0),
        ];
        let board = leaderboard(&candidates);
        assert_eq!(board.len(), 2);
        let names: Vec<_> = board[0].leaders.iter().map(|r| r.candidate.as_str()).collect();
        assert_eq!(names, vec!["D", "B", "C"]);
        assert_eq!(board[1].leaders.len(), 1);
    }

    #[test]
    fn turnout_of_empty_roll_is_zero() {
        assert_eq!(Turnout::new(0, 0).percent, 0.0);
        assert_eq!(Turnout::new(8, 2).percent, 25.0);
    }
}
