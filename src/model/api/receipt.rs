use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of a receipt: who the voter chose for one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub position: String,
    pub candidate: String,
}

/// Proof of a committed ballot, for display to the voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub voter: String,
    pub cast_at: DateTime<Utc>,
    /// Sorted by position.
    pub lines: Vec<ReceiptLine>,
}

impl Receipt {
    pub fn new(voter: String, cast_at: DateTime<Utc>, mut lines: Vec<ReceiptLine>) -> Self {
        lines.sort_by(|a, b| a.position.cmp(&b.position));
        Self {
            voter,
            cast_at,
            lines,
        }
    }
}
