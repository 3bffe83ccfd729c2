use std::sync::Arc;

use log::info;
use thiserror::Error;

use crate::model::api::results::ResultsSnapshot;

/// A failure to render or save a results report.
#[derive(Debug, Error)]
#[error("Failed to report results: {0}")]
pub struct ReportError(pub String);

/// Receives the final tallies of every stopped election.
///
/// Called at most once per stop, after the stop has committed. A failure
/// here never undoes the stop.
#[rocket::async_trait]
pub trait ResultsReporter: Send + Sync {
    async fn report(&self, snapshot: &ResultsSnapshot) -> Result<(), ReportError>;
}

/// The reporter shared through managed state.
pub type SharedReporter = Arc<dyn ResultsReporter>;

/// Writes the final results to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[rocket::async_trait]
impl ResultsReporter for LogReporter {
    async fn report(&self, snapshot: &ResultsSnapshot) -> Result<(), ReportError> {
        info!(
            "Final results of '{}' ({} votes, taken {})",
            snapshot.election_name,
            snapshot.total_votes(),
            snapshot.taken_at
        );
        for row in &snapshot.rows {
            info!(
                "  {:<20} {:<30} {:<6} {:>6}",
                row.position, row.candidate, row.grade, row.votes
            );
        }
        Ok(())
    }
}
