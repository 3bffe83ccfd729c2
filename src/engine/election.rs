use chrono::{DateTime, Utc};
use log::{error, info, warn};
use mongodb::{bson::doc, options::FindOptions, ClientSession};
use rocket::{
    futures::TryStreamExt,
    http::Status,
    request::{self, FromRequest, Request},
};

use crate::error::{ConfigError, ElectionError};
use crate::model::{
    api::results::ResultsSnapshot,
    audit::{module, AuditEntry, SYSTEM_ACTOR},
    candidate::Candidate,
    election::{Activity, ElectionConfig, ElectionState, StopReason},
    mongodb::{in_transaction, Store},
    setting::Setting,
    user::{Role, User},
    vote::Vote,
};

use super::{
    audit::AuditLog,
    report::SharedReporter,
    session::end_voter_sessions_in,
    settings::ConfigStore,
};

/// Owns the election state machine. State is derived from the stored
/// settings and the clock on every call, never cached.
#[derive(Clone)]
pub struct ElectionController {
    store: Store,
    settings: ConfigStore,
    audit: AuditLog,
    reporter: SharedReporter,
}

impl ElectionController {
    pub fn new(store: Store, reporter: SharedReporter) -> Self {
        Self {
            settings: ConfigStore::new(&store),
            audit: AuditLog::new(&store),
            store,
            reporter,
        }
    }

    /// The stored election record, without applying any expiry.
    pub async fn config(&self) -> Result<ElectionConfig, ConfigError> {
        self.settings.load_election().await
    }

    /// Is voting permitted at `now`? An election found past its end time is
    /// stopped here, before the answer is returned.
    pub async fn is_active(&self, now: DateTime<Utc>) -> Result<Activity, ConfigError> {
        let config = self.settings.load_election().await?;
        if config.state_at(now) == ElectionState::Expired {
            self.transition_to_inactive(StopReason::Auto, SYSTEM_ACTOR, now)
                .await?;
        }
        Ok(config.activity_at(now))
    }

    /// Open voting for `duration_seconds` from `now`.
    pub async fn start(
        &self,
        name: &str,
        duration_seconds: i64,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ElectionConfig, ElectionError> {
        if duration_seconds <= 0 {
            return Err(ElectionError::InvalidDuration(duration_seconds));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ElectionError::MissingName);
        }
        // Settle any expiry first, so a finished election gets its report.
        self.is_active(now).await?;

        let end_time = ElectionConfig::end_time(now, duration_seconds)
            .ok_or(ElectionError::InvalidDuration(duration_seconds))?;
        let settings = ElectionConfig::started(name, now, end_time - now);
        let entry = AuditEntry::new(
            actor,
            module::SYSTEM,
            "Started election",
            format!("'{name}' for {duration_seconds} seconds"),
            now,
        );

        let mut session = self.store.start_session().await?;
        let result: Result<(), ElectionError> = in_transaction!(
            session,
            "starting the election",
            self.start_in(&settings, &entry, now, &mut session)
        );
        result?;

        let config = ElectionConfig::from_settings(settings);
        info!(
            "Election '{name}' started by {actor}, ends at {:?}",
            config.target_end_time.as_option()
        );
        Ok(config)
    }

    /// Close voting by hand. Returns the final tallies, which have also
    /// been handed to the reporter.
    pub async fn stop(
        &self,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ResultsSnapshot, ElectionError> {
        // An election that already ran out is stopped automatically, not by hand.
        self.is_active(now).await?;
        self.transition_to_inactive(StopReason::Manual, actor, now)
            .await?
            .ok_or(ElectionError::NotActive)
    }

    /// Delete every vote, zero every tally and clear every voted flag.
    /// Refused while voting is open.
    pub async fn reset_votes(&self, actor: &str, now: DateTime<Utc>) -> Result<(), ElectionError> {
        self.is_active(now).await?;
        let entry = AuditEntry::new(
            actor,
            module::VOTING,
            "Reset election data",
            "Cleared all votes and tallies",
            now,
        );
        let mut session = self.store.start_session().await?;
        let result: Result<u64, ElectionError> = in_transaction!(
            session,
            "resetting the votes",
            self.reset_in(&entry, now, &mut session)
        );
        let deleted = result?;
        warn!("Election data reset by {actor}: {deleted} votes deleted");
        Ok(())
    }

    /// The current tallies.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<ResultsSnapshot, ConfigError> {
        let config = self.settings.load_election().await?;
        let candidates: Vec<Candidate> = self
            .store
            .coll::<Candidate>()
            .find(None, without_images())
            .await
            .map_err(ConfigError::ReadFailure)?
            .try_collect()
            .await
            .map_err(ConfigError::ReadFailure)?;
        Ok(ResultsSnapshot::new(config.name, now, None, &candidates))
    }

    /// Flip an election to inactive, ending every voter session, and report
    /// the tallies as of the flip. Returns `None`, doing nothing, if the
    /// election was not in the state `reason` stops from; this is how
    /// concurrent stops of the same election report exactly once.
    async fn transition_to_inactive(
        &self,
        reason: StopReason,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ResultsSnapshot>, ConfigError> {
        let from = match reason {
            StopReason::Manual => ElectionState::Active,
            StopReason::Auto => ElectionState::Expired,
        };
        let description = match reason {
            StopReason::Manual => "Stopped by hand",
            StopReason::Auto => "Time limit reached",
        };
        let entry = AuditEntry::new(actor, module::SYSTEM, "Stopped election", description, now);

        let mut session = self.store.start_session().await?;
        let result: Result<Option<ResultsSnapshot>, ConfigError> = in_transaction!(
            session,
            "stopping the election",
            self.stop_in(from, reason, &entry, now, &mut session)
        );
        let snapshot = result?;

        // Only after the stop has committed: a failed report must not undo it.
        if let Some(snapshot) = &snapshot {
            if let Err(err) = self.reporter.report(snapshot).await {
                error!("Election stopped, but its final results were not reported: {err}");
            }
        }
        Ok(snapshot)
    }

    async fn start_in(
        &self,
        settings: &[Setting],
        entry: &AuditEntry,
        now: DateTime<Utc>,
        session: &mut ClientSession,
    ) -> Result<(), ElectionError> {
        let config = self.settings.load_election_in(session).await?;
        if config.state_at(now) == ElectionState::Active {
            return Err(ElectionError::AlreadyActive);
        }
        self.settings.set_all_in(settings, session).await?;
        self.audit.append_in(entry, session).await?;
        Ok(())
    }

    async fn reset_in(
        &self,
        entry: &AuditEntry,
        now: DateTime<Utc>,
        session: &mut ClientSession,
    ) -> Result<u64, ElectionError> {
        let config = self.settings.load_election_in(session).await?;
        if config.state_at(now) == ElectionState::Active {
            return Err(ElectionError::AlreadyActive);
        }
        let deleted = self
            .store
            .coll::<Vote>()
            .delete_many_with_session(doc! {}, None, session)
            .await?
            .deleted_count;
        self.store
            .coll::<Candidate>()
            .update_many_with_session(doc! {}, doc! { "$set": { "votes": 0 } }, None, session)
            .await?;
        self.store
            .coll::<User>()
            .update_many_with_session(
                doc! { "role": Role::Voter as i32 },
                doc! { "$set": { "voted": false } },
                None,
                session,
            )
            .await?;
        self.audit.append_in(entry, session).await?;
        Ok(deleted)
    }

    async fn stop_in(
        &self,
        from: ElectionState,
        reason: StopReason,
        entry: &AuditEntry,
        now: DateTime<Utc>,
        session: &mut ClientSession,
    ) -> Result<Option<ResultsSnapshot>, ConfigError> {
        let config = self.settings.load_election_in(session).await?;
        if config.state_at(now) != from {
            return Ok(None);
        }
        self.settings
            .set_all_in(&ElectionConfig::stopped(), session)
            .await?;
        let ended = end_voter_sessions_in(&self.store.coll(), session).await?;

        let mut cursor = self
            .store
            .coll::<Candidate>()
            .find_with_session(None, without_images(), session)
            .await?;
        let mut candidates = Vec::new();
        while let Some(candidate) = cursor.next(session).await {
            candidates.push(candidate?);
        }
        let snapshot = ResultsSnapshot::new(config.name, now, Some(reason), &candidates);

        self.audit.append_in(entry, session).await?;
        info!(
            "Stopping election '{}' ({reason:?}), ending {ended} voter sessions",
            snapshot.election_name
        );
        Ok(Some(snapshot))
    }
}

/// Tallies never need the image payloads.
pub(super) fn without_images() -> FindOptions {
    FindOptions::builder()
        .projection(doc! { "image": 0 })
        .build()
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ElectionController {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let rocket = req.rocket();
        match (rocket.state::<Store>(), rocket.state::<SharedReporter>()) {
            (Some(store), Some(reporter)) => {
                request::Outcome::Success(Self::new(store.clone(), reporter.clone()))
            }
            _ => {
                error!("Store or reporter missing from managed state");
                request::Outcome::Failure((Status::InternalServerError, ()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::engine::report::examples::{FailingReporter, RecordingReporter};
    use crate::model::{election::ElectionStatus, setting::key};

    fn controller(store: &Store) -> (ElectionController, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        (
            ElectionController::new(store.clone(), reporter.clone()),
            reporter,
        )
    }

    #[backend_test]
    async fn start_then_expire(store: Store) {
        let (election, reporter) = controller(&store);
        let now = Utc::now();

        election.start("Spring Vote", 600, "admin", now).await.unwrap();
        let activity = election.is_active(now).await.unwrap();
        assert!(activity.active);
        assert_eq!(activity.reason, Activity::ACTIVE);

        let later = now + Duration::seconds(601);
        let activity = election.is_active(later).await.unwrap();
        assert!(!activity.active);
        assert_eq!(activity.reason, Activity::ENDED);

        // The flip was persisted, not just reported.
        let settings = ConfigStore::new(&store);
        assert_eq!(
            settings.get(key::ELECTION_STATUS).await.unwrap().as_deref(),
            Some("inactive")
        );
        assert_eq!(
            settings.get(key::ELECTION_TARGET_TIME).await.unwrap().as_deref(),
            Some("")
        );
        let config = election.config().await.unwrap();
        assert_eq!(config.status, ElectionStatus::Inactive);

        // Reported exactly once, however often it is asked afterwards.
        election.is_active(later).await.unwrap();
        election.is_active(later + Duration::seconds(5)).await.unwrap();
        let snapshots = reporter.snapshots.lock().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].stop_reason, Some(StopReason::Auto));
        assert_eq!(snapshots[0].election_name, "Spring Vote");
    }

    #[backend_test]
    async fn start_rejects_bad_requests(store: Store) {
        let (election, _) = controller(&store);
        let now = Utc::now();
        assert!(matches!(
            election.start("Spring Vote", 0, "admin", now).await,
            Err(ElectionError::InvalidDuration(0))
        ));
        assert!(matches!(
            election.start("  ", 60, "admin", now).await,
            Err(ElectionError::MissingName)
        ));
        assert!(matches!(
            election.start("Spring Vote", i64::MAX, "admin", now).await,
            Err(ElectionError::InvalidDuration(i64::MAX))
        ));
        assert!(matches!(
            election.start("Spring Vote", 10_000_000_000_000, "admin", now).await,
            Err(ElectionError::InvalidDuration(_))
        ));
        assert!(!election.is_active(now).await.unwrap().active);
        election.start("Spring Vote", 60, "admin", now).await.unwrap();
        assert!(matches!(
            election.start("Autumn Vote", 60, "admin", now).await,
            Err(ElectionError::AlreadyActive)
        ));
        // Once expired, a new election may start straight away.
        let later = now + Duration::seconds(61);
        election.start("Autumn Vote", 60, "admin", later).await.unwrap();
        assert_eq!(election.config().await.unwrap().name, "Autumn Vote");
    }

    #[backend_test]
    async fn manual_stop_reports_once(store: Store) {
        let (election, reporter) = controller(&store);
        let now = Utc::now();
        assert!(matches!(
            election.stop("admin", now).await,
            Err(ElectionError::NotActive)
        ));

        election.start("Spring Vote", 600, "admin", now).await.unwrap();
        let snapshot = election.stop("admin", now).await.unwrap();
        assert_eq!(snapshot.stop_reason, Some(StopReason::Manual));
        assert!(!election.is_active(now).await.unwrap().active);
        assert_eq!(
            election.is_active(now).await.unwrap().reason,
            Activity::CLOSED
        );
        assert!(matches!(
            election.stop("admin", now).await,
            Err(ElectionError::NotActive)
        ));
        assert_eq!(reporter.snapshots.lock().await.len(), 1);
    }

    #[backend_test]
    async fn racing_stops_report_once(store: Store) {
        let (election, reporter) = controller(&store);
        let now = Utc::now();

        // Two requests notice the expiry at the same moment.
        election.start("Spring Vote", 600, "admin", now).await.unwrap();
        let expired = now + Duration::seconds(601);
        let (first, second) =
            rocket::tokio::join!(election.is_active(expired), election.is_active(expired));
        assert!(!first.unwrap().active);
        assert!(!second.unwrap().active);
        assert_eq!(reporter.snapshots.lock().await.len(), 1);

        // Two admins press stop together.
        election.start("Autumn Vote", 600, "admin", expired).await.unwrap();
        let (first, second) = rocket::tokio::join!(
            election.stop("admin", expired),
            election.stop("other admin", expired)
        );
        assert!(first.is_ok() != second.is_ok());
        assert!(matches!(
            first.err().or(second.err()),
            Some(ElectionError::NotActive)
        ));
        assert_eq!(reporter.snapshots.lock().await.len(), 2);

        // A manual stop arrives just as a request notices the expiry.
        let now = expired;
        election.start("Winter Vote", 600, "admin", now).await.unwrap();
        let expired = now + Duration::seconds(601);
        let (stopped, checked) = rocket::tokio::join!(
            election.stop("admin", expired),
            election.is_active(expired)
        );
        assert!(matches!(stopped, Err(ElectionError::NotActive)));
        assert!(!checked.unwrap().active);
        let snapshots = reporter.snapshots.lock().await;
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[2].election_name, "Winter Vote");
        assert_eq!(snapshots[2].stop_reason, Some(StopReason::Auto));
    }

    #[backend_test]
    async fn failed_report_keeps_stop(store: Store) {
        let election = ElectionController::new(store.clone(), Arc::new(FailingReporter));
        let now = Utc::now();
        election.start("Spring Vote", 600, "admin", now).await.unwrap();
        election.stop("admin", now).await.unwrap();
        assert_eq!(
            election.config().await.unwrap().status,
            ElectionStatus::Inactive
        );
    }

    #[backend_test]
    async fn reset_refused_while_active(store: Store) {
        let (election, _) = controller(&store);
        let now = Utc::now();
        election.start("Spring Vote", 600, "admin", now).await.unwrap();
        assert!(matches!(
            election.reset_votes("admin", now).await,
            Err(ElectionError::AlreadyActive)
        ));
        election.stop("admin", now).await.unwrap();
        election.reset_votes("admin", now).await.unwrap();
    }
}
