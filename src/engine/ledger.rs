use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use mongodb::{
    bson::{doc, Bson},
    ClientSession,
};
use rocket::{
    futures::TryStreamExt,
    request::{self, FromRequest, Request},
};

use crate::error::VoteError;
use crate::model::{
    api::receipt::{Receipt, ReceiptLine},
    audit::{module, AuditEntry},
    candidate::Candidate,
    election::ElectionState,
    mongodb::{in_transaction, is_duplicate_key_error, Id, Store},
    session::Session,
    user::User,
    vote::Vote,
};

use super::{
    audit::AuditLog, election::ElectionController, session::SessionGuard, settings::ConfigStore,
};

/// Check that `selections` picks exactly one existing candidate for every
/// position on the ballot, and nothing else. Returns the chosen candidates
/// in position order.
pub fn check_ballot<'c>(
    candidates: &'c [Candidate],
    selections: &HashMap<String, Id>,
) -> Result<Vec<&'c Candidate>, VoteError> {
    let positions: BTreeSet<&str> = candidates.iter().map(|c| c.position.as_str()).collect();

    let missing: Vec<String> = positions
        .iter()
        .filter(|position| !selections.contains_key(**position))
        .map(|position| position.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(VoteError::IncompleteBallot(missing));
    }

    let mut chosen = Vec::with_capacity(selections.len());
    for (position, id) in selections {
        let candidate = candidates
            .iter()
            .find(|c| c.id == *id && c.position == *position)
            .ok_or_else(|| VoteError::InvalidSelection(position.clone()))?;
        chosen.push(candidate);
    }
    chosen.sort_by(|a, b| a.position.cmp(&b.position));
    Ok(chosen)
}

/// Records ballots. The only writer of votes and tallies outside a reset.
#[derive(Clone)]
pub struct VoteLedger {
    store: Store,
    sessions: SessionGuard,
    election: ElectionController,
    settings: ConfigStore,
    audit: AuditLog,
}

impl VoteLedger {
    pub fn new(store: &Store, election: ElectionController) -> Self {
        Self {
            store: store.clone(),
            sessions: SessionGuard::new(store, election.clone()),
            settings: ConfigStore::new(store),
            audit: AuditLog::new(store),
            election,
        }
    }

    /// Cast the voter's one ballot, then end their session.
    ///
    /// Never re-submitted on the caller's behalf. Submitting again after a
    /// success always fails with `AlreadyVoted`.
    pub async fn cast_vote(
        &self,
        session: &Session,
        selections: &HashMap<String, Id>,
        now: DateTime<Utc>,
    ) -> Result<Receipt, VoteError> {
        if !self.sessions.validate(session).await? {
            return Err(VoteError::SessionInvalid);
        }
        let activity = self.election.is_active(now).await?;
        if !activity.active {
            return Err(VoteError::ElectionClosed(activity.reason));
        }
        let voter = self
            .store
            .coll::<User>()
            .find_one(session.user_id.as_doc(), None)
            .await?
            .ok_or(VoteError::SessionInvalid)?;
        if voter.voted {
            return Err(VoteError::AlreadyVoted);
        }

        let candidates: Vec<Candidate> = self
            .store
            .coll::<Candidate>()
            .find(None, super::election::without_images())
            .await?
            .try_collect()
            .await?;
        let chosen = check_ballot(&candidates, selections)?;

        let votes: Vec<Vote> = chosen
            .iter()
            .map(|c| Vote::new(voter.id, c.id, c.position.clone(), now))
            .collect();
        let lines: Vec<ReceiptLine> = chosen
            .iter()
            .map(|c| ReceiptLine {
                position: c.position.clone(),
                candidate: c.name.clone(),
            })
            .collect();
        let entry = AuditEntry::new(
            &voter.username,
            module::VOTING,
            "Cast ballot",
            format!("{} positions", votes.len()),
            now,
        );

        let mut db_session = self.store.start_session().await?;
        let result: Result<(), VoteError> = in_transaction!(
            db_session,
            "casting a ballot",
            self.commit_in(session, &votes, &entry, now, &mut db_session)
        );
        match result {
            Ok(()) => {
                info!("Ballot cast by '{}'", voter.username);
                Ok(Receipt::new(voter.username.clone(), now, lines))
            }
            Err(VoteError::ElectionClosed(reason)) => {
                // Closed between the first check and the commit. Settle any
                // expiry so the final results get reported.
                if let Err(err) = self.election.is_active(now).await {
                    error!("Failed to settle election expiry: {err}");
                }
                warn!("Ballot by '{}' arrived after the election closed", voter.username);
                Err(VoteError::ElectionClosed(reason))
            }
            Err(err) => {
                debug!("Ballot by '{}' rejected: {err}", voter.username);
                Err(err)
            }
        }
    }

    async fn commit_in(
        &self,
        session: &Session,
        votes: &[Vote],
        entry: &AuditEntry,
        now: DateTime<Utc>,
        db_session: &mut ClientSession,
    ) -> Result<(), VoteError> {
        // The gate is checked again against the state this commit sees.
        let config = self.settings.load_election_in(db_session).await?;
        if config.state_at(now) != ElectionState::Active {
            return Err(VoteError::ElectionClosed(config.activity_at(now).reason));
        }

        let users = self.store.coll::<User>();
        let still_unvoted = doc! {
            "_id": session.user_id,
            "voted": false,
            "session_token": session.token.as_str(),
        };
        let mark_voted = doc! {
            "$set": {
                "voted": true,
                "session_token": Bson::Null,
                "last_active": Bson::Null,
            }
        };
        let marked = users
            .update_one_with_session(still_unvoted, mark_voted, None, db_session)
            .await?;
        if marked.matched_count == 0 {
            let voter = users
                .find_one_with_session(session.user_id.as_doc(), None, db_session)
                .await?;
            return Err(match voter {
                Some(voter) if voter.voted => VoteError::AlreadyVoted,
                _ => VoteError::SessionInvalid,
            });
        }

        let candidates = self.store.coll::<Candidate>();
        for vote in votes {
            let tallied = candidates
                .update_one_with_session(
                    doc! { "_id": vote.candidate_id, "position": &vote.position },
                    doc! { "$inc": { "votes": 1 } },
                    None,
                    db_session,
                )
                .await?;
            if tallied.matched_count == 0 {
                // Archived or moved since the ballot was checked.
                return Err(VoteError::InvalidSelection(vote.position.clone()));
            }
        }

        if !votes.is_empty() {
            match self
                .store
                .coll::<Vote>()
                .insert_many_with_session(votes, None, db_session)
                .await
            {
                Ok(_) => {}
                Err(err) if is_duplicate_key_error(&err) => return Err(VoteError::AlreadyVoted),
                Err(err) => return Err(err.into()),
            }
        }

        self.audit.append_in(entry, db_session).await?;
        Ok(())
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for VoteLedger {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let election = rocket::outcome::try_outcome!(req.guard::<ElectionController>().await);
        let store = rocket::outcome::try_outcome!(req.guard::<Store>().await);
        request::Outcome::Success(Self::new(&store, election))
    }
}
