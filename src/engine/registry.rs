use chrono::{DateTime, Utc};
use log::info;
use mongodb::{
    bson::{doc, Document},
    options::{FindOneOptions, FindOptions},
};
use rocket::{
    futures::TryStreamExt,
    http::Status,
    request::{self, FromRequest, Request},
};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        admin::{CandidateSpec, NewVoterRequest},
        ballot::BallotView,
        results::{leaderboard, PositionLeaders, Turnout},
    },
    audit::{module, AuditEntry},
    candidate::Candidate,
    mongodb::{is_duplicate_key_error, Coll, Id, Store},
    user::{NewUser, Role, User},
};

use super::{audit::AuditLog, election::ElectionController};

/// Voter and candidate records, and the read-only views built on them.
#[derive(Clone)]
pub struct Registry {
    users: Coll<User>,
    new_users: Coll<NewUser>,
    candidates: Coll<Candidate>,
    election: ElectionController,
    audit: AuditLog,
}

impl Registry {
    pub fn new(store: &Store, election: ElectionController) -> Self {
        Self {
            users: store.coll(),
            new_users: store.coll(),
            candidates: store.coll(),
            election,
            audit: AuditLog::new(store),
        }
    }

    /// Register a voter. Usernames are unique.
    pub async fn register_voter(
        &self,
        request: NewVoterRequest,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Id> {
        let voter = NewUser::try_from(request)?;
        let id: Id = match self.new_users.insert_one(&voter, None).await {
            Ok(result) => result
                .inserted_id
                .as_object_id()
                .ok_or_else(|| {
                    Error::Status(Status::InternalServerError, "Bad voter ID".to_string())
                })?
                .into(),
            Err(err) if is_duplicate_key_error(&err) => {
                return Err(Error::Status(
                    Status::Conflict,
                    format!("Username '{}' is already taken", voter.username),
                ))
            }
            Err(err) => return Err(err.into()),
        };
        info!("Registered voter '{}'", voter.username);
        self.audit
            .append(AuditEntry::new(
                actor,
                module::VOTERS,
                "Registered voter",
                voter.username,
                now,
            ))
            .await;
        Ok(id)
    }

    pub async fn add_candidate(
        &self,
        spec: CandidateSpec,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Candidate> {
        self.ensure_not_voting(now).await?;
        let (name, position) = spec.validate()?;
        let candidate = Candidate::new(name, position, spec.grade.trim().to_string(), spec.image()?);
        self.candidates
            .insert_one(&candidate, None)
            .await
            .map_err(|err| name_taken(err, &candidate.name))?;
        info!("Added candidate '{}' for {}", candidate.name, candidate.position);
        self.audit
            .append(AuditEntry::new(
                actor,
                module::CANDIDATES,
                "Added candidate",
                format!("{} for {}", candidate.name, candidate.position),
                now,
            ))
            .await;
        Ok(candidate)
    }

    /// Change a candidate's details. Leaving out the image keeps the old one.
    /// The tally is never touched.
    pub async fn edit_candidate(
        &self,
        id: Id,
        spec: CandidateSpec,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_not_voting(now).await?;
        let (name, position) = spec.validate()?;
        let mut changes = doc! {
            "name": &name,
            "position": &position,
            "grade": spec.grade.trim(),
        };
        if let Some(image) = spec.image()? {
            changes.insert("image", image);
        }
        let result = self
            .candidates
            .update_one(id.as_doc(), doc! { "$set": changes }, None)
            .await
            .map_err(|err| name_taken(err, &name))?;
        if result.matched_count == 0 {
            return Err(Error::not_found(format!("Candidate with ID '{id}'")));
        }
        self.audit
            .append(AuditEntry::new(
                actor,
                module::CANDIDATES,
                "Edited candidate",
                format!("{name} for {position}"),
                now,
            ))
            .await;
        Ok(())
    }

    pub async fn candidate_image(&self, id: Id) -> Result<Vec<u8>> {
        let options = FindOneOptions::builder()
            .projection(doc! { "image": 1, "name": 1, "position": 1 })
            .build();
        let candidate = self
            .candidates
            .find_one(id.as_doc(), options)
            .await?
            .ok_or_else(|| Error::not_found(format!("Candidate with ID '{id}'")))?;
        candidate
            .image
            .map(|image| image.bytes)
            .ok_or_else(|| Error::not_found(format!("Image of candidate '{}'", candidate.name)))
    }

    /// The positions and candidates a voter chooses between.
    pub async fn ballot(&self) -> Result<BallotView> {
        let config = self.election.config().await?;
        let candidates = self.all_candidates(None).await?;
        Ok(BallotView::new(config.name, &candidates))
    }

    pub async fn leaders(&self) -> Result<Vec<PositionLeaders>> {
        Ok(leaderboard(&self.all_candidates(without_images()).await?))
    }

    pub async fn turnout(&self) -> Result<Turnout> {
        let voters = doc! { "role": Role::Voter as i32 };
        let registered = self.users.count_documents(voters.clone(), None).await?;
        let voted = self
            .users
            .count_documents(with_voted(voters), None)
            .await?;
        Ok(Turnout::new(registered, voted))
    }

    async fn all_candidates(&self, options: Option<FindOptions>) -> Result<Vec<Candidate>> {
        Ok(self.candidates.find(None, options).await?.try_collect().await?)
    }

    async fn ensure_not_voting(&self, now: DateTime<Utc>) -> Result<()> {
        if self.election.is_active(now).await?.active {
            return Err(Error::Status(
                Status::Conflict,
                "Cannot change candidates while the election is live".to_string(),
            ));
        }
        Ok(())
    }
}

fn without_images() -> Option<FindOptions> {
    Some(super::election::without_images())
}

fn with_voted(mut filter: Document) -> Document {
    filter.insert("voted", true);
    filter
}

fn name_taken(err: mongodb::error::Error, name: &str) -> Error {
    if is_duplicate_key_error(&err) {
        Error::Status(
            Status::Conflict,
            format!("A candidate named '{name}' already exists"),
        )
    } else {
        err.into()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Registry {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let election = rocket::outcome::try_outcome!(req.guard::<ElectionController>().await);
        let store = rocket::outcome::try_outcome!(req.guard::<Store>().await);
        request::Outcome::Success(Self::new(&store, election))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::report::LogReporter;

    fn registry(store: &Store) -> Registry {
        Registry::new(
            store,
            ElectionController::new(store.clone(), Arc::new(LogReporter)),
        )
    }

    #[backend_test]
    async fn usernames_are_unique(store: Store) {
        let registry = registry(&store);
        let now = Utc::now();
        let id = registry
            .register_voter(NewVoterRequest::example(), "admin", now)
            .await
            .unwrap();
        let voter = store.coll::<User>().find_one(id.as_doc(), None).await.unwrap().unwrap();
        assert_eq!(voter.username, "2024-0456");

        let err = registry
            .register_voter(NewVoterRequest::example(), "admin", now)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::Conflict);
    }

    #[backend_test]
    async fn candidate_names_ignore_case(store: Store) {
        let registry = registry(&store);
        let now = Utc::now();
        registry
            .add_candidate(CandidateSpec::example("Alice Santos", "President"), "admin", now)
            .await
            .unwrap();
        let err = registry
            .add_candidate(CandidateSpec::example("alice SANTOS", "Secretary"), "admin", now)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::Conflict);
    }

    #[backend_test]
    async fn candidates_frozen_while_voting(store: Store) {
        let registry = registry(&store);
        let now = Utc::now();
        let mut spec = CandidateSpec::example("Ben Cruz", "President");
        spec.image = Some("iVBORw0KGgo=".into());
        let ben = registry.add_candidate(spec, "admin", now).await.unwrap();

        registry
            .election
            .start("Spring Vote", 600, "admin", now)
            .await
            .unwrap();
        let err = registry
            .edit_candidate(ben.id, CandidateSpec::example("Ben Cruz", "Treasurer"), "admin", now)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::Conflict);

        // Open again once voting has ended.
        let later = now + chrono::Duration::seconds(601);
        registry
            .edit_candidate(ben.id, CandidateSpec::example("Ben Cruz", "Treasurer"), "admin", later)
            .await
            .unwrap();
        let ballot = registry.ballot().await.unwrap();
        assert_eq!(ballot.positions.len(), 1);
        assert_eq!(ballot.positions[0].position, "Treasurer");
        // The image survived an edit that left it out.
        assert!(ballot.positions[0].candidates[0].has_image);
        assert_eq!(&registry.candidate_image(ben.id).await.unwrap()[..4], b"\x89PNG");
    }

    #[backend_test]
    async fn turnout_counts_voters_only(store: Store) {
        let registry = registry(&store);
        let now = Utc::now();
        let id = registry
            .register_voter(NewVoterRequest::example(), "admin", now)
            .await
            .unwrap();
        store
            .coll::<User>()
            .update_one(id.as_doc(), doc! { "$set": { "voted": true } }, None)
            .await
            .unwrap();
        let mut other = NewVoterRequest::example();
        other.username = "2024-0789".into();
        registry.register_voter(other, "admin", now).await.unwrap();

        let turnout = registry.turnout().await.unwrap();
        assert_eq!(turnout.registered, 2);
        assert_eq!(turnout.voted, 1);
    }
}
