use chrono::{DateTime, Utc};
use log::{debug, info};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    error::Error as DbError,
    options::{FindOneOptions, FindOptions},
    ClientSession,
};
use rocket::{
    futures::TryStreamExt,
    request::{self, FromRequest, Request},
};

use crate::error::ArchiveError;
use crate::model::{
    archive::{retention_cutoff, ArchiveEntry, ArchiveKind, ArchivedRecord},
    audit::{module, AuditEntry},
    candidate::Candidate,
    mongodb::{case_insensitive, in_transaction, is_duplicate_key_error, Coll, Id, Store},
    user::{hash_password, Role, User, UserCore},
    vote::Vote,
};

use super::{audit::AuditLog, election::ElectionController};

/// Soft deletion of voters and candidates, with a retention window.
#[derive(Clone)]
pub struct ArchiveStore {
    store: Store,
    entries: Coll<ArchiveEntry>,
    election: ElectionController,
    audit: AuditLog,
}

impl ArchiveStore {
    pub fn new(store: &Store, election: ElectionController) -> Self {
        Self {
            store: store.clone(),
            entries: store.coll(),
            election,
            audit: AuditLog::new(store),
        }
    }

    /// Move a live record into the archive.
    pub async fn archive(
        &self,
        kind: ArchiveKind,
        id: Id,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ArchiveEntry, ArchiveError> {
        if kind == ArchiveKind::Candidate && self.election.is_active(now).await?.active {
            return Err(ArchiveError::ElectionActive);
        }
        let mut session = self.store.start_session().await?;
        let result: Result<ArchiveEntry, ArchiveError> = in_transaction!(
            session,
            "archiving a record",
            self.archive_in(kind, id, actor, now, &mut session)
        );
        let entry = result?;
        info!("Archived {kind} '{}' by {actor}", entry.key);
        Ok(entry)
    }

    /// Move the most recently archived record with this key back into the
    /// live collection. A voter comes back with their username as password.
    pub async fn restore(
        &self,
        kind: ArchiveKind,
        key: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ArchiveError> {
        self.purge(now).await?;
        if kind == ArchiveKind::Candidate && self.election.is_active(now).await?.active {
            return Err(ArchiveError::ElectionActive);
        }
        // Hashed up front so the transaction stays short.
        let password_hash = match kind {
            ArchiveKind::Voter => Some(hash_password(key)?),
            ArchiveKind::Candidate => None,
        };
        let mut session = self.store.start_session().await?;
        let result: Result<(), ArchiveError> = in_transaction!(
            session,
            "restoring a record",
            self.restore_in(kind, key, password_hash.as_deref(), actor, now, &mut session)
        );
        result?;
        info!("Restored {kind} '{key}' by {actor}");
        Ok(())
    }

    /// Archived records of one kind, most recently deleted first. Anything
    /// past retention is purged first, for good.
    pub async fn list(
        &self,
        kind: ArchiveKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        self.purge(now).await?;
        let options = FindOptions::builder()
            .sort(doc! { "deleted_at": -1, "_id": -1 })
            .build();
        let entries = self
            .entries
            .find(doc! { "kind": kind.as_str() }, options)
            .await?
            .try_collect()
            .await?;
        Ok(entries)
    }

    /// Permanently delete every archived record past retention.
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let cutoff = BsonDateTime::from_chrono(retention_cutoff(now));
        let purged = self
            .entries
            .delete_many(doc! { "deleted_at": { "$lt": cutoff } }, None)
            .await?
            .deleted_count;
        if purged > 0 {
            info!("Purged {purged} archived records past retention");
        }
        Ok(purged)
    }

    async fn archive_in(
        &self,
        kind: ArchiveKind,
        id: Id,
        actor: &str,
        now: DateTime<Utc>,
        session: &mut ClientSession,
    ) -> Result<ArchiveEntry, ArchiveError> {
        let not_found = || ArchiveError::NotFound(format!("{kind} {id}"));
        let entry = match kind {
            ArchiveKind::Voter => {
                let users = self.store.coll::<User>();
                let user = users
                    .find_one_with_session(id.as_doc(), None, session)
                    .await?
                    .ok_or_else(not_found)?;
                if user.role == Role::Admin {
                    let admins = users
                        .count_documents_with_session(
                            doc! { "role": Role::Admin as i32 },
                            None,
                            session,
                        )
                        .await?;
                    if admins <= 1 {
                        return Err(ArchiveError::LastAdmin);
                    }
                }
                users.delete_one_with_session(id.as_doc(), None, session).await?;
                ArchiveEntry::voter(&user, now)
            }
            ArchiveKind::Candidate => {
                let candidates = self.store.coll::<Candidate>();
                let candidate = candidates
                    .find_one_with_session(id.as_doc(), None, session)
                    .await?
                    .ok_or_else(not_found)?;
                candidates
                    .delete_one_with_session(id.as_doc(), None, session)
                    .await?;
                ArchiveEntry::candidate(&candidate, now)
            }
        };
        self.entries
            .insert_one_with_session(&entry, None, session)
            .await?;
        let audit = AuditEntry::new(
            actor,
            audit_module(kind),
            format!("Archived {kind}"),
            entry.key.clone(),
            now,
        );
        self.audit.append_in(&audit, session).await?;
        Ok(entry)
    }

    async fn restore_in(
        &self,
        kind: ArchiveKind,
        key: &str,
        password_hash: Option<&str>,
        actor: &str,
        now: DateTime<Utc>,
        session: &mut ClientSession,
    ) -> Result<(), ArchiveError> {
        let newest = FindOneOptions::builder()
            .sort(doc! { "deleted_at": -1, "_id": -1 })
            .build();
        let entry = self
            .entries
            .find_one_with_session(doc! { "kind": kind.as_str(), "key": key }, newest, session)
            .await?
            .ok_or_else(|| ArchiveError::NotFound(format!("archived {kind} '{key}'")))?;
        let conflict = || ArchiveError::Conflict(format!("{kind} '{key}'"));
        let votes = self.store.coll::<Vote>();

        match entry.record {
            ArchivedRecord::Voter(voter) => {
                let users = self.store.coll::<User>();
                let live = users
                    .count_documents_with_session(doc! { "username": &voter.username }, None, session)
                    .await?;
                if live > 0 {
                    return Err(conflict());
                }
                let voted = votes
                    .count_documents_with_session(doc! { "voter_id": voter.id }, None, session)
                    .await?
                    > 0;
                let password_hash = match password_hash {
                    Some(hash) => hash.to_string(),
                    None => hash_password(&voter.username)?,
                };
                let user = User {
                    id: voter.id,
                    user: UserCore {
                        username: voter.username,
                        password_hash,
                        role: voter.role,
                        full_name: voter.full_name,
                        grade: voter.grade,
                        section: voter.section,
                        voted,
                        session_token: None,
                        last_active: None,
                    },
                };
                if let Err(err) = users.insert_one_with_session(&user, None, session).await {
                    return Err(if is_duplicate_key_error(&err) {
                        conflict()
                    } else {
                        err.into()
                    });
                }
            }
            ArchivedRecord::Candidate(archived) => {
                let candidates = self.store.coll::<Candidate>();
                let same_name = FindOneOptions::builder()
                    .collation(case_insensitive())
                    .projection(doc! { "image": 0 })
                    .build();
                if candidates
                    .find_one_with_session(doc! { "name": &archived.name }, same_name, session)
                    .await?
                    .is_some()
                {
                    return Err(conflict());
                }
                let counted = votes
                    .count_documents_with_session(doc! { "candidate_id": archived.id }, None, session)
                    .await?;
                let candidate = Candidate {
                    id: archived.id,
                    name: archived.name,
                    position: archived.position,
                    grade: archived.grade,
                    votes: u32::try_from(counted).unwrap_or(u32::MAX),
                    image: archived.image,
                };
                if let Err(err) = candidates
                    .insert_one_with_session(&candidate, None, session)
                    .await
                {
                    return Err(if is_duplicate_key_error(&err) {
                        conflict()
                    } else {
                        err.into()
                    });
                }
            }
        }

        self.entries
            .delete_one_with_session(entry.id.as_doc(), None, session)
            .await?;
        let audit = AuditEntry::new(
            actor,
            audit_module(kind),
            format!("Restored {kind}"),
            key,
            now,
        );
        self.audit.append_in(&audit, session).await?;
        debug!("Removed archive entry {} after restoring it", entry.id);
        Ok(())
    }
}

fn audit_module(kind: ArchiveKind) -> &'static str {
    match kind {
        ArchiveKind::Voter => module::VOTERS,
        ArchiveKind::Candidate => module::CANDIDATES,
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ArchiveStore {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let election = rocket::outcome::try_outcome!(req.guard::<ElectionController>().await);
        let store = rocket::outcome::try_outcome!(req.guard::<Store>().await);
        request::Outcome::Success(Self::new(&store, election))
    }
}
