use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{Collation, CollationStrength, IndexOptions},
    Collection, Database, IndexModel,
};
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};

use crate::model::{
    archive::ArchiveEntry,
    audit::AuditEntry,
    candidate::Candidate,
    setting::Setting,
    user::{NewUser, User},
    vote::Vote,
};

use super::store::Store;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the store from the managed state and wrap it in a collection.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.rocket().state::<Store>() {
            Some(store) => request::Outcome::Success(store.coll()),
            None => request::Outcome::Failure((Status::InternalServerError, ())),
        }
    }
}

// User collections: voters and admins share one collection, told apart by role.
const USERS: &str = "users";
impl MongoCollection for User {
    const NAME: &'static str = USERS;
}
impl MongoCollection for NewUser {
    const NAME: &'static str = USERS;
}

// Candidate collection
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}

// Vote collection
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}

// Archive collection, holding soft-deleted users and candidates alike.
const ARCHIVE: &str = "archive";
impl MongoCollection for ArchiveEntry {
    const NAME: &'static str = ARCHIVE;
}

// Settings collection
const SYSTEM_CONFIG: &str = "system_config";
impl MongoCollection for Setting {
    const NAME: &'static str = SYSTEM_CONFIG;
}

// Audit collection
const AUDIT_TRAIL: &str = "audit_trail";
impl MongoCollection for AuditEntry {
    const NAME: &'static str = AUDIT_TRAIL;
}

/// Collation under which candidate names are compared: case-insensitive.
pub fn case_insensitive() -> Collation {
    Collation::builder()
        .locale("en".to_string())
        .strength(CollationStrength::Secondary)
        .build()
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // User collection.
    let user_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique.clone())
        .build();
    Coll::<User>::from_db(db)
        .create_index(user_index, None)
        .await?;

    // Candidate collection.
    let candidate_index = IndexModel::builder()
        .keys(doc! {"name": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .collation(case_insensitive())
                .build(),
        )
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(candidate_index, None)
        .await?;

    // Vote collection: at most one vote per voter per position.
    let vote_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "position": 1})
        .options(unique)
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;
    let candidate_votes_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1})
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(candidate_votes_index, None)
        .await?;

    // Archive collection.
    let archive_index = IndexModel::builder()
        .keys(doc! {"kind": 1, "key": 1, "deleted_at": -1})
        .build();
    Coll::<ArchiveEntry>::from_db(db)
        .create_index(archive_index, None)
        .await?;

    // Audit collection.
    let audit_index = IndexModel::builder()
        .keys(doc! {"timestamp": -1})
        .build();
    Coll::<AuditEntry>::from_db(db)
        .create_index(audit_index, None)
        .await?;

    Ok(())
}
