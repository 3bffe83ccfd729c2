use mongodb::{error::Error as DbError, Client, ClientSession, Database};
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};

use super::collection::{Coll, MongoCollection};

/// Handle on the shared store: the driver client, needed to open sessions
/// and transactions, plus the application database.
///
/// Every engine component is built from one of these; nothing holds a
/// connection of its own.
#[derive(Debug, Clone)]
pub struct Store {
    client: Client,
    db: Database,
}

impl Store {
    pub fn new(client: Client, db: Database) -> Self {
        Self { client, db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get a typed handle on one collection.
    pub fn coll<T: MongoCollection>(&self) -> Coll<T> {
        Coll::from_db(&self.db)
    }

    /// Open a session, ready to run transactions in.
    pub async fn start_session(&self) -> Result<ClientSession, DbError> {
        self.client.start_session(None).await
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Store {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.rocket().state::<Store>() {
            Some(store) => request::Outcome::Success(store.clone()),
            None => request::Outcome::Failure((Status::InternalServerError, ())),
        }
    }
}
