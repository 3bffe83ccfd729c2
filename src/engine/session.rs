use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use mongodb::{
    bson::{doc, Bson, DateTime as BsonDateTime},
    error::Error as DbError,
    ClientSession,
};
use rocket::request::{self, FromRequest, Request};

use crate::error::AuthError;
use crate::model::{
    audit::{module, AuditEntry},
    mongodb::{Coll, Id, Store},
    session::{Session, SessionToken},
    user::{Role, User},
};

use super::{audit::AuditLog, election::ElectionController};

/// A voter seen this recently is presumed to still be at another device.
pub const CONCURRENT_LOGIN_WINDOW_SECONDS: i64 = 15;

/// Was a session active within the concurrent-login window before `now`?
///
/// Only a heuristic: two sign-ins landing within the same few milliseconds
/// can both pass it. Whichever then writes its token last wins, and the
/// other's session is dead.
pub fn recently_active(last_active: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_active.map_or(false, |last_active| {
        now - last_active < Duration::seconds(CONCURRENT_LOGIN_WINDOW_SECONDS)
    })
}

/// Issues and checks the single live session of each user.
#[derive(Clone)]
pub struct SessionGuard {
    users: Coll<User>,
    audit: AuditLog,
    election: ElectionController,
}

impl SessionGuard {
    pub fn new(store: &Store, election: ElectionController) -> Self {
        Self {
            users: store.coll(),
            audit: AuditLog::new(store),
            election,
        }
    }

    /// Sign in, superseding any earlier session of the same user.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(Session, User), AuthError> {
        let user = self
            .users
            .find_one(doc! { "username": username }, None)
            .await?
            .filter(|user| user.verify_password(password))
            .ok_or_else(|| {
                debug!("Rejected sign-in for '{username}': bad credentials");
                AuthError::InvalidCredentials
            })?;

        if user.is_voter() {
            if recently_active(user.last_active.map(BsonDateTime::to_chrono), now) {
                warn!("Rejected sign-in for '{username}': active on another device");
                return Err(AuthError::ConcurrentSession);
            }
            let activity = self.election.is_active(now).await?;
            if !activity.active {
                return Err(AuthError::ElectionClosed(activity.reason));
            }
            if user.voted {
                return Err(AuthError::AlreadyVoted);
            }
        }

        let token = SessionToken::generate();
        let update = doc! {
            "$set": {
                "session_token": token.as_str(),
                "last_active": BsonDateTime::from_chrono(now),
            }
        };
        self.users.update_one(user.id.as_doc(), update, None).await?;

        let session = Session {
            user_id: user.id,
            role: user.role,
            token,
        };
        if user.is_voter() {
            // A stop committed since the check above may have missed this
            // token, so the check is repeated now the token is written. A
            // stop still in flight across both checks can leave it behind;
            // the vote commit re-checks the election and refuses it.
            let activity = self.election.is_active(now).await?;
            if !activity.active {
                self.users
                    .update_one(live_session(&session), end_session(), None)
                    .await?;
                warn!("Rejected sign-in for '{username}': election closed while signing in");
                return Err(AuthError::ElectionClosed(activity.reason));
            }
        }

        info!("{} '{username}' signed in", user.role);
        self.audit
            .append(AuditEntry::new(
                username,
                module::AUTH,
                "Signed in",
                format!("as {}", user.role),
                now,
            ))
            .await;
        Ok((session, user))
    }

    /// Record that a live session is still in use. Returns false, changing
    /// nothing, if the session is dead.
    pub async fn heartbeat(&self, session: &Session, now: DateTime<Utc>) -> Result<bool, DbError> {
        let result = self
            .users
            .update_one(
                live_session(session),
                doc! { "$set": { "last_active": BsonDateTime::from_chrono(now) } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    /// Is this still the live session of its user?
    pub async fn validate(&self, session: &Session) -> Result<bool, DbError> {
        let count = self
            .users
            .count_documents(live_session(session), None)
            .await?;
        Ok(count == 1)
    }

    /// End whatever session the user has.
    pub async fn invalidate(&self, user_id: Id) -> Result<(), DbError> {
        self.users
            .update_one(user_id.as_doc(), end_session(), None)
            .await?;
        debug!("Ended session of user {user_id}");
        Ok(())
    }

    /// Fetch the user behind a live session.
    pub async fn user(&self, session: &Session) -> Result<Option<User>, DbError> {
        self.users.find_one(live_session(session), None).await
    }
}

/// Matches the user only while the given session is their live one.
fn live_session(session: &Session) -> mongodb::bson::Document {
    doc! {
        "_id": session.user_id,
        "session_token": session.token.as_str(),
    }
}

fn end_session() -> mongodb::bson::Document {
    doc! { "$set": { "session_token": Bson::Null, "last_active": Bson::Null } }
}

/// End every voter session as part of the given transaction. Admin
/// sessions survive.
pub async fn end_voter_sessions_in(
    users: &Coll<User>,
    session: &mut ClientSession,
) -> Result<u64, DbError> {
    let filter = doc! {
        "role": Role::Voter as i32,
        "session_token": { "$ne": Bson::Null },
    };
    let result = users
        .update_many_with_session(filter, end_session(), None, session)
        .await?;
    Ok(result.modified_count)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let election = rocket::outcome::try_outcome!(req.guard::<ElectionController>().await);
        match req.rocket().state::<Store>() {
            Some(store) => request::Outcome::Success(Self::new(store, election)),
            None => request::Outcome::Failure((rocket::http::Status::InternalServerError, ())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::engine::report::LogReporter;
    use crate::model::user::{examples::*, NewUser, UserCore};

    #[test]
    fn login_window_is_fifteen_seconds() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        assert!(!recently_active(None, now));
        assert!(recently_active(Some(now), now));
        assert!(recently_active(Some(now - Duration::seconds(14)), now));
        assert!(!recently_active(Some(now - Duration::seconds(15)), now));
        assert!(!recently_active(Some(now - Duration::minutes(3)), now));
    }

    async fn guard_with_voter(store: &Store, now: DateTime<Utc>) -> SessionGuard {
        let election = ElectionController::new(store.clone(), Arc::new(LogReporter));
        election.start("Spring Vote", 600, "admin", now).await.unwrap();
        store
            .coll::<NewUser>()
            .insert_one(UserCore::example_voter(), None)
            .await
            .unwrap();
        SessionGuard::new(store, election)
    }

    #[backend_test]
    async fn last_login_wins(store: Store) {
        let now = Utc::now();
        let guard = guard_with_voter(&store, now).await;

        let (first, _) = guard
            .authenticate(VOTER_USERNAME, VOTER_PASSWORD, now)
            .await
            .unwrap();
        assert!(guard.validate(&first).await.unwrap());

        // Still inside the window: another device is presumed active.
        let soon = now + Duration::seconds(5);
        assert!(matches!(
            guard.authenticate(VOTER_USERNAME, VOTER_PASSWORD, soon).await,
            Err(AuthError::ConcurrentSession)
        ));
        assert!(guard.validate(&first).await.unwrap());

        let later = now + Duration::seconds(16);
        let (second, _) = guard
            .authenticate(VOTER_USERNAME, VOTER_PASSWORD, later)
            .await
            .unwrap();
        assert_ne!(first.token, second.token);
        assert!(!guard.validate(&first).await.unwrap());
        assert!(guard.validate(&second).await.unwrap());
    }

    #[backend_test]
    async fn heartbeat_only_keeps_live_sessions(store: Store) {
        let now = Utc::now();
        let guard = guard_with_voter(&store, now).await;
        let (first, _) = guard
            .authenticate(VOTER_USERNAME, VOTER_PASSWORD, now)
            .await
            .unwrap();
        let (second, _) = guard
            .authenticate(VOTER_USERNAME, VOTER_PASSWORD, now + Duration::seconds(20))
            .await
            .unwrap();

        assert!(!guard.heartbeat(&first, now + Duration::seconds(21)).await.unwrap());
        assert!(guard.heartbeat(&second, now + Duration::seconds(21)).await.unwrap());

        // The heartbeat moved the window along.
        assert!(matches!(
            guard
                .authenticate(VOTER_USERNAME, VOTER_PASSWORD, now + Duration::seconds(30))
                .await,
            Err(AuthError::ConcurrentSession)
        ));
    }

    #[backend_test]
    async fn invalidate_allows_immediate_login(store: Store) {
        let now = Utc::now();
        let guard = guard_with_voter(&store, now).await;
        let (session, _) = guard
            .authenticate(VOTER_USERNAME, VOTER_PASSWORD, now)
            .await
            .unwrap();
        guard.invalidate(session.user_id).await.unwrap();
        assert!(!guard.validate(&session).await.unwrap());
        guard
            .authenticate(VOTER_USERNAME, VOTER_PASSWORD, now)
            .await
            .unwrap();
    }

    #[backend_test]
    async fn voters_need_an_open_election(store: Store) {
        let now = Utc::now();
        let guard = guard_with_voter(&store, now).await;
        assert!(matches!(
            guard.authenticate(VOTER_USERNAME, "wrong", now).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            guard.authenticate("nobody", VOTER_PASSWORD, now).await,
            Err(AuthError::InvalidCredentials)
        ));

        let after = now + Duration::seconds(601);
        match guard.authenticate(VOTER_USERNAME, VOTER_PASSWORD, after).await {
            Err(AuthError::ElectionClosed(reason)) => {
                assert_eq!(reason, crate::model::election::Activity::ENDED)
            }
            other => panic!("expected a closed election, got {:?}", other.map(|_| ())),
        }
    }

    #[backend_test]
    async fn stop_ends_voter_sessions(store: Store) {
        let now = Utc::now();
        let guard = guard_with_voter(&store, now).await;
        let (session, _) = guard
            .authenticate(VOTER_USERNAME, VOTER_PASSWORD, now)
            .await
            .unwrap();
        ElectionController::new(store.clone(), Arc::new(LogReporter))
            .stop("admin", now)
            .await
            .unwrap();
        assert!(!guard.validate(&session).await.unwrap());
    }
}
