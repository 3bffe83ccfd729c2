use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use log::{debug, error};
use rocket::{
    http::{Cookie, SameSite, Status},
    outcome::{try_outcome, IntoOutcome},
    request::{FromRequest, Outcome},
    time::Duration,
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::engine::SessionGuard;
use crate::error::{Error, VoteError};
use crate::model::{
    mongodb::Id,
    session::{Session, SessionToken},
    user::Role,
};

use super::user::User;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// Reported when a cookie is well-formed but its session has been superseded or ended.
pub const SESSION_EXPIRED: &str =
    "Session expired: this account logged in on another device or the session ended.";

/// An authentication token carrying one session of a user with a specific role.
#[derive(Serialize, Deserialize)]
pub struct AuthToken<U> {
    pub id: Id,
    #[serde(rename = "rgt")]
    pub role: Role,
    #[serde(rename = "sid")]
    pub token: SessionToken,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U> {
    /// Wrap the given session, ready to be sent to its client.
    pub fn new(session: Session) -> Self {
        Self {
            id: session.user_id,
            role: session.role,
            token: session.token,
            phantom: PhantomData,
        }
    }

    /// The session this token claims to carry. Only trustworthy once validated.
    pub fn session(&self) -> Session {
        Session {
            user_id: self.id,
            role: self.role,
            token: self.token.clone(),
        }
    }

    #[allow(clippy::missing_panics_doc)]
    /// Serialize this token into a cookie.
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + config.auth_ttl(),
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings");

        Cookie::build(AUTH_TOKEN_COOKIE, token)
            .max_age(Duration::seconds(config.auth_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    /// Deserialize a token from a cookie.
    pub fn from_cookie(cookie: &Cookie<'static>, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims<U>>| claims.claims.token)?;
        Ok(token)
    }
}

/// Cookie claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the cookie, check it has a role this user
    /// type permits, and check its session is still the live one.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            Outcome::Success(config) => config,
            _ => {
                error!("Config missing from managed state");
                return Outcome::Failure((
                    Status::InternalServerError,
                    Error::Status(Status::InternalServerError, "Server misconfigured".to_string()),
                ));
            }
        };

        // Forward to any routes that do not require an authentication token.
        let cookie = try_outcome!(req.cookies().get(AUTH_TOKEN_COOKIE).or_forward(()));

        // Decode the token.
        let token: Self = try_outcome!(Self::from_cookie(cookie, config).or_forward(()));

        // Check it represents the correct role.
        if !U::permits(token.role) {
            return Outcome::Forward(());
        }

        // Check the session has not been superseded, ended, or archived away.
        let sessions = try_outcome!(req.guard::<SessionGuard>().await.map_failure(|(status, ())| {
            (
                status,
                Error::Status(status, "Store unavailable".to_string()),
            )
        }));
        match sessions.validate(&token.session()).await {
            Ok(true) => Outcome::Success(token),
            Ok(false) => {
                debug!("Rejected dead session for user {}", token.id);
                Outcome::Failure((Status::Unauthorized, VoteError::SessionInvalid.into()))
            }
            Err(err) => Outcome::Failure((Status::ServiceUnavailable, err.into())),
        }
    }
}
