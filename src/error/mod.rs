use argon2::Error as Argon2Error;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use log::error;
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::{json, Json},
    Request,
};
use thiserror::Error;

use crate::model::mongodb::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures to sign in.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account is currently active on another device. Please wait and try again.")]
    ConcurrentSession,
    #[error("{0}")]
    ElectionClosed(String),
    #[error("You have already voted")]
    AlreadyVoted,
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] DbError),
}

/// Failures to cast a ballot. Every variant except `StorageFailure` is a
/// precondition failure that the client should surface as-is.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Session expired: this account logged in on another device or the session ended.")]
    SessionInvalid,
    #[error("{0}")]
    ElectionClosed(String),
    #[error("You have already voted")]
    AlreadyVoted,
    #[error("Ballot is missing a choice for: {}", .0.join(", "))]
    IncompleteBallot(Vec<String>),
    #[error("Invalid choice for position '{0}'")]
    InvalidSelection(String),
    #[error("Storage failure, the ballot was not recorded: {0}")]
    StorageFailure(#[from] DbError),
}

/// Failures to archive or restore a record.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Cannot restore {0}: a live record with the same name already exists")]
    Conflict(String),
    #[error("Cannot archive candidates while the election is live")]
    ElectionActive,
    #[error("Cannot archive the last admin account")]
    LastAdmin,
    #[error("Failed to reset credential: {0}")]
    Credential(#[from] Argon2Error),
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] DbError),
}

/// Failures of the durable settings store.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read election configuration: {0}")]
    ReadFailure(DbError),
    #[error("Failed to persist election configuration: {0}")]
    WriteFailure(DbError),
}

/// Rejected election start/stop transitions.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("Election duration must be positive, got {0} seconds")]
    InvalidDuration(i64),
    #[error("Election name must not be empty")]
    MissingName,
    #[error("An election is already running")]
    AlreadyActive,
    #[error("No election is running")]
    NotActive,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Election(#[from] ElectionError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    pub fn not_found(what: String) -> Self {
        Self::Status(Status::NotFound, format!("Not found: {what}"))
    }

    pub fn bad_request(why: String) -> Self {
        Self::Status(Status::BadRequest, why)
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) | Self::Argon2(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => Status::Unauthorized,
                AuthError::ConcurrentSession => Status::Conflict,
                AuthError::ElectionClosed(_) | AuthError::AlreadyVoted => Status::Forbidden,
                AuthError::StorageFailure(_) => Status::ServiceUnavailable,
            },
            Self::Vote(err) => match err {
                VoteError::SessionInvalid => Status::Unauthorized,
                VoteError::ElectionClosed(_) => Status::Forbidden,
                VoteError::AlreadyVoted => Status::Conflict,
                VoteError::IncompleteBallot(_) | VoteError::InvalidSelection(_) => {
                    Status::UnprocessableEntity
                }
                VoteError::StorageFailure(_) => Status::ServiceUnavailable,
            },
            Self::Archive(err) => match err {
                ArchiveError::NotFound(_) => Status::NotFound,
                ArchiveError::Conflict(_)
                | ArchiveError::ElectionActive
                | ArchiveError::LastAdmin => Status::Conflict,
                ArchiveError::Credential(_) => Status::InternalServerError,
                ArchiveError::StorageFailure(_) => Status::ServiceUnavailable,
            },
            Self::Config(_) => Status::InternalServerError,
            Self::Election(err) => match err {
                ElectionError::InvalidDuration(_) | ElectionError::MissingName => {
                    Status::BadRequest
                }
                ElectionError::AlreadyActive | ElectionError::NotActive => Status::Conflict,
                ElectionError::Config(_) => Status::InternalServerError,
            },
            Self::Status(status, _) => *status,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        // Internal details stay in the log, the client only gets the message.
        if status.class().is_server_error() {
            error!("{self:?}");
        }
        Custom(status, Json(json!({ "error": self.to_string() }))).respond_to(req)
    }
}

impl StoreError for AuthError {
    fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::StorageFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl StoreError for VoteError {
    fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::StorageFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl StoreError for ArchiveError {
    fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::StorageFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for ConfigError {
    /// Failures inside a state transition count as write failures: the
    /// transition did not happen.
    fn from(err: DbError) -> Self {
        Self::WriteFailure(err)
    }
}

impl StoreError for ConfigError {
    fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::ReadFailure(err) | Self::WriteFailure(err) => Some(err),
        }
    }
}

impl From<DbError> for ElectionError {
    fn from(err: DbError) -> Self {
        Self::Config(err.into())
    }
}

impl StoreError for ElectionError {
    fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::Config(err) => err.db_error(),
            _ => None,
        }
    }
}

impl From<ConfigError> for VoteError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ReadFailure(err) | ConfigError::WriteFailure(err) => {
                Self::StorageFailure(err)
            }
        }
    }
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ReadFailure(err) | ConfigError::WriteFailure(err) => {
                Self::StorageFailure(err)
            }
        }
    }
}

impl From<ConfigError> for ArchiveError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ReadFailure(err) | ConfigError::WriteFailure(err) => {
                Self::StorageFailure(err)
            }
        }
    }
}
