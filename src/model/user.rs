use std::fmt::Display;
use std::ops::{Deref, DerefMut};

use argon2::Config;
use log::warn;
use mongodb::bson::{doc, DateTime};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::Error;
use crate::model::{
    mongodb::{Coll, Id},
    session::SessionToken,
};

/// The account seeded into a store with no admins.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Different privilege levels.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Role {
    Voter = 0,
    Admin = 1,
}

impl Display for Role {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
            }
        )
    }
}

/// Core user data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCore {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub full_name: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub section: String,
    /// Set exactly once, by the commit of the voter's ballot.
    #[serde(default)]
    pub voted: bool,
    /// The token of the one live session, if any.
    #[serde(default)]
    pub session_token: Option<SessionToken>,
    /// Last sign-in or heartbeat of the live session.
    #[serde(default)]
    pub last_active: Option<DateTime>,
}

impl UserCore {
    /// Create a new user with no session, hashing the given password.
    pub fn new(
        username: String,
        password: &str,
        role: Role,
        full_name: String,
        grade: String,
        section: String,
    ) -> Result<Self, argon2::Error> {
        Ok(Self {
            username,
            password_hash: hash_password(password)?,
            role,
            full_name,
            grade,
            section,
            voted: false,
            session_token: None,
            last_active: None,
        })
    }

    /// Check whether the given password is correct.
    /// A malformed stored hash never verifies.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }

    pub fn is_voter(&self) -> bool {
        self.role == Role::Voter
    }
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, argon2::Error> {
    // 16 bytes is recommended for password hashing:
    //  https://en.wikipedia.org/wiki/Argon2
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill(&mut salt);
    argon2::hash_encoded(password.as_bytes(), &salt, &Config::default())
}

/// Ensure at least one admin exists, seeding the default account if none do.
///
/// This operation is idempotent.
pub async fn ensure_admin_exists(users: &Coll<NewUser>) -> Result<(), Error> {
    let admins = users
        .count_documents(doc! { "role": Role::Admin as i32 }, None)
        .await?;
    if admins == 0 {
        let admin = NewUser::new(
            DEFAULT_ADMIN_USERNAME.to_string(),
            DEFAULT_ADMIN_PASSWORD,
            Role::Admin,
            "System Administrator".to_string(),
            String::new(),
            String::new(),
        )?;
        users.insert_one(admin, None).await?;
        warn!("No admins found, created default admin '{DEFAULT_ADMIN_USERNAME}'");
    }
    Ok(())
}

/// A user without an ID.
pub type NewUser = UserCore;

/// A user from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub user: UserCore,
}

impl Deref for User {
    type Target = UserCore;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

impl DerefMut for User {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.user
    }
}
