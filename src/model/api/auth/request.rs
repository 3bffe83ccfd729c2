use serde::{Deserialize, Serialize};

/// Raw sign-in credentials, received from a user. Never stored, since the
/// password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}
