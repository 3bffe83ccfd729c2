use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId,
    user::{Role, User},
};

/// Who the caller is signed in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: ApiId,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub voted: bool,
}

impl From<&User> for SessionInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.into(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            voted: user.voted,
        }
    }
}
