mod info;
mod request;
mod token;
mod user;

pub use info::SessionInfo;
pub use request::Credentials;
pub use token::{AuthToken, AUTH_TOKEN_COOKIE, SESSION_EXPIRED};
pub use user::{Admin, Anyone, User, Voter};
