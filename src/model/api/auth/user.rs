use crate::model::user::Role;

/// A kind of user an endpoint can be restricted to.
pub trait User {
    /// Whether a signed-in user with the given role counts as this kind of user.
    fn permits(role: Role) -> bool;
}

/// Marker for endpoints restricted to voters.
pub struct Voter;

/// Marker for endpoints restricted to admins.
pub struct Admin;

/// Marker for endpoints open to any signed-in user.
pub struct Anyone;

impl User for Voter {
    fn permits(role: Role) -> bool {
        role == Role::Voter
    }
}

impl User for Admin {
    fn permits(role: Role) -> bool {
        role == Role::Admin
    }
}

impl User for Anyone {
    fn permits(_role: Role) -> bool {
        true
    }
}
