use data_encoding::BASE64;
use mongodb::bson::{spec::BinarySubtype, Binary};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::user::{NewUser, Role};

/// A voter registration, received from an admin. The password is in
/// plaintext and never stored directly.
#[derive(Clone, Deserialize, Serialize)]
pub struct NewVoterRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub section: String,
}

impl TryFrom<NewVoterRequest> for NewUser {
    type Error = Error;

    /// Convert a registration into a new voter by hashing the password.
    /// This enforces that username, password and full name are non-empty.
    fn try_from(request: NewVoterRequest) -> Result<Self, Self::Error> {
        let username = request.username.trim().to_string();
        let full_name = request.full_name.trim().to_string();
        if username.is_empty() || request.password.is_empty() || full_name.is_empty() {
            return Err(Error::bad_request(
                "Username, password and full name are required".to_string(),
            ));
        }
        Ok(NewUser::new(
            username,
            &request.password,
            Role::Voter,
            full_name,
            request.grade,
            request.section,
        )?)
    }
}

/// A candidate to add, or the new details of an existing one.
#[derive(Clone, Deserialize, Serialize)]
pub struct CandidateSpec {
    pub name: String,
    pub position: String,
    #[serde(default)]
    pub grade: String,
    /// Standard base64. On edit, leaving this out keeps the existing image.
    #[serde(default)]
    pub image: Option<String>,
}

impl CandidateSpec {
    /// Check the required fields, returning the trimmed name and position.
    pub fn validate(&self) -> Result<(String, String), Error> {
        let name = self.name.trim();
        let position = self.position.trim();
        if name.is_empty() || position.is_empty() {
            return Err(Error::bad_request(
                "Candidate name and position are required".to_string(),
            ));
        }
        Ok((name.to_string(), position.to_string()))
    }

    /// Decode the image payload, if one was given.
    pub fn image(&self) -> Result<Option<Binary>, Error> {
        self.image
            .as_deref()
            .map(|encoded| {
                BASE64
                    .decode(encoded.as_bytes())
                    .map(|bytes| Binary {
                        subtype: BinarySubtype::Generic,
                        bytes,
                    })
                    .map_err(|err| Error::bad_request(format!("Invalid candidate image: {err}")))
            })
            .transpose()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_requires_fields() {
        let mut request = NewVoterRequest::example();
        request.full_name = "   ".into();
        assert!(NewUser::try_from(request).is_err());

        let voter = NewUser::try_from(NewVoterRequest::example()).unwrap();
        assert_eq!(voter.role, Role::Voter);
        assert!(!voter.voted);
        assert!(voter.verify_password("harbor-lights-9"));
    }

    #[test]
    fn candidate_image_is_base64() {
        let mut spec = CandidateSpec::example("Alice Santos", "President");
        assert_eq!(spec.image().unwrap(), None);

        spec.image = Some("iVBORw0KGgo=".into());
        let image = spec.image().unwrap().unwrap();
        assert_eq!(&image.bytes[..4], b"\x89PNG");

        spec.image = Some("not base64!".into());
        assert!(spec.image().is_err());
    }

    #[test]
    fn candidate_name_and_position_are_trimmed() {
        let spec = CandidateSpec::example("  Ben Cruz ", " President");
        assert_eq!(
            spec.validate().unwrap(),
            ("Ben Cruz".to_string(), "President".to_string())
        );
        assert!(CandidateSpec::example("", "President").validate().is_err());
    }
}
