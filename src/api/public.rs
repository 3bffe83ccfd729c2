use chrono::Utc;
use rocket::{http::ContentType, serde::json::Json, Route};

use crate::engine::{ElectionController, Registry};
use crate::error::Result;
use crate::model::{
    api::{election::ElectionStatusView, results::PositionLeaders},
    mongodb::Id,
};

pub fn routes() -> Vec<Route> {
    routes![election, candidate_image, leaders]
}

/// Reading the status settles any expiry, so an idle election is seen to end on time.
#[get("/election")]
async fn election(election: ElectionController) -> Result<Json<ElectionStatusView>> {
    let now = Utc::now();
    let activity = election.is_active(now).await?;
    let config = election.config().await?;
    Ok(Json(ElectionStatusView::new(&config, activity, now)))
}

#[get("/candidates/<candidate_id>/image")]
async fn candidate_image(
    candidate_id: Id,
    registry: Registry,
) -> Result<(ContentType, Vec<u8>)> {
    let image = registry.candidate_image(candidate_id).await?;
    Ok((sniff_image_type(&image), image))
}

#[get("/results/leaders")]
async fn leaders(registry: Registry) -> Result<Json<Vec<PositionLeaders>>> {
    Ok(Json(registry.leaders().await?))
}

/// Images are stored as uploaded, so the type comes from the magic bytes.
fn sniff_image_type(bytes: &[u8]) -> ContentType {
    if bytes.starts_with(b"\x89PNG") {
        ContentType::PNG
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        ContentType::JPEG
    } else if bytes.starts_with(b"GIF8") {
        ContentType::GIF
    } else {
        ContentType::Binary
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{spec::BinarySubtype, Binary};
    use rocket::{http::Status, local::asynchronous::Client};

    use super::*;
    use crate::model::{candidate::Candidate, election::ElectionState, mongodb::Coll};

    #[test]
    fn image_types_by_magic() {
        assert_eq!(sniff_image_type(b"\x89PNG\r\n\x1a\n"), ContentType::PNG);
        assert_eq!(sniff_image_type(&[0xFF, 0xD8, 0xFF, 0xE0]), ContentType::JPEG);
        assert_eq!(sniff_image_type(b"GIF89a"), ContentType::GIF);
        assert_eq!(sniff_image_type(b"hello"), ContentType::Binary);
    }

    #[backend_test]
    async fn idle_election_is_closed(client: Client) {
        let response = client.get(uri!(election)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let view: ElectionStatusView = response.into_json().await.unwrap();
        assert_eq!(view.state, ElectionState::Inactive);
        assert!(!view.active);
        assert_eq!(view.name, "School Election 2025");
        assert_eq!(view.remaining_seconds, None);
    }

    #[backend_test(voter)]
    async fn running_election_counts_down(client: Client) {
        let response = client.get(uri!(election)).dispatch().await;
        let view: ElectionStatusView = response.into_json().await.unwrap();
        assert_eq!(view.state, ElectionState::Active);
        assert!(view.active);
        assert_eq!(view.name, "Spring Vote");
        let remaining = view.remaining_seconds.unwrap();
        assert!(remaining > 590 && remaining <= 600, "{remaining}");
    }

    #[backend_test]
    async fn image_is_served_raw(client: Client, candidates: Coll<Candidate>) {
        let mut with_image = Candidate::example("Alice Santos", "President");
        with_image.image = Some(Binary {
            subtype: BinarySubtype::Generic,
            bytes: b"\x89PNG\r\n\x1a\nrest".to_vec(),
        });
        let without_image = Candidate::example("Ben Cruz", "President");
        candidates
            .insert_many([&with_image, &without_image], None)
            .await
            .unwrap();

        let response = client
            .get(uri!(candidate_image(with_image.id)))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(response.content_type(), Some(ContentType::PNG));
        assert_eq!(
            response.into_bytes().await.unwrap(),
            b"\x89PNG\r\n\x1a\nrest".to_vec()
        );

        let response = client
            .get(uri!(candidate_image(without_image.id)))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn leaders_per_position(client: Client, candidates: Coll<Candidate>) {
        let mut slate = Candidate::example_slate();
        slate[1].votes = 3;
        slate[2].votes = 1;
        candidates.insert_many(&slate, None).await.unwrap();

        let response = client.get(uri!(leaders)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let board: Vec<PositionLeaders> = response.into_json().await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].position, "President");
        assert_eq!(board[0].leaders[0].candidate, "Ben Cruz");
        assert_eq!(board[1].leaders[0].candidate, "Carla Lim");
    }
}
