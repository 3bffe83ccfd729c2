use std::collections::HashMap;

use chrono::Utc;
use rocket::{
    http::{Cookie, CookieJar},
    serde::json::Json,
    Route,
};

use crate::{
    engine::{Registry, VoteLedger},
    error::Result,
    model::{
        api::{
            auth::{AuthToken, Voter, AUTH_TOKEN_COOKIE},
            ballot::{BallotRequest, BallotView},
            receipt::Receipt,
        },
        mongodb::Id,
    },
};

pub fn routes() -> Vec<Route> {
    routes![ballot, cast_ballot]
}

#[get("/ballot")]
async fn ballot(_token: AuthToken<Voter>, registry: Registry) -> Result<Json<BallotView>> {
    Ok(Json(registry.ballot().await?))
}

#[post("/ballot", data = "<ballot>", format = "json")]
async fn cast_ballot(
    token: AuthToken<Voter>,
    cookies: &CookieJar<'_>,
    ballot: Json<BallotRequest>,
    ledger: VoteLedger,
) -> Result<Json<Receipt>> {
    let selections: HashMap<String, Id> = ballot
        .into_inner()
        .selections
        .into_iter()
        .map(|(position, id)| (position, id.into()))
        .collect();
    let receipt = ledger
        .cast_vote(&token.session(), &selections, Utc::now())
        .await?;
    // The commit ended the session along with the vote.
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Ok(Json(receipt))
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use rocket::{
        futures::TryStreamExt,
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::{serde_json::json, Value},
    };

    use super::*;
    use crate::model::{
        api::{auth::Credentials, id::ApiId},
        candidate::Candidate,
        mongodb::Coll,
        user::{examples::VOTER_USERNAME, NewUser},
        vote::Vote,
    };

    async fn insert_slate(candidates: &Coll<Candidate>) -> Vec<Candidate> {
        let slate = Candidate::example_slate();
        candidates.insert_many(&slate, None).await.unwrap();
        slate
    }

    /// One pick per position: the first candidate listed for each.
    fn full_ballot(slate: &[Candidate]) -> Value {
        let mut selections = HashMap::new();
        for candidate in slate {
            selections
                .entry(candidate.position.clone())
                .or_insert_with(|| ApiId::from(candidate.id));
        }
        json!({ "selections": selections })
    }

    async fn cast<'c>(client: &'c Client, body: &Value) -> LocalResponse<'c> {
        client
            .post(uri!(cast_ballot))
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await
    }

    #[backend_test(voter)]
    async fn ballot_lists_positions(client: Client, candidates: Coll<Candidate>) {
        insert_slate(&candidates).await;
        let response = client.get(uri!(ballot)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let view: BallotView = response.into_json().await.unwrap();
        assert_eq!(view.election_name, "Spring Vote");
        let positions: Vec<_> = view.positions.iter().map(|p| p.position.as_str()).collect();
        assert_eq!(positions, vec!["President", "Secretary"]);
    }

    #[backend_test(admin)]
    async fn admins_have_no_ballot(client: Client) {
        let response = client.get(uri!(ballot)).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(voter)]
    async fn cast_once_then_signed_out(
        client: Client,
        candidates: Coll<Candidate>,
        users: Coll<NewUser>,
        votes: Coll<Vote>,
    ) {
        let slate = insert_slate(&candidates).await;
        let body = full_ballot(&slate);

        let response = cast(&client, &body).await;
        assert_eq!(Status::Ok, response.status());
        let receipt: Receipt = response.into_json().await.unwrap();
        assert_eq!(receipt.voter, VOTER_USERNAME);
        assert_eq!(receipt.lines.len(), 2);
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));

        // Submitting again gets nowhere: the session went with the vote.
        let response = cast(&client, &body).await;
        assert_eq!(Status::NotFound, response.status());

        let voter = users
            .find_one(doc! { "username": VOTER_USERNAME }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(voter.voted);
        assert_eq!(2, votes.count_documents(None, None).await.unwrap());

        // Signing back in is refused too.
        let response = client
            .post(uri!(crate::api::auth::login))
            .header(ContentType::JSON)
            .body(json!(Credentials::example_voter()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test(voter)]
    async fn double_submit_counts_once(
        client: Client,
        candidates: Coll<Candidate>,
        votes: Coll<Vote>,
    ) {
        let slate = insert_slate(&candidates).await;
        let body = full_ballot(&slate);

        // Both requests carry the same, still valid, cookie.
        let first = client
            .post(uri!(cast_ballot))
            .header(ContentType::JSON)
            .body(body.to_string());
        let second = client
            .post(uri!(cast_ballot))
            .header(ContentType::JSON)
            .body(body.to_string());
        let (first, second) = rocket::tokio::join!(first.dispatch(), second.dispatch());

        let mut statuses = vec![first.status(), second.status()];
        statuses.sort_by_key(|status| status.code);
        assert_eq!(statuses[0], Status::Ok);
        assert!(
            [Status::Unauthorized, Status::Conflict].contains(&statuses[1]),
            "{:?}",
            statuses[1]
        );

        assert_eq!(2, votes.count_documents(None, None).await.unwrap());
        let tallied: u32 = candidates
            .find(None, None)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .iter()
            .map(|candidate| candidate.votes)
            .sum();
        assert_eq!(2, tallied);
    }

    #[backend_test(voter)]
    async fn incomplete_ballot_is_rejected(
        client: Client,
        candidates: Coll<Candidate>,
        votes: Coll<Vote>,
    ) {
        let slate = insert_slate(&candidates).await;
        let president = slate
            .iter()
            .find(|candidate| candidate.position == "President")
            .unwrap();
        let body = json!({ "selections": { "President": ApiId::from(president.id) } });

        let response = cast(&client, &body).await;
        assert_eq!(Status::UnprocessableEntity, response.status());
        let error: Value = response.into_json().await.unwrap();
        assert_eq!(error["error"], "Ballot is missing a choice for: Secretary");
        assert_eq!(0, votes.count_documents(None, None).await.unwrap());

        // Still signed in, free to try again.
        let response = cast(&client, &full_ballot(&slate)).await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test(voter)]
    async fn cannot_vote_for_unknown_candidate(client: Client, candidates: Coll<Candidate>) {
        let slate = insert_slate(&candidates).await;
        let mut body = full_ballot(&slate);
        body["selections"]["Secretary"] = json!(ApiId::from(Id::new()));

        let response = cast(&client, &body).await;
        assert_eq!(Status::UnprocessableEntity, response.status());
    }
}
