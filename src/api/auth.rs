use chrono::Utc;
use rocket::{
    http::{Cookie, CookieJar},
    serde::json::Json,
    Route, State,
};

use crate::{
    engine::SessionGuard,
    error::{Result, VoteError},
    model::api::auth::{Anyone, AuthToken, Credentials, SessionInfo, AUTH_TOKEN_COOKIE},
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![login, heartbeat, session, logout]
}

#[post("/auth/login", data = "<credentials>", format = "json")]
pub async fn login(
    cookies: &CookieJar<'_>,
    credentials: Json<Credentials>,
    sessions: SessionGuard,
    config: &State<Config>,
) -> Result<Json<SessionInfo>> {
    let (session, user) = sessions
        .authenticate(&credentials.username, &credentials.password, Utc::now())
        .await?;
    cookies.add(AuthToken::<Anyone>::new(session).into_cookie(config));
    Ok(Json(SessionInfo::from(&user)))
}

#[post("/auth/heartbeat")]
pub async fn heartbeat(token: AuthToken<Anyone>, sessions: SessionGuard) -> Result<()> {
    if sessions.heartbeat(&token.session(), Utc::now()).await? {
        Ok(())
    } else {
        // Superseded between the guard's check and now.
        Err(VoteError::SessionInvalid.into())
    }
}

#[get("/auth/session")]
pub async fn session(token: AuthToken<Anyone>, sessions: SessionGuard) -> Result<Json<SessionInfo>> {
    let user = sessions
        .user(&token.session())
        .await?
        .ok_or(VoteError::SessionInvalid)?;
    Ok(Json(SessionInfo::from(&user)))
}

#[delete("/auth")]
pub async fn logout(
    cookies: &CookieJar<'_>,
    token: Option<AuthToken<Anyone>>,
    sessions: SessionGuard,
) -> Result<()> {
    // A dead session has nothing left to end, and must not end its successor.
    if let Some(token) = token {
        sessions.invalidate(token.id).await?;
    }
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Ok(())
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json::json,
    };

    use super::*;
    use crate::model::{
        api::auth::SESSION_EXPIRED,
        mongodb::Coll,
        user::{examples::VOTER_USERNAME, NewUser, Role, UserCore},
    };

    async fn login_as(client: &Client, credentials: &Credentials) -> Status {
        client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!(credentials).to_string())
            .dispatch()
            .await
            .status()
    }

    #[backend_test]
    async fn admin_login(client: Client, users: Coll<NewUser>) {
        users.insert_one(UserCore::example_admin(), None).await.unwrap();
        assert_eq!(Status::Ok, login_as(&client, &Credentials::example_admin()).await);
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.get(uri!(session)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let info: SessionInfo = response.into_json().await.unwrap();
        assert_eq!(info.role, Role::Admin);
    }

    #[backend_test]
    async fn default_admin_is_seeded(client: Client) {
        let credentials = Credentials {
            username: "admin".into(),
            password: "admin123".into(),
        };
        assert_eq!(Status::Ok, login_as(&client, &credentials).await);
    }

    #[backend_test]
    async fn bad_credentials(client: Client, users: Coll<NewUser>) {
        users.insert_one(UserCore::example_voter(), None).await.unwrap();
        assert_eq!(
            Status::Unauthorized,
            login_as(&client, &Credentials::wrong_password()).await
        );
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn voter_needs_open_election(client: Client, users: Coll<NewUser>) {
        users.insert_one(UserCore::example_voter(), None).await.unwrap();
        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!(Credentials::example_voter()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
        let body: rocket::serde::json::Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "Election is manually closed.");
    }

    #[backend_test(voter)]
    async fn second_login_is_turned_away(client: Client) {
        let response = client.post(uri!(heartbeat)).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        // Same account again, straight after.
        assert_eq!(
            Status::Conflict,
            login_as(&client, &Credentials::example_voter()).await
        );
    }

    #[backend_test(voter)]
    async fn superseded_session_is_told_why(client: Client, users: Coll<NewUser>) {
        // Pretend the other device signed in a while ago and has now replaced us.
        users
            .update_one(
                doc! { "username": VOTER_USERNAME },
                doc! { "$set": { "session_token": "someone-else" } },
                None,
            )
            .await
            .unwrap();

        let response = client.get(uri!(session)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
        let body: rocket::serde::json::Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], SESSION_EXPIRED);
    }

    #[backend_test(voter)]
    async fn logout_ends_session(client: Client, users: Coll<NewUser>) {
        let response = client.delete(uri!(logout)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));

        let voter = users
            .find_one(doc! { "username": VOTER_USERNAME }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(voter.session_token, None);

        // Free to sign straight back in.
        assert_eq!(Status::Ok, login_as(&client, &Credentials::example_voter()).await);
    }

    #[backend_test]
    async fn logout_not_logged_in(client: Client) {
        let response = client.delete(uri!(logout)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
    }
}
