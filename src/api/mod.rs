use rocket::{
    http::Status,
    serde::json::{json, Json, Value},
    Catcher, Request, Route,
};

use crate::model::api::auth::SESSION_EXPIRED;

pub mod admin;
pub mod auth;
pub mod ballot;
pub mod public;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(auth::routes());
    routes.extend(ballot::routes());
    routes.extend(public::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![unauthorized, default_catcher]
}

/// Only the auth guard fails with 401 before reaching a handler, and only
/// when the session in the cookie is no longer the live one.
#[catch(401)]
fn unauthorized() -> Json<Value> {
    Json(json!({ "error": SESSION_EXPIRED }))
}

#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> Json<Value> {
    Json(json!({ "error": status.reason().unwrap_or("Unknown error") }))
}
