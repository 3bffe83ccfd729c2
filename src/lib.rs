#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing};
use crate::engine::{ExpiryWatcherFairing, LogReporter, SharedReporter};
use crate::logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

/// Build the server, ready to be ignited and launched.
pub fn build() -> Rocket<Build> {
    let reporter: SharedReporter = Arc::new(LogReporter);
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .manage(reporter)
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(ExpiryWatcherFairing)
}
