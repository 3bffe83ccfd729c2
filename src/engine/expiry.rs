use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{self, sync::Mutex, task::JoinHandle},
    Build, Rocket,
};

use crate::model::{election::ElectionState, mongodb::Store};
use crate::Config;

use super::{election::ElectionController, report::SharedReporter};

/// Stops an election at its end time even if nobody is around to notice.
///
/// Only ever a shortcut: every gating read settles expiry itself, so a
/// missed or cancelled watch loses nothing but promptness.
#[derive(Clone)]
pub struct ExpiryWatcher {
    enabled: bool,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ExpiryWatcher {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            task: Default::default(),
        }
    }

    /// Settle the election shortly after `end_time`, replacing any earlier watch.
    pub async fn schedule(&self, election: ElectionController, end_time: DateTime<Utc>) {
        if !self.enabled {
            return;
        }
        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
        }
        // A time in the past yields a zero delay.
        let delay = (end_time - Utc::now()).to_std().unwrap_or_default();
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match election.is_active(Utc::now()).await {
                Ok(activity) => debug!("Expiry watch fired: {}", activity.reason),
                Err(err) => error!("Expiry watch failed to settle the election: {err}"),
            }
        }));
        debug!("Watching for election end at {end_time}");
    }

    /// Drop the current watch, if any.
    pub async fn cancel(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            debug!("Cancelled expiry watch");
        }
    }

    /// Is a watch pending?
    pub async fn is_watching(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }
}

/// A fairing that places an `ExpiryWatcher` into managed state, already
/// watching any election left running by a previous launch.
/// This fairing depends on the store and reporter being in managed state,
/// and so must be attached after the fairings responsible for them.
pub struct ExpiryWatcherFairing;

#[rocket::async_trait]
impl Fairing for ExpiryWatcherFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election expiry watcher",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let enabled = rocket
            .state::<Config>()
            .map_or(false, Config::expiry_watcher);
        let watcher = ExpiryWatcher::new(enabled);

        let store = rocket.state::<Store>().cloned();
        let reporter = rocket.state::<SharedReporter>().cloned();
        let (store, reporter) = match (store, reporter) {
            (Some(store), Some(reporter)) => (store, reporter),
            _ => {
                error!("Store or reporter was not available when starting the expiry watcher");
                return Err(rocket);
            }
        };

        if enabled {
            let election = ElectionController::new(store, reporter);
            match election.config().await {
                Ok(config) => {
                    if let (ElectionState::Active | ElectionState::Expired, Some(end_time)) = (
                        config.state_at(Utc::now()),
                        config.target_end_time.as_option(),
                    ) {
                        info!("Resuming watch of election '{}'", config.name);
                        watcher.schedule(election, end_time).await;
                    }
                }
                // Voting still works without the watcher.
                Err(err) => error!("Could not read the election to watch: {err}"),
            }
        }

        Ok(rocket.manage(watcher))
    }
}
