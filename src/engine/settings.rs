use log::debug;
use mongodb::{
    bson::doc,
    error::Error as DbError,
    options::{ReplaceOptions, UpdateOptions},
    ClientSession,
};
use rocket::futures::TryStreamExt;

use crate::error::ConfigError;
use crate::model::{
    election::ElectionConfig,
    mongodb::{Coll, Store},
    setting::{self, key, Setting},
};

/// Keys that together make up the election record.
const ELECTION_KEYS: [&str; 4] = [
    key::ELECTION_NAME,
    key::ELECTION_STATUS,
    key::ELECTION_TARGET_TIME,
    key::ELECTION_DURATION,
];

/// Durable key/value settings. Last write wins; nothing is versioned or cached.
#[derive(Clone)]
pub struct ConfigStore {
    settings: Coll<Setting>,
}

impl ConfigStore {
    pub fn new(store: &Store) -> Self {
        Self {
            settings: store.coll(),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let setting = self
            .settings
            .find_one(doc! { "_id": key }, None)
            .await
            .map_err(ConfigError::ReadFailure)?;
        Ok(setting.map(|setting| setting.value))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.settings
            .replace_one(doc! { "_id": key }, Setting::new(key, value), options)
            .await
            .map_err(ConfigError::WriteFailure)?;
        Ok(())
    }

    /// Read the election record outside any transaction.
    pub async fn load_election(&self) -> Result<ElectionConfig, ConfigError> {
        let settings: Vec<Setting> = self
            .settings
            .find(doc! { "_id": { "$in": ELECTION_KEYS.to_vec() } }, None)
            .await
            .map_err(ConfigError::ReadFailure)?
            .try_collect()
            .await
            .map_err(ConfigError::ReadFailure)?;
        Ok(ElectionConfig::from_settings(settings))
    }

    /// Read the election record as part of the given transaction.
    pub async fn load_election_in(
        &self,
        session: &mut ClientSession,
    ) -> Result<ElectionConfig, DbError> {
        let mut cursor = self
            .settings
            .find_with_session(
                doc! { "_id": { "$in": ELECTION_KEYS.to_vec() } },
                None,
                session,
            )
            .await?;
        let mut settings = Vec::new();
        while let Some(setting) = cursor.next(session).await {
            settings.push(setting?);
        }
        Ok(ElectionConfig::from_settings(settings))
    }

    /// Write the given settings as part of the given transaction.
    pub async fn set_all_in(
        &self,
        settings: &[Setting],
        session: &mut ClientSession,
    ) -> Result<(), DbError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        for setting in settings {
            self.settings
                .replace_one_with_session(
                    doc! { "_id": &setting.key },
                    setting,
                    options.clone(),
                    session,
                )
                .await?;
        }
        Ok(())
    }

    /// Insert the default settings, leaving any existing values alone.
    ///
    /// This operation is idempotent.
    pub async fn seed_defaults(&self) -> Result<(), DbError> {
        let options = UpdateOptions::builder().upsert(true).build();
        for setting in setting::defaults() {
            let result = self
                .settings
                .update_one(
                    doc! { "_id": &setting.key },
                    doc! { "$setOnInsert": { "value": &setting.value } },
                    options.clone(),
                )
                .await?;
            if result.upserted_id.is_some() {
                debug!("Seeded setting {} = {:?}", setting.key, setting.value);
            }
        }
        Ok(())
    }
}
