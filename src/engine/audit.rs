use log::{error, trace};
use mongodb::{bson::doc, error::Error as DbError, options::FindOptions, ClientSession};
use rocket::futures::TryStreamExt;

use crate::model::{
    audit::AuditEntry,
    mongodb::{Coll, Store},
};

/// Append-only record of state-changing actions. Never consulted by the
/// engine itself.
#[derive(Clone)]
pub struct AuditLog {
    entries: Coll<AuditEntry>,
}

impl AuditLog {
    pub fn new(store: &Store) -> Self {
        Self {
            entries: store.coll(),
        }
    }

    /// Append an entry on its own. A failure is logged, not returned: the
    /// action being audited has already happened.
    pub async fn append(&self, entry: AuditEntry) {
        if let Err(err) = self.entries.insert_one(&entry, None).await {
            error!(
                "Failed to audit {} by {}: {err}",
                entry.action, entry.actor
            );
        } else {
            trace!("Audited {} by {}", entry.action, entry.actor);
        }
    }

    /// Append an entry as part of the given transaction, so it commits or
    /// rolls back together with the action it records.
    pub async fn append_in(
        &self,
        entry: &AuditEntry,
        session: &mut ClientSession,
    ) -> Result<(), DbError> {
        self.entries
            .insert_one_with_session(entry, None, session)
            .await?;
        Ok(())
    }

    /// The most recent `limit` entries, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<AuditEntry>, DbError> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1, "_id": -1 })
            .limit(i64::from(limit))
            .build();
        self.entries.find(None, options).await?.try_collect().await
    }
}
