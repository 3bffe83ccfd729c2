//! The election engine. Every component is a cheap, cloneable handle built
//! from the shared [`Store`](crate::model::mongodb::Store); none of them keep
//! state of their own between calls.

mod archive;
mod audit;
mod election;
mod expiry;
mod ledger;
mod registry;
mod report;
mod session;
mod settings;

pub use archive::ArchiveStore;
pub use audit::AuditLog;
pub use election::ElectionController;
pub use expiry::{ExpiryWatcher, ExpiryWatcherFairing};
pub use ledger::{check_ballot, VoteLedger};
pub use registry::Registry;
pub use report::{LogReporter, ReportError, ResultsReporter, SharedReporter};
pub use session::{recently_active, SessionGuard, CONCURRENT_LOGIN_WINDOW_SECONDS};
pub use settings::ConfigStore;

#[cfg(test)]
pub use report::examples;
