mod bson;
mod collection;
mod errors;
mod store;
mod transaction;

pub use bson::Id;
pub use collection::{case_insensitive, ensure_indexes_exist, Coll, MongoCollection};
pub use errors::{is_duplicate_key_error, DUPLICATE_KEY};
pub use store::Store;
pub(crate) use transaction::in_transaction;
pub use transaction::{
    finish, is_transient, Attempt, StoreError, MAX_TRANSACTION_ATTEMPTS,
};
