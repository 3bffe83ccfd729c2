use mongodb::{
    error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    ClientSession,
};

/// How many times a transaction is run before a write conflict is reported
/// to the caller.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// An error type that can carry a database error, which might be transient.
pub trait StoreError: From<DbError> {
    fn db_error(&self) -> Option<&DbError>;
}

/// The outcome of one transaction attempt.
pub enum Attempt<T, E> {
    /// Committed, or failed for a reason a re-run would not fix.
    Done(Result<T, E>),
    /// Aborted by a conflicting writer; the body should be run again from scratch.
    Retry(E),
}

/// Is this a conflict with a concurrent transaction, after which the whole
/// transaction can safely be run again?
pub fn is_transient(err: &DbError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
}

/// Commit or abort the running transaction according to the result of its body.
pub async fn finish<T, E>(session: &mut ClientSession, result: Result<T, E>) -> Attempt<T, E>
where
    E: StoreError,
{
    match result {
        Ok(value) => match commit(session).await {
            Ok(()) => Attempt::Done(Ok(value)),
            Err(err) if is_transient(&err) => Attempt::Retry(err.into()),
            Err(err) => Attempt::Done(Err(err.into())),
        },
        Err(err) => {
            // The server may already have aborted it, in which case this fails harmlessly.
            let _ = session.abort_transaction().await;
            if err.db_error().map_or(false, is_transient) {
                Attempt::Retry(err)
            } else {
                Attempt::Done(Err(err))
            }
        }
    }
}

/// Commit, re-trying only while the server cannot tell us whether the commit happened.
async fn commit(session: &mut ClientSession) -> Result<(), DbError> {
    let mut attempts = 1;
    loop {
        match session.commit_transaction().await {
            Err(err)
                if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && attempts < MAX_TRANSACTION_ATTEMPTS =>
            {
                attempts += 1;
                log::debug!("Commit result unknown, committing again (attempt {attempts})");
            }
            result => return result,
        }
    }
}

/// Run `$body` (an expression producing a future of `Result<T, E: StoreError>`)
/// inside a transaction on `$session`, re-running it from scratch while it
/// loses write conflicts to other processes.
///
/// A macro rather than a function because the body borrows the session
/// mutably on every attempt.
macro_rules! in_transaction {
    ($session:ident, $what:expr, $body:expr) => {{
        let mut attempts = 0;
        loop {
            attempts += 1;
            if let Err(err) = $session.start_transaction(None).await {
                break Err(err.into());
            }
            let result = $body.await;
            match $crate::model::mongodb::finish(&mut $session, result).await {
                $crate::model::mongodb::Attempt::Done(outcome) => break outcome,
                $crate::model::mongodb::Attempt::Retry(err) => {
                    if attempts >= $crate::model::mongodb::MAX_TRANSACTION_ATTEMPTS {
                        ::log::warn!("Giving up {} after {attempts} conflicting attempts", $what);
                        break Err(err);
                    }
                    ::log::debug!("Write conflict while {}, re-running (attempt {attempts})", $what);
                }
            }
        }
    }};
}

pub(crate) use in_transaction;
