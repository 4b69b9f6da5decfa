use thiserror::Error;

/// Errors from the idempotency store and executor plumbing.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The backing table does not exist — setup (migrations) has not run.
    #[error("idempotency store is not initialized; run database migrations first")]
    NotInitialized,

    /// An I/O failure in the storage layer. The caller must treat this as
    /// "effect unknown", not "effect absent".
    #[error("idempotency storage failed: {0}")]
    Storage(rusqlite::Error),

    /// Could not obtain a connection from the pool.
    #[error("failed to get database connection: {0}")]
    Pool(#[from] r2d2::Error),

    /// A stored or to-be-stored result could not be (de)serialized.
    #[error("failed to serialize idempotency result: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking storage task panicked or was cancelled.
    #[error("idempotency storage task failed: {0}")]
    TaskJoin(String),

    /// Bypass mode was requested in the production environment.
    #[error("idempotency bypass is refused in the production environment")]
    BypassRefused,
}

impl IdempotencyError {
    /// Maps a rusqlite error, folding "missing table" into `NotInitialized`.
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(_, Some(ref msg)) = err {
            if msg.contains("no such table: idempotency_records") {
                return Self::NotInitialized;
            }
        }
        Self::Storage(err)
    }
}

/// Error type returned by [`crate::EffectExecutor::execute`].
///
/// Distinguishes store failures (effect unknown, retry the whole dispatch)
/// from failures of the wrapped side effect itself (nothing was recorded, so
/// retrying with the same key is safe).
#[derive(Debug, Error)]
pub enum EffectError<E>
where
    E: std::error::Error + 'static,
{
    /// The idempotency store failed before or after the effect ran.
    #[error(transparent)]
    Store(#[from] IdempotencyError),

    /// The wrapped side effect failed; no record was persisted.
    #[error("side effect failed: {0}")]
    Effect(#[source] E),
}
