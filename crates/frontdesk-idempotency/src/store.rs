//! Durable insert-once storage for idempotency records.
//!
//! All writes go through [`IdempotencyStore::put`], which uses
//! `INSERT OR IGNORE` so duplicate concurrent writers cannot corrupt state:
//! the first writer's row wins and every later write is a no-op. Records are
//! immutable once written and never deleted by this layer.

use crate::error::IdempotencyError;
use crate::key::IdempotencyKey;
use frontdesk_db::DbPool;
use rusqlite::{params, OptionalExtension};

/// Outcome of a [`IdempotencyStore::put`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// This caller's row was inserted; its result is authoritative.
    Stored,
    /// A row for this key already existed; the stored row is authoritative
    /// and this caller's result was discarded.
    AlreadyPresent,
}

/// Handle to the durable idempotency table.
///
/// Methods are blocking (rusqlite); async callers go through
/// `tokio::task::spawn_blocking`, which [`crate::EffectExecutor`] does
/// internally.
#[derive(Clone, Debug)]
pub struct IdempotencyStore {
    pool: DbPool,
}

impl IdempotencyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Looks up the stored result for a key.
    ///
    /// # Errors
    ///
    /// `NotInitialized` if the backing table is missing, `Storage` on any
    /// other SQLite failure (treat as effect-unknown).
    pub fn get(&self, key: &IdempotencyKey) -> Result<Option<String>, IdempotencyError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT result_json FROM idempotency_records WHERE key = ?1",
            params![key.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(IdempotencyError::from_sqlite)
    }

    /// Inserts a result for a key if none exists.
    ///
    /// A second write attempt for the same key is a no-op, not an overwrite;
    /// it reports [`PutOutcome::AlreadyPresent`] and never errors on the
    /// duplicate.
    pub fn put(
        &self,
        key: &IdempotencyKey,
        result_json: &str,
    ) -> Result<PutOutcome, IdempotencyError> {
        let conn = self.pool.get()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO idempotency_records (key, result_json) VALUES (?1, ?2)",
                params![key.as_str(), result_json],
            )
            .map_err(IdempotencyError::from_sqlite)?;

        if inserted == 1 {
            Ok(PutOutcome::Stored)
        } else {
            Ok(PutOutcome::AlreadyPresent)
        }
    }
}
