//! The idempotent side-effect executor.
//!
//! Wraps an effectful async operation so it runs at most once per key. The
//! winner of a concurrent race persists its result; losers discard their own
//! result and return the winner's stored row, so both callers observe an
//! identical payload. An operation that fails persists nothing, which makes
//! retrying with the same key safe.

use crate::error::{EffectError, IdempotencyError};
use crate::key::IdempotencyKey;
use crate::store::{IdempotencyStore, PutOutcome};
use frontdesk_db::DbPool;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How a result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome<T> {
    /// The wrapped operation ran and its result was persisted.
    Fresh(T),
    /// A stored result was returned without invoking the operation.
    Replayed(T),
}

impl<T> ExecutionOutcome<T> {
    /// Unwraps the carried result, discarding provenance.
    pub fn into_inner(self) -> T {
        match self {
            Self::Fresh(value) | Self::Replayed(value) => value,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Executes side effects at most once per idempotency key.
#[derive(Clone, Debug)]
pub struct EffectExecutor {
    store: IdempotencyStore,
    bypass: bool,
    /// In-process serialization per key: concurrent callers racing on the
    /// same key wait for the first to finish, then replay its stored row.
    /// Cross-process races are still resolved by `INSERT OR IGNORE`.
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl EffectExecutor {
    /// Creates an executor backed by the durable store.
    pub fn new(pool: DbPool) -> Self {
        Self {
            store: IdempotencyStore::new(pool),
            bypass: false,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates an executor with the dedup layer optionally bypassed.
    ///
    /// Bypass is a non-production convenience: every invocation executes the
    /// operation directly and duplication is possible by design. Requesting
    /// it while `environment` is `"production"` is refused.
    ///
    /// # Errors
    ///
    /// Returns `IdempotencyError::BypassRefused` for bypass in production.
    pub fn with_bypass(
        pool: DbPool,
        bypass: bool,
        environment: &str,
    ) -> Result<Self, IdempotencyError> {
        if bypass && environment == "production" {
            return Err(IdempotencyError::BypassRefused);
        }
        if bypass {
            tracing::warn!("idempotency bypass enabled; side effects may run more than once");
        }
        Ok(Self {
            store: IdempotencyStore::new(pool),
            bypass,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Runs `effect` at most once for `key`.
    ///
    /// - If a record exists, the stored result is deserialized and returned
    ///   as [`ExecutionOutcome::Replayed`] without invoking `effect`.
    /// - Otherwise `effect` runs; on success its result is persisted. If a
    ///   concurrent writer got there first, that writer's stored result is
    ///   returned instead of our own.
    /// - If `effect` fails, nothing is persisted and the error is surfaced
    ///   as [`EffectError::Effect`].
    ///
    /// # Errors
    ///
    /// [`EffectError::Store`] on storage failure (effect-unknown) or
    /// [`EffectError::Effect`] when the wrapped operation itself fails.
    pub async fn execute<T, E, F, Fut>(
        &self,
        key: &IdempotencyKey,
        effect: F,
    ) -> Result<ExecutionOutcome<T>, EffectError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: std::error::Error + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.bypass {
            let value = effect().await.map_err(EffectError::Effect)?;
            return Ok(ExecutionOutcome::Fresh(value));
        }

        let key_lock = {
            let mut locks = self.key_locks.lock().await;
            locks
                .entry(key.as_str().to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let result = {
            let _guard = key_lock.lock().await;
            self.execute_locked(key, effect).await
        };
        self.release_key_lock(key, &key_lock).await;
        result
    }

    async fn execute_locked<T, E, F, Fut>(
        &self,
        key: &IdempotencyKey,
        effect: F,
    ) -> Result<ExecutionOutcome<T>, EffectError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: std::error::Error + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(stored) = self.get_blocking(key).await? {
            let value = serde_json::from_str(&stored).map_err(IdempotencyError::from)?;
            tracing::debug!(key = %key, "idempotent operation replayed from store");
            return Ok(ExecutionOutcome::Replayed(value));
        }

        // A concurrent writer in another process may beat us to the row;
        // the dedup is enforced at the storage layer when we persist.
        let value = effect().await.map_err(EffectError::Effect)?;
        let result_json = serde_json::to_string(&value).map_err(IdempotencyError::from)?;

        match self.put_blocking(key, result_json).await? {
            PutOutcome::Stored => Ok(ExecutionOutcome::Fresh(value)),
            PutOutcome::AlreadyPresent => {
                // Lost the race: the winner's row is authoritative.
                let stored = self
                    .get_blocking(key)
                    .await?
                    .ok_or(IdempotencyError::Storage(
                        rusqlite::Error::QueryReturnedNoRows,
                    ))?;
                let winner = serde_json::from_str(&stored).map_err(IdempotencyError::from)?;
                tracing::debug!(key = %key, "lost idempotency race; returning winner's result");
                Ok(ExecutionOutcome::Replayed(winner))
            }
        }
    }

    /// Drops the lock-map entry for a key once no other caller holds it, so
    /// the map stays proportional to in-flight work instead of growing with
    /// every key ever executed.
    async fn release_key_lock(&self, key: &IdempotencyKey, lock: &Arc<Mutex<()>>) {
        let mut locks = self.key_locks.lock().await;
        // Two clones means the map's entry and ours; more means another
        // caller is still queued on this key.
        if Arc::strong_count(lock) <= 2 {
            locks.remove(key.as_str());
        }
    }

    async fn get_blocking(&self, key: &IdempotencyKey) -> Result<Option<String>, IdempotencyError> {
        let store = self.store.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| IdempotencyError::TaskJoin(e.to_string()))?
    }

    async fn put_blocking(
        &self,
        key: &IdempotencyKey,
        result_json: String,
    ) -> Result<PutOutcome, IdempotencyError> {
        let store = self.store.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || store.put(&key, &result_json))
            .await
            .map_err(|e| IdempotencyError::TaskJoin(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frontdesk_db::{create_pool, run_migrations, DbRuntimeSettings};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("simulated effect failure")]
    struct Boom;

    fn migrated_pool(dir: &tempfile::TempDir) -> frontdesk_db::DbPool {
        let path = dir.path().join("exec.db");
        let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
            .expect("pool creation should succeed");
        {
            let conn = pool.get().expect("should get connection");
            run_migrations(&conn).expect("migrations should succeed");
        }
        pool
    }

    fn key(op: &str) -> IdempotencyKey {
        IdempotencyKey::derive("frontdesk", "CA-exec", op, &json!({"slot": "tue-9"}))
    }

    #[tokio::test]
    async fn second_invocation_replays_without_running_effect() {
        let dir = tempfile::tempdir().unwrap();
        let executor = EffectExecutor::new(migrated_pool(&dir));
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("book");

        for round in 0..2 {
            let calls = calls.clone();
            let outcome = executor
                .execute(&k, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Boom>(json!({"eventId": "ev-1"}))
                })
                .await
                .expect("execute should succeed");

            assert_eq!(outcome.is_replay(), round == 1);
            assert_eq!(outcome.into_inner(), json!({"eventId": "ev-1"}));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "effect must run exactly once");
    }

    #[tokio::test]
    async fn concurrent_callers_execute_effect_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let executor = EffectExecutor::new(migrated_pool(&dir));
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("book_concurrent");
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let executor = executor.clone();
            let calls = calls.clone();
            let k = k.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                executor
                    .execute(&k, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Boom>(json!({"eventId": "ev-race"}))
                    })
                    .await
                    .expect("execute should succeed")
                    .into_inner()
            }));
        }

        let first = handles.pop().unwrap().await.unwrap();
        let second = handles.pop().unwrap().await.unwrap();

        assert_eq!(first, second, "both callers must observe an identical result");
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "the wrapped effect must execute at most once"
        );
        assert_eq!(first, json!({"eventId": "ev-race"}));
    }

    #[tokio::test]
    async fn failed_effect_records_nothing_and_retry_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let executor = EffectExecutor::new(migrated_pool(&dir));
        let k = key("flaky");

        let err = executor
            .execute(&k, || async { Err::<serde_json::Value, _>(Boom) })
            .await
            .expect_err("first attempt should fail");
        assert!(matches!(err, EffectError::Effect(_)));

        // Nothing persisted: the retry runs the effect for real.
        let outcome = executor
            .execute(&k, || async { Ok::<_, Boom>(json!({"ok": true})) })
            .await
            .expect("retry should succeed");
        assert!(!outcome.is_replay());
    }

    #[tokio::test]
    async fn lock_map_does_not_accumulate_finished_keys() {
        let dir = tempfile::tempdir().unwrap();
        let executor = EffectExecutor::new(migrated_pool(&dir));

        for op in ["one", "two", "three"] {
            executor
                .execute(&key(op), || async move { Ok::<_, Boom>(json!({"n": 1})) })
                .await
                .unwrap();
        }
        // Replays and failures release their entries too.
        executor
            .execute(&key("one"), || async move { Ok::<_, Boom>(json!({"n": 1})) })
            .await
            .unwrap();
        executor
            .execute(&key("broken"), || async {
                Err::<serde_json::Value, _>(Boom)
            })
            .await
            .unwrap_err();

        assert!(
            executor.key_locks.lock().await.is_empty(),
            "per-key locks must be dropped once no caller holds them"
        );
    }

    #[tokio::test]
    async fn bypass_runs_effect_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let executor = EffectExecutor::with_bypass(migrated_pool(&dir), true, "development")
            .expect("bypass allowed outside production");
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("bypassed");

        for _ in 0..2 {
            let calls = calls.clone();
            executor
                .execute(&k, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Boom>(json!(1))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bypass_is_refused_in_production() {
        let dir = tempfile::tempdir().unwrap();
        let err = EffectExecutor::with_bypass(migrated_pool(&dir), true, "production")
            .expect_err("bypass must be refused in production");
        assert!(matches!(err, IdempotencyError::BypassRefused));
    }
}
