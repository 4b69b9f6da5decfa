//! Database layer for frontdesk.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. The idempotency table is the only durable
//! state the core owns; its schema must stay stable across restarts because
//! idempotency keys are re-derived deterministically from inputs.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-server deployment needs no external
//!   database process. WAL allows concurrent readers with a single writer,
//!   which matches the access pattern (many replay reads, few first-writes).
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` so the schema ships with the server and cannot drift
//!   from the code that depends on it.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
