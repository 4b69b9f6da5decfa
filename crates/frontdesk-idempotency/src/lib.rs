//! At-most-once execution of side-effecting operations.
//!
//! Three layers, leaves first:
//!
//! - [`IdempotencyKey`]: deterministic key derivation from tenant, call id,
//!   operation name, and a canonicalized input hash. Canonicalization is
//!   load-bearing: semantically identical inputs must hash identically.
//! - [`IdempotencyStore`]: a durable key → result mapping with insert-once
//!   semantics, backed by the SQLite pool from `frontdesk-db`.
//! - [`EffectExecutor`]: wraps an arbitrary effectful async operation so it
//!   executes at most once per key; repeated invocations replay the stored
//!   result without re-running the operation.
//!
//! Storage failures mean "effect unknown", never "effect absent" — callers
//! must not assume the side effect did not happen.

mod error;
mod executor;
mod key;
mod store;

pub use error::{EffectError, IdempotencyError};
pub use executor::{EffectExecutor, ExecutionOutcome};
pub use key::{canonical_json, IdempotencyKey};
pub use store::{IdempotencyStore, PutOutcome};
