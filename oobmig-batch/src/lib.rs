#![forbid(unsafe_code)]
//! Multi-row `INSERT` batching bounded by the store's parameter ceiling.
//!
//! An [`Inserter`] buffers rows of a fixed arity and turns them into one
//! parameterized statement per flush. Statements are handed to an [`Execute`]
//! implementation; with the `pg` feature enabled, `sqlx::PgConnection` is one.

mod error;
mod inserter;
#[cfg(feature = "pg")]
mod pg;
mod placeholder;
mod value;

pub use error::*;
pub use inserter::*;
#[cfg(feature = "pg")]
pub use pg::*;
pub use placeholder::*;
pub use value::*;

/// Maximum number of bound parameters Postgres accepts in one statement.
pub const MAX_POSTGRES_PARAMETERS: usize = 65535;
