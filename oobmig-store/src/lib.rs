#![forbid(unsafe_code)]
//! Per-partition schema-version bookkeeping and the transactional reads and
//! writes a migration step is made of.
//!
//! A [`Store`] wraps an [`Engine`]. Engines hand out [`Session`]s, one per
//! transaction; the Postgres engine lives behind the `pg` feature and an
//! in-process engine behind `memory`.

mod engine;
mod error;
mod store;
mod table;

pub use engine::*;
pub use error::*;
pub use store::*;
pub use table::*;
