#![forbid(unsafe_code)]
//! Online schema migrations for partitioned, append-mostly tables.
//!
//! A [`Migrator`] moves one table between two schema versions, one batch of
//! one partition per step, using a [`Driver`] to rewrite rows. Progress is
//! derived from per-partition version bounds kept next to the table. The
//! [`Runner`] schedules steps of many migrators in the background.
//!
//! ```ignore
//! let store = oobmig::Pg::new(&pool);
//! let options = MigratorOptions::builder(1, LocationCountDriver::TABLE).build();
//! let migrator = Migrator::new(store, LocationCountDriver::new(), options)?;
//!
//! migrator.up().await?;
//! println!("{:.0}%", migrator.progress(Direction::Up).await? * 100.0);
//! ```

mod config;
mod driver;
mod drivers;
mod error;
mod migrator;
mod runner;

pub use config::*;
pub use driver::*;
pub use drivers::*;
pub use error::*;
pub use migrator::*;
pub use runner::*;

pub use oobmig_batch::{PlaceholderCache, Row, Value};
pub use oobmig_store::{
    AuxTable, Bounds, Counts, Direction, Engine, FieldRole, FieldSpec, Session, Store,
    StoreError, TableSpec,
};

#[cfg(feature = "memory")]
pub use oobmig_store::Memory;
#[cfg(feature = "pg")]
pub use oobmig_store::Pg;
