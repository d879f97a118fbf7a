use async_trait::async_trait;
use dyn_clone::DynClone;
use oobmig_batch::{PlaceholderCache, Row, Value};

use crate::{
    error::Result,
    table::{AuxTable, Bounds, Counts, Direction, TableSpec},
};

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "pg")]
mod pg;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "pg")]
pub use pg::*;

#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Session>>;

    /// Partitions done in `direction` and partitions tracked, from bookkeeping alone.
    async fn counts(
        &self,
        spec: &TableSpec,
        direction: Direction,
        target_version: i32,
    ) -> Result<Counts>;

    /// Every bookkeeping row, ordered by partition.
    async fn bounds(&self, spec: &TableSpec) -> Result<Vec<(i64, Bounds)>>;
}

dyn_clone::clone_trait_object!(Engine);

/// One transaction. Dropping a session without committing rolls it back.
#[async_trait]
pub trait Session: Send {
    /// Locks the lowest eligible partition not in `exclude`, skipping ones
    /// other sessions hold.
    async fn select_partition(
        &mut self,
        spec: &TableSpec,
        direction: Direction,
        target_version: i32,
        exclude: &[i64],
    ) -> Result<Option<i64>>;

    /// Up to `limit` rows still at the source version of `direction`, shaped
    /// by [`TableSpec::read_fields`] and ordered by primary key. With `after`,
    /// only rows whose primary key sorts after it are returned.
    async fn read_batch(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
        direction: Direction,
        target_version: i32,
        after: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<Row>>;

    /// Applies rows shaped by [`TableSpec::write_fields`] and stamps them with
    /// `version`. Rows already holding those values are left alone. Returns
    /// the number of rows changed.
    async fn write_batch(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
        rows: Vec<Row>,
        version: i32,
        cache: &PlaceholderCache,
        max_parameters: usize,
    ) -> Result<u64>;

    /// Recomputes the partition's bounds from its rows and stores them, or
    /// deletes its bookkeeping row when no rows are left.
    async fn refresh_bounds(&mut self, spec: &TableSpec, partition_id: i64)
        -> Result<Option<Bounds>>;

    async fn write_bounds(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
        bounds: Option<Bounds>,
    ) -> Result<()>;

    /// Rows of `table` for one partition, ordered by every listed column.
    async fn read_aux(&mut self, table: &AuxTable, partition_id: i64) -> Result<Vec<Row>>;

    /// Like [`Session::read_aux`], keeping rows whose integer `column` is one of `values`.
    async fn read_aux_where(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        column: &str,
        values: &[i64],
    ) -> Result<Vec<Row>>;

    /// Largest value of an integer `column` in one partition, `None` when it has no rows.
    async fn max_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        column: &str,
    ) -> Result<Option<i64>>;

    async fn insert_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        rows: Vec<Row>,
        cache: &PlaceholderCache,
        max_parameters: usize,
    ) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
