use oobmig_batch::{PlaceholderCache, Row, MAX_POSTGRES_PARAMETERS};
use tracing::debug;

use crate::{
    engine::{Engine, Session},
    error::Result,
    table::{AuxTable, Bounds, Counts, Direction, TableSpec},
};

#[derive(Clone)]
pub struct Store {
    pub(crate) engine: Box<dyn Engine>,
}

impl Store {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
        }
    }

    pub async fn begin(&self) -> Result<Box<dyn Session>> {
        self.engine.begin().await
    }

    pub async fn counts(
        &self,
        spec: &TableSpec,
        direction: Direction,
        target_version: i32,
    ) -> Result<Counts> {
        self.engine.counts(spec, direction, target_version).await
    }

    /// Share of tracked partitions already done in `direction`.
    pub async fn progress(
        &self,
        spec: &TableSpec,
        direction: Direction,
        target_version: i32,
    ) -> Result<f64> {
        Ok(self.counts(spec, direction, target_version).await?.progress())
    }

    pub async fn bounds(&self, spec: &TableSpec) -> Result<Vec<(i64, Bounds)>> {
        self.engine.bounds(spec).await
    }

    /// Recomputes one partition's bookkeeping row from its data rows.
    ///
    /// Writers call this after inserting rows so the partition becomes visible
    /// to migrations.
    pub async fn track_partition(
        &self,
        spec: &TableSpec,
        partition_id: i64,
    ) -> Result<Option<Bounds>> {
        let mut session = self.begin().await?;
        let bounds = session.refresh_bounds(spec, partition_id).await?;
        session.commit().await?;

        debug!(table = %spec.table, partition_id, ?bounds, "tracked partition");

        Ok(bounds)
    }

    /// Stores bounds as given, without looking at the data rows.
    pub async fn record_bounds(
        &self,
        spec: &TableSpec,
        partition_id: i64,
        bounds: Bounds,
    ) -> Result<()> {
        let mut session = self.begin().await?;
        session.write_bounds(spec, partition_id, Some(bounds)).await?;
        session.commit().await
    }

    /// Appends rows to a partitioned table in its own transaction.
    pub async fn insert(&self, table: &AuxTable, partition_id: i64, rows: Vec<Row>) -> Result<u64> {
        let cache = PlaceholderCache::new();
        let mut session = self.begin().await?;
        let inserted = session
            .insert_aux(table, partition_id, rows, &cache, MAX_POSTGRES_PARAMETERS)
            .await?;
        session.commit().await?;

        Ok(inserted)
    }

    pub async fn select(&self, table: &AuxTable, partition_id: i64) -> Result<Vec<Row>> {
        let mut session = self.begin().await?;
        let rows = session.read_aux(table, partition_id).await?;
        session.rollback().await?;

        Ok(rows)
    }
}
