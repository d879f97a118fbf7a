use async_trait::async_trait;
use oobmig_batch::{PlaceholderCache, Row};
use oobmig_store::{AuxTable, FieldSpec, Session, StoreError};

/// Rewrites the rows of one partition between two schema versions.
///
/// Returned rows hold the primary keys followed by the update targets, in
/// [`FieldSpec`] declaration order. Rows a driver cannot convert are left out
/// of the result and reported with [`DriverContext::skip`]; they stay at
/// their current version.
#[async_trait]
pub trait Driver: Send + Sync {
    fn fields(&self) -> Vec<FieldSpec>;

    /// Whether `migrate_down` is supported. The runtime refuses to migrate
    /// an irreversible driver down and reports its down progress as `0`.
    fn reversible(&self) -> bool {
        true
    }

    async fn migrate_up(
        &self,
        ctx: &mut DriverContext<'_>,
        partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>>;

    async fn migrate_down(
        &self,
        ctx: &mut DriverContext<'_>,
        partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>>;
}

/// What a driver may do inside the step's transaction.
pub struct DriverContext<'a> {
    session: &'a mut dyn Session,
    cache: &'a PlaceholderCache,
    max_parameters: usize,
    skipped: usize,
}

impl<'a> DriverContext<'a> {
    pub(crate) fn new(
        session: &'a mut dyn Session,
        cache: &'a PlaceholderCache,
        max_parameters: usize,
    ) -> Self {
        Self {
            session,
            cache,
            max_parameters,
            skipped: 0,
        }
    }

    /// Reads a side table through the step's transaction.
    pub async fn read_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
    ) -> Result<Vec<Row>, StoreError> {
        self.session.read_aux(table, partition_id).await
    }

    /// Reads the rows of a side table whose integer `column` is one of `values`.
    pub async fn read_aux_where(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        column: &str,
        values: &[i64],
    ) -> Result<Vec<Row>, StoreError> {
        self.session
            .read_aux_where(table, partition_id, column, values)
            .await
    }

    pub async fn max_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        column: &str,
    ) -> Result<Option<i64>, StoreError> {
        self.session.max_aux(table, partition_id, column).await
    }

    /// Appends rows to a side table; they commit or roll back with the step.
    pub async fn insert_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        rows: Vec<Row>,
    ) -> Result<u64, StoreError> {
        self.session
            .insert_aux(table, partition_id, rows, self.cache, self.max_parameters)
            .await
    }

    pub fn skip(&mut self, rows: usize) {
        self.skipped += rows;
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
