use oobmig_batch::{PlaceholderCache, Row};
use oobmig_store::{Bounds, Direction, Session, Store, TableSpec};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{
    config::MigratorOptions,
    driver::{Driver, DriverContext},
    error::{MigratorError, Result},
};

/// Outcome of one step: one batch of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub partition_id: i64,
    pub direction: Direction,
    pub rows_read: usize,
    pub rows_written: u64,
    pub skipped: usize,
    /// Bounds after the step; `None` once the partition's bookkeeping row is retired.
    pub bounds: Option<Bounds>,
}

/// Moves one table between two schema versions, a partition batch at a time.
///
/// Every step runs in its own transaction: lock an eligible partition, read a
/// batch still at the source version, let the driver rewrite it, write it
/// back and refresh the partition's bounds. Any failure rolls the whole step
/// back and leaves the partition eligible for a later step.
///
/// Each partition is read in primary key order from where its last batch
/// ended, so rows the driver skips never hide the rows after them. Once a
/// pass finds nothing past that key, reading starts over from the lowest key.
pub struct Migrator {
    options: MigratorOptions,
    spec: TableSpec,
    store: Store,
    driver: Arc<dyn Driver>,
    cache: PlaceholderCache,
    deferred: Mutex<HashSet<(Direction, i64)>>,
    cursors: Mutex<HashMap<(Direction, i64), Row>>,
}

impl Migrator {
    pub fn new<D: Driver + 'static>(store: Store, driver: D, options: MigratorOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(MigratorError::InvalidOptions("batch size must be positive"));
        }

        if options.target_version < 1 {
            return Err(MigratorError::InvalidOptions(
                "target version must be at least 1",
            ));
        }

        let spec = TableSpec::new(&options.table, driver.fields())
            .partition_column(&options.partition_column);
        spec.validate().map_err(MigratorError::FieldSpec)?;

        if spec.write_fields().len() > options.max_parameters {
            return Err(MigratorError::InvalidOptions(
                "written columns exceed the parameter limit",
            ));
        }

        Ok(Self {
            options,
            spec,
            store,
            driver: Arc::new(driver),
            cache: PlaceholderCache::new(),
            deferred: Mutex::new(HashSet::new()),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> i32 {
        self.options.id
    }

    pub fn interval(&self) -> Duration {
        self.options.interval
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn reversible(&self) -> bool {
        self.driver.reversible()
    }

    /// Share of tracked partitions already done in `direction`, from bookkeeping only.
    pub async fn progress(&self, direction: Direction) -> Result<f64> {
        if direction == Direction::Down && !self.driver.reversible() {
            return Ok(0.0);
        }

        Ok(self
            .store
            .progress(&self.spec, direction, self.options.target_version)
            .await?)
    }

    pub async fn up(&self) -> Result<()> {
        self.step(Direction::Up).await.map(|_| ())
    }

    pub async fn down(&self) -> Result<()> {
        self.step(Direction::Down).await.map(|_| ())
    }

    /// Runs one step. Returns `None` when no partition is eligible.
    pub async fn step(&self, direction: Direction) -> Result<Option<StepReport>> {
        if direction == Direction::Down && !self.driver.reversible() {
            return Err(MigratorError::Irreversible(self.options.id));
        }

        let target = self.options.target_version;
        let exclude = self.deferred(direction);
        let mut session = self.store.begin().await?;

        let mut partition = session
            .select_partition(&self.spec, direction, target, &exclude)
            .await?;

        if partition.is_none() && !exclude.is_empty() {
            // Only partitions that failed or skipped rows are left.
            self.deferred.lock().retain(|(d, _)| *d != direction);
            partition = session
                .select_partition(&self.spec, direction, target, &[])
                .await?;
        }

        let Some(partition_id) = partition else {
            session.rollback().await?;
            debug!(migration = self.options.id, %direction, "no eligible partition");

            return Ok(None);
        };

        let (report, cursor) = match self
            .migrate_partition(session.as_mut(), partition_id, direction)
            .await
        {
            Ok(migrated) => migrated,
            Err(err) => {
                if let Err(rollback) = session.rollback().await {
                    warn!(migration = self.options.id, partition_id, "rollback failed: {rollback}");
                }

                self.defer(direction, partition_id, true);

                return Err(err.in_partition(partition_id));
            }
        };

        if let Err(err) = session.commit().await {
            self.defer(direction, partition_id, true);

            return Err(MigratorError::from(err).in_partition(partition_id));
        }

        self.defer(direction, partition_id, report.skipped > 0);

        let pending = report
            .bounds
            .is_some_and(|b| b.is_eligible(direction, target));
        match cursor.filter(|_| pending) {
            Some(cursor) => self.cursors.lock().insert((direction, partition_id), cursor),
            None => self.cursors.lock().remove(&(direction, partition_id)),
        };

        info!(
            migration = self.options.id,
            partition_id,
            %direction,
            rows = report.rows_read,
            written = report.rows_written,
            "migrated batch"
        );

        if report.skipped > 0 {
            warn!(
                migration = self.options.id,
                partition_id,
                skipped = report.skipped,
                "rows could not be migrated and were left at their current version"
            );
        }

        if report.bounds.is_none() {
            info!(migration = self.options.id, partition_id, "retired empty partition");
        }

        Ok(Some(report))
    }

    async fn migrate_partition(
        &self,
        session: &mut dyn Session,
        partition_id: i64,
        direction: Direction,
    ) -> Result<(StepReport, Option<Row>)> {
        let target = self.options.target_version;
        let after = self.cursors.lock().get(&(direction, partition_id)).cloned();

        let mut rows = session
            .read_batch(
                &self.spec,
                partition_id,
                direction,
                target,
                after.as_deref(),
                self.options.batch_size,
            )
            .await?;

        if rows.is_empty() && after.is_some() {
            rows = session
                .read_batch(
                    &self.spec,
                    partition_id,
                    direction,
                    target,
                    None,
                    self.options.batch_size,
                )
                .await?;
        }

        let rows_read = rows.len();
        let keys = self.spec.primary_keys().count();
        let cursor = rows.last().map(|row| row.iter().take(keys).cloned().collect::<Row>());

        let (rows, skipped) = {
            let mut ctx = DriverContext::new(session, &self.cache, self.options.max_parameters);

            let rows = match direction {
                Direction::Up => self.driver.migrate_up(&mut ctx, partition_id, rows).await,
                Direction::Down => self.driver.migrate_down(&mut ctx, partition_id, rows).await,
            }
            .map_err(MigratorError::Driver)?;

            (rows, ctx.skipped())
        };

        let expected = self.spec.write_fields().len();
        if let Some(row) = rows.iter().find(|row| row.len() != expected) {
            return Err(MigratorError::Arity {
                expected,
                got: row.len(),
            });
        }

        let version = match direction {
            Direction::Up => target,
            Direction::Down => target - 1,
        };

        let rows_written = session
            .write_batch(
                &self.spec,
                partition_id,
                rows,
                version,
                &self.cache,
                self.options.max_parameters,
            )
            .await?;

        let bounds = session.refresh_bounds(&self.spec, partition_id).await?;

        let report = StepReport {
            partition_id,
            direction,
            rows_read,
            rows_written,
            skipped,
            bounds,
        };

        Ok((report, cursor))
    }

    fn deferred(&self, direction: Direction) -> Vec<i64> {
        let mut ids = self
            .deferred
            .lock()
            .iter()
            .filter(|(d, _)| *d == direction)
            .map(|(_, id)| *id)
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Partitions that failed or kept rows behind are tried after the others.
    fn defer(&self, direction: Direction, partition_id: i64, stuck: bool) {
        let mut deferred = self.deferred.lock();

        if stuck {
            deferred.insert((direction, partition_id));
        } else {
            deferred.remove(&(direction, partition_id));
        }
    }
}
