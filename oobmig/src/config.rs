//! Defaults and builders for migrators and the runner.

use std::time::Duration;

use oobmig_batch::MAX_POSTGRES_PARAMETERS;
use oobmig_store::DEFAULT_PARTITION_COLUMN;

/// Schema version rows are moved to by `up`; `down` moves them to the one before.
pub const DEFAULT_TARGET_VERSION: i32 = 2;

/// Rows read, transformed and written per step.
///
/// One step is one transaction holding one partition lock, so larger batches
/// finish a partition in fewer ticks but keep the lock longer.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Time between two scheduled steps of one migration.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_WORKERS: usize = 1;

/// Pending ticks the runner buffers before dropping new ones.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// How long shutdown waits for in-flight steps to roll back.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorOptions {
    pub id: i32,
    pub table: String,
    pub partition_column: String,
    pub target_version: i32,
    pub batch_size: usize,
    pub interval: Duration,
    /// Bound parameters allowed in one statement.
    pub max_parameters: usize,
}

impl MigratorOptions {
    pub fn builder(id: i32, table: impl Into<String>) -> MigratorOptionsBuilder {
        MigratorOptionsBuilder {
            options: Self {
                id,
                table: table.into(),
                partition_column: DEFAULT_PARTITION_COLUMN.to_owned(),
                target_version: DEFAULT_TARGET_VERSION,
                batch_size: DEFAULT_BATCH_SIZE,
                interval: DEFAULT_INTERVAL,
                max_parameters: MAX_POSTGRES_PARAMETERS,
            },
        }
    }
}

#[derive(Debug)]
pub struct MigratorOptionsBuilder {
    options: MigratorOptions,
}

impl MigratorOptionsBuilder {
    pub fn partition_column(mut self, column: impl Into<String>) -> Self {
        self.options.partition_column = column.into();
        self
    }

    pub fn target_version(mut self, version: i32) -> Self {
        self.options.target_version = version;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.options.batch_size = size;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.options.interval = interval;
        self
    }

    pub fn max_parameters(mut self, max: usize) -> Self {
        self.options.max_parameters = max;
        self
    }

    pub fn build(self) -> MigratorOptions {
        self.options
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Worker tasks draining the tick queue.
    pub workers: usize,
    pub queue_capacity: usize,
    pub shutdown_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> RunnerConfig {
        self.config
    }
}
