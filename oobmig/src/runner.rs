use futures_util::future::join_all;
use oobmig_store::Direction;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Mutex,
    },
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::RunnerConfig,
    error::{MigratorError, Result},
    migrator::Migrator,
};

/// Stops the tasks started by [`Runner::start`].
pub struct ShutdownHandle {
    cancel_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl ShutdownHandle {
    fn new(timeout: Duration) -> (Self, CancellationToken) {
        let cancel_token = CancellationToken::new();

        (
            Self {
                cancel_token: cancel_token.clone(),
                task_handles: Vec::new(),
                timeout,
            },
            cancel_token,
        )
    }

    fn add_task(&mut self, handle: JoinHandle<()>) {
        self.task_handles.push(handle);
    }

    /// Cancels every task and waits for them up to the configured timeout.
    ///
    /// A step still running is dropped and its transaction rolled back.
    pub async fn shutdown(self) {
        let timeout = self.timeout;
        self.shutdown_with_timeout(timeout).await
    }

    pub async fn shutdown_with_timeout(self, timeout: Duration) {
        info!("stopping migrations");

        self.cancel_token.cancel();

        match tokio::time::timeout(timeout, join_all(self.task_handles)).await {
            Ok(_) => info!("migrations stopped"),
            Err(_) => warn!("shutdown timed out after {timeout:?}"),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Drives registered migrations in the background.
///
/// Every migration gets a ticker firing at its interval. Ticks go through a
/// bounded queue to a pool of workers, each running one step per tick; ticks
/// arriving while the queue is full are dropped. A failed step is logged and
/// retried on a later tick.
pub struct Runner {
    config: RunnerConfig,
    migrations: Vec<(Arc<Migrator>, Direction)>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            migrations: Vec::new(),
        }
    }

    pub fn register(mut self, migrator: Migrator, direction: Direction) -> Result<Self> {
        if self.migrations.iter().any(|(m, _)| m.id() == migrator.id()) {
            return Err(MigratorError::DuplicateMigration(migrator.id()));
        }

        if direction == Direction::Down && !migrator.reversible() {
            return Err(MigratorError::Irreversible(migrator.id()));
        }

        self.migrations.push((Arc::new(migrator), direction));

        Ok(self)
    }

    pub fn migrations(&self) -> impl Iterator<Item = (&Migrator, Direction)> {
        self.migrations.iter().map(|(m, d)| (m.as_ref(), *d))
    }

    /// Progress of every migration in its registered direction, by id.
    pub async fn progress(&self) -> Result<Vec<(i32, f64)>> {
        let mut progress = Vec::with_capacity(self.migrations.len());

        for (migrator, direction) in &self.migrations {
            progress.push((migrator.id(), migrator.progress(*direction).await?));
        }

        Ok(progress)
    }

    pub fn start(self) -> ShutdownHandle {
        let (mut handle, cancel_token) = ShutdownHandle::new(self.config.shutdown_timeout);
        let (tx, rx) = mpsc::channel::<usize>(self.config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let migrations = Arc::new(self.migrations);

        for (index, (migrator, direction)) in migrations.iter().enumerate() {
            let tx = tx.clone();
            let token = cancel_token.clone();
            let id = migrator.id();
            let direction = *direction;
            let period = migrator.interval();

            handle.add_task(tokio::spawn(async move {
                let mut interval = interval_at(Instant::now(), period);

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {}
                    }

                    match tx.try_send(index) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!(migration = id, %direction, "queue full, dropping tick");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }));
        }

        drop(tx);

        for worker in 0..self.config.workers.max(1) {
            let rx = rx.clone();
            let token = cancel_token.clone();
            let migrations = migrations.clone();

            handle.add_task(tokio::spawn(async move {
                loop {
                    let index = tokio::select! {
                        _ = token.cancelled() => break,
                        index = async { rx.lock().await.recv().await } => match index {
                            Some(index) => index,
                            None => break,
                        },
                    };

                    let Some((migrator, direction)) = migrations.get(index) else {
                        continue;
                    };

                    tokio::select! {
                        _ = token.cancelled() => break,
                        res = migrator.step(*direction) => {
                            if let Err(e) = res {
                                error!(worker, migration = migrator.id(), %direction, "{e}");
                            }
                        }
                    }
                }
            }));
        }

        info!(
            migrations = migrations.len(),
            workers = self.config.workers.max(1),
            "migrations started"
        );

        handle
    }
}
