use oobmig_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum MigratorError {
    /// Any failure once a partition is locked, tagged with that partition.
    #[error("partition {partition_id}: {source}")]
    Partition {
        partition_id: i64,
        source: Box<MigratorError>,
    },

    #[error("driver returned a row with {got} values, expected {expected}")]
    Arity { expected: usize, got: usize },

    #[error("migration {0} cannot be migrated down")]
    Irreversible(i32),

    #[error("invalid field spec: {0}")]
    FieldSpec(#[source] StoreError),

    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    #[error("migration {0} is already registered")]
    DuplicateMigration(i32),

    #[error("driver: {0:#}")]
    Driver(anyhow::Error),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl MigratorError {
    pub(crate) fn in_partition(self, partition_id: i64) -> Self {
        MigratorError::Partition {
            partition_id,
            source: Box::new(self),
        }
    }

    /// The partition the error was raised for, if any.
    pub fn partition_id(&self) -> Option<i64> {
        match self {
            MigratorError::Partition { partition_id, .. } => Some(*partition_id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigratorError>;
