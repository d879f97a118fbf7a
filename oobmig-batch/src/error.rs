/// Errors raised while buffering or flushing a batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// A row did not carry one value per target column.
    #[error("row has {got} values, expected {expected}")]
    Arity { expected: usize, got: usize },

    #[error("inserter for `{0}` needs at least one column")]
    NoColumns(String),

    /// One row would not fit under the configured parameter ceiling.
    #[error("{columns} columns exceed the limit of {max_parameters} parameters per statement")]
    TooManyColumns {
        columns: usize,
        max_parameters: usize,
    },

    #[error("expected {expected} casts, got {got}")]
    Casts { expected: usize, got: usize },

    #[error("unsupported column type `{0}`")]
    UnsupportedType(String),

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("{0}")]
    Callback(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;
