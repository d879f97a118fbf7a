use oobmig_batch::BatchError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("`{0}` is not a valid identifier")]
    Identifier(String),

    #[error("table `{0}` declares no primary key")]
    NoPrimaryKey(String),

    #[error("table `{0}` declares no column to update")]
    NoUpdateTarget(String),

    #[error("column `{0}` is declared more than once")]
    DuplicateColumn(String),

    #[error("row has {got} values, expected {expected}")]
    Arity { expected: usize, got: usize },

    #[error("column `{column}` of `{table}` does not hold an integer")]
    NotAnInteger { table: String, column: String },

    #[error("batch `{0}`")]
    Batch(#[from] BatchError),

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
