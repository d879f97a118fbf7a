use async_trait::async_trait;
use tracing::debug;

use crate::{
    error::{BatchError, Result},
    placeholder::PlaceholderCache,
    value::{Row, Value},
    MAX_POSTGRES_PARAMETERS,
};

/// One fully rendered statement and its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Whether the statement has a `RETURNING` clause whose rows must be read back.
    pub returning: bool,
}

/// Something that can run a [`Statement`] and hand back its returned rows.
///
/// Implementations return an empty vector when `returning` is false.
#[async_trait]
pub trait Execute: Send {
    async fn execute(&mut self, statement: Statement) -> Result<Vec<Row>>;
}

type ReturnedRowHandler<'a> = Box<dyn FnMut(Row) -> anyhow::Result<()> + Send + 'a>;

/// Configures an [`Inserter`].
pub struct InserterBuilder<'a> {
    table: String,
    columns: Vec<String>,
    casts: Option<Vec<Option<String>>>,
    max_parameters: usize,
    on_conflict: Option<String>,
    returning: Vec<String>,
    on_returned: Option<ReturnedRowHandler<'a>>,
}

impl<'a> InserterBuilder<'a> {
    pub fn new<C: Into<String>>(
        table: impl Into<String>,
        columns: impl IntoIterator<Item = C>,
    ) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            casts: None,
            max_parameters: MAX_POSTGRES_PARAMETERS,
            on_conflict: None,
            returning: Vec::new(),
            on_returned: None,
        }
    }

    pub fn max_parameters(mut self, max_parameters: usize) -> Self {
        self.max_parameters = max_parameters;
        self
    }

    /// Explicit casts per column (`None` leaves a placeholder untyped).
    pub fn casts<C: Into<String>>(mut self, casts: impl IntoIterator<Item = Option<C>>) -> Self {
        self.casts = Some(casts.into_iter().map(|c| c.map(Into::into)).collect());
        self
    }

    /// Appended verbatim after `ON CONFLICT`, e.g. `DO NOTHING`.
    pub fn on_conflict(mut self, clause: impl Into<String>) -> Self {
        self.on_conflict = Some(clause.into());
        self
    }

    /// Adds a `RETURNING` clause; `handler` sees every returned row once, in result order.
    pub fn returning<C, F>(mut self, columns: impl IntoIterator<Item = C>, handler: F) -> Self
    where
        C: Into<String>,
        F: FnMut(Row) -> anyhow::Result<()> + Send + 'a,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self.on_returned = Some(Box::new(handler));
        self
    }

    pub fn build(self, cache: &'a PlaceholderCache) -> Result<Inserter<'a>> {
        if self.columns.is_empty() {
            return Err(BatchError::NoColumns(self.table));
        }

        if self.columns.len() > self.max_parameters {
            return Err(BatchError::TooManyColumns {
                columns: self.columns.len(),
                max_parameters: self.max_parameters,
            });
        }

        let casts = match self.casts {
            Some(casts) if casts.len() != self.columns.len() => {
                return Err(BatchError::Casts {
                    expected: self.columns.len(),
                    got: casts.len(),
                });
            }
            Some(casts) => casts,
            None => vec![None; self.columns.len()],
        };

        let prefix = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.table,
            self.columns.join(", ")
        );

        let mut suffix = String::new();
        if let Some(clause) = &self.on_conflict {
            suffix.push_str(" ON CONFLICT ");
            suffix.push_str(clause);
        }
        if !self.returning.is_empty() {
            suffix.push_str(" RETURNING ");
            suffix.push_str(&self.returning.join(", "));
        }

        Ok(Inserter {
            max_rows: self.max_parameters / self.columns.len(),
            table: self.table,
            columns: self.columns,
            casts,
            prefix,
            suffix,
            returning: !self.returning.is_empty(),
            on_returned: self.on_returned,
            cache,
            values: Vec::new(),
            sizes: Vec::new(),
            flushed_rows: 0,
            statements: 0,
        })
    }
}

/// Buffers rows and writes them as multi-row `INSERT` statements.
///
/// Every statement carries at most `max_parameters / columns` rows. There is
/// no implicit transaction: wrap calls in one when several inserters must
/// commit together. A failed flush drops the rows it was sending.
pub struct Inserter<'a> {
    table: String,
    columns: Vec<String>,
    casts: Vec<Option<String>>,
    prefix: String,
    suffix: String,
    returning: bool,
    on_returned: Option<ReturnedRowHandler<'a>>,
    cache: &'a PlaceholderCache,
    max_rows: usize,
    values: Vec<Value>,
    sizes: Vec<usize>,
    flushed_rows: u64,
    statements: u64,
}

impl<'a> Inserter<'a> {
    pub fn builder<C: Into<String>>(
        table: impl Into<String>,
        columns: impl IntoIterator<Item = C>,
    ) -> InserterBuilder<'a> {
        InserterBuilder::new(table, columns)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows per full statement.
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn buffered_rows(&self) -> usize {
        self.values.len() / self.columns.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.sizes.iter().sum()
    }

    pub fn flushed_rows(&self) -> u64 {
        self.flushed_rows
    }

    pub fn statements(&self) -> u64 {
        self.statements
    }

    /// Buffers one row, flushing first when the row would not fit.
    pub async fn insert<E>(&mut self, executor: &mut E, row: Row) -> Result<()>
    where
        E: Execute + ?Sized,
    {
        if row.len() != self.columns.len() {
            return Err(BatchError::Arity {
                expected: self.columns.len(),
                got: row.len(),
            });
        }

        if self.values.len() + row.len() > self.max_rows * self.columns.len() {
            self.flush(executor).await?;
        }

        for value in row {
            self.sizes.push(value.encoded_len());
            self.values.push(value);
        }

        self.check_buffers();

        Ok(())
    }

    /// Writes every buffered row in a single statement.
    pub async fn flush<E>(&mut self, executor: &mut E) -> Result<()>
    where
        E: Execute + ?Sized,
    {
        self.check_buffers();

        if self.values.is_empty() {
            return Ok(());
        }

        let rows = self.buffered_rows();
        let bytes: usize = self.sizes.drain(..).sum();
        let params = std::mem::take(&mut self.values);

        let placeholders = self.cache.placeholders(&self.casts, rows);
        let statement = Statement {
            sql: format!("{}{}{}", self.prefix, placeholders, self.suffix),
            params,
            returning: self.returning,
        };

        debug!(table = %self.table, rows, bytes, "flushing batch");

        let returned = executor.execute(statement).await?;

        self.flushed_rows += rows as u64;
        self.statements += 1;

        if let Some(handler) = self.on_returned.as_mut() {
            for row in returned {
                handler(row)?;
            }
        }

        Ok(())
    }

    fn check_buffers(&self) {
        debug_assert_eq!(
            self.values.len(),
            self.sizes.len(),
            "value and size buffers diverged for {}",
            self.table
        );
        debug_assert_eq!(self.values.len() % self.columns.len(), 0);
    }
}
