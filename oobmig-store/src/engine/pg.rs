use async_trait::async_trait;
use oobmig_batch::{bind_values, decode_row, Inserter, PlaceholderCache, Row, Value};
use sqlx::{PgPool, Postgres, Row as _, Transaction};

use crate::{
    engine::{Engine, Session},
    error::{Result, StoreError},
    store::Store,
    table::{check_identifier, AuxTable, Bounds, Counts, Direction, TableSpec},
};

#[derive(Debug, Clone)]
pub struct Pg {
    pool: PgPool,
}

impl Pg {
    pub fn new(pool: &PgPool) -> Store {
        Store::new(Self { pool: pool.clone() })
    }
}

#[async_trait]
impl Engine for Pg {
    async fn begin(&self) -> Result<Box<dyn Session>> {
        let tx = self.pool.begin().await?;

        Ok(Box::new(PgSession { tx }))
    }

    async fn counts(
        &self,
        spec: &TableSpec,
        direction: Direction,
        target_version: i32,
    ) -> Result<Counts> {
        let bookkeeping = spec.bookkeeping_table();
        let done = match direction {
            Direction::Up => "min_schema_version >= $1",
            Direction::Down => "max_schema_version <= $1 - 1",
        };

        let row = sqlx::query(&format!(
            "SELECT COUNT(*) FILTER (WHERE {done}) AS done, COUNT(*) AS total FROM {bookkeeping}"
        ))
        .bind(target_version)
        .fetch_one(&self.pool)
        .await?;

        Ok(Counts {
            done: row.try_get("done")?,
            total: row.try_get("total")?,
        })
    }

    async fn bounds(&self, spec: &TableSpec) -> Result<Vec<(i64, Bounds)>> {
        let partition = &spec.partition_column;
        let bookkeeping = spec.bookkeeping_table();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {partition}::bigint AS partition_id,
                min_schema_version::integer AS min_schema_version,
                max_schema_version::integer AS max_schema_version
            FROM {bookkeeping}
            ORDER BY {partition}
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(i64, Bounds)> {
                Ok((
                    row.try_get("partition_id")?,
                    Bounds::new(
                        row.try_get("min_schema_version")?,
                        row.try_get("max_schema_version")?,
                    ),
                ))
            })
            .collect()
    }
}

pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

fn joined<'a>(columns: impl IntoIterator<Item = &'a str>) -> String {
    columns.into_iter().collect::<Vec<_>>().join(", ")
}

#[async_trait]
impl Session for PgSession {
    async fn select_partition(
        &mut self,
        spec: &TableSpec,
        direction: Direction,
        target_version: i32,
        exclude: &[i64],
    ) -> Result<Option<i64>> {
        let partition = &spec.partition_column;
        let bookkeeping = spec.bookkeeping_table();
        let eligible = match direction {
            Direction::Up => "min_schema_version < $1",
            Direction::Down => "max_schema_version > $1 - 1",
        };

        let row = sqlx::query(&format!(
            r#"
            SELECT {partition}::bigint AS partition_id FROM {bookkeeping}
            WHERE {eligible} AND NOT ({partition} = ANY($2))
            ORDER BY {partition}
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(target_version)
        .bind(exclude)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("partition_id")?),
            None => None,
        })
    }

    async fn read_batch(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
        direction: Direction,
        target_version: i32,
        after: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<Row>> {
        let table = &spec.table;
        let partition = &spec.partition_column;
        let version = spec.version_column();
        let columns = joined(spec.read_fields().into_iter().map(|f| f.name.as_str()));
        let keys = joined(spec.primary_keys().map(|f| f.name.as_str()));
        let pending = match direction {
            Direction::Up => "<",
            Direction::Down => ">=",
        };

        let after = after.unwrap_or_default();
        let resume = match after.len() {
            0 => String::new(),
            len if len != spec.primary_keys().count() => {
                return Err(StoreError::Arity {
                    expected: spec.primary_keys().count(),
                    got: len,
                });
            }
            _ => {
                let placeholders = spec
                    .primary_keys()
                    .enumerate()
                    .map(|(i, f)| format!("${}::{}", i + 4, f.sql_type))
                    .collect::<Vec<_>>()
                    .join(", ");

                format!("AND ({keys}) > ({placeholders})")
            }
        };

        let sql = format!(
            r#"
            SELECT {columns} FROM {table}
            WHERE {partition} = $1 AND {version} {pending} $2 {resume}
            ORDER BY {keys}
            LIMIT $3
            "#
        );

        let query = sqlx::query(&sql)
            .bind(partition_id)
            .bind(target_version)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = bind_values(query, after).fetch_all(&mut *self.tx).await?;

        Ok(rows.iter().map(decode_row).collect::<oobmig_batch::Result<Vec<Row>>>()?)
    }

    async fn write_batch(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
        rows: Vec<Row>,
        version: i32,
        cache: &PlaceholderCache,
        max_parameters: usize,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let fields = spec.write_fields();
        let temp = spec.temp_table();

        let definitions = fields
            .iter()
            .map(|f| format!("{} {}", f.name, f.sql_type))
            .collect::<Vec<_>>()
            .join(", ");

        sqlx::query(&format!(
            "CREATE TEMPORARY TABLE {temp} ({definitions}) ON COMMIT DROP"
        ))
        .execute(&mut *self.tx)
        .await?;

        let mut inserter = Inserter::builder(&temp, fields.iter().map(|f| f.name.as_str()))
            .casts(fields.iter().map(|f| Some(f.sql_type.as_str())))
            .max_parameters(max_parameters)
            .build(cache)?;

        for row in rows {
            inserter.insert(&mut *self.tx, row).await?;
        }
        inserter.flush(&mut *self.tx).await?;

        let table = &spec.table;
        let partition = &spec.partition_column;
        let version_column = spec.version_column();
        let targets = spec.update_targets().map(|f| f.name.as_str()).collect::<Vec<_>>();

        let assignments = targets
            .iter()
            .map(|c| format!("{c} = t.{c}"))
            .chain([format!("{version_column} = $1")])
            .collect::<Vec<_>>()
            .join(", ");
        let join = spec
            .primary_keys()
            .map(|f| format!("u.{0} = t.{0}", f.name))
            .collect::<Vec<_>>()
            .join(" AND ");
        let current = targets
            .iter()
            .map(|c| format!("u.{c}"))
            .chain([format!("u.{version_column}")])
            .collect::<Vec<_>>()
            .join(", ");
        let next = targets
            .iter()
            .map(|c| format!("t.{c}"))
            .chain(["$1::integer".to_owned()])
            .collect::<Vec<_>>()
            .join(", ");

        let result = sqlx::query(&format!(
            r#"
            UPDATE {table} u
            SET {assignments}
            FROM {temp} t
            WHERE u.{partition} = $2 AND {join}
                AND ({current}) IS DISTINCT FROM ({next})
            "#
        ))
        .bind(version)
        .bind(partition_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn refresh_bounds(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
    ) -> Result<Option<Bounds>> {
        let table = &spec.table;
        let partition = &spec.partition_column;
        let version = spec.version_column();

        let row = sqlx::query(&format!(
            r#"
            SELECT MIN({version})::integer AS min_schema_version,
                MAX({version})::integer AS max_schema_version,
                COUNT(*) AS total
            FROM {table}
            WHERE {partition} = $1
            "#
        ))
        .bind(partition_id)
        .fetch_one(&mut *self.tx)
        .await?;

        let total: i64 = row.try_get("total")?;
        let bounds = match total {
            0 => None,
            _ => Some(Bounds::new(
                row.try_get("min_schema_version")?,
                row.try_get("max_schema_version")?,
            )),
        };

        self.write_bounds(spec, partition_id, bounds).await?;

        Ok(bounds)
    }

    async fn write_bounds(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
        bounds: Option<Bounds>,
    ) -> Result<()> {
        let partition = &spec.partition_column;
        let bookkeeping = spec.bookkeeping_table();

        let Some(bounds) = bounds else {
            sqlx::query(&format!("DELETE FROM {bookkeeping} WHERE {partition} = $1"))
                .bind(partition_id)
                .execute(&mut *self.tx)
                .await?;

            return Ok(());
        };

        sqlx::query(&format!(
            r#"
            INSERT INTO {bookkeeping} ({partition}, min_schema_version, max_schema_version)
            VALUES ($1, $2, $3)
            ON CONFLICT ({partition}) DO UPDATE SET
                min_schema_version = EXCLUDED.min_schema_version,
                max_schema_version = EXCLUDED.max_schema_version
            "#
        ))
        .bind(partition_id)
        .bind(bounds.min_schema_version)
        .bind(bounds.max_schema_version)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn read_aux(&mut self, table: &AuxTable, partition_id: i64) -> Result<Vec<Row>> {
        table.validate()?;

        let name = &table.table;
        let partition = &table.partition_column;
        let columns = joined(table.columns.iter().map(String::as_str));
        let order = (1..=table.columns.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let rows = sqlx::query(&format!(
            "SELECT {columns} FROM {name} WHERE {partition} = $1 ORDER BY {order}"
        ))
        .bind(partition_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.iter().map(decode_row).collect::<oobmig_batch::Result<Vec<Row>>>()?)
    }

    async fn read_aux_where(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        column: &str,
        values: &[i64],
    ) -> Result<Vec<Row>> {
        table.validate()?;
        check_identifier(column)?;

        let name = &table.table;
        let partition = &table.partition_column;
        let columns = joined(table.columns.iter().map(String::as_str));
        let order = (1..=table.columns.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let rows = sqlx::query(&format!(
            r#"
            SELECT {columns} FROM {name}
            WHERE {partition} = $1 AND {column} = ANY($2)
            ORDER BY {order}
            "#
        ))
        .bind(partition_id)
        .bind(values)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.iter().map(decode_row).collect::<oobmig_batch::Result<Vec<Row>>>()?)
    }

    async fn max_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        column: &str,
    ) -> Result<Option<i64>> {
        table.validate()?;
        check_identifier(column)?;

        let name = &table.table;
        let partition = &table.partition_column;

        let row = sqlx::query(&format!(
            "SELECT MAX({column})::bigint AS max FROM {name} WHERE {partition} = $1"
        ))
        .bind(partition_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.try_get("max")?)
    }

    async fn insert_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        rows: Vec<Row>,
        cache: &PlaceholderCache,
        max_parameters: usize,
    ) -> Result<u64> {
        table.validate()?;

        let mut inserter = Inserter::builder(
            &table.table,
            std::iter::once(table.partition_column.as_str())
                .chain(table.columns.iter().map(String::as_str)),
        )
        .casts(std::iter::once(Some("bigint")).chain(table.casts.iter().map(|c| c.as_deref())))
        .max_parameters(max_parameters)
        .build(cache)?;

        for row in rows {
            if row.len() != table.columns.len() {
                return Err(StoreError::Arity {
                    expected: table.columns.len(),
                    got: row.len(),
                });
            }

            let row = std::iter::once(Value::Int(partition_id)).chain(row).collect();
            inserter.insert(&mut *self.tx, row).await?;
        }
        inserter.flush(&mut *self.tx).await?;

        Ok(inserter.flushed_rows())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;

        Ok(())
    }
}
