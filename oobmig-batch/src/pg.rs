use async_trait::async_trait;
use sqlx::{
    postgres::{PgArguments, PgRow},
    query::Query,
    Column, PgConnection, Postgres, Row as _, TypeInfo,
};

use crate::{
    error::{BatchError, Result},
    inserter::{Execute, Statement},
    value::{Row, Value},
};

#[async_trait]
impl Execute for PgConnection {
    async fn execute(&mut self, statement: Statement) -> Result<Vec<Row>> {
        let query = bind_values(sqlx::query(&statement.sql), &statement.params);

        if !statement.returning {
            query.execute(&mut *self).await?;
            return Ok(Vec::new());
        }

        query
            .fetch_all(&mut *self)
            .await?
            .iter()
            .map(decode_row)
            .collect()
    }
}

/// Binds each value in order. `Null` is sent as an untyped text null, so
/// callers writing non-text columns should cast their placeholders.
pub fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Bytes(v) => query.bind(v.as_slice()),
        };
    }

    query
}

/// Decodes every column of a row into a [`Value`], by column type.
pub fn decode_row(row: &PgRow) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| {
            let i = column.ordinal();
            let value = match column.type_info().name() {
                "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(Value::Bool),
                "INT2" => row
                    .try_get::<Option<i16>, _>(i)?
                    .map(|v| Value::Int(i64::from(v))),
                "INT4" => row
                    .try_get::<Option<i32>, _>(i)?
                    .map(|v| Value::Int(i64::from(v))),
                "INT8" => row.try_get::<Option<i64>, _>(i)?.map(Value::Int),
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                    row.try_get::<Option<String>, _>(i)?.map(Value::Text)
                }
                "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(i)?.map(Value::Bytes),
                other => return Err(BatchError::UnsupportedType(other.to_owned())),
            };

            Ok(value.unwrap_or(Value::Null))
        })
        .collect()
}
