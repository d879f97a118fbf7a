use async_trait::async_trait;
use oobmig_batch::{Row, Value};
use oobmig_store::FieldSpec;
use serde::de::IgnoredAny;

use crate::driver::{Driver, DriverContext};

/// Fills `num_locations` of definition rows with the length of their
/// location payload.
///
/// `data` holds a JSON array with one element per location. Migrating down
/// cannot restore an earlier count, so it resets `num_locations` to `0`.
/// Rows whose payload is not a JSON array are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationCountDriver;

impl LocationCountDriver {
    pub const TABLE: &'static str = "lsif_data_definitions";

    pub fn new() -> Self {
        Self
    }
}

fn count_locations(data: &Value) -> Option<i64> {
    let data = std::str::from_utf8(data.as_bytes()?).ok()?;
    let locations = serde_json::from_str::<Vec<IgnoredAny>>(data).ok()?;

    i64::try_from(locations.len()).ok()
}

#[async_trait]
impl Driver for LocationCountDriver {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::primary_key("scheme", "text"),
            FieldSpec::primary_key("identifier", "text"),
            FieldSpec::read_only("data", "text"),
            FieldSpec::update_only("num_locations", "integer"),
        ]
    }

    async fn migrate_up(
        &self,
        ctx: &mut DriverContext<'_>,
        _partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>> {
        let mut out = Vec::with_capacity(rows.len());

        for row in rows {
            let [scheme, identifier, data] = <[Value; 3]>::try_from(row)
                .map_err(|row| anyhow::anyhow!("expected 3 columns, got {}", row.len()))?;

            match count_locations(&data) {
                Some(count) => out.push(vec![scheme, identifier, Value::Int(count)]),
                None => ctx.skip(1),
            }
        }

        Ok(out)
    }

    async fn migrate_down(
        &self,
        _ctx: &mut DriverContext<'_>,
        _partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>> {
        rows.into_iter()
            .map(|row| -> anyhow::Result<Row> {
                let [scheme, identifier, _] = <[Value; 3]>::try_from(row)
                    .map_err(|row| anyhow::anyhow!("expected 3 columns, got {}", row.len()))?;

                Ok(vec![scheme, identifier, Value::Int(0)])
            })
            .collect()
    }
}
