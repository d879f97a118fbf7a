use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use oobmig_batch::{Row, Value};
use oobmig_store::{AuxTable, FieldSpec};
use oobmig_symbols::{NameTable, SegmentQuality, SegmentType, SymbolNode, SymbolTrie};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, warn};

use crate::driver::{Driver, DriverContext};

/// Moves symbol names of a partition from the legacy flat name table into a
/// shared symbol trie and points every symbol row at its suffix leaves.
///
/// Names are rebuilt from `codeintel_scip_symbol_names`, loading only the
/// batch's names and their ancestors. The partition's trie lives in
/// `codeintel_scip_symbols_lookup`; its highest id is the partition's id
/// counter, and only nodes created by this batch are inserted. The last trie
/// built is kept in memory and reused while the stored highest id still
/// matches it. Symbols whose name is missing, whose name chain is broken or
/// whose name does not parse are skipped.
///
/// The legacy rows are not rebuilt from the trie, so this driver cannot be
/// migrated down.
#[derive(Debug, Clone, Default)]
pub struct SymbolsDriver {
    prefix: String,
    trie: Arc<Mutex<Option<(i64, SymbolTrie)>>>,
}

impl SymbolsDriver {
    pub const TABLE: &'static str = "codeintel_scip_symbols";
    pub const PARTITION_COLUMN: &'static str = "upload_id";

    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `{prefix}_codeintel_scip_symbol_names` and
    /// `{prefix}_codeintel_scip_symbols_lookup`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: format!("{}_", prefix.into()),
            ..Self::default()
        }
    }

    /// `(id, name_segment, prefix_id)`.
    pub fn names_table(&self) -> AuxTable {
        AuxTable::new(
            format!("{}codeintel_scip_symbol_names", self.prefix),
            Self::PARTITION_COLUMN,
            ["id", "name_segment", "prefix_id"],
        )
        .casts([Some("integer"), Some("text"), Some("integer")])
    }

    /// `(id, segment_type, segment_quality, name, parent_id)`.
    pub fn lookup_table(&self) -> AuxTable {
        AuxTable::new(
            format!("{}codeintel_scip_symbols_lookup", self.prefix),
            Self::PARTITION_COLUMN,
            ["id", "segment_type", "segment_quality", "name", "parent_id"],
        )
        .casts([
            Some("integer"),
            Some("text"),
            Some("text"),
            Some("text"),
            Some("integer"),
        ])
    }

    /// Loads the name rows of `ids` and of every ancestor, one level per read.
    async fn load_names(
        &self,
        ctx: &mut DriverContext<'_>,
        partition_id: i64,
        ids: impl IntoIterator<Item = i64>,
    ) -> anyhow::Result<NameTable> {
        let table = self.names_table();
        let mut seen = HashSet::new();
        let mut pending = ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect::<Vec<_>>();
        let mut entries = Vec::new();

        while !pending.is_empty() {
            let rows = ctx
                .read_aux_where(&table, partition_id, "id", &pending)
                .await?;
            pending.clear();

            for row in rows {
                let entry = decode_name(row)?;

                if let Some(parent_id) = entry.2.filter(|id| seen.insert(*id)) {
                    pending.push(parent_id);
                }

                entries.push(entry);
            }
        }

        Ok(NameTable::new(entries)?)
    }

    /// The partition's stored trie, reusing the cached one when it is current.
    async fn load_trie(
        &self,
        ctx: &mut DriverContext<'_>,
        partition_id: i64,
    ) -> anyhow::Result<SymbolTrie> {
        let table = self.lookup_table();
        let stored = ctx.max_aux(&table, partition_id, "id").await?;

        let cached = self.trie.lock().take();
        if let Some((cached_partition, trie)) = cached {
            if cached_partition == partition_id && trie.max_id() == stored {
                return Ok(trie);
            }
        }

        debug!(partition_id, "loading symbol trie");

        let nodes = ctx
            .read_aux(&table, partition_id)
            .await?
            .into_iter()
            .map(decode_node)
            .collect::<anyhow::Result<Vec<_>>>()?;

        SymbolTrie::from_nodes(nodes, 1)
            .with_context(|| format!("stored trie of partition {partition_id} is corrupt"))
    }
}

fn decode_name(row: Row) -> anyhow::Result<(i64, String, Option<i64>)> {
    let [id, segment, prefix_id] = <[Value; 3]>::try_from(row)
        .map_err(|row| anyhow!("name row has {} columns, expected 3", row.len()))?;

    Ok((
        int(&id, "id")?,
        text(segment, "name_segment")?,
        opt_int(&prefix_id, "prefix_id")?,
    ))
}

fn int(value: &Value, column: &str) -> anyhow::Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| anyhow!("`{column}` is not an integer: {value:?}"))
}

fn opt_int(value: &Value, column: &str) -> anyhow::Result<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        value => int(value, column).map(Some),
    }
}

fn text(value: Value, column: &str) -> anyhow::Result<String> {
    match value {
        Value::Text(text) => Ok(text),
        value => bail!("`{column}` is not text: {value:?}"),
    }
}

fn decode_node(row: Row) -> anyhow::Result<SymbolNode> {
    let [id, segment_type, quality, name, parent_id] = <[Value; 5]>::try_from(row)
        .map_err(|row| anyhow!("lookup row has {} columns, expected 5", row.len()))?;

    let quality = match quality {
        Value::Null => None,
        quality => Some(text(quality, "segment_quality")?.parse::<SegmentQuality>()?),
    };

    Ok(SymbolNode {
        segment_type: text(segment_type, "segment_type")?.parse::<SegmentType>()?,
        quality,
        text: text(name, "name")?,
        id: int(&id, "id")?,
        parent_id: opt_int(&parent_id, "parent_id")?,
    })
}

fn encode_node(node: SymbolNode) -> Row {
    vec![
        Value::Int(node.id),
        Value::from(node.segment_type.as_str()),
        Value::from(node.quality.map(|q| q.as_str())),
        Value::Text(node.text),
        Value::from(node.parent_id),
    ]
}

#[async_trait]
impl Driver for SymbolsDriver {
    fn fields(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::primary_key("symbol_id", "integer"),
            FieldSpec::primary_key("document_lookup_id", "bigint"),
            FieldSpec::update_only("descriptor_suffix_id", "integer"),
            FieldSpec::update_only("fuzzy_descriptor_suffix_id", "integer"),
        ]
    }

    fn reversible(&self) -> bool {
        false
    }

    async fn migrate_up(
        &self,
        ctx: &mut DriverContext<'_>,
        partition_id: i64,
        rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>> {
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let [symbol_id, document_lookup_id] = <[Value; 2]>::try_from(row)
                .map_err(|row| anyhow!("expected 2 columns, got {}", row.len()))?;
            keys.push((int(&symbol_id, "symbol_id")?, document_lookup_id));
        }

        let names = self
            .load_names(ctx, partition_id, keys.iter().map(|(id, _)| *id))
            .await?;

        let mut resolved = Vec::with_capacity(keys.len());
        for (symbol_id, name) in names.resolve_each(keys.iter().map(|(id, _)| *id)) {
            match name {
                Ok(name) => resolved.push((symbol_id, name)),
                Err(err) => warn!(partition_id, symbol_id, "cannot rebuild symbol name: {err}"),
            }
        }

        let mut trie = self.load_trie(ctx, partition_id).await?;
        let start_id = trie.next_id();
        trie.extend(resolved.iter().map(|(_, name)| name));

        let created = trie.nodes_since(start_id).map(encode_node).collect::<Vec<_>>();
        if !created.is_empty() {
            ctx.insert_aux(&self.lookup_table(), partition_id, created)
                .await?;
        }

        let ids = resolved
            .into_iter()
            .filter_map(|(symbol_id, name)| trie.get(&name).map(|ids| (symbol_id, ids)))
            .collect::<HashMap<_, _>>();

        *self.trie.lock() = Some((partition_id, trie));

        let mut out = Vec::with_capacity(keys.len());
        for (symbol_id, document_lookup_id) in keys {
            let Some(ids) = ids.get(&symbol_id) else {
                ctx.skip(1);
                continue;
            };

            out.push(vec![
                Value::Int(symbol_id),
                document_lookup_id,
                Value::Int(ids.descriptor_suffix_id),
                Value::Int(ids.fuzzy_descriptor_suffix_id),
            ]);
        }

        Ok(out)
    }

    async fn migrate_down(
        &self,
        _ctx: &mut DriverContext<'_>,
        _partition_id: i64,
        _rows: Vec<Row>,
    ) -> anyhow::Result<Vec<Row>> {
        bail!("symbol names cannot be restored from the symbol trie")
    }
}
