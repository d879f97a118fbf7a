use async_trait::async_trait;
use oobmig_batch::{PlaceholderCache, Row, Value};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use crate::{
    engine::{Engine, Session},
    error::{Result, StoreError},
    store::Store,
    table::{check_identifier, AuxTable, Bounds, Counts, Direction, TableSpec, VERSION_COLUMN},
};

type Record = BTreeMap<String, Value>;
type PartitionKey = (String, String, i64);

#[derive(Debug, Default)]
struct MemoryState {
    /// Rows of every table, keyed by a row id that never changes.
    tables: HashMap<String, BTreeMap<u64, Record>>,
    next_row: u64,
    bounds: HashMap<String, BTreeMap<i64, Bounds>>,
    locks: HashSet<(String, i64)>,
}

/// A row as one session sees it.
#[derive(Debug, Clone)]
struct Staged {
    /// `None` for rows the session inserted.
    id: Option<u64>,
    record: Record,
    dirty: bool,
}

/// In-process engine for tests and embedding.
///
/// A session copies every partition it touches. On commit only the rows it
/// changed or inserted are written back, so rows committed by other sessions
/// in the meantime survive. Partition locks stand in for
/// `FOR UPDATE SKIP LOCKED` and are held until the session ends.
#[derive(Debug, Clone, Default)]
pub struct Memory(Arc<RwLock<MemoryState>>);

impl Memory {
    pub fn new() -> Store {
        Store::new(Self::default())
    }
}

#[async_trait]
impl Engine for Memory {
    async fn begin(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(MemorySession {
            state: self.0.clone(),
            working: HashMap::new(),
            bounds: HashMap::new(),
            locks: Vec::new(),
        }))
    }

    async fn counts(
        &self,
        spec: &TableSpec,
        direction: Direction,
        target_version: i32,
    ) -> Result<Counts> {
        let state = self.0.read();
        let Some(rows) = state.bounds.get(&spec.bookkeeping_table()) else {
            return Ok(Counts::default());
        };

        let done = rows
            .values()
            .filter(|b| b.is_done(direction, target_version))
            .count();

        Ok(Counts {
            done: done as i64,
            total: rows.len() as i64,
        })
    }

    async fn bounds(&self, spec: &TableSpec) -> Result<Vec<(i64, Bounds)>> {
        Ok(self
            .0
            .read()
            .bounds
            .get(&spec.bookkeeping_table())
            .map(|rows| rows.iter().map(|(id, b)| (*id, *b)).collect())
            .unwrap_or_default())
    }
}

pub struct MemorySession {
    state: Arc<RwLock<MemoryState>>,
    working: HashMap<PartitionKey, Vec<Staged>>,
    bounds: HashMap<(String, i64), Option<Bounds>>,
    locks: Vec<(String, i64)>,
}

impl MemorySession {
    fn working(&mut self, table: &str, column: &str, partition_id: i64) -> &mut Vec<Staged> {
        let state = &self.state;

        self.working
            .entry((table.to_owned(), column.to_owned(), partition_id))
            .or_insert_with(|| {
                state
                    .read()
                    .tables
                    .get(table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|(_, r)| r.get(column) == Some(&Value::Int(partition_id)))
                            .map(|(id, r)| Staged {
                                id: Some(*id),
                                record: r.clone(),
                                dirty: false,
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            })
    }
}

fn version_of(record: &Record, table: &str) -> Result<i32> {
    record
        .get(VERSION_COLUMN)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| StoreError::NotAnInteger {
            table: table.to_owned(),
            column: VERSION_COLUMN.to_owned(),
        })
}

fn project(record: &Record, columns: &[&str]) -> Row {
    columns
        .iter()
        .map(|c| record.get(*c).cloned().unwrap_or_default())
        .collect()
}

#[async_trait]
impl Session for MemorySession {
    async fn select_partition(
        &mut self,
        spec: &TableSpec,
        direction: Direction,
        target_version: i32,
        exclude: &[i64],
    ) -> Result<Option<i64>> {
        let bookkeeping = spec.bookkeeping_table();
        let mut state = self.state.write();

        let candidate = state.bounds.get(&bookkeeping).and_then(|rows| {
            rows.iter()
                .find(|(id, b)| {
                    b.is_eligible(direction, target_version)
                        && !exclude.contains(id)
                        && !state.locks.contains(&(bookkeeping.clone(), **id))
                })
                .map(|(id, _)| *id)
        });

        if let Some(id) = candidate {
            state.locks.insert((bookkeeping.clone(), id));
            self.locks.push((bookkeeping, id));
        }

        Ok(candidate)
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
        let keys = spec.primary_keys().map(|f| f.name.as_str()).collect::<Vec<_>>();

        if let Some(after) = after.filter(|after| after.len() != keys.len()) {
            return Err(StoreError::Arity {
                expected: keys.len(),
                got: after.len(),
            });
        }

        let columns = spec
            .read_fields()
            .into_iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>();

        let records = self.working(&spec.table, &spec.partition_column, partition_id);

        let mut pending = Vec::new();
        for Staged { record, .. } in records.iter() {
            let version = version_of(record, &spec.table)?;
            let matches = match direction {
                Direction::Up => version < target_version,
                Direction::Down => version >= target_version,
            };

            if !matches {
                continue;
            }

            let key = project(record, &keys);
            if after.map_or(true, |after| key.as_slice() > after) {
                pending.push((key, record));
            }
        }

        pending.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(_, record)| project(record, &columns))
            .collect())
    }

    async fn write_batch(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
        rows: Vec<Row>,
        version: i32,
        _cache: &PlaceholderCache,
        _max_parameters: usize,
    ) -> Result<u64> {
        let columns = spec
            .write_fields()
            .into_iter()
            .map(|f| f.name.to_owned())
            .collect::<Vec<_>>();
        let keys = spec.primary_keys().count();

        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(StoreError::Arity {
                expected: columns.len(),
                got: row.len(),
            });
        }

        let stamp = Value::Int(i64::from(version));
        let records = self.working(&spec.table, &spec.partition_column, partition_id);
        let mut changed = 0;

        for row in rows {
            let (key, values) = row.split_at(keys);

            let Some(staged) = records.iter_mut().find(|s| {
                columns[..keys]
                    .iter()
                    .zip(key)
                    .all(|(c, v)| !v.is_null() && s.record.get(c) == Some(v))
            }) else {
                continue;
            };
            let record = &mut staged.record;

            let unchanged = record.get(VERSION_COLUMN) == Some(&stamp)
                && columns[keys..]
                    .iter()
                    .zip(values)
                    .all(|(c, v)| record.get(c).unwrap_or(&Value::Null) == v);

            if unchanged {
                continue;
            }

            for (column, value) in columns[keys..].iter().zip(values) {
                record.insert(column.to_owned(), value.clone());
            }
            record.insert(VERSION_COLUMN.to_owned(), stamp.clone());
            staged.dirty = true;
            changed += 1;
        }

        Ok(changed)
    }

    async fn refresh_bounds(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
    ) -> Result<Option<Bounds>> {
        let records = self.working(&spec.table, &spec.partition_column, partition_id);

        let mut bounds: Option<Bounds> = None;
        for Staged { record, .. } in records.iter() {
            let version = version_of(record, &spec.table)?;

            bounds = Some(match bounds {
                Some(b) => Bounds::new(
                    b.min_schema_version.min(version),
                    b.max_schema_version.max(version),
                ),
                None => Bounds::new(version, version),
            });
        }

        self.write_bounds(spec, partition_id, bounds).await?;

        Ok(bounds)
    }

    async fn write_bounds(
        &mut self,
        spec: &TableSpec,
        partition_id: i64,
        bounds: Option<Bounds>,
    ) -> Result<()> {
        self.bounds
            .insert((spec.bookkeeping_table(), partition_id), bounds);

        Ok(())
    }

    async fn read_aux(&mut self, table: &AuxTable, partition_id: i64) -> Result<Vec<Row>> {
        table.validate()?;

        let columns = table.columns.iter().map(String::as_str).collect::<Vec<_>>();
        let records = self.working(&table.table, &table.partition_column, partition_id);

        let mut rows = records
            .iter()
            .map(|s| project(&s.record, &columns))
            .collect::<Vec<_>>();
        rows.sort();

        Ok(rows)
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

        let columns = table.columns.iter().map(String::as_str).collect::<Vec<_>>();
        let records = self.working(&table.table, &table.partition_column, partition_id);

        let mut rows = records
            .iter()
            .filter(|s| {
                s.record
                    .get(column)
                    .and_then(Value::as_i64)
                    .is_some_and(|v| values.contains(&v))
            })
            .map(|s| project(&s.record, &columns))
            .collect::<Vec<_>>();
        rows.sort();

        Ok(rows)
    }

    async fn max_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        column: &str,
    ) -> Result<Option<i64>> {
        table.validate()?;
        check_identifier(column)?;

        let records = self.working(&table.table, &table.partition_column, partition_id);

        Ok(records
            .iter()
            .filter_map(|s| s.record.get(column).and_then(Value::as_i64))
            .max())
    }

    async fn insert_aux(
        &mut self,
        table: &AuxTable,
        partition_id: i64,
        rows: Vec<Row>,
        _cache: &PlaceholderCache,
        _max_parameters: usize,
    ) -> Result<u64> {
        table.validate()?;

        if let Some(row) = rows.iter().find(|r| r.len() != table.columns.len()) {
            return Err(StoreError::Arity {
                expected: table.columns.len(),
                got: row.len(),
            });
        }

        let partition_column = table.partition_column.to_owned();
        let columns = table.columns.clone();
        let records = self.working(&table.table, &table.partition_column, partition_id);
        let inserted = rows.len() as u64;

        for row in rows {
            let mut record = columns.iter().cloned().zip(row).collect::<Record>();
            record.insert(partition_column.to_owned(), Value::Int(partition_id));
            records.push(Staged {
                id: None,
                record,
                dirty: true,
            });
        }

        Ok(inserted)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let mut state = self.state.write();
        let MemoryState {
            tables,
            next_row,
            bounds,
            ..
        } = &mut *state;

        for ((table, _, _), rows) in self.working.drain() {
            let target = tables.entry(table).or_default();

            for staged in rows.into_iter().filter(|s| s.dirty) {
                let id = staged.id.unwrap_or_else(|| {
                    *next_row += 1;
                    *next_row
                });

                target.insert(id, staged.record);
            }
        }

        for ((table, partition_id), staged) in self.bounds.drain() {
            let rows = bounds.entry(table).or_default();

            match staged {
                Some(staged) => rows.insert(partition_id, staged),
                None => rows.remove(&partition_id),
            };
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.locks.is_empty() {
            return;
        }

        let mut state = self.state.write();
        for lock in self.locks.drain(..) {
            state.locks.remove(&lock);
        }
    }
}
