use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};

use crate::error::{Result, StoreError};

pub const DEFAULT_PARTITION_COLUMN: &str = "dump_id";
pub const VERSION_COLUMN: &str = "schema_version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// How the runtime treats a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldRole {
    /// Identifies a row; read and used to join the rewritten tuples back.
    PrimaryKey,
    /// Read but never written back.
    ReadOnly,
    /// Written but never read; may not exist before the migration runs.
    UpdateOnly,
    /// Read and written back.
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub sql_type: String,
    pub role: FieldRole,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>, role: FieldRole) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            role,
        }
    }

    pub fn primary_key(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self::new(name, sql_type, FieldRole::PrimaryKey)
    }

    pub fn read_only(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self::new(name, sql_type, FieldRole::ReadOnly)
    }

    pub fn update_only(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self::new(name, sql_type, FieldRole::UpdateOnly)
    }

    pub fn read_write(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self::new(name, sql_type, FieldRole::Default)
    }

    pub fn is_read(&self) -> bool {
        !matches!(self.role, FieldRole::UpdateOnly)
    }

    pub fn is_update_target(&self) -> bool {
        matches!(self.role, FieldRole::UpdateOnly | FieldRole::Default)
    }
}

/// A partitioned, versioned data table and the columns a migration touches.
///
/// Bookkeeping lives in `{table}_schema_versions`, keyed by the same
/// partition column as the data table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub table: String,
    pub partition_column: String,
    pub fields: Vec<FieldSpec>,
}

impl TableSpec {
    pub fn new(table: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            table: table.into(),
            partition_column: DEFAULT_PARTITION_COLUMN.to_owned(),
            fields,
        }
    }

    pub fn partition_column(mut self, column: impl Into<String>) -> Self {
        self.partition_column = column.into();
        self
    }

    pub fn version_column(&self) -> &str {
        VERSION_COLUMN
    }

    pub fn bookkeeping_table(&self) -> String {
        format!("{}_schema_versions", self.table)
    }

    /// Name of the transaction-scoped table rewritten tuples are staged in.
    pub fn temp_table(&self) -> String {
        format!("t_{}", self.table)
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| matches!(f.role, FieldRole::PrimaryKey))
    }

    pub fn update_targets(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.is_update_target())
    }

    /// Primary keys, then every other readable field, in declaration order.
    pub fn read_fields(&self) -> Vec<&FieldSpec> {
        self.primary_keys()
            .chain(
                self.fields
                    .iter()
                    .filter(|f| f.is_read() && !matches!(f.role, FieldRole::PrimaryKey)),
            )
            .collect()
    }

    /// Primary keys, then update targets: the shape drivers must return.
    pub fn write_fields(&self) -> Vec<&FieldSpec> {
        self.primary_keys().chain(self.update_targets()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        check_identifier(&self.table)?;
        check_identifier(&self.partition_column)?;

        let mut seen = HashSet::new();
        for field in self.fields.iter() {
            check_identifier(&field.name)?;

            if field.name == self.partition_column
                || field.name == VERSION_COLUMN
                || !seen.insert(field.name.as_str())
            {
                return Err(StoreError::DuplicateColumn(field.name.to_owned()));
            }
        }

        if self.primary_keys().next().is_none() {
            return Err(StoreError::NoPrimaryKey(self.table.to_owned()));
        }

        if self.update_targets().next().is_none() {
            return Err(StoreError::NoUpdateTarget(self.table.to_owned()));
        }

        Ok(())
    }
}

/// A partitioned side table drivers read from or append to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxTable {
    pub table: String,
    pub partition_column: String,
    pub columns: Vec<String>,
    /// Placeholder casts used on insert, one per column.
    pub casts: Vec<Option<String>>,
}

impl AuxTable {
    pub fn new<C: Into<String>>(
        table: impl Into<String>,
        partition_column: impl Into<String>,
        columns: impl IntoIterator<Item = C>,
    ) -> Self {
        let columns = columns.into_iter().map(Into::into).collect::<Vec<String>>();

        Self {
            table: table.into(),
            partition_column: partition_column.into(),
            casts: vec![None; columns.len()],
            columns,
        }
    }

    pub fn casts<C: Into<String>>(mut self, casts: impl IntoIterator<Item = Option<C>>) -> Self {
        self.casts = casts.into_iter().map(|c| c.map(Into::into)).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_identifier(&self.table)?;
        check_identifier(&self.partition_column)?;

        for column in self.columns.iter() {
            check_identifier(column)?;
        }

        if self.casts.len() != self.columns.len() {
            return Err(StoreError::Arity {
                expected: self.columns.len(),
                got: self.casts.len(),
            });
        }

        Ok(())
    }
}

/// Observed schema versions of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_schema_version: i32,
    pub max_schema_version: i32,
}

impl Bounds {
    pub fn new(min_schema_version: i32, max_schema_version: i32) -> Self {
        Self {
            min_schema_version,
            max_schema_version,
        }
    }

    /// Whether the partition still has rows to move in `direction`.
    pub fn is_eligible(&self, direction: Direction, target_version: i32) -> bool {
        match direction {
            Direction::Up => self.min_schema_version < target_version,
            Direction::Down => self.max_schema_version > target_version - 1,
        }
    }

    pub fn is_done(&self, direction: Direction, target_version: i32) -> bool {
        match direction {
            Direction::Up => self.min_schema_version >= target_version,
            Direction::Down => self.max_schema_version <= target_version - 1,
        }
    }
}

/// Aggregate bookkeeping counts for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub done: i64,
    pub total: i64,
}

impl Counts {
    /// `done / total`, or `1.0` when nothing is tracked.
    pub fn progress(&self) -> f64 {
        match self.total {
            0 => 1.0,
            total => self.done as f64 / total as f64,
        }
    }
}

/// Identifiers are interpolated into SQL, so only plain names are accepted.
pub(crate) fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();

    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(StoreError::Identifier(name.to_owned()));
    }

    Ok(())
}
