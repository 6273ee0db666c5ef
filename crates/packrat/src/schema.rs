//! Table schemas, column values, and the record accessor trait.
//!
//! The engine is agnostic of the host's record representation: a record type
//! implements [`Record`] to expose its columns as positional [`Value`]s, and
//! carries a static [`TableSchema`] naming the columns, the unique key, and
//! the table's indexes. Schemas are built with [`TableSchema::builder`],
//! which validates every invariant the rest of the engine relies on.

use crate::error::{Result, StoreError};
use chrono::NaiveDate;
use std::cmp::Ordering;

/// Separator joining unique-key column strings into a packet-level key.
pub(crate) const UNIQUE_SEPARATOR: char = '\0';

/// A single column value.
///
/// `Null` sorts before every other value; floats are ordered by
/// [`f64::total_cmp`] so the ordering is total.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value, written as the schema's null sentinel string.
    Null,
    /// UTF-8 string.
    Str(String),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean, written as `true` / `false`.
    Bool(bool),
    /// Calendar date, written as `YYYY-MM-DD`.
    Date(NaiveDate),
}

impl Value {
    /// Returns true if this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value in its canonical string form.
    ///
    /// `null_value` is the schema-declared sentinel emitted for `Null`.
    pub fn to_text(&self, null_value: &str) -> String {
        match self {
            Value::Null => null_value.to_string(),
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Date(d) => d.to_string(),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Str(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Bool(_) => 4,
            Value::Date(_) => 5,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            // Mixed types only appear if the host mixes column types in a
            // filter; order by type rank so the comparison stays total.
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// Declared type of a column. Every column type is totally ordered and has a
/// reversible text conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// UTF-8 string.
    Str,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// Boolean.
    Bool,
    /// Calendar date (`YYYY-MM-DD`).
    Date,
}

impl ColumnType {
    /// Parses a value of this type from its canonical string form.
    ///
    /// `null_value` is the schema's null sentinel; a matching input yields
    /// [`Value::Null`]. On failure the `Err` carries a human-readable reason.
    pub fn parse_text(
        &self,
        text: &str,
        null_value: &str,
    ) -> std::result::Result<Value, String> {
        if text == null_value {
            return Ok(Value::Null);
        }
        match self {
            ColumnType::Str => Ok(Value::Str(text.to_string())),
            ColumnType::Int => text
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| format!("not an integer: {text:?} ({e})")),
            ColumnType::Float => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| format!("not a float: {text:?} ({e})")),
            ColumnType::Bool => text
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|e| format!("not a boolean: {text:?} ({e})")),
            ColumnType::Date => text
                .parse::<NaiveDate>()
                .map(Value::Date)
                .map_err(|e| format!("not a date: {text:?} ({e})")),
        }
    }
}

/// A named, typed column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    kind: ColumnType,
}

impl Column {
    /// The column's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The column's declared type.
    pub fn kind(&self) -> ColumnType {
        self.kind
    }
}

/// An ordered list of column positions defining one partitioning of a table
/// into packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    name: String,
    columns: Vec<usize>,
}

impl Index {
    /// The index's name, used as a directory component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column positions, outermost directory level first.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Number of directory levels (≥ 1).
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the index partitions by the given column.
    pub fn contains(&self, column: usize) -> bool {
        self.columns.contains(&column)
    }
}

/// Describes a table: ordered columns, unique key, indexes, null sentinel.
///
/// A `TableSchema` can only be obtained from [`TableSchema::builder`], so a
/// value of this type is always valid.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    unique: Vec<usize>,
    indexes: Vec<Index>,
    null_value: String,
}

impl TableSchema {
    /// Starts building a schema for the named table.
    pub fn builder(name: impl Into<String>) -> TableSchemaBuilder {
        TableSchemaBuilder {
            name: name.into(),
            columns: Vec::new(),
            unique: Vec::new(),
            indexes: Vec::new(),
            null_value: String::new(),
        }
    }

    /// The table's name, used as a directory component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table's columns in declared order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Looks up a column position by name.
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Positions of the unique-key columns, in declared key order.
    pub fn unique(&self) -> &[usize] {
        &self.unique
    }

    /// The table's indexes in declaration order.
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Looks up an index by name.
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// The string written for [`Value::Null`] in packet files and paths.
    pub fn null_value(&self) -> &str {
        &self.null_value
    }

    /// Renders a column value in its canonical string form.
    pub fn value_to_text(&self, value: &Value) -> String {
        value.to_text(&self.null_value)
    }

    /// Parses a column's value from its canonical string form.
    pub fn value_from_text(
        &self,
        column: usize,
        text: &str,
    ) -> std::result::Result<Value, String> {
        self.columns[column].kind.parse_text(text, &self.null_value)
    }

    /// The record's in-packet unique key: unique column strings joined with
    /// a NUL separator.
    pub fn unique_key<R: Record>(&self, record: &R) -> String {
        let mut key = String::new();
        for (i, &col) in self.unique.iter().enumerate() {
            if i > 0 {
                key.push(UNIQUE_SEPARATOR);
            }
            key.push_str(&self.value_to_text(&record.get(col)));
        }
        key
    }

    /// The record's path values under the given index (string forms, one per
    /// directory level).
    pub fn index_path<R: Record>(&self, index: &Index, record: &R) -> Vec<String> {
        index
            .columns
            .iter()
            .map(|&col| self.value_to_text(&record.get(col)))
            .collect()
    }
}

/// Builder for [`TableSchema`]; validates every schema invariant at
/// [`build`](TableSchemaBuilder::build).
#[derive(Debug)]
pub struct TableSchemaBuilder {
    name: String,
    columns: Vec<Column>,
    unique: Vec<String>,
    indexes: Vec<(String, Vec<String>)>,
    null_value: String,
}

impl TableSchemaBuilder {
    /// Appends a column.
    pub fn column(mut self, name: impl Into<String>, kind: ColumnType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            kind,
        });
        self
    }

    /// Declares the unique-key columns, in key order.
    pub fn unique<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.unique = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Declares an index over the named columns, outermost level first.
    pub fn index<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.indexes
            .push((name.into(), columns.into_iter().map(Into::into).collect()));
        self
    }

    /// Overrides the null sentinel string (default: empty string).
    pub fn null_value(mut self, null_value: impl Into<String>) -> Self {
        self.null_value = null_value.into();
        self
    }

    /// Validates the declaration and produces the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaInvalid`] if the table has no columns or
    /// duplicated column names, no unique key, no index, an index or unique
    /// key naming an unknown column, duplicated index names, or an index
    /// with no columns.
    pub fn build(self) -> Result<TableSchema> {
        if self.name.is_empty() {
            return Err(StoreError::SchemaInvalid("table name is empty".into()));
        }
        if self.columns.is_empty() {
            return Err(StoreError::SchemaInvalid(format!(
                "table `{}` declares no columns",
                self.name
            )));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(StoreError::SchemaInvalid(format!(
                    "duplicate column `{}` in table `{}`",
                    col.name, self.name
                )));
            }
        }
        if self.unique.is_empty() {
            return Err(StoreError::SchemaInvalid(format!(
                "table `{}` declares no unique key",
                self.name
            )));
        }
        if self.indexes.is_empty() {
            return Err(StoreError::SchemaInvalid(format!(
                "table `{}` declares no indexes",
                self.name
            )));
        }

        let resolve = |column: &str, context: &str| -> Result<usize> {
            self.columns
                .iter()
                .position(|c| c.name == column)
                .ok_or_else(|| {
                    StoreError::SchemaInvalid(format!(
                        "unknown column `{column}` in {context} of table `{}`",
                        self.name
                    ))
                })
        };

        let mut unique = Vec::with_capacity(self.unique.len());
        for name in &self.unique {
            unique.push(resolve(name, "unique key")?);
        }

        let mut indexes = Vec::with_capacity(self.indexes.len());
        for (name, columns) in &self.indexes {
            if indexes.iter().any(|i: &Index| &i.name == name) {
                return Err(StoreError::SchemaInvalid(format!(
                    "duplicate index `{name}` in table `{}`",
                    self.name
                )));
            }
            if columns.is_empty() {
                return Err(StoreError::SchemaInvalid(format!(
                    "index `{name}` of table `{}` has no columns",
                    self.name
                )));
            }
            let mut positions = Vec::with_capacity(columns.len());
            for column in columns {
                positions.push(resolve(column, &format!("index `{name}`"))?);
            }
            indexes.push(Index {
                name: name.clone(),
                columns: positions,
            });
        }

        Ok(TableSchema {
            name: self.name,
            columns: self.columns,
            unique,
            indexes,
            null_value: self.null_value,
        })
    }
}

/// Accessor surface a record type exposes to the engine.
///
/// Implementations are typically a small hand-written accessor table over a
/// plain struct; [`Default`] provides the blank record that packet decoding
/// populates column by column.
pub trait Record: Clone + Default + Send + Sync + 'static {
    /// The table schema this record type belongs to.
    fn schema() -> &'static TableSchema;

    /// Reads the `column`-th column.
    fn get(&self, column: usize) -> Value;

    /// Writes the `column`-th column.
    fn set(&mut self, column: usize, value: Value);
}
