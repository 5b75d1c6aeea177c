//! In-memory tabular batches
//!
//! Every stage of a pipeline exchanges data as a [`Table`]: a list of column
//! names plus row-major cells. Raw extracted batches hold only
//! [`Value::Text`] and [`Value::Null`]; transforms coerce cells into typed
//! values before load.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    /// Build a text value, mapping empty strings to null
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() {
            Value::Null
        } else {
            Value::Text(s)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; text is parsed leniently
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) if f.is_finite() => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Integer view of the value; fractional numbers yield `None`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Text(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| integral(s.parse::<f64>().ok()?))
            }
            Value::Float(f) => integral(*f),
            _ => None,
        }
    }

    /// Canonical string used when comparing keys across batches and databases
    pub fn key(&self) -> String {
        match self {
            Value::Null => "\u{0}".to_string(),
            Value::Float(f) => match integral(*f) {
                Some(n) => n.to_string(),
                None => f.to_string(),
            },
            other => other.to_string(),
        }
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Storage kind of a column, inferred from its non-null values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Date,
    Text,
}

impl ColumnKind {
    /// Kind of a single value (`None` for null)
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnKind::Bool),
            Value::Int(_) => Some(ColumnKind::Int),
            Value::Float(_) => Some(ColumnKind::Float),
            Value::Date(_) => Some(ColumnKind::Date),
            Value::Text(_) => Some(ColumnKind::Text),
        }
    }

    /// Smallest kind able to hold values of both kinds
    pub fn widen(self, other: ColumnKind) -> ColumnKind {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnKind::Int, ColumnKind::Float) | (ColumnKind::Float, ColumnKind::Int) => {
                ColumnKind::Float
            }
            _ => ColumnKind::Text,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Bool => write!(f, "bool"),
            ColumnKind::Int => write!(f, "int"),
            ColumnKind::Float => write!(f, "float"),
            ColumnKind::Date => write!(f, "date"),
            ColumnKind::Text => write!(f, "text"),
        }
    }
}

/// Row-major table of values with named columns
///
/// Transforms may declare the storage kind of a column; declared kinds win
/// over inference in [`Table::column_kinds`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    #[serde(skip)]
    declared: BTreeMap<String, ColumnKind>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            declared: BTreeMap::new(),
        }
    }

    /// Create a table from rows; short rows are padded with nulls
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: impl IntoIterator<Item = Vec<Value>>,
    ) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Append a row, padding or truncating it to the column count
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Iterate over the values of one column
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Value at `row` in column `name`
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Replace every value of a column. Returns false when the column is absent.
    pub fn map_column(&mut self, name: &str, mut f: impl FnMut(&Value) -> Value) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        true
    }

    /// Add a column (or overwrite an existing one) computed from each row
    pub fn set_column(&mut self, name: &str, mut f: impl FnMut(&[Value]) -> Value) {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = f(row);
                }
            }
            None => {
                for row in &mut self.rows {
                    let v = f(row);
                    row.push(v);
                }
                self.columns.push(name.to_string());
            }
        }
    }

    /// Keep only the rows matching `keep`. Returns the number of rows removed.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Value]) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        before - self.rows.len()
    }

    /// Keep rows whose value in `column` satisfies `keep`.
    /// A missing column leaves the table unchanged.
    pub fn retain_where(&mut self, column: &str, mut keep: impl FnMut(&Value) -> bool) -> usize {
        match self.column_index(column) {
            Some(idx) => self.retain_rows(|row| keep(&row[idx])),
            None => 0,
        }
    }

    /// Build a new table from `(source, destination)` column pairs.
    ///
    /// Returns the projected table and the source columns that were absent;
    /// absent columns are left out of the result.
    pub fn project(&self, mapping: &[(&str, &str)]) -> (Table, Vec<String>) {
        let mut missing = Vec::new();
        let mut picks = Vec::new();
        for (source, dest) in mapping {
            match self.column_index(source) {
                Some(idx) => picks.push((idx, *dest)),
                None => missing.push((*source).to_string()),
            }
        }

        let declared = picks
            .iter()
            .filter_map(|(i, dest)| {
                self.declared
                    .get(&self.columns[*i])
                    .map(|kind| ((*dest).to_string(), *kind))
            })
            .collect();
        let table = Table {
            columns: picks.iter().map(|(_, d)| (*d).to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| picks.iter().map(|(i, _)| row[*i].clone()).collect())
                .collect(),
            declared,
        };
        (table, missing)
    }

    /// Column indices for the given names; `None` if any is missing
    pub fn indices(&self, names: &[impl AsRef<str>]) -> Option<Vec<usize>> {
        names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect()
    }

    /// Names from `required` that this table lacks
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Key string for a row over the given column indices
    pub fn row_key(row: &[Value], idxs: &[usize]) -> Vec<String> {
        idxs.iter().map(|i| row[*i].key()).collect()
    }

    /// Remove rows whose key repeats an earlier row, keeping the first.
    ///
    /// An empty key list compares whole rows. Returns `None`, leaving the
    /// table untouched, when any key column is missing.
    pub fn dedup(&mut self, keys: &[String]) -> Option<usize> {
        let idxs: Vec<usize> = if keys.is_empty() {
            (0..self.columns.len()).collect()
        } else {
            self.indices(keys)?
        };
        let mut seen = HashSet::new();
        Some(self.retain_rows(|row| seen.insert(Self::row_key(row, &idxs))))
    }

    /// Collapse rows sharing a key into one row holding the first non-null
    /// value of every column. Rows with a null key are dropped; output order
    /// follows first appearance.
    pub fn first_per_key(&self, key: &str) -> Table {
        let Some(key_idx) = self.column_index(key) else {
            return Table::new(self.columns.clone());
        };

        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for row in &self.rows {
            if row[key_idx].is_null() {
                continue;
            }
            let k = row[key_idx].key();
            match positions.get(&k).copied() {
                Some(pos) => {
                    let merged = &mut rows[pos];
                    for (slot, value) in merged.iter_mut().zip(row) {
                        if slot.is_null() && !value.is_null() {
                            *slot = value.clone();
                        }
                    }
                }
                None => {
                    positions.insert(k, rows.len());
                    rows.push(row.clone());
                }
            }
        }

        Table {
            columns: self.columns.clone(),
            rows,
            declared: self.declared.clone(),
        }
    }

    /// Fix the storage kind of `column`; ignored when the column is absent
    pub fn declare_kind(&mut self, column: &str, kind: ColumnKind) {
        if self.has_column(column) {
            self.declared.insert(column.to_string(), kind);
        }
    }

    pub fn declared_kind(&self, column: &str) -> Option<ColumnKind> {
        self.declared.get(column).copied()
    }

    /// Kind of every column: the declared kind if any, else inferred from
    /// the values. Undeclared all-null columns are text.
    pub fn column_kinds(&self) -> Vec<ColumnKind> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                self.declared_kind(name).unwrap_or_else(|| {
                    self.rows
                        .iter()
                        .filter_map(|row| ColumnKind::of(&row[idx]))
                        .reduce(ColumnKind::widen)
                        .unwrap_or(ColumnKind::Text)
                })
            })
            .collect()
    }

    /// Rows in fixed-size chunks, in order
    pub fn chunks(&self, size: usize) -> std::slice::Chunks<'_, Vec<Value>> {
        self.rows.chunks(size.max(1))
    }
}
