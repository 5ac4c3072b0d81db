//! Uniform tabular query results
//!
//! Every adapter normalizes its backend response into a [`QueryResult`]:
//! ordered column names plus rows of strings. Backends that return
//! heterogeneous records go through [`RecordsBuilder`], which derives the
//! column set from first appearance.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write as _};

use serde::ser::{self, SerializeMap};
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

/// One scalar cell as returned by a backend
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::String(s) => f.write_str(s),
            Cell::Binary(bytes) => bytes.iter().try_for_each(|b| write!(f, "{b:02x}")),
            Cell::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_owned())
    }
}

impl From<Vec<u8>> for Cell {
    fn from(value: Vec<u8>) -> Self {
        Cell::Binary(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Null, Into::into)
    }
}

impl From<serde_json::Value> for Cell {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Cell::Int(i),
                (None, Some(x)) if !n.is_u64() => Cell::Float(x),
                _ => Cell::String(n.to_string()),
            },
            Value::String(s) => Cell::String(s),
            other => Cell::Json(other),
        }
    }
}

/// Tabular result of one query run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub name: String,
    pub query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    /// Result whose columns are known up front, e.g. from backend metadata
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            columns,
            rows,
        }
    }

    pub fn empty(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self::new(name, query, Vec::new(), Vec::new())
    }

    /// Parse JSON objects, one per line. Undecodable lines are skipped.
    pub fn from_json_lines<I>(name: &str, query: &str, lines: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut builder = RecordsBuilder::new(name, query);
        for line in lines {
            builder.push_json_line(line.as_ref());
        }
        builder.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names made unique with a numeric suffix: `a`, `a1`, `a2`
    pub fn unique_columns(&self) -> Vec<String> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        self.columns
            .iter()
            .map(|column| match seen.get_mut(column.as_str()) {
                Some(count) => {
                    let unique = format!("{column}{count}");
                    *count += 1;
                    unique
                }
                None => {
                    seen.insert(column.as_str(), 1);
                    column.clone()
                }
            })
            .collect()
    }

    /// Rows as name/value records in column order
    pub fn records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        let columns = self.unique_columns();
        self.rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| (column.clone(), serde_json::Value::from(cell.as_str())))
                    .collect()
            })
            .collect()
    }

    pub fn to_json_lines(&self) -> String {
        let mut out = String::new();
        for record in self.records() {
            out.push_str(&serde_json::Value::Object(record).to_string());
            out.push('\n');
        }
        out
    }

    /// MySQL style `\G` output
    pub fn to_vertical(&self) -> String {
        let mut out = String::new();
        for (i, row) in self.rows.iter().enumerate() {
            let _ = writeln!(out, "********* {}. row *********", i + 1);
            for (column, cell) in self.columns.iter().zip(row) {
                let _ = writeln!(out, "  {column}: {cell}");
            }
        }
        out
    }
}

/// Results of a batch, serialized as a map keyed by query name. Two results
/// with the same name can not be told apart, so serializing them fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults(pub Vec<QueryResult>);

impl QueryResults {
    pub fn get(&self, name: &str) -> Option<&QueryResult> {
        self.0.iter().find(|r| r.name == name)
    }
}

impl Serialize for QueryResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seen = HashSet::new();
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for result in &self.0 {
            if !seen.insert(result.name.as_str()) {
                return Err(ser::Error::custom(format!(
                    "duplicate query result \"{}\"",
                    result.name
                )));
            }
            map.serialize_entry(&result.name, result)?;
        }
        map.end()
    }
}

impl From<Vec<QueryResult>> for QueryResults {
    fn from(results: Vec<QueryResult>) -> Self {
        Self(results)
    }
}

/// Builds a [`QueryResult`] from sparse records
#[derive(Debug)]
pub struct RecordsBuilder {
    name: String,
    query: String,
    columns: Vec<String>,
    index: HashMap<String, usize>,
    ignored: HashSet<String>,
    rows: Vec<Vec<String>>,
}

impl RecordsBuilder {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            columns: Vec::new(),
            index: HashMap::new(),
            ignored: HashSet::new(),
            rows: Vec::new(),
        }
    }

    pub fn ignore_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn push_record<I, K, V>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Cell>,
    {
        let mut row = vec![String::new(); self.columns.len()];
        for (field, value) in fields {
            let field = field.as_ref();
            if self.ignored.contains(field) {
                continue;
            }
            let idx = match self.index.get(field) {
                Some(idx) => *idx,
                None => {
                    let idx = self.columns.len();
                    self.columns.push(field.to_owned());
                    self.index.insert(field.to_owned(), idx);
                    row.push(String::new());
                    idx
                }
            };
            row[idx] = value.into().to_string();
        }
        self.rows.push(row);
    }

    /// Push one JSON object line. Returns false if the line was skipped.
    pub fn push_json_line(&mut self, line: &[u8]) -> bool {
        if line.iter().all(u8::is_ascii_whitespace) {
            return false;
        }
        match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(line) {
            Ok(record) => {
                self.push_record(record);
                true
            }
            Err(err) => {
                warn!(
                    query = %self.name,
                    "skipping undecodable line: {err}: {}",
                    String::from_utf8_lossy(line)
                );
                false
            }
        }
    }

    pub fn finish(mut self) -> QueryResult {
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
        QueryResult::new(self.name, self.query, self.columns, self.rows)
    }
}
