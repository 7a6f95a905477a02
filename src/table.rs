// src/table.rs

//! Tabular data model for csvfs
//!
//! This module defines the in-memory table shapes that flow between the
//! decoder, the typist, the relational store, and the virtual filesystem:
//! - `RawTable`: a decoded CSV file, all cells still strings
//! - `Column`: a typed column produced by the typist
//! - `Table`: a query result, one `Value` per cell
//!
//! It also hosts the CSV decoder contract: parse a file into a `RawTable`,
//! trying a fixed ordered list of text encodings until one succeeds.

use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use std::path::Path;

/// Encodings attempted when decoding a source CSV, in order.
pub const ENCODINGS: &[&str] = &["utf-8", "latin-1", "windows-1252", "iso-8859-1", "cp1252"];

/// A single cell value, mirroring SQLite's storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Render this value as a CSV field. Nulls become empty fields.
    pub fn to_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(v) => v.clone(),
            Value::Blob(v) => String::from_utf8_lossy(v).into_owned(),
        }
    }

    /// Interpret this value as an integer if possible.
    ///
    /// Integer columns holding nulls are stored as TEXT in the mirror
    /// table, so a nominally-int cell can come back as text.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Interpret this value as a float if possible.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// A tabular query result: column names plus row-major values.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// All values of one column, by name.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Canonical CSV rendering: header row plus one line per row,
    /// `\n`-terminated, minimal quoting, nulls as empty fields.
    pub fn to_csv(&self) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        // The writer only fails on I/O, which a Vec sink cannot produce.
        let _ = writer.write_record(&self.columns);
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(Value::to_field).collect();
            let _ = writer.write_record(&fields);
        }
        let bytes = writer.into_inner().unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// A decoded CSV file: header names plus column-major string cells.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub columns: Vec<Vec<String>>,
}

impl RawTable {
    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }
}

/// A typed column produced by the typist.
///
/// Each variant carries per-cell nullability so that null distinguishability
/// survives the trip through the mirror table.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    DateTime(Vec<Option<NaiveDateTime>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::DateTime(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of null cells in this column.
    pub fn null_count(&self) -> usize {
        match self {
            Column::Int(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Float(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Bool(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::DateTime(v) => v.iter().filter(|c| c.is_none()).count(),
            Column::Text(v) => v.iter().filter(|c| c.is_none()).count(),
        }
    }

    /// The cell at `row` as a storage value.
    ///
    /// Datetimes are rendered `%Y-%m-%d %H:%M:%S`; bools become 0/1.
    pub fn value(&self, row: usize) -> Value {
        match self {
            Column::Int(v) => v[row].map(Value::Int).unwrap_or(Value::Null),
            Column::Float(v) => v[row].map(Value::Float).unwrap_or(Value::Null),
            Column::Bool(v) => v[row].map(|b| Value::Int(b as i64)).unwrap_or(Value::Null),
            Column::DateTime(v) => v[row]
                .map(|d| Value::Text(d.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null),
            Column::Text(v) => v[row]
                .as_ref()
                .map(|s| Value::Text(s.clone()))
                .unwrap_or(Value::Null),
        }
    }
}

/// A table after typing: headers paired with typed columns.
#[derive(Debug, Clone)]
pub struct TypedTable {
    pub headers: Vec<String>,
    pub columns: Vec<Column>,
}

impl TypedTable {
    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }
}

/// Decode a CSV file into a `RawTable`.
///
/// Attempts each entry of [`ENCODINGS`] in order; the first encoding that
/// produces valid text wins. A file no encoding can represent yields
/// `Error::Encoding`; a malformed CSV body (ragged rows, bad quoting)
/// yields `Error::Csv`.
pub fn decode_csv(path: &Path) -> Result<RawTable> {
    let bytes = std::fs::read(path)?;

    for label in ENCODINGS {
        let Some(text) = decode_text(&bytes, label) else {
            continue;
        };
        return parse_csv(&text);
    }

    Err(Error::Encoding(path.display().to_string()))
}

/// Decode raw bytes under a single named encoding, strictly.
fn decode_text(bytes: &[u8], label: &str) -> Option<String> {
    if label == "utf-8" {
        return std::str::from_utf8(bytes).ok().map(str::to_string);
    }

    let encoding = encoding_rs::Encoding::for_label(label.as_bytes())?;
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        None
    } else {
        Some(text.into_owned())
    }
}

fn parse_csv(text: &str) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];

    for record in reader.records() {
        let record = record?;
        for (i, cell) in record.iter().enumerate() {
            columns[i].push(cell.to_string());
        }
    }

    Ok(RawTable { headers, columns })
}
