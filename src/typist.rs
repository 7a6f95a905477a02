// src/typist.rs

//! Column-type inference ("typist") for csvfs
//!
//! Given a decoded CSV table, the typist classifies each column as one of
//! int, float, bool, datetime, or string, and returns new typed columns.
//! Inference strategies are tried in a fixed order: boolean first (so
//! pure 0/1 columns do not classify as numeric), then numeric, then
//! datetime, with string as the fallback. Columns already present in the
//! schema are coerced to their recorded type instead of re-inferred.
//!
//! Each schema entry carries an `inferred` flag: false when the type came
//! from a user-supplied `.csv.schema` override, true when deduced from the
//! data.

use crate::error::{Error, Result};
use crate::table::{Column, RawTable, TypedTable};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// The closed set of column types, tagged as persisted in `schema.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Date,
    Str,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::Date => "date",
            ColumnType::Str => "str",
        }
    }

    /// The name used in statistics documents.
    pub fn stats_name(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::Date => "datetime",
            ColumnType::Str => "string",
        }
    }

    /// Parse an override-file type token (`COLUMN:TYPE` right-hand side).
    pub fn from_override_token(token: &str) -> Option<Self> {
        match token {
            "INT" => Some(ColumnType::Int),
            "FLOAT" => Some(ColumnType::Float),
            "BOOL" => Some(ColumnType::Bool),
            "DATE" => Some(ColumnType::Date),
            "STR" => Some(ColumnType::Str),
            _ => None,
        }
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "int" => Ok(ColumnType::Int),
            "float" => Ok(ColumnType::Float),
            "bool" => Ok(ColumnType::Bool),
            "date" => Ok(ColumnType::Date),
            "str" => Ok(ColumnType::Str),
            _ => Err(format!("Invalid column type: {}", s)),
        }
    }
}

/// One column's recorded type plus its provenance flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub inferred: bool,
}

/// Boolean lexicon: the only value pairs a column may use to classify as bool.
const BOOL_LEXICON: &[(&str, bool)] = &[
    ("true", true),
    ("false", false),
    ("yes", true),
    ("no", false),
    ("1", true),
    ("0", false),
    ("t", true),
    ("f", false),
    ("y", true),
    ("n", false),
];

fn bool_lookup(value: &str) -> Option<bool> {
    let lowered = value.to_lowercase();
    BOOL_LEXICON
        .iter()
        .find(|(k, _)| *k == lowered)
        .map(|(_, v)| *v)
}

/// Datetime formats tried during inference, in order. Date-only formats
/// parse as midnight timestamps.
enum DateFormat {
    Date(&'static str),
    DateTime(&'static str),
}

const DATE_FORMATS: &[DateFormat] = &[
    DateFormat::Date("%m/%d/%Y"),
    DateFormat::Date("%m-%d-%Y"),
    DateFormat::Date("%Y-%m-%d"),
    DateFormat::DateTime("%m/%d/%Y %H:%M:%S"),
    DateFormat::DateTime("%m/%d/%Y %H:%M:%S%.f"),
    DateFormat::DateTime("%m-%d-%Y %H:%M:%S"),
    DateFormat::DateTime("%m-%d-%Y %H:%M:%S%.f"),
    DateFormat::DateTime("%Y-%m-%d %H:%M:%S"),
    DateFormat::DateTime("%Y-%m-%d %H:%M:%S%.f"),
    DateFormat::DateTime("%Y-%m-%dT%H:%M:%S"),
    DateFormat::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
];

impl DateFormat {
    fn parse(&self, value: &str) -> Option<NaiveDateTime> {
        match self {
            DateFormat::Date(fmt) => NaiveDate::parse_from_str(value, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            DateFormat::DateTime(fmt) => NaiveDateTime::parse_from_str(value, fmt).ok(),
        }
    }
}

/// Per-table column-type inference engine.
#[derive(Debug, Clone, Default)]
pub struct Typist {
    pub schema: BTreeMap<String, ColumnSchema>,
}

impl Typist {
    /// A typist with no prior schema; every column will be inferred.
    pub fn new() -> Self {
        Self::default()
    }

    /// A typist seeded from a schema override file. Every entry is marked
    /// as user-declared.
    pub fn with_declared(declared: BTreeMap<String, ColumnType>) -> Self {
        let schema = declared
            .into_iter()
            .map(|(column, column_type)| {
                (
                    column,
                    ColumnSchema {
                        column_type,
                        inferred: false,
                    },
                )
            })
            .collect();
        Self { schema }
    }

    /// A typist restored from persisted `schema.json` state.
    pub fn from_persisted(schema: BTreeMap<String, ColumnSchema>) -> Self {
        Self { schema }
    }

    /// Type every column of `raw`, returning new typed columns.
    ///
    /// Columns already present in the schema are coerced to the recorded
    /// type (the recorded type is never changed); all other columns run
    /// the inference cascade and are added to the schema with
    /// `inferred = true`. Empty-string cells are treated as null
    /// throughout.
    pub fn apply(&mut self, raw: RawTable) -> Result<TypedTable> {
        let mut columns = Vec::with_capacity(raw.headers.len());

        for (header, cells) in raw.headers.iter().zip(raw.columns.into_iter()) {
            let cells: Vec<Option<String>> = cells
                .into_iter()
                .map(|c| if c.is_empty() { None } else { Some(c) })
                .collect();

            if let Some(entry) = self.schema.get(header) {
                columns.push(coerce(header, &cells, entry.column_type)?);
                continue;
            }

            let (column, column_type) = infer(&cells);
            self.schema.insert(
                header.clone(),
                ColumnSchema {
                    column_type,
                    inferred: true,
                },
            );
            columns.push(column);
        }

        Ok(TypedTable {
            headers: raw.headers,
            columns,
        })
    }
}

/// Run the inference cascade over one column.
fn infer(cells: &[Option<String>]) -> (Column, ColumnType) {
    if let Some(column) = infer_bool(cells) {
        return (column, ColumnType::Bool);
    }
    if let Some((column, column_type)) = infer_numeric(cells) {
        return (column, column_type);
    }
    if let Some(column) = infer_datetime(cells) {
        return (column, ColumnType::Date);
    }
    (
        Column::Text(cells.to_vec()),
        ColumnType::Str,
    )
}

/// Boolean strategy: exactly two distinct non-null values, both in the
/// lexicon. Nulls become false.
fn infer_bool(cells: &[Option<String>]) -> Option<Column> {
    let mut distinct: Vec<&str> = Vec::new();
    for cell in cells.iter().flatten() {
        if !distinct.contains(&cell.as_str()) {
            distinct.push(cell);
        }
        if distinct.len() > 2 {
            return None;
        }
    }
    if distinct.len() != 2 {
        return None;
    }
    if distinct.iter().any(|v| bool_lookup(v).is_none()) {
        return None;
    }

    let values = cells
        .iter()
        .map(|cell| match cell {
            Some(v) => bool_lookup(v),
            None => Some(false),
        })
        .collect();
    Some(Column::Bool(values))
}

/// Numeric strategy: every non-null cell parses as a number. Whole-valued
/// columns become int, everything else float.
fn infer_numeric(cells: &[Option<String>]) -> Option<(Column, ColumnType)> {
    if cells.iter().all(Option::is_none) {
        return None;
    }

    let mut parsed: Vec<Option<f64>> = Vec::with_capacity(cells.len());
    let mut all_int = true;
    for cell in cells {
        match cell {
            None => parsed.push(None),
            Some(v) => {
                let v = v.trim();
                let number = v.parse::<f64>().ok()?;
                if v.parse::<i64>().is_err() {
                    all_int = false;
                }
                parsed.push(Some(number));
            }
        }
    }

    let whole = parsed
        .iter()
        .flatten()
        .all(|n| n.fract() == 0.0 && n.abs() <= i64::MAX as f64);
    if all_int || whole {
        let values = parsed
            .into_iter()
            .map(|n| n.map(|n| n as i64))
            .collect();
        Some((Column::Int(values), ColumnType::Int))
    } else {
        Some((Column::Float(parsed), ColumnType::Float))
    }
}

/// Datetime strategy: every non-null cell parses under exactly one of the
/// fixed formats, tried in order.
fn infer_datetime(cells: &[Option<String>]) -> Option<Column> {
    if cells.iter().all(Option::is_none) {
        return None;
    }

    for format in DATE_FORMATS {
        let mut values: Vec<Option<NaiveDateTime>> = Vec::with_capacity(cells.len());
        let mut ok = true;
        for cell in cells {
            match cell {
                None => values.push(None),
                Some(v) => match format.parse(v) {
                    Some(parsed) => values.push(Some(parsed)),
                    None => {
                        ok = false;
                        break;
                    }
                },
            }
        }
        if ok {
            return Some(Column::DateTime(values));
        }
    }
    None
}

/// Coerce one column to a declared type. Nulls stay null; a non-null cell
/// that cannot be represented fails the whole column.
fn coerce(header: &str, cells: &[Option<String>], target: ColumnType) -> Result<Column> {
    let fail = |value: &str| Error::Coerce {
        column: header.to_string(),
        target: target.as_str(),
        value: value.to_string(),
    };

    match target {
        ColumnType::Str => Ok(Column::Text(cells.to_vec())),
        ColumnType::Int => {
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    None => values.push(None),
                    Some(v) => {
                        let v = v.trim();
                        let parsed = v.parse::<i64>().ok().or_else(|| {
                            v.parse::<f64>()
                                .ok()
                                .filter(|n| n.fract() == 0.0 && n.abs() <= i64::MAX as f64)
                                .map(|n| n as i64)
                        });
                        values.push(Some(parsed.ok_or_else(|| fail(v))?));
                    }
                }
            }
            Ok(Column::Int(values))
        }
        ColumnType::Float => {
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    None => values.push(None),
                    Some(v) => {
                        values.push(Some(v.trim().parse::<f64>().map_err(|_| fail(v))?));
                    }
                }
            }
            Ok(Column::Float(values))
        }
        ColumnType::Bool => {
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    None => values.push(None),
                    Some(v) => values.push(Some(bool_lookup(v).ok_or_else(|| fail(v))?)),
                }
            }
            Ok(Column::Bool(values))
        }
        ColumnType::Date => {
            let mut values = Vec::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    None => values.push(None),
                    Some(v) => {
                        let parsed = DATE_FORMATS.iter().find_map(|f| f.parse(v));
                        values.push(Some(parsed.ok_or_else(|| fail(v))?));
                    }
                }
            }
            Ok(Column::DateTime(values))
        }
    }
}
