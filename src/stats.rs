// src/stats.rs

//! Statistics engine for csvfs
//!
//! Computes, caches, and serializes the JSON documents presented under
//! `/stats`. Per-table documents are computed once and kept until
//! explicitly invalidated; the global document is recomputed whenever its
//! `up_to_date` flag is cleared.

use crate::backend::{quote_ident, Backend};
use crate::table::Value;
use crate::typist::ColumnType;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per-column block of a table statistics document. The variant tag is
/// serialized as the `type` field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnStats {
    Int {
        inferred: bool,
        nulls: i64,
        min: Option<i64>,
        max: Option<i64>,
    },
    Float {
        inferred: bool,
        nulls: i64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
    },
    Bool {
        inferred: bool,
        nulls: i64,
    },
    String {
        inferred: bool,
        nulls: i64,
        distinct: i64,
    },
    Datetime {
        inferred: bool,
        nulls: i64,
        start_date: Option<String>,
        end_date: Option<String>,
    },
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub file: String,
    pub size_bytes: u64,
    pub last_modified: String,
    pub up_to_date: bool,
    pub last_analyzed: String,
    pub stale_reason: Option<String>,
    pub rows: i64,
    pub columns: usize,
    pub schema: std::collections::BTreeMap<String, ColumnStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalFile {
    pub filename: String,
    pub stat_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub up_to_date: bool,
    pub files: Vec<GlobalFile>,
    pub total_rows: i64,
    pub total_columns: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StatsDocument {
    Global(GlobalStats),
    Table(TableStats),
}

/// Cache of statistics documents, keyed by table name plus the special
/// `global` key.
#[derive(Debug, Default)]
pub struct StatsEngine {
    documents: HashMap<String, StatsDocument>,
}

impl StatsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized byte size of a cached document, if one exists.
    pub fn document_size(&self, name: &str) -> Option<u64> {
        Some(self.render(name)?.len() as u64)
    }

    /// Pretty-printed JSON for a cached document.
    pub fn render(&self, name: &str) -> Option<String> {
        let document = self.documents.get(name)?;
        serde_json::to_string_pretty(document).ok()
    }

    /// Drop a cached document so the next read recomputes it.
    pub fn invalidate(&mut self, name: &str) {
        if name == "global" {
            if let Some(StatsDocument::Global(global)) = self.documents.get_mut(name) {
                global.up_to_date = false;
            }
        } else {
            self.documents.remove(name);
        }
    }

    /// Refresh the named document if needed.
    ///
    /// The global document honors its `up_to_date` flag; per-table
    /// documents are computed once and returned from cache until
    /// invalidated, since full-table analysis is expensive.
    pub fn update(&mut self, backend: &Backend, name: &str) {
        if name == "global" {
            if let Some(StatsDocument::Global(global)) = self.documents.get(name) {
                if global.up_to_date {
                    return;
                }
            }
            debug!("Recomputing global statistics");
            let global = compute_global(backend);
            self.documents
                .insert(name.to_string(), StatsDocument::Global(global));
            return;
        }

        if self.documents.contains_key(name) {
            return;
        }
        debug!("Analyzing table {:?}", name);
        if let Some(stats) = compute_table(backend, name) {
            self.documents
                .insert(name.to_string(), StatsDocument::Table(stats));
        }
    }
}

fn compute_global(backend: &Backend) -> GlobalStats {
    let mut total_rows = 0;
    let mut total_columns = 0;
    let mut files = Vec::new();

    for table in backend.tables() {
        let rows = backend.row_count(&table).unwrap_or(0);
        let columns = backend
            .query(&format!("SELECT * FROM {} LIMIT 1", quote_ident(&table)))
            .map(|t| t.column_count() as i64)
            .unwrap_or(0);

        total_rows += rows;
        total_columns += columns;
        files.push(GlobalFile {
            filename: format!("{}/{}.csv", backend.source_dir().display(), table),
            stat_file: format!("/stats/{}.json", table),
        });
    }

    GlobalStats {
        up_to_date: true,
        files,
        total_rows,
        total_columns,
    }
}

fn compute_table(backend: &Backend, table: &str) -> Option<TableStats> {
    let data = backend.query(&format!("SELECT * FROM {}", quote_ident(table)))?;
    let size_bytes = data.to_csv().len() as u64;

    let mut schema = std::collections::BTreeMap::new();
    for column in &data.columns {
        let values = data.column_values(column).unwrap_or_default();
        let recorded = backend
            .typist(table)
            .and_then(|typist| typist.schema.get(column));
        let stats = match recorded {
            Some(entry) => column_stats(entry.column_type, entry.inferred, &values),
            None => ColumnStats::Unknown,
        };
        schema.insert(column.clone(), stats);
    }

    let last_modified = backend
        .modified_time(&format!("{}.csv", table))
        .unwrap_or_else(|| backend.creation_time());

    Some(TableStats {
        file: format!("{}/{}.csv", backend.source_dir().display(), table),
        size_bytes,
        last_modified: local_timestamp(last_modified),
        up_to_date: true,
        last_analyzed: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        stale_reason: None,
        rows: data.row_count() as i64,
        columns: schema.len(),
        schema,
    })
}

fn column_stats(column_type: ColumnType, inferred: bool, values: &[&Value]) -> ColumnStats {
    let nulls = values.iter().filter(|v| v.is_null()).count() as i64;

    match column_type {
        ColumnType::Int => {
            let ints: Vec<i64> = values.iter().filter_map(|v| v.as_int()).collect();
            ColumnStats::Int {
                inferred,
                nulls,
                min: ints.iter().min().copied(),
                max: ints.iter().max().copied(),
            }
        }
        ColumnType::Float => {
            let floats: Vec<f64> = values
                .iter()
                .filter_map(|v| v.as_float())
                .filter(|f| !f.is_nan())
                .collect();
            let avg = if floats.is_empty() {
                None
            } else {
                Some(floats.iter().sum::<f64>() / floats.len() as f64)
            };
            ColumnStats::Float {
                inferred,
                nulls,
                min: floats.iter().copied().reduce(f64::min),
                max: floats.iter().copied().reduce(f64::max),
                avg,
            }
        }
        ColumnType::Bool => ColumnStats::Bool { inferred, nulls },
        ColumnType::Str => {
            // Null counts as one distinct value when present.
            let mut distinct: BTreeSet<String> = BTreeSet::new();
            let mut has_null = false;
            for value in values {
                if value.is_null() {
                    has_null = true;
                } else {
                    distinct.insert(value.to_field());
                }
            }
            ColumnStats::String {
                inferred,
                nulls,
                distinct: distinct.len() as i64 + i64::from(has_null),
            }
        }
        ColumnType::Date => {
            let parsed: Vec<NaiveDateTime> = values
                .iter()
                .filter_map(|v| match v {
                    Value::Text(s) => {
                        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
                    }
                    _ => None,
                })
                .collect();
            // A stored timestamp that fails to parse back counts as null.
            let nulls = values.len() as i64 - parsed.len() as i64;
            ColumnStats::Datetime {
                inferred,
                nulls,
                start_date: parsed
                    .iter()
                    .min()
                    .map(|d| d.format(TIMESTAMP_FORMAT).to_string()),
                end_date: parsed
                    .iter()
                    .max()
                    .map(|d| d.format(TIMESTAMP_FORMAT).to_string()),
            }
        }
    }
}

fn local_timestamp(time: std::time::SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn backend_with(files: &[(&str, &str)]) -> (TempDir, Backend) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let backend = Backend::open(dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_table_stats_shape() {
        let (_dir, backend) =
            backend_with(&[("people.csv", "name,age\nAda,36\nBo,\n")]);
        let mut engine = StatsEngine::new();
        engine.update(&backend, "people");

        let doc: serde_json::Value =
            serde_json::from_str(&engine.render("people").unwrap()).unwrap();
        assert_eq!(doc["rows"], 2);
        assert_eq!(doc["columns"], 2);
        assert_eq!(doc["up_to_date"], true);
        assert_eq!(doc["stale_reason"], serde_json::Value::Null);
        assert_eq!(doc["schema"]["name"]["type"], "string");
        assert_eq!(doc["schema"]["name"]["distinct"], 2);
        assert_eq!(doc["schema"]["age"]["type"], "int");
        assert_eq!(doc["schema"]["age"]["nulls"], 1);
        assert_eq!(doc["schema"]["age"]["min"], 36);
        assert_eq!(doc["schema"]["age"]["max"], 36);
    }

    #[test]
    fn test_global_stats_totals() {
        let (_dir, backend) = backend_with(&[
            ("people.csv", "name,age\nAda,36\nBo,\n"),
            ("pets.csv", "pet\ncat\ndog\nemu\n"),
        ]);
        let mut engine = StatsEngine::new();
        engine.update(&backend, "global");

        let doc: serde_json::Value =
            serde_json::from_str(&engine.render("global").unwrap()).unwrap();
        assert_eq!(doc["up_to_date"], true);
        assert_eq!(doc["total_rows"], 5);
        assert_eq!(doc["total_columns"], 3);
        assert_eq!(doc["files"].as_array().unwrap().len(), 2);
        assert_eq!(doc["files"][0]["stat_file"], "/stats/people.json");
    }

    #[test]
    fn test_table_stats_cached_until_invalidated() {
        let (_dir, backend) =
            backend_with(&[("people.csv", "name,age\nAda,36\nBo,\n")]);
        let mut engine = StatsEngine::new();
        engine.update(&backend, "people");
        let first = engine.render("people").unwrap();

        engine.update(&backend, "people");
        assert_eq!(engine.render("people").unwrap(), first);

        engine.invalidate("people");
        assert!(engine.render("people").is_none());
    }

    #[test]
    fn test_float_stats_include_average() {
        let (_dir, backend) =
            backend_with(&[("m.csv", "x,tag\n1.5,a\n2.5,b\n,c\n")]);
        let mut engine = StatsEngine::new();
        engine.update(&backend, "m");

        let doc: serde_json::Value =
            serde_json::from_str(&engine.render("m").unwrap()).unwrap();
        assert_eq!(doc["schema"]["x"]["type"], "float");
        assert_eq!(doc["schema"]["x"]["min"], 1.5);
        assert_eq!(doc["schema"]["x"]["max"], 2.5);
        assert_eq!(doc["schema"]["x"]["avg"], 2.0);
        assert_eq!(doc["schema"]["x"]["nulls"], 1);
    }

    #[test]
    fn test_unknown_table_yields_no_document() {
        let (_dir, backend) = backend_with(&[("m.csv", "x\n1\n")]);
        let mut engine = StatsEngine::new();
        engine.update(&backend, "ghost");
        assert!(engine.render("ghost").is_none());
    }
}
