// src/backend.rs

//! Backend layer for csvfs
//!
//! This module owns all SQLite state and the CSV ingestion pipeline:
//! - Database bootstrap under `<source>/.backend/database.db`
//! - Mount-time reconciliation of source CSVs against mirror tables,
//!   driven by the `LastModified` bookkeeping table
//! - Schema override files (`<table>.csv.schema`) and typist persistence
//!   (`<source>/.backend/schema.json`)
//! - `sync_csv_to_db`: decode, type, and replace one mirror table
//! - `query`: run SQL, reducing every failure to a null marker

use crate::error::{Error, Result};
use crate::table::{decode_csv, Column, Table, TypedTable, Value};
use crate::typist::{ColumnSchema, ColumnType, Typist};
use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Owner of the relational store, the per-table typists, the modification
/// cache, and the persisted schema file.
pub struct Backend {
    source_dir: PathBuf,
    conn: Connection,
    c_time: SystemTime,
    m_cache: HashMap<String, f64>,
    typists: HashMap<String, Typist>,
}

impl Backend {
    /// Open the backend over a source directory and reconcile on-disk CSV
    /// files with their mirror tables.
    ///
    /// Schema override files are processed before CSV ingestion so that
    /// declared types are applied while ingesting. The typist map is
    /// persisted to `schema.json` once reconciliation completes.
    pub fn open(source_dir: &Path) -> Result<Self> {
        let source_dir = source_dir.canonicalize()?;
        let backend_dir = source_dir.join(".backend");
        if !backend_dir.exists() {
            std::fs::create_dir_all(&backend_dir)?;
        }

        debug!("Opening database at {}", backend_dir.join("database.db").display());
        let conn = Connection::open(backend_dir.join("database.db"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS LastModified (
                Id INTEGER PRIMARY KEY AUTOINCREMENT,
                FileName VARCHAR(255),
                TimeStamp TIMESTAMP
            )",
        )?;

        let mut backend = Self {
            source_dir,
            conn,
            c_time: SystemTime::now(),
            m_cache: HashMap::new(),
            typists: HashMap::new(),
        };

        if backend.schema_path().exists() {
            backend.load_typists()?;
        }
        backend.process_schema_overrides()?;
        backend.ingest_sources()?;
        backend.save_typists()?;

        info!(
            "Backend ready: {} mirror table(s)",
            backend.tables().len()
        );
        Ok(backend)
    }

    /// Creation time of this mount.
    pub fn creation_time(&self) -> SystemTime {
        self.c_time
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Last-seen modification time of a source file, by filename.
    ///
    /// Returns `None` for unknown files and for sentinel entries.
    pub fn modified_time(&self, filename: &str) -> Option<SystemTime> {
        let secs = *self.m_cache.get(filename)?;
        if secs == 0.0 {
            return None;
        }
        Some(UNIX_EPOCH + Duration::from_secs_f64(secs))
    }

    pub fn typist(&self, table: &str) -> Option<&Typist> {
        self.typists.get(table)
    }

    /// Run an SQL statement against the store.
    ///
    /// On success returns the tabular result; on any failure (including
    /// statements that produce no result shape) returns `None`. This
    /// operation never surfaces an error to callers.
    pub fn query(&self, sql: &str) -> Option<Table> {
        match self.try_query(sql) {
            Ok(result) => result,
            Err(e) => {
                debug!("Query failed: {}", e);
                None
            }
        }
    }

    fn try_query(&self, sql: &str) -> Result<Option<Table>> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut out: Vec<Vec<Value>> = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                    rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                    rusqlite::types::ValueRef::Text(t) => {
                        Value::Text(String::from_utf8_lossy(t).into_owned())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::Blob(b.to_vec()),
                });
            }
            out.push(values);
        }

        // Statements with no output columns (DDL/DML) have no tabular
        // result; the null marker stands in for them.
        if column_count == 0 {
            return Ok(None);
        }
        Ok(Some(Table { columns, rows: out }))
    }

    /// Names of all mirror tables, excluding bookkeeping and
    /// engine-internal tables.
    pub fn tables(&self) -> Vec<String> {
        let mut stmt = match self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
               AND name NOT IN ('LastModified', 'sqlite_sequence')
             ORDER BY name",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!("Failed to enumerate tables: {}", e);
                return Vec::new();
            }
        };

        stmt.query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>())
            .unwrap_or_else(|e| {
                warn!("Failed to enumerate tables: {}", e);
                Vec::new()
            })
    }

    /// Row count of one mirror table, if it exists.
    pub fn row_count(&self, table: &str) -> Option<i64> {
        let result = self.query(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))?;
        result.rows.first()?.first()?.as_int()
    }

    /// Decode, type, and write one CSV file into its mirror table.
    ///
    /// Failures are reported and the file is skipped; nothing propagates
    /// to callers. Columns typed as int that contain nulls are stored as
    /// TEXT so null distinguishability survives.
    pub fn sync_csv_to_db(&mut self, path: &Path) {
        let Some(table) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
        else {
            warn!("Skipping {}: unusable file name", path.display());
            return;
        };

        debug!("Syncing {} into table {:?}", path.display(), table);
        let raw = match decode_csv(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Error uploading {}: {}", path.display(), e);
                return;
            }
        };

        let typist = self.typists.entry(table.clone()).or_default();
        let typed = match typist.apply(raw) {
            Ok(typed) => typed,
            Err(e) => {
                warn!("Error uploading {}: {}", path.display(), e);
                return;
            }
        };

        if let Err(e) = self.write_mirror(&table, &typed) {
            warn!("Error uploading {}: {}", path.display(), e);
        }
    }

    /// Replace the mirror table for `table` with the typed rows.
    fn write_mirror(&mut self, table: &str, typed: &TypedTable) -> Result<()> {
        if typed.headers.is_empty() {
            return Err(Error::InitError(format!("table {:?} has no columns", table)));
        }

        // Int columns holding nulls degrade to TEXT storage.
        let as_text: Vec<bool> = typed
            .columns
            .iter()
            .map(|col| matches!(col, Column::Int(_)) && col.null_count() > 0)
            .collect();

        let declarations: Vec<String> = typed
            .headers
            .iter()
            .zip(typed.columns.iter())
            .zip(as_text.iter())
            .map(|((header, column), text)| {
                let class = if *text {
                    "TEXT"
                } else {
                    match column {
                        Column::Int(_) | Column::Bool(_) => "INTEGER",
                        Column::Float(_) => "REAL",
                        Column::DateTime(_) => "TIMESTAMP",
                        Column::Text(_) => "TEXT",
                    }
                };
                format!("{} {}", quote_ident(header), class)
            })
            .collect();

        let quoted = quote_ident(table);
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quoted))?;
        tx.execute(
            &format!("CREATE TABLE {} ({})", quoted, declarations.join(", ")),
            [],
        )?;

        {
            let placeholders: Vec<String> =
                (1..=typed.headers.len()).map(|i| format!("?{}", i)).collect();
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} VALUES ({})",
                quoted,
                placeholders.join(", ")
            ))?;

            for row in 0..typed.row_count() {
                let params: Vec<rusqlite::types::Value> = typed
                    .columns
                    .iter()
                    .zip(as_text.iter())
                    .map(|(column, text)| storage_value(column, row, *text))
                    .collect();
                stmt.execute(rusqlite::params_from_iter(params))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn schema_path(&self) -> PathBuf {
        self.source_dir.join(".backend/schema.json")
    }

    /// Load typist state persisted by an earlier mount.
    fn load_typists(&mut self) -> Result<()> {
        let text = std::fs::read_to_string(self.schema_path())?;
        let schemas: BTreeMap<String, BTreeMap<String, ColumnSchema>> =
            serde_json::from_str(&text)?;

        for (table, schema) in schemas {
            self.typists.insert(table, Typist::from_persisted(schema));
        }
        Ok(())
    }

    /// Persist the typist map to `schema.json`, pretty-printed.
    fn save_typists(&self) -> Result<()> {
        let schemas: BTreeMap<&String, &BTreeMap<String, ColumnSchema>> = self
            .typists
            .iter()
            .map(|(table, typist)| (table, &typist.schema))
            .collect();

        let text = serde_json::to_string_pretty(&schemas)?;
        std::fs::write(self.schema_path(), text)?;
        Ok(())
    }

    /// Files of the source directory, sorted by name for stable ingestion
    /// order.
    fn source_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.source_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Process `<table>.csv.schema` override files.
    ///
    /// An override newer than its `LastModified` record forces re-ingestion
    /// of the table. The declared typist is installed only when ingestion
    /// is pending or the table has no typist yet, so persisted inferred
    /// entries survive remounts with an unchanged override.
    fn process_schema_overrides(&mut self) -> Result<()> {
        for path in self.source_files()? {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            let Some(csv_name) = filename.strip_suffix(".schema").map(str::to_string) else {
                continue;
            };
            let Some(table) = csv_name.strip_suffix(".csv").map(str::to_string) else {
                continue;
            };

            let declared = match parse_override(&std::fs::read_to_string(&path)?) {
                Ok(declared) => declared,
                Err(e) => {
                    warn!("Ignoring schema override {}: {}", path.display(), e);
                    continue;
                }
            };

            let mtime = mtime_seconds(&path)?;
            self.m_cache.insert(filename.clone(), mtime);

            match self.recorded_mtime(&filename)? {
                None => {
                    self.record_mtime(&filename, mtime, true)?;
                    self.m_cache.insert(csv_name.clone(), 0.0);
                }
                Some(recorded) if recorded < mtime => {
                    self.record_mtime(&filename, mtime, false)?;
                    self.m_cache.insert(csv_name.clone(), 0.0);
                }
                Some(_) => {}
            }

            let pending = self.m_cache.get(&csv_name) == Some(&0.0);
            if pending || !self.typists.contains_key(&table) {
                info!("Applying schema override for table {:?}", table);
                self.typists.insert(table, Typist::with_declared(declared));
            }
        }
        Ok(())
    }

    /// Reconcile every `*.csv` in the source directory, re-ingesting the
    /// ones whose modification cache entry carries the sentinel.
    fn ingest_sources(&mut self) -> Result<()> {
        for path in self.source_files()? {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            let Some(table) = filename.strip_suffix(".csv").map(str::to_string) else {
                continue;
            };

            let mtime = mtime_seconds(&path)?;
            self.m_cache.entry(filename.clone()).or_insert(mtime);
            self.typists.entry(table).or_default();

            match self.recorded_mtime(&filename)? {
                None => {
                    self.record_mtime(&filename, mtime, true)?;
                    self.m_cache.insert(filename.clone(), 0.0);
                }
                Some(recorded) if recorded < mtime => {
                    self.record_mtime(&filename, mtime, false)?;
                    self.m_cache.insert(filename.clone(), 0.0);
                }
                Some(_) => {}
            }

            if self.m_cache.get(&filename) == Some(&0.0) {
                self.sync_csv_to_db(&path);
                self.m_cache.insert(filename, mtime);
            }
        }
        Ok(())
    }

    fn recorded_mtime(&self, filename: &str) -> Result<Option<f64>> {
        let recorded = self
            .conn
            .query_row(
                "SELECT TimeStamp FROM LastModified WHERE FileName = ?1",
                [filename],
                |row| row.get::<_, f64>(0),
            )
            .optional()?;
        Ok(recorded)
    }

    fn record_mtime(&self, filename: &str, mtime: f64, insert: bool) -> Result<()> {
        if insert {
            self.conn.execute(
                "INSERT INTO LastModified (FileName, TimeStamp) VALUES (?1, ?2)",
                rusqlite::params![filename, mtime],
            )?;
        } else {
            self.conn.execute(
                "UPDATE LastModified SET TimeStamp = ?1 WHERE FileName = ?2",
                rusqlite::params![mtime, filename],
            )?;
        }
        Ok(())
    }
}

/// A typed cell as bound into the mirror table.
fn storage_value(column: &Column, row: usize, as_text: bool) -> rusqlite::types::Value {
    match column.value(row) {
        Value::Null => rusqlite::types::Value::Null,
        Value::Int(v) if as_text => rusqlite::types::Value::Text(v.to_string()),
        Value::Int(v) => rusqlite::types::Value::Integer(v),
        Value::Float(v) => rusqlite::types::Value::Real(v),
        Value::Text(v) => rusqlite::types::Value::Text(v),
        Value::Blob(v) => rusqlite::types::Value::Blob(v),
    }
}

fn mtime_seconds(path: &Path) -> Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

/// Parse a schema override body: non-empty `COLUMN:TYPE` lines.
///
/// Any malformed line rejects the whole file.
fn parse_override(text: &str) -> Result<BTreeMap<String, ColumnType>> {
    let mut declared = BTreeMap::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((column, token)) = line.split_once(':') else {
            return Err(Error::SchemaParse(line.to_string()));
        };
        let Some(column_type) = ColumnType::from_override_token(token.trim()) else {
            return Err(Error::SchemaParse(line.to_string()));
        };
        declared.insert(column.trim().to_string(), column_type);
    }
    Ok(declared)
}
