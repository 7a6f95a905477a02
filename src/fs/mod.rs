// src/fs/mod.rs

//! Virtual filesystem operations for csvfs
//!
//! This module implements the kernel-facing operation set. Every operation
//! takes a virtual absolute path; the resolver classifies it into one of
//! the closed set of object kinds, and the operation is fulfilled against
//! the relational store or the in-memory overlays:
//! - CSV mirrors and paginated pages are rendered from mirror tables
//! - SQL query files live in the virtual-file map and execute on `;`
//! - query results and statistics documents are cached overlays
//!
//! Errors surface as POSIX errno shapes (`ENOENT`/`EACCES`); query
//! failures and missing tables surface as placeholder text inside file
//! contents instead.

pub mod resolver;

use crate::backend::{quote_ident, Backend};
use crate::stats::StatsEngine;
use crate::table::Table;
use resolver::{basename, classify, file_stem, parse_pagination, FileKind};
use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

/// Default number of rows per paginated CSV page.
pub const DEFAULT_PAGE_SIZE: u64 = 3000;

/// Prospective size reported for statistics files before their first
/// materialization, so the first read receives the full document.
const STATS_PLACEHOLDER_SIZE: u64 = 4096 * 4096;

/// Errno-shaped operation failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
}

impl FsError {
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::PermissionDenied => libc::EACCES,
        }
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// File attributes as reported by `getattr`.
#[derive(Debug, Clone)]
pub struct Attr {
    pub kind: NodeKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub ctime: SystemTime,
    pub mtime: SystemTime,
    pub atime: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

impl DirEntry {
    fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Directory,
        }
    }

    fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
        }
    }
}

/// The kernel-facing filesystem over a CSV backend.
pub struct CsvFilesystem {
    backend: Backend,
    page_size: u64,
    virtual_files: HashMap<String, String>,
    query_results: HashMap<String, Option<Table>>,
    stats: StatsEngine,
}

impl CsvFilesystem {
    pub fn new(backend: Backend, page_size: u64) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
            virtual_files: HashMap::new(),
            query_results: HashMap::new(),
            stats: StatsEngine::new(),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Drop a cached statistics document so the next read recomputes it.
    pub fn invalidate_stats(&mut self, name: &str) {
        self.stats.invalidate(name);
    }

    /// Get file attributes.
    pub fn getattr(&self, path: &str) -> FsResult<Attr> {
        let kind = classify(path);
        if kind.is_directory() {
            return Ok(self.dir_attr());
        }

        match kind {
            FileKind::StatsFile => {
                let name = file_stem(path);
                let size = self
                    .stats
                    .document_size(name)
                    .unwrap_or(STATS_PLACEHOLDER_SIZE);
                let mtime = if name == "global" {
                    self.backend.creation_time()
                } else {
                    self.source_mtime(name)
                };
                Ok(self.file_attr(size, mtime))
            }
            FileKind::QueryFile => self
                .virtual_files
                .get(path)
                .map(|content| self.file_attr(content.len() as u64, self.backend.creation_time()))
                .ok_or(FsError::NotFound),
            FileKind::ResultFile => match self.query_results.get(file_stem(path)) {
                Some(Some(result)) => Ok(self.file_attr(
                    result.to_csv().len() as u64,
                    self.backend.creation_time(),
                )),
                _ => Err(FsError::NotFound),
            },
            FileKind::CsvFile => {
                let table = file_stem(path);
                match self
                    .backend
                    .query(&format!("SELECT * FROM {}", quote_ident(table)))
                {
                    Some(result) => {
                        Ok(self.file_attr(result.to_csv().len() as u64, self.source_mtime(table)))
                    }
                    None => Err(FsError::NotFound),
                }
            }
            FileKind::PaginatedCsvFile => {
                let Some((table, a, b)) = parse_pagination(path) else {
                    return Err(FsError::NotFound);
                };
                match self.page_query(&table, a, b) {
                    Some(result) if result.row_count() > 0 => {
                        Ok(self.file_attr(result.to_csv().len() as u64, self.source_mtime(&table)))
                    }
                    _ => Err(FsError::NotFound),
                }
            }
            _ => Err(FsError::NotFound),
        }
    }

    /// List directory contents, including `.` and `..`. Never fails.
    pub fn readdir(&self, path: &str) -> Vec<DirEntry> {
        let mut entries = vec![DirEntry::directory("."), DirEntry::directory("..")];

        match path {
            "/" => {
                entries.push(DirEntry::directory("data"));
                entries.push(DirEntry::directory("sql"));
                entries.push(DirEntry::directory("stats"));
            }
            "/data" => {
                let tables = self.backend.tables();
                for table in &tables {
                    if self.backend.row_count(table).unwrap_or(0) <= self.page_size as i64 {
                        entries.push(DirEntry::file(format!("{}.csv", table)));
                    }
                }
                for table in &tables {
                    if self.backend.row_count(table).unwrap_or(0) > self.page_size as i64 {
                        entries.push(DirEntry::directory(format!("paged_{}", table)));
                    }
                }
            }
            "/sql" => {
                entries.push(DirEntry::directory("queries"));
                entries.push(DirEntry::directory("results"));
            }
            "/sql/queries" => {
                let mut names: Vec<&str> = self
                    .virtual_files
                    .keys()
                    .filter(|p| p.starts_with("/sql/queries/"))
                    .map(|p| basename(p))
                    .collect();
                names.sort_unstable();
                for name in names {
                    entries.push(DirEntry::file(name));
                }
            }
            "/sql/results" => {
                let mut names: Vec<&String> = self.query_results.keys().collect();
                names.sort_unstable();
                for name in names {
                    entries.push(DirEntry::file(format!("{}.csv", name)));
                }
            }
            "/stats" => {
                for table in self.backend.tables() {
                    entries.push(DirEntry::file(format!("{}.json", table)));
                }
                entries.push(DirEntry::file("global.json"));
            }
            p if p.starts_with("/data/paged_") => match classify(p) {
                FileKind::PaginatedDirectory => {
                    let table = basename(p).strip_prefix("paged_").unwrap_or_default();
                    if let Some(total) = self.backend.row_count(table) {
                        let total = total.max(0) as u64;
                        let mut start = 0u64;
                        while start < total {
                            let end = (start + self.page_size - 1).min(total - 1);
                            entries.push(DirEntry::directory(format!(
                                "{}.{}-{}",
                                table,
                                start + 1,
                                end + 1
                            )));
                            start += self.page_size;
                        }
                    }
                }
                FileKind::PaginatedLeafDirectory => {
                    if let Some((stem, a, b)) = parse_pagination(p) {
                        entries.push(DirEntry::file(format!("{}.{}-{}.csv", stem, a, b)));
                    }
                }
                _ => {}
            },
            _ => {}
        }

        entries
    }

    /// Read up to `size` bytes from `offset` of the object's canonical
    /// byte form. Unreadable objects yield placeholder text, never errors.
    pub fn read(&mut self, path: &str, size: u64, offset: u64) -> Vec<u8> {
        let content = self.content_for(path);
        let bytes = content.as_bytes();

        let start = (offset as usize).min(bytes.len());
        let end = start.saturating_add(size as usize).min(bytes.len());
        bytes[start..end].to_vec()
    }

    /// Canonical byte form of a data-bearing object.
    fn content_for(&mut self, path: &str) -> String {
        match classify(path) {
            FileKind::CsvFile => {
                let table = file_stem(path);
                match self
                    .backend
                    .query(&format!("SELECT * FROM {}", quote_ident(table)))
                {
                    Some(result) => result.to_csv(),
                    None => format!("Error reading table `{}`", table),
                }
            }
            FileKind::PaginatedCsvFile => match parse_pagination(path) {
                Some((table, a, b)) => match self.page_query(&table, a, b) {
                    Some(result) => result.to_csv(),
                    None => format!(
                        "Error reading paginated table `{}` rows {}-{}",
                        table, a, b
                    ),
                },
                None => "Invalid pagination format".to_string(),
            },
            FileKind::QueryFile => self.virtual_files.get(path).cloned().unwrap_or_default(),
            FileKind::ResultFile => match self.query_results.get(file_stem(path)) {
                Some(Some(result)) => result.to_csv(),
                _ => "Query result not found".to_string(),
            },
            FileKind::StatsFile => {
                let name = file_stem(path).to_string();
                self.stats.update(&self.backend, &name);
                self.stats
                    .render(&name)
                    .unwrap_or_else(|| "Statistics not available".to_string())
            }
            _ => String::new(),
        }
    }

    /// Write into a query file, splicing at `offset`. Content that ends
    /// with `;` after trimming is executed as a SQL batch.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> FsResult<usize> {
        if classify(path) != FileKind::QueryFile {
            return Err(FsError::PermissionDenied);
        }

        let content = self.virtual_files.entry(path.to_string()).or_default();
        if offset == 0 {
            *content = String::from_utf8_lossy(data).into_owned();
        } else {
            let offset = offset as usize;
            let mut bytes = std::mem::take(content).into_bytes();
            if bytes.len() < offset {
                bytes.resize(offset, 0);
            }
            let end = offset + data.len();
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[offset..end].copy_from_slice(data);
            *content = String::from_utf8_lossy(&bytes).into_owned();
        }

        let ready = content.trim().ends_with(';');
        if ready {
            self.execute_query(path);
        }
        Ok(data.len())
    }

    /// Initialize an empty query file.
    pub fn create(&mut self, path: &str) -> FsResult<()> {
        if classify(path) != FileKind::QueryFile {
            return Err(FsError::PermissionDenied);
        }
        self.virtual_files.insert(path.to_string(), String::new());
        Ok(())
    }

    /// Pad with NUL or cut a query file to the exact byte length. A no-op
    /// for every other kind.
    pub fn truncate(&mut self, path: &str, length: u64) -> FsResult<()> {
        if classify(path) == FileKind::QueryFile {
            if let Some(content) = self.virtual_files.get_mut(path) {
                let mut bytes = std::mem::take(content).into_bytes();
                bytes.resize(length as usize, 0);
                *content = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        Ok(())
    }

    /// Remove a query file and its associated result.
    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        if classify(path) == FileKind::QueryFile && self.virtual_files.remove(path).is_some() {
            self.query_results.remove(file_stem(path));
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    /// Open succeeds trivially for every recognized file kind.
    pub fn open(&self, path: &str) -> FsResult<()> {
        if classify(path).is_file() {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    pub fn flush(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }

    pub fn release(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }

    pub fn fsync(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }

    /// Check access permissions.
    ///
    /// Directories and data files are readable, only query files are
    /// writable, and nothing is executable. A pure existence probe
    /// (`F_OK`) on result files and paginated pages verifies the object
    /// is actually backed by data.
    pub fn access(&self, path: &str, amode: i32) -> FsResult<()> {
        let kind = classify(path);

        if kind.is_directory() {
            if amode & (libc::X_OK | libc::W_OK) != 0 {
                return Err(FsError::PermissionDenied);
            }
            return Ok(());
        }

        if !kind.is_file() {
            return Err(FsError::NotFound);
        }

        if amode & libc::X_OK != 0 {
            return Err(FsError::PermissionDenied);
        }
        if amode & libc::W_OK != 0 {
            return if kind == FileKind::QueryFile {
                Ok(())
            } else {
                Err(FsError::PermissionDenied)
            };
        }
        if amode == libc::F_OK {
            return match kind {
                // Query files can always be created.
                FileKind::QueryFile => Ok(()),
                FileKind::ResultFile => {
                    if self.query_results.contains_key(file_stem(path)) {
                        Ok(())
                    } else {
                        Err(FsError::NotFound)
                    }
                }
                FileKind::PaginatedCsvFile => match parse_pagination(path) {
                    Some((table, a, _)) => self.page_exists(&table, a),
                    None => Err(FsError::NotFound),
                },
                _ => Ok(()),
            };
        }

        // R_OK
        Ok(())
    }

    /// Execute a query file as a multi-statement SQL batch.
    ///
    /// Statements are split on `;` and run in order; the last non-empty
    /// statement's result (or failure marker) lands under the file stem.
    fn execute_query(&mut self, path: &str) {
        let content = self.virtual_files.get(path).cloned().unwrap_or_default();
        let name = file_stem(path).to_string();
        debug!("Executing query file {}", path);

        for statement in content.split(';') {
            if statement.trim().is_empty() {
                continue;
            }
            let result = self.backend.query(statement);
            self.query_results.insert(name.clone(), result);
        }
    }

    fn page_query(&self, table: &str, a: u64, b: u64) -> Option<Table> {
        let limit = ((b as i128) - (a as i128) + 1).clamp(i64::MIN as i128, i64::MAX as i128);
        let offset = ((a as i128) - 1).clamp(0, i64::MAX as i128);
        self.backend.query(&format!(
            "SELECT * FROM {} LIMIT {} OFFSET {}",
            quote_ident(table),
            limit,
            offset
        ))
    }

    fn page_exists(&self, table: &str, a: u64) -> FsResult<()> {
        let probe = self.backend.query(&format!(
            "SELECT COUNT(*) AS count FROM {} WHERE rowid >= {}",
            quote_ident(table),
            a
        ));
        let count = probe
            .and_then(|t| t.rows.first().and_then(|r| r.first()).and_then(|v| v.as_int()));
        match count {
            Some(n) if n > 0 => Ok(()),
            _ => Err(FsError::NotFound),
        }
    }

    /// Recorded source-file mtime for a table, falling back to the mount
    /// creation time.
    fn source_mtime(&self, table: &str) -> SystemTime {
        self.backend
            .modified_time(&format!("{}.csv", table))
            .unwrap_or_else(|| self.backend.creation_time())
    }

    fn dir_attr(&self) -> Attr {
        let created = self.backend.creation_time();
        Attr {
            kind: NodeKind::Directory,
            size: 4096,
            perm: 0o755,
            nlink: 2,
            ctime: created,
            mtime: created,
            atime: SystemTime::now(),
        }
    }

    fn file_attr(&self, size: u64, mtime: SystemTime) -> Attr {
        Attr {
            kind: NodeKind::File,
            size,
            perm: 0o644,
            nlink: 1,
            ctime: self.backend.creation_time(),
            mtime,
            atime: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn filesystem(files: &[(&str, &str)], page_size: u64) -> (TempDir, CsvFilesystem) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let backend = Backend::open(dir.path()).unwrap();
        (dir, CsvFilesystem::new(backend, page_size))
    }

    #[test]
    fn test_query_file_lifecycle() {
        let (_dir, mut fs) = filesystem(&[], DEFAULT_PAGE_SIZE);
        let path = "/sql/queries/q1.sql";

        fs.create(path).unwrap();
        assert_eq!(fs.getattr(path).unwrap().size, 0);
        assert!(fs.read(path, 4096, 0).is_empty());

        fs.write(path, b"SELECT 1", 0).unwrap();
        assert_eq!(fs.read(path, 4096, 0), b"SELECT 1");
        assert_eq!(fs.getattr(path).unwrap().size, 8);

        fs.unlink(path).unwrap();
        assert!(matches!(fs.getattr(path), Err(FsError::NotFound)));
    }

    #[test]
    fn test_write_outside_queries_is_denied() {
        let (_dir, mut fs) = filesystem(&[("t.csv", "a\n1\n")], DEFAULT_PAGE_SIZE);

        assert_eq!(fs.write("/data/t.csv", b"x", 0), Err(FsError::PermissionDenied));
        assert_eq!(fs.create("/data/new.csv"), Err(FsError::PermissionDenied));
        assert_eq!(fs.unlink("/data/t.csv"), Err(FsError::PermissionDenied));
    }

    #[test]
    fn test_offset_write_pads_with_nul() {
        let (_dir, mut fs) = filesystem(&[], DEFAULT_PAGE_SIZE);
        let path = "/sql/queries/q.sql";

        fs.write(path, b"ab", 4).unwrap();
        assert_eq!(fs.read(path, 4096, 0), b"\0\0\0\0ab");

        fs.write(path, b"XY", 1).unwrap();
        assert_eq!(fs.read(path, 4096, 0), b"\0XY\0ab");
    }

    #[test]
    fn test_truncate_pads_and_cuts() {
        let (_dir, mut fs) = filesystem(&[], DEFAULT_PAGE_SIZE);
        let path = "/sql/queries/q.sql";

        fs.write(path, b"hello", 0).unwrap();
        fs.truncate(path, 2).unwrap();
        assert_eq!(fs.read(path, 4096, 0), b"he");

        fs.truncate(path, 4).unwrap();
        assert_eq!(fs.read(path, 4096, 0), b"he\0\0");

        // Not an error for other kinds.
        fs.truncate("/data/t.csv", 0).unwrap();
    }

    #[test]
    fn test_incomplete_query_does_not_execute() {
        let (_dir, mut fs) = filesystem(&[("t.csv", "a\n1\n")], DEFAULT_PAGE_SIZE);

        fs.write("/sql/queries/q.sql", b"SELECT * FROM t", 0).unwrap();
        let names: Vec<String> = fs
            .readdir("/sql/results")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn test_access_policy() {
        let (_dir, mut fs) = filesystem(&[("t.csv", "a\n1\n")], DEFAULT_PAGE_SIZE);

        // Directories: F_OK/R_OK only.
        fs.access("/data", libc::F_OK).unwrap();
        fs.access("/data", libc::R_OK).unwrap();
        assert!(fs.access("/data", libc::X_OK).is_err());

        // Data files are readable, never writable or executable.
        fs.access("/data/t.csv", libc::R_OK).unwrap();
        assert_eq!(
            fs.access("/data/t.csv", libc::W_OK),
            Err(FsError::PermissionDenied)
        );
        assert_eq!(
            fs.access("/data/t.csv", libc::X_OK),
            Err(FsError::PermissionDenied)
        );

        // Query files can always be created, even before they exist.
        fs.access("/sql/queries/new.sql", libc::F_OK).unwrap();
        fs.access("/sql/queries/new.sql", libc::W_OK).unwrap();

        // Result files exist only once their query ran.
        assert_eq!(
            fs.access("/sql/results/q.csv", libc::F_OK),
            Err(FsError::NotFound)
        );
        fs.write("/sql/queries/q.sql", b"SELECT * FROM t;", 0).unwrap();
        fs.access("/sql/results/q.csv", libc::F_OK).unwrap();
    }

    #[test]
    fn test_read_slices_canonical_form() {
        let (_dir, mut fs) = filesystem(&[("t.csv", "a,b\n1,2\n3,4\n")], DEFAULT_PAGE_SIZE);

        let full = fs.read("/data/t.csv", u64::MAX, 0);
        assert_eq!(full, b"a,b\n1,2\n3,4\n");
        assert_eq!(fs.read("/data/t.csv", 3, 0), b"a,b");
        assert_eq!(fs.read("/data/t.csv", 4, 4), b"1,2\n");
        assert!(fs.read("/data/t.csv", 10, 100).is_empty());

        let attr = fs.getattr("/data/t.csv").unwrap();
        assert_eq!(attr.size as usize, full.len());
    }

    #[test]
    fn test_missing_table_reads_placeholder() {
        let (_dir, mut fs) = filesystem(&[], DEFAULT_PAGE_SIZE);

        assert!(matches!(fs.getattr("/data/ghost.csv"), Err(FsError::NotFound)));
        assert_eq!(
            fs.read("/data/ghost.csv", u64::MAX, 0),
            b"Error reading table `ghost`"
        );
    }
}
