// src/fs/resolver.rs

//! Namespace resolver for csvfs
//!
//! Pure classification of virtual absolute paths into the closed set of
//! object kinds. Rules are evaluated top-to-bottom; the first match wins.
//! The resolver holds no state and consults nothing but the path itself.

use lazy_static::lazy_static;
use regex::Regex;

/// The fixed virtual directory tree.
pub const VIRTUAL_DIRS: &[&str] = &[
    "/",
    "/data",
    "/sql",
    "/sql/queries",
    "/sql/results",
    "/stats",
    "/schemas",
];

lazy_static! {
    /// Pagination shape: `<stem>.<a>-<b>`, with an optional trailing
    /// `.csv` the capture ignores.
    static ref PAGINATION_RE: Regex = Regex::new(r"^(.+)\.(\d+)-(\d+)").unwrap();
}

/// Every path classifies into exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    StatsFile,
    PaginatedCsvFile,
    CsvFile,
    PaginatedLeafDirectory,
    PaginatedDirectory,
    QueryFile,
    ResultFile,
    Unknown,
}

impl FileKind {
    pub fn is_directory(&self) -> bool {
        matches!(
            self,
            FileKind::Directory | FileKind::PaginatedDirectory | FileKind::PaginatedLeafDirectory
        )
    }

    pub fn is_file(&self) -> bool {
        matches!(
            self,
            FileKind::StatsFile
                | FileKind::PaginatedCsvFile
                | FileKind::CsvFile
                | FileKind::QueryFile
                | FileKind::ResultFile
        )
    }
}

/// Classify a virtual absolute path.
pub fn classify(path: &str) -> FileKind {
    if VIRTUAL_DIRS.contains(&path) {
        FileKind::Directory
    } else if path.starts_with("/stats/") && path.ends_with(".json") {
        FileKind::StatsFile
    } else if path.starts_with("/data/") && path.ends_with(".csv") {
        if is_paginated(path) {
            FileKind::PaginatedCsvFile
        } else {
            FileKind::CsvFile
        }
    } else if path.starts_with("/data/paged_") {
        if is_paginated(path) {
            FileKind::PaginatedLeafDirectory
        } else {
            FileKind::PaginatedDirectory
        }
    } else if path.starts_with("/sql/queries/") && path.ends_with(".sql") {
        FileKind::QueryFile
    } else if path.starts_with("/sql/results/") && path.ends_with(".csv") {
        FileKind::ResultFile
    } else {
        FileKind::Unknown
    }
}

/// Final component of a virtual path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Basename with its final extension removed.
pub fn file_stem(path: &str) -> &str {
    let name = basename(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

fn is_paginated(path: &str) -> bool {
    PAGINATION_RE.is_match(basename(path))
}

/// Extract `(stem, a, b)` from a pagination-shaped basename.
pub fn parse_pagination(path: &str) -> Option<(String, u64, u64)> {
    let caps = PAGINATION_RE.captures(basename(path))?;
    Some((
        caps[1].to_string(),
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}
