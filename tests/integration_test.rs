// tests/integration_test.rs

//! Integration tests for csvfs
//!
//! These tests drive the virtual filesystem operations end to end over a
//! scratch source directory, the way the kernel bridge would.

use csvfs::backend::Backend;
use csvfs::fs::{CsvFilesystem, FsError, NodeKind};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_source(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        fs::write(dir.join(name), content).unwrap();
    }
}

fn mounted(files: &[(&str, &str)], page_size: u64) -> (TempDir, CsvFilesystem) {
    let dir = TempDir::new().unwrap();
    write_source(dir.path(), files);
    let backend = Backend::open(dir.path()).unwrap();
    (dir, CsvFilesystem::new(backend, page_size))
}

fn entry_names(fs: &CsvFilesystem, path: &str) -> Vec<String> {
    fs.readdir(path)
        .into_iter()
        .map(|entry| entry.name)
        .filter(|name| name != "." && name != "..")
        .collect()
}

fn read_all(fs: &mut CsvFilesystem, path: &str) -> String {
    String::from_utf8(fs.read(path, u64::MAX, 0)).unwrap()
}

#[test]
fn test_ingest_and_read_back() {
    let (dir, mut fs) = mounted(&[("people.csv", "name,age\nAda,36\nBo,\n")], 3000);

    assert_eq!(
        read_all(&mut fs, "/data/people.csv"),
        "name,age\nAda,36\nBo,\n"
    );

    let schema_text = fs::read_to_string(dir.path().join(".backend/schema.json")).unwrap();
    let schemas: serde_json::Value = serde_json::from_str(&schema_text).unwrap();
    assert_eq!(schemas["people"]["name"]["type"], "str");
    assert_eq!(schemas["people"]["name"]["inferred"], true);
    assert_eq!(schemas["people"]["age"]["type"], "int");
    assert_eq!(schemas["people"]["age"]["inferred"], true);
}

#[test]
fn test_schema_override_survives_remount() {
    let dir = TempDir::new().unwrap();
    write_source(dir.path(), &[("people.csv", "name,age\nAda,36\nBo,\n")]);

    // First mount infers age as int.
    drop(CsvFilesystem::new(Backend::open(dir.path()).unwrap(), 3000));

    // The user declares age a string and remounts.
    write_source(dir.path(), &[("people.csv.schema", "age:STR\n")]);
    let backend = Backend::open(dir.path()).unwrap();

    let schema = &backend.typist("people").unwrap().schema;
    assert_eq!(schema["age"].column_type, csvfs::typist::ColumnType::Str);
    assert!(!schema["age"].inferred, "declared types are not inferred");

    let mut fs = CsvFilesystem::new(backend, 3000);
    assert_eq!(
        read_all(&mut fs, "/data/people.csv"),
        "name,age\nAda,36\nBo,\n"
    );

    let stats: serde_json::Value =
        serde_json::from_str(&read_all(&mut fs, "/stats/people.json")).unwrap();
    assert_eq!(stats["schema"]["age"]["type"], "string");
    assert_eq!(stats["schema"]["age"]["inferred"], false);
}

#[test]
fn test_query_execution_produces_result_file() {
    let (_dir, mut fs) = mounted(&[("people.csv", "name,age\nAda,36\nBo,\n")], 3000);

    fs.write("/sql/queries/q1.sql", b"SELECT name FROM people;", 0)
        .unwrap();

    assert_eq!(entry_names(&fs, "/sql/queries"), vec!["q1.sql"]);
    assert_eq!(entry_names(&fs, "/sql/results"), vec!["q1.csv"]);
    assert_eq!(read_all(&mut fs, "/sql/results/q1.csv"), "name\nAda\nBo\n");

    let attr = fs.getattr("/sql/results/q1.csv").unwrap();
    assert_eq!(attr.size as usize, "name\nAda\nBo\n".len());
}

#[test]
fn test_failed_query_reads_placeholder() {
    let (_dir, mut fs) = mounted(&[("people.csv", "name,age\nAda,36\n")], 3000);

    fs.write("/sql/queries/bad.sql", b"SELECT nope FROM missing;", 0)
        .unwrap();

    // The result key exists, but reads surface the failure marker.
    assert_eq!(entry_names(&fs, "/sql/results"), vec!["bad.csv"]);
    assert_eq!(
        read_all(&mut fs, "/sql/results/bad.csv"),
        "Query result not found"
    );
    assert!(matches!(
        fs.getattr("/sql/results/bad.csv"),
        Err(FsError::NotFound)
    ));
}

#[test]
fn test_multi_statement_batch_keeps_last_result() {
    let (_dir, mut fs) = mounted(&[("people.csv", "name,age\nAda,36\nBo,\n")], 3000);

    fs.write(
        "/sql/queries/q.sql",
        b"SELECT age FROM people; SELECT name FROM people;",
        0,
    )
    .unwrap();

    assert_eq!(read_all(&mut fs, "/sql/results/q.csv"), "name\nAda\nBo\n");
}

#[test]
fn test_pagination_windows_cover_all_rows() {
    let (_dir, mut fs) = mounted(&[("nums.csv", "x\n1\n2\n3\n4\n5\n6\n7\n")], 3);

    // Large tables are paginated, not mirrored whole.
    let data_entries = entry_names(&fs, "/data");
    assert!(data_entries.contains(&"paged_nums".to_string()));
    assert!(!data_entries.contains(&"nums.csv".to_string()));

    assert_eq!(
        entry_names(&fs, "/data/paged_nums"),
        vec!["nums.1-3", "nums.4-6", "nums.7-7"]
    );
    assert_eq!(
        entry_names(&fs, "/data/paged_nums/nums.1-3"),
        vec!["nums.1-3.csv"]
    );

    // Windows cover every row exactly once.
    assert_eq!(
        read_all(&mut fs, "/data/paged_nums/nums.1-3/nums.1-3.csv"),
        "x\n1\n2\n3\n"
    );
    assert_eq!(
        read_all(&mut fs, "/data/paged_nums/nums.4-6/nums.4-6.csv"),
        "x\n4\n5\n6\n"
    );
    assert_eq!(
        read_all(&mut fs, "/data/paged_nums/nums.7-7/nums.7-7.csv"),
        "x\n7\n"
    );

    // A window past the end of the data does not exist.
    assert!(matches!(
        fs.getattr("/data/paged_nums/nums.8-10.csv"),
        Err(FsError::NotFound)
    ));
    assert!(fs
        .access("/data/paged_nums/nums.8-10.csv", libc::F_OK)
        .is_err());
}

#[test]
fn test_page_size_boundary() {
    // Exactly PAGE_SIZE rows: whole mirror, no pagination.
    let (_dir, fs) = mounted(&[("t.csv", "x\n1\n2\n3\n")], 3);
    assert_eq!(entry_names(&fs, "/data"), vec!["t.csv"]);

    // One row over: two windows, the last a single row.
    let (_dir, fs) = mounted(&[("t.csv", "x\n1\n2\n3\n4\n")], 3);
    assert_eq!(entry_names(&fs, "/data"), vec!["paged_t"]);
    assert_eq!(entry_names(&fs, "/data/paged_t"), vec!["t.1-3", "t.4-4"]);
}

#[test]
fn test_stats_document() {
    let (_dir, mut fs) = mounted(&[("people.csv", "name,age\nAda,36\nBo,\n")], 3000);

    // Before the first read the reported size is a prospective maximum.
    let before = fs.getattr("/stats/people.json").unwrap();
    let content = read_all(&mut fs, "/stats/people.json");
    assert!(before.size as usize >= content.len());

    let doc: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(doc["rows"], 2);
    assert_eq!(doc["columns"], 2);
    assert_eq!(doc["schema"]["name"]["type"], "string");
    assert_eq!(doc["schema"]["age"]["type"], "int");
    assert_eq!(doc["schema"]["age"]["nulls"], 1);
    assert_eq!(doc["schema"]["age"]["min"], 36);
    assert_eq!(doc["schema"]["age"]["max"], 36);

    // Once materialized, getattr reports the exact document size.
    let after = fs.getattr("/stats/people.json").unwrap();
    assert_eq!(after.size as usize, content.len());
}

#[test]
fn test_global_stats_document() {
    let (_dir, mut fs) = mounted(
        &[
            ("people.csv", "name,age\nAda,36\nBo,\n"),
            ("pets.csv", "pet\ncat\ndog\nemu\n"),
        ],
        3000,
    );

    let doc: serde_json::Value =
        serde_json::from_str(&read_all(&mut fs, "/stats/global.json")).unwrap();
    assert_eq!(doc["up_to_date"], true);
    assert_eq!(doc["total_rows"], 5);
    assert_eq!(doc["total_columns"], 3);

    let stats_entries = entry_names(&fs, "/stats");
    assert_eq!(stats_entries, vec!["people.json", "pets.json", "global.json"]);
}

#[test]
fn test_unlink_removes_query_and_result() {
    let (_dir, mut fs) = mounted(&[("people.csv", "name,age\nAda,36\nBo,\n")], 3000);

    fs.write("/sql/queries/q1.sql", b"SELECT name FROM people;", 0)
        .unwrap();
    assert_eq!(entry_names(&fs, "/sql/results"), vec!["q1.csv"]);

    fs.unlink("/sql/queries/q1.sql").unwrap();
    assert!(entry_names(&fs, "/sql/queries").is_empty());
    assert!(entry_names(&fs, "/sql/results").is_empty());
    assert!(matches!(
        fs.getattr("/sql/queries/q1.sql"),
        Err(FsError::NotFound)
    ));
}

#[test]
fn test_root_listing() {
    let (_dir, fs) = mounted(&[("people.csv", "name,age\nAda,36\n")], 3000);

    let root = fs.readdir("/");
    let names: Vec<&str> = root.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "data", "sql", "stats"]);
    assert!(root.iter().all(|e| e.kind == NodeKind::Directory));

    assert_eq!(entry_names(&fs, "/sql"), vec!["queries", "results"]);
}

#[test]
fn test_bookkeeping_tables_stay_hidden() {
    let (_dir, fs) = mounted(&[("people.csv", "name,age\nAda,36\n")], 3000);

    for dir in ["/data", "/stats"] {
        for entry in entry_names(&fs, dir) {
            assert!(
                !entry.contains("LastModified") && !entry.contains("sqlite_sequence"),
                "{} leaked into {}",
                entry,
                dir
            );
        }
    }
}

#[test]
fn test_reads_are_idempotent() {
    let (_dir, mut fs) = mounted(&[("people.csv", "name,age\nAda,36\nBo,\n")], 3000);

    let first = read_all(&mut fs, "/data/people.csv");
    let second = read_all(&mut fs, "/data/people.csv");
    assert_eq!(first, second);

    fs.write("/sql/queries/q.sql", b"SELECT 1;", 0).unwrap();
    fs.write("/sql/queries/q.sql", b"SELECT 1;", 0).unwrap();
    assert_eq!(read_all(&mut fs, "/sql/queries/q.sql"), "SELECT 1;");
}
