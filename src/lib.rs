// src/lib.rs

//! csvfs
//!
//! Presents a directory of CSV files as a virtual, structured filesystem
//! in which the same tabular data is simultaneously viewable as whole CSV
//! documents, row-ranged CSV pages, executable SQL query files, and JSON
//! schema/statistics documents.
//!
//! # Architecture
//!
//! - Database-first: every CSV is mirrored into a SQLite table at mount
//!   time, with freshness tracked in a bookkeeping table
//! - Typist: heuristic column-type recovery with persisted schemas and
//!   user overrides
//! - Namespace resolver: pure path-grammar dispatch onto a closed set of
//!   object kinds
//! - Virtual filesystem operations: the kernel-facing operation set over
//!   the relational store and in-memory overlays

pub mod backend;
mod error;
pub mod fs;
pub mod mount;
pub mod stats;
pub mod table;
pub mod typist;

pub use error::{Error, Result};
