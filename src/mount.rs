// src/mount.rs

//! Kernel bridge for csvfs
//!
//! Thin adapter between the path-based operation set of
//! [`CsvFilesystem`](crate::fs::CsvFilesystem) and the `fuse_mt`
//! collaborator, which owns inode bookkeeping and the kernel protocol.
//! No filesystem logic lives here; every callback converts arguments,
//! takes the coarse lock, and delegates.
//!
//! The dispatcher runs with a single thread, matching the serial
//! execution model of the operation set; the mutex satisfies the
//! bridge's `Sync` bound.

use crate::fs::{Attr, CsvFilesystem, DirEntry, NodeKind};
use fuse_mt::{
    CallbackResult, CreatedEntry, FileAttr, FileType, FilesystemMT, FuseMT, RequestInfo,
    ResultCreate, ResultEmpty, ResultEntry, ResultOpen, ResultReaddir, ResultSlice, ResultWrite,
};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Attribute cache lifetime handed to the kernel.
const TTL: Duration = Duration::from_secs(1);

/// Mount a filesystem at `mountpoint` and serve until unmounted.
pub fn mount(filesystem: CsvFilesystem, mountpoint: &Path) -> std::io::Result<()> {
    let options = [OsStr::new("-o"), OsStr::new("fsname=csvfs")];
    let bridge = FuseBridge {
        fs: Mutex::new(filesystem),
    };
    fuse_mt::mount(FuseMT::new(bridge, 1), &mountpoint, &options)
}

struct FuseBridge {
    fs: Mutex<CsvFilesystem>,
}

impl FuseBridge {
    fn locked(&self) -> MutexGuard<'_, CsvFilesystem> {
        self.fs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The virtual namespace is UTF-8; anything else cannot name an object.
fn path_str(path: &Path) -> Result<&str, libc::c_int> {
    path.to_str().ok_or(libc::ENOENT)
}

fn child_path(parent: &Path, name: &OsStr) -> Result<String, libc::c_int> {
    let parent = path_str(parent)?;
    let name = name.to_str().ok_or(libc::ENOENT)?;
    Ok(format!("{}/{}", parent.trim_end_matches('/'), name))
}

fn to_file_attr(attr: Attr, req: &RequestInfo) -> FileAttr {
    FileAttr {
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: match attr.kind {
            NodeKind::Directory => FileType::Directory,
            NodeKind::File => FileType::RegularFile,
        },
        perm: attr.perm,
        nlink: attr.nlink,
        uid: req.uid,
        gid: req.gid,
        rdev: 0,
        flags: 0,
    }
}

fn to_directory_entry(entry: DirEntry) -> fuse_mt::DirectoryEntry {
    fuse_mt::DirectoryEntry {
        name: OsString::from(entry.name),
        kind: match entry.kind {
            NodeKind::Directory => FileType::Directory,
            NodeKind::File => FileType::RegularFile,
        },
    }
}

impl FilesystemMT for FuseBridge {
    fn getattr(&self, req: RequestInfo, path: &Path, _fh: Option<u64>) -> ResultEntry {
        let path = path_str(path)?;
        let attr = self.locked().getattr(path).map_err(|e| e.errno())?;
        Ok((TTL, to_file_attr(attr, &req)))
    }

    fn opendir(&self, _req: RequestInfo, _path: &Path, _flags: u32) -> ResultOpen {
        Ok((0, 0))
    }

    fn readdir(&self, _req: RequestInfo, path: &Path, _fh: u64) -> ResultReaddir {
        let path = path_str(path)?;
        debug!("readdir {}", path);
        let entries = self.locked().readdir(path);
        Ok(entries.into_iter().map(to_directory_entry).collect())
    }

    fn releasedir(&self, _req: RequestInfo, _path: &Path, _fh: u64, _flags: u32) -> ResultEmpty {
        Ok(())
    }

    fn open(&self, _req: RequestInfo, path: &Path, _flags: u32) -> ResultOpen {
        let path = path_str(path)?;
        self.locked().open(path).map_err(|e| e.errno())?;
        Ok((0, 0))
    }

    fn read(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: u64,
        offset: u64,
        size: u32,
        callback: impl FnOnce(ResultSlice<'_>) -> CallbackResult,
    ) -> CallbackResult {
        match path_str(path) {
            Ok(path) => {
                let data = self.locked().read(path, size as u64, offset);
                callback(Ok(&data))
            }
            Err(errno) => callback(Err(errno)),
        }
    }

    fn write(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: u64,
        offset: u64,
        data: Vec<u8>,
        _flags: u32,
    ) -> ResultWrite {
        let path = path_str(path)?;
        let written = self
            .locked()
            .write(path, &data, offset)
            .map_err(|e| e.errno())?;
        Ok(written as u32)
    }

    fn truncate(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, size: u64) -> ResultEmpty {
        let path = path_str(path)?;
        self.locked().truncate(path, size).map_err(|e| e.errno())
    }

    fn create(
        &self,
        req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        _mode: u32,
        _flags: u32,
    ) -> ResultCreate {
        let path = child_path(parent, name)?;
        let mut fs = self.locked();
        fs.create(&path).map_err(|e| e.errno())?;
        let attr = fs.getattr(&path).map_err(|e| e.errno())?;
        Ok(CreatedEntry {
            ttl: TTL,
            attr: to_file_attr(attr, &req),
            fh: 0,
            flags: 0,
        })
    }

    fn unlink(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        let path = child_path(parent, name)?;
        self.locked().unlink(&path).map_err(|e| e.errno())
    }

    fn flush(&self, _req: RequestInfo, path: &Path, _fh: u64, _lock_owner: u64) -> ResultEmpty {
        let path = path_str(path)?;
        self.locked().flush(path).map_err(|e| e.errno())
    }

    fn release(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> ResultEmpty {
        let path = path_str(path)?;
        self.locked().release(path).map_err(|e| e.errno())
    }

    fn fsync(&self, _req: RequestInfo, path: &Path, _fh: u64, _datasync: bool) -> ResultEmpty {
        let path = path_str(path)?;
        self.locked().fsync(path).map_err(|e| e.errno())
    }

    fn access(&self, _req: RequestInfo, path: &Path, mask: u32) -> ResultEmpty {
        let path = path_str(path)?;
        self.locked()
            .access(path, mask as libc::c_int)
            .map_err(|e| e.errno())
    }
}
