//! Attribute synthesis and the `getattr`/`setattr` FUSE operations.
//!
//! Filesystem nodes are modeled as a pattern match over the index's own
//! tagged `ObjType`/`DataObjectKind` variants rather than a subtype
//! hierarchy. There is no attribute cache layered on top here: the metadata
//! index's own store is already the cache, and every lookup is a local,
//! synchronous query under its mutex.

use super::DispatchState;
use crate::error::{errno_for, Result};
use crate::index::types::{DataObject, DataObjectKind, Directory};
use fuser::{FileAttr, FileType, ReplyAttr, Request};
use std::time::{Duration, UNIX_EPOCH};

fn directory_attr(dir: &Directory, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino: dir.inode,
        size: 4096,
        blocks: 8,
        atime: UNIX_EPOCH + Duration::from_secs(dir.mtime.max(0) as u64),
        mtime: UNIX_EPOCH + Duration::from_secs(dir.mtime.max(0) as u64),
        ctime: UNIX_EPOCH + Duration::from_secs(dir.ctime.max(0) as u64),
        crtime: UNIX_EPOCH,
        kind: FileType::Directory,
        perm: 0o755,
        nlink: 2,
        uid,
        gid,
        rdev: 0,
        flags: 0,
        blksize: 5120,
    }
}

fn data_object_attr(obj: &DataObject, uid: u32, gid: u32) -> FileAttr {
    let (kind, perm, size) = match obj.kind {
        DataObjectKind::Regular => (FileType::RegularFile, 0o644, obj.size),
        DataObjectKind::Symlink => (FileType::Symlink, 0o777, obj.inline_data.len() as u64),
        // Applets, workflows, records, databases: read-only projections of
        // non-file remote entities.
        _ => (FileType::RegularFile, 0o444, obj.size),
    };
    FileAttr {
        ino: obj.inode,
        size,
        blocks: (size + 511) / 512,
        atime: UNIX_EPOCH + Duration::from_secs(obj.mtime.max(0) as u64),
        mtime: UNIX_EPOCH + Duration::from_secs(obj.mtime.max(0) as u64),
        ctime: UNIX_EPOCH + Duration::from_secs(obj.ctime.max(0) as u64),
        crtime: UNIX_EPOCH,
        kind,
        perm,
        nlink: obj.nlink.max(1),
        uid,
        gid,
        rdev: 0,
        flags: 0,
        blksize: 5120,
    }
}

/// Synthesizes a `FileAttr` for `inode`, trying a directory row first and
/// falling back to a data-object row (the two tables partition all inodes).
pub fn attr_for_inode(state: &DispatchState, inode: u64) -> Result<FileAttr> {
    if let Ok(dir) = state.index.directory_by_inode(inode) {
        return Ok(directory_attr(&dir, state.config.uid, state.config.gid));
    }
    let obj = state.index.data_object_by_inode(inode)?;
    Ok(data_object_attr(&obj, state.config.uid, state.config.gid))
}

pub fn getattr(state: &DispatchState, _req: &Request, ino: u64, reply: ReplyAttr) {
    match attr_for_inode(state, ino) {
        Ok(attr) => reply.attr(&state.attr_ttl(), &attr),
        Err(e) => reply.error(errno_for(&e)),
    }
}

/// The remote contract exposes no permission or truncate endpoint, and
/// existing remote files have no writable semantics; every requested
/// mutation here is ignored and the current attributes are returned.
#[allow(clippy::too_many_arguments)]
pub fn setattr(
    state: &DispatchState,
    _req: &Request<'_>,
    ino: u64,
    _mode: Option<u32>,
    _uid: Option<u32>,
    _gid: Option<u32>,
    _size: Option<u64>,
    _atime: Option<fuser::TimeOrNow>,
    _mtime: Option<fuser::TimeOrNow>,
    _ctime: Option<std::time::SystemTime>,
    _fh: Option<u64>,
    _crtime: Option<std::time::SystemTime>,
    _chgtime: Option<std::time::SystemTime>,
    _bkuptime: Option<std::time::SystemTime>,
    _flags: Option<u32>,
    reply: ReplyAttr,
) {
    match attr_for_inode(state, ino) {
        Ok(attr) => reply.attr(&state.attr_ttl(), &attr),
        Err(e) => reply.error(errno_for(&e)),
    }
}
