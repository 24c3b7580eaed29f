//! `lookup`, `opendir`, `readdir`, `releasedir`, `readlink`.
//!
//! Every operation here resolves an inode to its path and ensures the
//! relevant directory is populated, via
//! [`crate::index::MetadataIndex::ensure_populated`], before touching the
//! namespace.

use super::attr::attr_for_inode;
use super::handles::DirHandle;
use super::DispatchState;
use crate::error::{errno_for, Error};
use crate::index::types::ObjType;
use fuser::{FileType, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, Request};
use std::ffi::OsStr;

fn ensure_populated(state: &DispatchState, path: &str, inode: u64) -> crate::error::Result<()> {
    state
        .runtime
        .block_on(state.index.ensure_populated(path, inode, state.remote.as_ref()))
}

/// Resolves a mount-relative path back to its inode via one namespace
/// lookup on its own parent, used only to find `..`'s inode from a
/// directory's own path.
fn path_to_inode(state: &DispatchState, path: &str) -> crate::error::Result<u64> {
    if path.is_empty() {
        return Ok(crate::index::types::ROOT_INODE);
    }
    let (grandparent, name) = path.rsplit_once('/').unwrap_or(("", path));
    state.index.lookup(grandparent, name).map(|(_, inode)| inode)
}

pub fn lookup(state: &DispatchState, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
    let Some(name) = name.to_str() else {
        reply.error(libc::EINVAL);
        return;
    };

    let result = (|| -> crate::error::Result<_> {
        let parent_path = state.index.path_for_inode(parent)?;
        ensure_populated(state, &parent_path, parent)?;
        let (_obj_type, inode) = state.index.lookup(&parent_path, name)?;
        attr_for_inode(state, inode)
    })();

    match result {
        Ok(attr) => reply.entry(&state.entry_ttl(), &attr, 0),
        Err(e) => reply.error(errno_for(&e)),
    }
}

pub fn opendir(state: &mut DispatchState, _req: &Request, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
    let result = (|| -> crate::error::Result<_> {
        let path = state.index.path_for_inode(ino)?;
        ensure_populated(state, &path, ino)?;
        let children = state.index.read_dir(&path)?;

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        let parent_path = path.rsplit_once('/').map_or("", |(p, _)| p);
        let parent_inode = path_to_inode(state, parent_path).unwrap_or(crate::index::types::ROOT_INODE);
        entries.push((parent_inode, FileType::Directory, "..".to_string()));

        for child in children {
            let kind = match child.obj_type {
                ObjType::Directory => FileType::Directory,
                ObjType::DataObject => FileType::RegularFile,
            };
            entries.push((child.inode, kind, child.name));
        }

        state.dir_handles.insert(DirHandle { entries })
    })();

    match result {
        Ok(handle_id) => reply.opened(handle_id, 0),
        Err(e) => reply.error(errno_for(&e)),
    }
}

pub fn readdir(state: &mut DispatchState, _req: &Request, _ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectory) {
    let Some(handle) = state.dir_handles.get(fh) else {
        reply.error(libc::EBADF);
        return;
    };

    for (i, (inode, kind, name)) in handle.entries.iter().enumerate().skip(offset.max(0) as usize) {
        if reply.add(*inode, (i + 1) as i64, *kind, name) {
            break;
        }
    }
    reply.ok();
}

pub fn releasedir(state: &mut DispatchState, _req: &Request, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
    state.dir_handles.remove(fh);
    reply.ok();
}

pub fn readlink(state: &DispatchState, _req: &Request, ino: u64, reply: ReplyData) {
    match state.index.data_object_by_inode(ino) {
        Ok(obj) if obj.kind == crate::index::types::DataObjectKind::Symlink => {
            reply.data(obj.inline_data.as_bytes())
        }
        Ok(_) => reply.error(errno_for(&Error::not_supported("not a symlink"))),
        Err(e) => reply.error(errno_for(&e)),
    }
}
