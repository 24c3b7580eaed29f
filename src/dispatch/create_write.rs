//! The write path: `create` stages a new file with the remote platform and
//! opens it for writing, `write` appends to its staging file, and the
//! write-handle half of `release` schedules finalization. `mkdir`, `unlink`,
//! `rmdir`, `rename`, and `symlink` all return `NotSupported`: the remote
//! contract this mount talks to has no endpoint for any of them, so this
//! reports that rather than faking the operation locally.

use super::attr::attr_for_inode;
use super::handles::FileHandle;
use super::DispatchState;
use crate::error::{errno_for, Error, Result};
use crate::index::types::DataObjectKind;
use crate::upload::staging::StagingFile;
use fuser::{ReplyCreate, ReplyEmpty, ReplyEntry, ReplyWrite, Request};
use rand::Rng;
use std::ffi::OsStr;

pub fn create(state: &mut DispatchState, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, _flags: i32, reply: ReplyCreate) {
    let Some(name) = name.to_str() else {
        reply.error(libc::EINVAL);
        return;
    };

    let result = (|| -> Result<(u64, u64)> {
        if state.config.read_only {
            return Err(Error::permission_denied("mount is read-only"));
        }

        let dir = state.index.directory_by_inode(parent)?;
        if dir.is_synthetic() {
            return Err(Error::permission_denied("cannot create files directly under scaffolding directories"));
        }
        if state.project_read_only(&dir.project_id) {
            return Err(Error::permission_denied(format!("project {} is read-only", dir.project_id)));
        }

        let parent_path = state.index.path_for_inode(parent)?;
        let nonce: u64 = rand::thread_rng().gen();
        let nonce = format!("{nonce:x}");

        let project_id = dir.project_id.clone();
        let project_folder = dir.project_folder.clone();
        let name_owned = name.to_string();
        let remote = state.remote.clone();
        let file_id = state
            .runtime
            .block_on(async move { remote.file_new(&project_id, &name_owned, &project_folder, &nonce).await })?;

        let staging_path = crate::upload::staging::staging_path(&state.config.staging_dir);
        let staging = StagingFile::create(staging_path.clone())?;

        let inode = state.index.create_data_object(
            DataObjectKind::Regular,
            &file_id,
            &dir.project_id,
            &parent_path,
            name,
            &staging_path.to_string_lossy(),
        )?;

        state.upload.create(inode, file_id, staging)?;
        let fh = state.file_handles.insert(FileHandle::NewlyCreatedReadWrite { inode })?;
        Ok((inode, fh))
    })();

    match result {
        Ok((inode, fh)) => match attr_for_inode(state, inode) {
            Ok(attr) => reply.created(&state.attr_ttl(), &attr, 0, fh, 0),
            Err(e) => reply.error(errno_for(&e)),
        },
        Err(e) => reply.error(errno_for(&e)),
    }
}

pub fn write(state: &mut DispatchState, _req: &Request<'_>, _ino: u64, fh: u64, offset: i64, data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyWrite) {
    let Some(handle) = state.file_handles.get(fh) else {
        reply.error(libc::EBADF);
        return;
    };

    let FileHandle::NewlyCreatedReadWrite { inode } = handle else {
        reply.error(errno_for(&Error::not_supported("handle is not open for writing")));
        return;
    };
    let inode = *inode;

    let upload = state.upload.clone();
    let data = data.to_vec();
    let result = state.runtime.block_on(async move { upload.write(inode, offset.max(0) as u64, &data).await });

    match result {
        Ok(written) => reply.written(written),
        Err(e) => reply.error(errno_for(&e)),
    }
}

/// Releases a write-path file handle, scheduling background finalization.
/// Called from the dispatcher's combined `release` after it has determined
/// the handle is the write-path variant; read-path release lives in
/// `open_read::release_read_handle`.
pub fn release_write_handle(state: &DispatchState, inode: u64) {
    if let Err(e) = state.upload.release(inode) {
        tracing::warn!(error = %e, inode, "failed to schedule upload finalization on release");
    }
}

pub fn mkdir(_state: &mut DispatchState, _req: &Request<'_>, _parent: u64, _name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
    reply.error(errno_for(&Error::not_supported("mkdir has no remote endpoint")));
}

pub fn unlink(_state: &mut DispatchState, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
    reply.error(errno_for(&Error::not_supported("unlink has no remote endpoint")));
}

pub fn rmdir(_state: &mut DispatchState, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
    reply.error(errno_for(&Error::not_supported("rmdir has no remote endpoint")));
}

#[allow(clippy::too_many_arguments)]
pub fn rename(_state: &mut DispatchState, _req: &Request<'_>, _parent: u64, _name: &OsStr, _newparent: u64, _newname: &OsStr, _flags: u32, reply: ReplyEmpty) {
    reply.error(errno_for(&Error::not_supported("rename has no remote endpoint")));
}

pub fn symlink(_state: &mut DispatchState, _req: &Request<'_>, _parent: u64, _name: &OsStr, _link: &std::path::Path, reply: ReplyEntry) {
    reply.error(errno_for(&Error::not_supported("symlink has no remote endpoint")));
}
