//! The dispatch layer: the single `impl Filesystem for FsWrapper` that every
//! kernel request lands on, routing each call to the metadata index,
//! prefetch subsystem, and upload subsystem.
//!
//! A single filesystem-wide mutex guards the metadata index and both handle
//! tables; it is never held across a suspension point. Concretely,
//! [`DispatchState`] methods that need the network take `&state.runtime`
//! and call `block_on` only around the narrow async call, after the
//! metadata index's own lock (inside [`crate::index::MetadataIndex`]) has
//! already been dropped.

pub mod attr;
pub mod create_write;
pub mod handles;
pub mod lookup_readdir;
pub mod open_read;
pub mod xattr;

use crate::config::MountConfig;
use crate::index::MetadataIndex;
use crate::prefetch::PrefetchManager;
use crate::remote::RemoteClient;
use crate::upload::UploadManager;
use fuser::{
    Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, ReplyXattr, Request,
};
use handles::{DirHandle, FileHandle, HandleTable, MAX_HANDLES};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything one mount needs, held behind the single filesystem-wide
/// mutex. The index, prefetcher, and uploader each additionally carry
/// their own internal locking for state that must survive independent of
/// this outer mutex: their background workers never hold the filesystem
/// mutex.
pub struct DispatchState {
    pub index: Arc<MetadataIndex>,
    pub remote: Arc<dyn RemoteClient>,
    pub prefetch: Arc<PrefetchManager>,
    pub upload: Arc<UploadManager>,
    pub config: MountConfig,
    pub runtime: Arc<tokio::runtime::Runtime>,
    pub file_handles: HandleTable<FileHandle>,
    pub dir_handles: HandleTable<DirHandle>,
    project_read_only: Mutex<HashMap<String, bool>>,
}

impl DispatchState {
    pub fn new(
        index: Arc<MetadataIndex>,
        remote: Arc<dyn RemoteClient>,
        prefetch: Arc<PrefetchManager>,
        upload: Arc<UploadManager>,
        config: MountConfig,
        runtime: Arc<tokio::runtime::Runtime>,
    ) -> Self {
        Self {
            index,
            remote,
            prefetch,
            upload,
            config,
            runtime,
            file_handles: HandleTable::new(MAX_HANDLES),
            dir_handles: HandleTable::new(MAX_HANDLES),
            project_read_only: Mutex::new(HashMap::new()),
        }
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.config.tuning.kernel_attr_timeout_seconds)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.config.tuning.kernel_entry_timeout_seconds)
    }

    /// Whether `project_id` is read-only on the remote platform, memoized
    /// per mount. `project_id = ""` (synthetic/scaffolding directories) is
    /// never itself a create target, so it is never queried here.
    ///
    /// A describe failure is logged and treated as *not* read-only: the
    /// worst case is that `Create` is attempted and rejected by the remote
    /// `file-new` call itself, rather than every create silently refusing
    /// whenever the platform is briefly unreachable.
    pub fn project_read_only(&self, project_id: &str) -> bool {
        if let Some(cached) = self
            .project_read_only
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(project_id)
        {
            return *cached;
        }

        let remote = self.remote.clone();
        let project_id_owned = project_id.to_string();
        let read_only = self
            .runtime
            .block_on(async move { remote.describe_project(&project_id_owned).await })
            .map(|desc| desc.read_only)
            .unwrap_or_else(|e| {
                tracing::warn!(project_id, error = %e, "describe_project failed, assuming writable");
                false
            });

        self.project_read_only
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(project_id.to_string(), read_only);
        read_only
    }
}

/// Shared, `Clone`-able handle to the dispatch state, suitable for passing
/// to `fuser::spawn_mount2`.
#[derive(Clone)]
pub struct FsWrapper(pub Arc<Mutex<DispatchState>>);

impl Filesystem for FsWrapper {
    fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
        let state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        attr::getattr(&state, req, ino, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        ctime: Option<std::time::SystemTime>,
        fh: Option<u64>,
        crtime: Option<std::time::SystemTime>,
        chgtime: Option<std::time::SystemTime>,
        bkuptime: Option<std::time::SystemTime>,
        flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        attr::setattr(
            &state, req, ino, mode, uid, gid, size, atime, mtime, ctime, fh, crtime, chgtime,
            bkuptime, flags, reply,
        );
    }

    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        lookup_readdir::lookup(&state, req, parent, name, reply);
    }

    fn opendir(&mut self, req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        lookup_readdir::opendir(&mut state, req, ino, flags, reply);
    }

    fn readdir(&mut self, req: &Request, ino: u64, fh: u64, offset: i64, reply: ReplyDirectory) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        lookup_readdir::readdir(&mut state, req, ino, fh, offset, reply);
    }

    fn releasedir(&mut self, req: &Request, ino: u64, fh: u64, flags: i32, reply: ReplyEmpty) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        lookup_readdir::releasedir(&mut state, req, ino, fh, flags, reply);
    }

    fn readlink(&mut self, req: &Request, ino: u64, reply: ReplyData) {
        let state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        lookup_readdir::readlink(&state, req, ino, reply);
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        open_read::open(&mut state, req, ino, flags, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        open_read::read(&mut state, req, ino, fh, offset, size, flags, lock_owner, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        create_write::write(
            &mut state, req, ino, fh, offset, data, write_flags, flags, lock_owner, reply,
        );
    }

    /// Routes to the read-path or write-path release depending on which
    /// `FileHandle` variant `fh` names.
    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        match state.file_handles.remove(fh) {
            Some(FileHandle::NewlyCreatedReadWrite { inode }) => {
                create_write::release_write_handle(&state, inode);
            }
            Some(handle) => {
                open_read::release_read_handle(&state, handle);
            }
            None => {}
        }
        reply.ok();
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        create_write::create(&mut state, req, parent, name, mode, umask, flags, reply);
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, reply: ReplyEntry) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        create_write::mkdir(&mut state, req, parent, name, mode, umask, reply);
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        create_write::unlink(&mut state, req, parent, name, reply);
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        create_write::rmdir(&mut state, req, parent, name, reply);
    }

    #[allow(clippy::too_many_arguments)]
    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        create_write::rename(&mut state, req, parent, name, newparent, newname, flags, reply);
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        link: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let mut state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        create_write::symlink(&mut state, req, parent, name, link, reply);
    }

    fn getxattr(&mut self, req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        xattr::getxattr(&state, req, ino, name, size, reply);
    }

    fn setxattr(
        &mut self,
        req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
        reply: ReplyEmpty,
    ) {
        let state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        xattr::setxattr(&state, req, ino, name, value, flags, position, reply);
    }

    fn listxattr(&mut self, req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        let state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        xattr::listxattr(&state, req, ino, size, reply);
    }

    fn removexattr(&mut self, req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let state = self.0.lock().unwrap_or_else(|p| p.into_inner());
        xattr::removexattr(&state, req, ino, name, reply);
    }
}
