//! The metadata index: the single source of truth for the mounted
//! namespace, backed by an embedded `rusqlite` database under one
//! process-wide mutex. Writes to the index are serialized, and nothing
//! holds the lock across an `.await`.
//!
//! Remote round-trips (a directory's `describe_folder` calls) happen
//! *outside* the lock: [`MetadataIndex::ensure_populated`] takes the lock
//! just long enough to check state and register itself as the in-flight
//! populator, drops it across the network call, then re-takes it to commit.
//! Concurrent callers for the same directory coalesce onto one round trip
//! via a per-inode [`tokio::sync::Notify`].

pub mod posix_fixup;
pub mod schema;
pub mod store;
pub mod types;

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::remote::RemoteClient;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use types::*;

pub struct MetadataIndex {
    store: Mutex<store::Store>,
    populating: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl MetadataIndex {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            store: Mutex::new(store::Store::open(path)?),
            populating: Mutex::new(HashMap::new()),
        })
    }

    /// Opens an in-memory store, for tests that don't need a file on disk.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            store: Mutex::new(store::Store::open_in_memory()?),
            populating: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, store::Store> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Populates the root, every manifest scaffolding path, every
    /// project-backed directory, and every pre-known file declared by the
    /// manifest, all in one transaction. Idempotent: a second call against
    /// an already-bootstrapped database is a no-op.
    pub fn bootstrap(&self, manifest: &Manifest) -> Result<()> {
        let scaffolding: Vec<String> = manifest.scaffolding_paths().into_iter().collect();
        let project_dirs: Vec<(String, String, String)> = manifest
            .directories
            .iter()
            .map(|d| (d.dirname.clone(), d.proj_id.clone(), d.folder.clone()))
            .collect();
        let pre_known_files: Vec<(String, String, String, String, u64, i64, i64)> = manifest
            .files
            .iter()
            .map(|f| {
                (
                    f.parent.clone(),
                    f.fname.clone(),
                    f.proj_id.clone(),
                    f.file_id.clone(),
                    f.size,
                    f.ctime,
                    f.mtime,
                )
            })
            .collect();
        self.lock()
            .bootstrap(&scaffolding, &project_dirs, &pre_known_files)
    }

    pub fn root(&self) -> Result<Directory> {
        self.lock().root()
    }

    pub fn directory_by_inode(&self, inode: u64) -> Result<Directory> {
        self.lock()
            .directory_by_inode(inode)?
            .ok_or_else(|| Error::not_found(format!("no directory at inode {inode}")))
    }

    pub fn data_object_by_inode(&self, inode: u64) -> Result<DataObject> {
        self.lock()
            .data_object_by_inode(inode)?
            .ok_or_else(|| Error::not_found(format!("no data object at inode {inode}")))
    }

    pub fn data_object_by_remote_id(&self, remote_id: &str) -> Result<Option<DataObject>> {
        self.lock().data_object_by_remote_id(remote_id)
    }

    pub fn path_for_inode(&self, inode: u64) -> Result<String> {
        self.lock()
            .path_for_inode(inode)?
            .ok_or_else(|| Error::not_found(format!("no namespace entry for inode {inode}")))
    }

    /// `Lookup(parent_path, name)`. The caller is responsible for having
    /// already ensured `parent_path` is populated (via [`Self::ensure_populated`])
    /// — this method never triggers a remote call itself.
    pub fn lookup(&self, parent_path: &str, name: &str) -> Result<(ObjType, u64)> {
        self.lock()
            .lookup_raw(parent_path, name)?
            .ok_or_else(|| Error::not_found(format!("{parent_path}/{name} not found")))
    }

    /// `ReadDir(path)`. Like `lookup`, assumes the directory is already
    /// populated.
    pub fn read_dir(&self, path: &str) -> Result<Vec<NamespaceEntry>> {
        self.lock().namespace_children(path)
    }

    pub fn create_empty_directory(
        &self,
        project_id: &str,
        project_folder: &str,
        path: &str,
    ) -> Result<u64> {
        let now = now_unix();
        self.lock()
            .create_empty_directory(project_id, project_folder, now, now, path, true)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_data_object(
        &self,
        kind: DataObjectKind,
        remote_id: &str,
        project_id: &str,
        parent: &str,
        name: &str,
        inline_data: &str,
    ) -> Result<u64> {
        let now = now_unix();
        self.lock().create_data_object(
            kind, remote_id, project_id, 0, now, now, parent, name, inline_data,
        )
    }

    pub fn update_file(&self, inode: u64, new_size: u64, new_mtime: i64) -> Result<()> {
        self.lock().update_file(inode, new_size, new_mtime)
    }

    /// Populates a directory on first access, with coalescing: concurrent
    /// callers for the same `dir_inode` share one `describe_folder` round
    /// trip (and its pagination), so readdir on an unpopulated directory
    /// triggers exactly one remote round trip even under concurrent callers.
    pub async fn ensure_populated(
        &self,
        dir_path: &str,
        dir_inode: u64,
        remote: &dyn RemoteClient,
    ) -> Result<()> {
        loop {
            let dir = self
                .lock()
                .directory_by_inode(dir_inode)?
                .ok_or_else(|| Error::not_found(format!("no directory at inode {dir_inode}")))?;
            if dir.populated {
                return Ok(());
            }
            if dir.is_synthetic() {
                // Synthetic scaffolding directories have nothing remote
                // to describe; bootstrap already marks them populated,
                // so reaching here means a bug upstream.
                return Err(Error::corrupt(format!(
                    "synthetic directory {dir_inode} was never marked populated"
                )));
            }

            // The `Notified` future must be constructed (snapshotting
            // Notify's internal sequence counter) while `populating` is
            // still held, not after: `populate_once`'s own `notify_waiters`
            // call (below) only happens once it has re-acquired this same
            // lock to remove its entry, so constructing our future before
            // releasing the lock here guarantees we cannot miss that wakeup
            // even though nothing has registered as a waiter yet.
            let mut populating = self.populating.lock().unwrap_or_else(|p| p.into_inner());
            let existing = populating.get(&dir_inode).cloned();
            if let Some(notify_arc) = existing {
                let notified = notify_arc.notified();
                drop(populating);
                notified.await;
                continue;
            }
            populating.insert(dir_inode, Arc::new(Notify::new()));
            drop(populating);

            let result = self.populate_once(dir_path, dir_inode, remote).await;

            let notify = {
                let mut populating = self.populating.lock().unwrap_or_else(|p| p.into_inner());
                populating.remove(&dir_inode)
            };
            if let Some(notify) = notify {
                notify.notify_waiters();
            }

            return result;
        }
    }

    async fn populate_once(
        &self,
        dir_path: &str,
        dir_inode: u64,
        remote: &dyn RemoteClient,
    ) -> Result<()> {
        let dir = self
            .lock()
            .directory_by_inode(dir_inode)?
            .ok_or_else(|| Error::not_found(format!("no directory at inode {dir_inode}")))?;

        let mut all_objects = Vec::new();
        let mut all_subdirs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let listing = remote
                .describe_folder(&dir.project_id, &dir.project_folder, page_token.as_deref())
                .await?;
            all_objects.extend(listing.data_objects);
            all_subdirs.extend(listing.subdirs);
            if all_objects.len() + all_subdirs.len() > MAX_DIR_SIZE {
                return Err(Error::not_supported(format!(
                    "{dir_path}: directory exceeds {MAX_DIR_SIZE} entries"
                )));
            }
            match listing.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let fixed = posix_fixup::fix_up(all_objects);
        let mut plain_objects = Vec::new();
        let mut faux_dirs = Vec::new();
        for entry in fixed {
            match entry {
                posix_fixup::FixedUpEntry::Plain(obj) => plain_objects.push(obj),
                posix_fixup::FixedUpEntry::FauxDir { name, members } => {
                    faux_dirs.push((name, members))
                }
            }
        }

        self.lock().commit_population(
            dir_inode,
            dir_path,
            &dir.project_id,
            &all_subdirs,
            &plain_objects,
            &faux_dirs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, ManifestDirectory};
    use crate::remote::{DownloadUrl, FolderListing, ProjectDesc};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRemote {
        describe_calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteClient for FakeRemote {
        async fn describe_project(&self, _project_id: &str) -> Result<ProjectDesc> {
            unimplemented!()
        }

        async fn describe_folder(
            &self,
            _project_id: &str,
            _folder: &str,
            _page_token: Option<&str>,
        ) -> Result<FolderListing> {
            self.describe_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(FolderListing {
                data_objects: vec![RemoteDataObjectDesc {
                    remote_id: "file-1".into(),
                    name: "a.txt".into(),
                    size: 3,
                    ctime: 1,
                    mtime: 2,
                    symlink_target: None,
                    kind: DataObjectKind::Regular,
                }],
                subdirs: vec![],
                next_page_token: None,
            })
        }

        async fn file_new(&self, _: &str, _: &str, _: &str, _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn file_upload_part_url(&self, _: &str, _: u64) -> Result<String> {
            unimplemented!()
        }
        async fn file_upload_part(&self, _: &str, _: bytes::Bytes) -> Result<()> {
            unimplemented!()
        }
        async fn file_close(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn file_is_closed(&self, _: &str) -> Result<bool> {
            unimplemented!()
        }
        async fn file_download_url(&self, _: &str) -> Result<DownloadUrl> {
            unimplemented!()
        }
        async fn download_range(&self, _: &DownloadUrl, _: u64, _: u64) -> Result<bytes::Bytes> {
            unimplemented!()
        }
        async fn find_project(&self, _: &str) -> Result<String> {
            unimplemented!()
        }
    }

    fn bootstrap_one_project(index: &MetadataIndex) -> u64 {
        let manifest = Manifest {
            files: vec![],
            directories: vec![ManifestDirectory {
                proj_id: "project-1".into(),
                folder: "/".into(),
                dirname: "proj".into(),
                ctime: 0,
                mtime: 0,
            }],
        };
        index.bootstrap(&manifest).unwrap();
        let (_, inode) = index.lookup("", "proj").unwrap();
        inode
    }

    #[tokio::test]
    async fn populate_is_coalesced_across_concurrent_callers() {
        let index = Arc::new(MetadataIndex::open_in_memory().unwrap());
        let inode = bootstrap_one_project(&index);
        let remote = Arc::new(FakeRemote {
            describe_calls: AtomicUsize::new(0),
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let index = index.clone();
            let remote = remote.clone();
            handles.push(tokio::spawn(async move {
                index.ensure_populated("proj", inode, remote.as_ref()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(remote.describe_calls.load(Ordering::SeqCst), 1);
        let dir = index.directory_by_inode(inode).unwrap();
        assert!(dir.populated);
        let children = index.read_dir("proj").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "a.txt");
    }

    #[tokio::test]
    async fn populate_is_idempotent_once_already_populated() {
        let index = MetadataIndex::open_in_memory().unwrap();
        let inode = bootstrap_one_project(&index);
        let remote = FakeRemote {
            describe_calls: AtomicUsize::new(0),
        };
        index.ensure_populated("proj", inode, &remote).await.unwrap();
        index.ensure_populated("proj", inode, &remote).await.unwrap();
        assert_eq!(remote.describe_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bootstrap_twice_is_a_no_op() {
        let index = MetadataIndex::open_in_memory().unwrap();
        let manifest = Manifest::default();
        index.bootstrap(&manifest).unwrap();
        index.bootstrap(&manifest).unwrap();
        let root = index.root().unwrap();
        assert_eq!(root.inode, ROOT_INODE);
    }

    #[test]
    fn create_data_object_rejects_name_collision() {
        let index = MetadataIndex::open_in_memory().unwrap();
        index.bootstrap(&Manifest::default()).unwrap();
        index
            .create_data_object(DataObjectKind::Regular, "file-1", "proj-1", "", "a.txt", "")
            .unwrap();
        let err = index
            .create_data_object(DataObjectKind::Regular, "file-2", "proj-1", "", "a.txt", "")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Exists);
    }

    #[test]
    fn root_readdir_does_not_list_itself() {
        let index = MetadataIndex::open_in_memory().unwrap();
        let manifest = Manifest {
            files: vec![],
            directories: vec![ManifestDirectory {
                proj_id: "project-1".into(),
                folder: "/".into(),
                dirname: "proj".into(),
                ctime: 0,
                mtime: 0,
            }],
        };
        index.bootstrap(&manifest).unwrap();
        let top = index.read_dir("").unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].name, "proj");
        assert!(top.iter().all(|e| e.inode != ROOT_INODE));
    }
}
