//! Cross-module scenario tests driven directly against the metadata index,
//! prefetch subsystem, and upload subsystem (no kernel FUSE mount is
//! available in test harnesses, so these exercise the same subsystems the
//! dispatch layer calls rather than going through `fuser::Request`/
//! `fuser::Reply*`, which are only constructible from inside a real kernel
//! session).

use async_trait::async_trait;
use bytes::Bytes;
use dxfuse::error::Result;
use dxfuse::index::types::{DataObjectKind, RemoteDataObjectDesc};
use dxfuse::index::MetadataIndex;
use dxfuse::manifest::{Manifest, ManifestDirectory};
use dxfuse::prefetch::{PrefetchManager, RemoteByteSource};
use dxfuse::remote::{DownloadUrl, FolderListing, ProjectDesc, RemoteClient};
use dxfuse::upload::{IndexUpdater, RemoteUploader, UploadManager};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FakeRemote {
    folders: HashMap<(String, String), FolderListing>,
    describe_calls: AtomicUsize,
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn describe_project(&self, project_id: &str) -> Result<ProjectDesc> {
        Ok(ProjectDesc {
            project_id: project_id.to_string(),
            name: project_id.to_string(),
            read_only: project_id == "proj-readonly",
        })
    }

    async fn describe_folder(&self, project_id: &str, folder: &str, _page_token: Option<&str>) -> Result<FolderListing> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .folders
            .get(&(project_id.to_string(), folder.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn file_new(&self, _project_id: &str, _name: &str, _folder: &str, _nonce: &str) -> Result<String> {
        unimplemented!("not exercised by these scenarios")
    }
    async fn file_upload_part_url(&self, _file_id: &str, _part_index: u64) -> Result<String> {
        unimplemented!()
    }
    async fn file_upload_part(&self, _file_id: &str, _data: Bytes) -> Result<()> {
        unimplemented!()
    }
    async fn file_close(&self, _file_id: &str) -> Result<()> {
        unimplemented!()
    }
    async fn file_is_closed(&self, _file_id: &str) -> Result<bool> {
        unimplemented!()
    }
    async fn file_download_url(&self, _file_id: &str) -> Result<DownloadUrl> {
        unimplemented!()
    }
    async fn download_range(&self, _url: &DownloadUrl, _start: u64, _end: u64) -> Result<Bytes> {
        unimplemented!()
    }
    async fn find_project(&self, _name: &str) -> Result<String> {
        unimplemented!()
    }
}

fn desc(remote_id: &str, name: &str, size: u64) -> RemoteDataObjectDesc {
    RemoteDataObjectDesc {
        remote_id: remote_id.to_string(),
        name: name.to_string(),
        size,
        ctime: 1,
        mtime: 2,
        symlink_target: None,
        kind: DataObjectKind::Regular,
    }
}

fn bootstrap_project(index: &MetadataIndex, dirname: &str, proj_id: &str) -> u64 {
    let manifest = Manifest {
        files: vec![],
        directories: vec![ManifestDirectory {
            proj_id: proj_id.to_string(),
            folder: "/".to_string(),
            dirname: dirname.to_string(),
            ctime: 0,
            mtime: 0,
        }],
    };
    index.bootstrap(&manifest).unwrap();
    let (_, inode) = index.lookup("", dirname).unwrap();
    inode
}

/// Readdir parity over a folder with two files and a subdir.
#[tokio::test]
async fn readdir_parity() {
    let index = MetadataIndex::open_in_memory().unwrap();
    let inode = bootstrap_project(&index, "proj", "project-1");

    let mut folders = HashMap::new();
    folders.insert(
        ("project-1".to_string(), "/".to_string()),
        FolderListing {
            data_objects: vec![desc("file-a", "a.txt", 10), desc("file-b", "b.txt", 20)],
            subdirs: vec!["sub".to_string()],
            next_page_token: None,
        },
    );
    folders.insert(
        ("project-1".to_string(), "proj/sub".to_string()),
        FolderListing {
            data_objects: vec![desc("file-c", "c.txt", 5)],
            subdirs: vec![],
            next_page_token: None,
        },
    );
    let remote = FakeRemote { folders, describe_calls: AtomicUsize::new(0) };

    index.ensure_populated("proj", inode, &remote).await.unwrap();
    let top = index.read_dir("proj").unwrap();
    let top_names: Vec<_> = top.iter().map(|e| e.name.clone()).collect();
    assert_eq!(top_names, vec!["a.txt", "b.txt", "sub"]);
    assert!(top.iter().map(|e| e.inode).all(|i| i > 1));
    let inodes: std::collections::HashSet<_> = top.iter().map(|e| e.inode).collect();
    assert_eq!(inodes.len(), top.len());

    let (_, sub_inode) = index.lookup("proj", "sub").unwrap();
    index.ensure_populated("proj/sub", sub_inode, &remote).await.unwrap();
    let sub = index.read_dir("proj/sub").unwrap();
    assert_eq!(sub.len(), 1);
    assert_eq!(sub[0].name, "c.txt");
}

/// Two remote siblings named `data.bin` fix up into one faux
/// subdirectory with deterministically disambiguated members, stable
/// across a fresh mount of the same folder.
#[tokio::test]
async fn name_collision_fixup_is_stable_across_mounts() {
    let mut folders = HashMap::new();
    folders.insert(
        ("project-1".to_string(), "/".to_string()),
        FolderListing {
            data_objects: vec![desc("file-B", "data.bin", 1), desc("file-A", "data.bin", 2)],
            subdirs: vec![],
            next_page_token: None,
        },
    );
    let remote = Arc::new(FakeRemote { folders, describe_calls: AtomicUsize::new(0) });

    let names_from_fresh_mount = || async {
        let index = MetadataIndex::open_in_memory().unwrap();
        let inode = bootstrap_project(&index, "proj", "project-1");
        index.ensure_populated("proj", inode, remote.as_ref()).await.unwrap();
        let top = index.read_dir("proj").unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].name, "data.bin");
        let members = index.read_dir("proj/data.bin").unwrap();
        members.iter().map(|e| e.name.clone()).collect::<Vec<_>>()
    };

    let first = names_from_fresh_mount().await;
    let second = names_from_fresh_mount().await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

/// A read-only project's description is reflected by the narrow policy the
/// dispatch layer's create path consults, without it ever reaching the
/// upload subsystem.
#[tokio::test]
async fn describe_project_reports_read_only_projects() {
    let remote = FakeRemote { folders: HashMap::new(), describe_calls: AtomicUsize::new(0) };
    let writable = remote.describe_project("project-1").await.unwrap();
    let readonly = remote.describe_project("proj-readonly").await.unwrap();
    assert!(!writable.read_only);
    assert!(readonly.read_only);
}

struct FakeSource {
    data: Bytes,
    fetch_calls: AtomicUsize,
}

#[async_trait]
impl RemoteByteSource for FakeSource {
    async fn download_url(&self) -> Result<DownloadUrl> {
        Ok(DownloadUrl { url: "http://fake".into(), headers: vec![] })
    }

    async fn fetch_range(&self, _url: &DownloadUrl, start: u64, end: u64) -> Result<Bytes> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let start = start.min(self.data.len() as u64) as usize;
        let end = end.min(self.data.len() as u64) as usize;
        Ok(self.data.slice(start..end))
    }
}

/// A strictly sequential 1 MiB-chunk reader over a 64 MiB file stays within
/// a generous bound on distinct ranged downloads, instead of issuing one
/// ranged GET per read.
#[tokio::test]
async fn sequential_read_bounds_download_count() {
    let mut tuning = dxfuse::config::TuningConfig::default();
    tuning.prefetch_initial_window_bytes = 1 << 20;
    tuning.prefetch_max_window_bytes = 16 << 20;
    tuning.prefetch_memory_budget_bytes = 256 << 20;

    let file_size: u64 = 64 << 20;
    let manager = PrefetchManager::new(&tuning);
    let source = Arc::new(FakeSource { data: Bytes::from(vec![0u8; file_size as usize]), fetch_calls: AtomicUsize::new(0) });
    let url = DownloadUrl { url: "http://fake".into(), headers: vec![] };
    let handle = manager.open(file_size, source.clone(), url);

    let chunk_size: u64 = 1 << 20;
    let mut offset = 0u64;
    while offset < file_size {
        let data = manager.read(handle, offset, chunk_size as u32).await.unwrap();
        assert_eq!(data.len() as u64, chunk_size.min(file_size - offset));
        offset += chunk_size;
        // let any scheduled background window land before the next read
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    manager.release(handle).await;

    let doublings = (tuning.prefetch_max_window_bytes / tuning.prefetch_initial_window_bytes).ilog2() as u64 + 1;
    let steady_state_gets = file_size / tuning.prefetch_max_window_bytes + 1;
    // generous safety margin: a slow background fetch can force an extra
    // synchronous foreground download without changing the overall shape
    // of the curve (logarithmic ramp-up, then one GET per max-size window).
    let bound = doublings + steady_state_gets + 6;
    assert!(
        (source.fetch_calls.load(Ordering::SeqCst) as u64) <= bound,
        "expected at most {bound} ranged downloads, saw {}",
        source.fetch_calls.load(Ordering::SeqCst)
    );
    assert!(
        (source.fetch_calls.load(Ordering::SeqCst) as u64) < file_size / chunk_size,
        "prefetch window should cut ranged downloads well below one per read"
    );
}

struct FakeUploader {
    part_count: AtomicUsize,
    closed: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl RemoteUploader for FakeUploader {
    async fn upload_part_url(&self, _file_id: &str, _part_index: u64) -> Result<String> {
        Ok("http://fake/upload".into())
    }
    async fn upload_part(&self, _url: &str, _data: Bytes) -> Result<()> {
        self.part_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn close(&self, _file_id: &str) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn is_closed(&self, _file_id: &str) -> Result<bool> {
        Ok(self.closed.load(Ordering::SeqCst))
    }
}

struct IndexUpdaterAdapter(Arc<MetadataIndex>);

#[async_trait]
impl IndexUpdater for IndexUpdaterAdapter {
    async fn update_file(&self, inode: u64, new_size: u64, new_mtime: i64) -> Result<()> {
        self.0.update_file(inode, new_size, new_mtime)
    }
}

/// Create, write, and release a new file; the upload subsystem finalizes
/// it and the metadata index's row reflects the closed size.
#[tokio::test]
async fn write_and_close_updates_metadata() {
    let index = Arc::new(MetadataIndex::open_in_memory().unwrap());
    index.bootstrap(&Manifest::default()).unwrap();
    let inode = index
        .create_data_object(DataObjectKind::Regular, "file-new-1", "project-1", "", "hello.txt", "/staging/hello")
        .unwrap();

    let mut tuning = dxfuse::config::TuningConfig::default();
    tuning.upload_part_threshold_bytes = 1024;
    let uploader = Arc::new(FakeUploader { part_count: AtomicUsize::new(0), closed: std::sync::atomic::AtomicBool::new(false) });
    let updater = Arc::new(IndexUpdaterAdapter(index.clone()));
    let manager = UploadManager::new(&tuning, uploader.clone(), updater);

    let dir = tempfile::tempdir().unwrap();
    let staging = dxfuse::upload::staging::StagingFile::create(dxfuse::upload::staging::staging_path(dir.path())).unwrap();
    manager.create(inode, "file-new-1".to_string(), staging).unwrap();
    manager.write(inode, 0, b"hi\n").await.unwrap();
    manager.release(inode).unwrap();

    for _ in 0..100 {
        if let Ok(obj) = index.data_object_by_inode(inode) {
            if obj.size == 3 {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let obj = index.data_object_by_inode(inode).unwrap();
    assert_eq!(obj.size, 3);
}

/// Unmount drain: three newly created files, all sealed and closed once
/// `drain` returns within its timeout.
#[tokio::test]
async fn drain_closes_all_open_files() {
    let index = Arc::new(MetadataIndex::open_in_memory().unwrap());
    index.bootstrap(&Manifest::default()).unwrap();

    let mut tuning = dxfuse::config::TuningConfig::default();
    tuning.upload_part_threshold_bytes = 1 << 20;
    tuning.upload_drain_timeout_seconds = 5;
    let uploader = Arc::new(FakeUploader { part_count: AtomicUsize::new(0), closed: std::sync::atomic::AtomicBool::new(false) });
    let updater = Arc::new(IndexUpdaterAdapter(index.clone()));
    let manager = UploadManager::new(&tuning, uploader, updater);

    let dir = tempfile::tempdir().unwrap();
    let mut inodes = Vec::new();
    for i in 0..3 {
        let name = format!("f{i}.bin");
        let inode = index
            .create_data_object(DataObjectKind::Regular, &format!("file-{i}"), "project-1", "", &name, "")
            .unwrap();
        let staging = dxfuse::upload::staging::StagingFile::create(dxfuse::upload::staging::staging_path(dir.path())).unwrap();
        manager.create(inode, format!("file-{i}"), staging).unwrap();
        manager.write(inode, 0, &vec![7u8; 8 << 20]).await.unwrap();
        inodes.push(inode);
    }

    manager.drain().await;

    for inode in inodes {
        let obj = index.data_object_by_inode(inode).unwrap();
        assert_eq!(obj.size, 8 << 20);
    }
}
