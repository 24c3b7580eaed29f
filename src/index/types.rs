//! Data model shared by the metadata index and the dispatch layer.
//!
//! These mirror the tagged-variant `Node` design called out for
//! filesystem-node polymorphism: directories and data objects are distinct
//! rows in distinct tables, joined through a common `namespace` table, and
//! the dispatch layer pattern-matches on `ObjType`/`DataObjectKind` rather
//! than modeling either as a subtype of the other.

use std::time::{SystemTime, UNIX_EPOCH};

/// Inode 1 is reserved for the mount root and is always populated after bootstrap.
pub const ROOT_INODE: u64 = 1;

/// Remote folders are not allowed to grow past this many direct children
/// without pagination; exceeding it after paging through every page is
/// reported as `NotSupported` rather than silently truncated.
pub const MAX_DIR_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    Directory,
    DataObject,
}

/// The remote entity kind a data object represents. `Regular` and `Symlink`
/// are the only read/write-capable kinds; the rest are
/// read-only projections of non-file remote entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataObjectKind {
    Regular,
    Symlink,
    Applet,
    Workflow,
    Record,
    Database,
    Other,
}

impl DataObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataObjectKind::Regular => "regular",
            DataObjectKind::Symlink => "symlink",
            DataObjectKind::Applet => "applet",
            DataObjectKind::Workflow => "workflow",
            DataObjectKind::Record => "record",
            DataObjectKind::Database => "database",
            DataObjectKind::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "regular" => DataObjectKind::Regular,
            "symlink" => DataObjectKind::Symlink,
            "applet" => DataObjectKind::Applet,
            "workflow" => DataObjectKind::Workflow,
            "record" => DataObjectKind::Record,
            "database" => DataObjectKind::Database,
            _ => DataObjectKind::Other,
        }
    }
}

/// A `(parent_path, name) -> (type, inode)` binding. `parent_path` is the
/// full mount-relative path of the containing directory; root's own entry
/// has `parent_path = ""`, `name = "/"`.
#[derive(Debug, Clone)]
pub struct NamespaceEntry {
    pub parent_path: String,
    pub name: String,
    pub obj_type: ObjType,
    pub inode: u64,
}

/// A remote-backed or staged file, keyed by inode but additionally indexed
/// by `remote_id` so that the same remote object can appear under more than
/// one namespace entry (hard link semantics, reflected in `nlink`).
#[derive(Debug, Clone)]
pub struct DataObject {
    pub inode: u64,
    pub kind: DataObjectKind,
    pub remote_id: String,
    pub project_id: String,
    pub size: u64,
    pub ctime: i64,
    pub mtime: i64,
    pub nlink: u32,
    /// Symlink target for symlinks, local staging path for newly created
    /// regular files awaiting upload, empty otherwise.
    pub inline_data: String,
}

/// `project_id = ""` and `project_folder = ""` mark a synthetic directory
/// (mount root or manifest scaffolding) with no remote backing.
#[derive(Debug, Clone)]
pub struct Directory {
    pub inode: u64,
    pub project_id: String,
    pub project_folder: String,
    pub populated: bool,
    pub ctime: i64,
    pub mtime: i64,
}

impl Directory {
    pub fn is_synthetic(&self) -> bool {
        self.project_id.is_empty()
    }
}

/// A remote-described child entry, as returned by `DescribeFolder`.
#[derive(Debug, Clone)]
pub struct RemoteDataObjectDesc {
    pub remote_id: String,
    pub name: String,
    pub size: u64,
    pub ctime: i64,
    pub mtime: i64,
    pub symlink_target: Option<String>,
    pub kind: DataObjectKind,
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
