//! Manifest JSON parsing.
//!
//! ```json
//! {
//!   "files":       [ { "proj_id", "file_id", "parent", "fname", "size", "ctime", "mtime" }, ... ],
//!   "directories": [ { "proj_id", "folder", "dirname", "ctime", "mtime" }, ... ]
//! }
//! ```
//!
//! `dirname` is the local mount-relative base directory for a remote
//! `(proj_id, folder)`. `parent` for files is a local path under a
//! previously-declared `dirname`. Scaffolding directories implied by the
//! nesting of `dirname`s are created synthetically at bootstrap.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
pub struct ManifestFile {
    pub proj_id: String,
    pub file_id: String,
    pub parent: String,
    pub fname: String,
    pub size: u64,
    pub ctime: i64,
    pub mtime: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ManifestDirectory {
    pub proj_id: String,
    pub folder: String,
    pub dirname: String,
    pub ctime: i64,
    pub mtime: i64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Manifest {
    #[serde(default)]
    pub files: Vec<ManifestFile>,
    #[serde(default)]
    pub directories: Vec<ManifestDirectory>,
}

impl Manifest {
    /// Every scaffolding path implied by nesting of `dirname`s, e.g. a
    /// `dirname` of `"a/b/c"` implies synthetic parents `"a"` and `"a/b"`.
    pub fn scaffolding_paths(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        for dir in &self.directories {
            let mut prefix = String::new();
            for component in dir.dirname.split('/').filter(|c| !c.is_empty()) {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(component);
                if prefix != dir.dirname {
                    paths.insert(prefix.clone());
                }
            }
        }
        paths
    }
}

pub fn parse_manifest(path: &Path) -> crate::error::Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| crate::error::Error::io(format!("reading manifest {path:?}: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| crate::error::Error::corrupt(format!("parsing manifest {path:?}: {e}")))
}

/// Builds a bare manifest for the `dxfuse MOUNTPOINT PROJECT1 [PROJECT2 ...]`
/// invocation style: one top-level synthetic `dirname` per project, each
/// mapped to that project's root folder ("/").
pub fn manifest_for_bare_projects(project_ids: &[String]) -> Manifest {
    let directories = project_ids
        .iter()
        .map(|proj_id| ManifestDirectory {
            proj_id: proj_id.clone(),
            folder: "/".to_string(),
            dirname: proj_id.clone(),
            ctime: crate::index::types::now_unix(),
            mtime: crate::index::types::now_unix(),
        })
        .collect();
    Manifest {
        files: Vec::new(),
        directories,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffolding_paths_include_every_nested_prefix() {
        let manifest = Manifest {
            files: Vec::new(),
            directories: vec![ManifestDirectory {
                proj_id: "project-000".to_string(),
                folder: "/data".to_string(),
                dirname: "a/b/c".to_string(),
                ctime: 0,
                mtime: 0,
            }],
        };
        let paths = manifest.scaffolding_paths();
        assert!(paths.contains("a"));
        assert!(paths.contains("a/b"));
        assert!(!paths.contains("a/b/c"));
    }

    #[test]
    fn parses_manifest_json() {
        let json = r#"{
            "files": [{"proj_id":"p","file_id":"file-1","parent":"a","fname":"x.txt","size":3,"ctime":1,"mtime":2}],
            "directories": [{"proj_id":"p","folder":"/d","dirname":"a","ctime":1,"mtime":2}]
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.directories.len(), 1);
    }
}
