//! Reshapes a remote folder listing, which may contain sibling data objects
//! with identical names, into a POSIX-unique listing.
//!
//! Grouping and renaming are pure functions over the sorted listing so the
//! result is deterministic across mounts of the same folder: the same set
//! of `(remote_id, name)` pairs always produces the same faux-subdirectory
//! name and the same disambiguated member names.

use crate::index::types::RemoteDataObjectDesc;
use std::collections::BTreeMap;

/// One fixed-up entry directly under the populated folder: either a plain
/// data object (collision-free) or a faux subdirectory collecting a
/// colliding group.
pub enum FixedUpEntry {
    Plain(RemoteDataObjectDesc),
    FauxDir {
        /// Name of the synthetic subdirectory, derived from the collision.
        name: String,
        /// Members, renamed with a deterministic disambiguating suffix.
        members: Vec<RemoteDataObjectDesc>,
    },
}

/// Groups `objects` by `name` and synthesizes a faux subdirectory for every
/// group with more than one member. Single-member groups pass through
/// unchanged. Input order does not affect the result: objects are grouped
/// into a `BTreeMap` keyed by name, and within a group members are sorted
/// by `remote_id` before disambiguation, so the output is stable regardless
/// of the order the remote adapter returned them in.
pub fn fix_up(objects: Vec<RemoteDataObjectDesc>) -> Vec<FixedUpEntry> {
    let mut groups: BTreeMap<String, Vec<RemoteDataObjectDesc>> = BTreeMap::new();
    for obj in objects {
        groups.entry(obj.name.clone()).or_default().push(obj);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (name, mut members) in groups {
        if members.len() == 1 {
            out.push(FixedUpEntry::Plain(members.pop().unwrap()));
            continue;
        }

        members.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        let renamed = members
            .into_iter()
            .map(|mut m| {
                m.name = disambiguated_name(&m.name, &m.remote_id);
                m
            })
            .collect();

        out.push(FixedUpEntry::FauxDir {
            name,
            members: renamed,
        });
    }
    out
}

/// A stable disambiguating suffix: the base name plus a short prefix of the
/// colliding object's `remote_id`, which is itself stable and unique.
fn disambiguated_name(base_name: &str, remote_id: &str) -> String {
    let suffix: String = remote_id.chars().filter(|c| c.is_alphanumeric()).take(8).collect();
    match base_name.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') => format!("{stem}.{suffix}.{ext}"),
        _ => format!("{base_name}.{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(remote_id: &str, name: &str) -> RemoteDataObjectDesc {
        RemoteDataObjectDesc {
            remote_id: remote_id.to_string(),
            name: name.to_string(),
            size: 0,
            ctime: 0,
            mtime: 0,
            symlink_target: None,
            kind: crate::index::types::DataObjectKind::Regular,
        }
    }

    #[test]
    fn no_collision_passes_through() {
        let fixed = fix_up(vec![desc("file-A", "a.txt"), desc("file-B", "b.txt")]);
        assert_eq!(fixed.len(), 2);
        assert!(fixed.iter().all(|e| matches!(e, FixedUpEntry::Plain(_))));
    }

    #[test]
    fn collision_produces_faux_dir_with_disambiguated_members() {
        let fixed = fix_up(vec![desc("file-B", "data.bin"), desc("file-A", "data.bin")]);
        assert_eq!(fixed.len(), 1);
        match &fixed[0] {
            FixedUpEntry::FauxDir { name, members } => {
                assert_eq!(name, "data.bin");
                assert_eq!(members.len(), 2);
                // sorted by remote_id: file-A before file-B
                assert!(members[0].name.contains("fileA"));
                assert!(members[1].name.contains("fileB"));
            }
            _ => panic!("expected a faux directory"),
        }
    }

    #[test]
    fn fixup_is_deterministic_across_input_order() {
        let first = fix_up(vec![desc("file-A", "x"), desc("file-B", "x")]);
        let second = fix_up(vec![desc("file-B", "x"), desc("file-A", "x")]);
        let names = |entries: &[FixedUpEntry]| match &entries[0] {
            FixedUpEntry::FauxDir { members, .. } => {
                members.iter().map(|m| m.name.clone()).collect::<Vec<_>>()
            }
            _ => panic!(),
        };
        assert_eq!(names(&first), names(&second));
    }
}
