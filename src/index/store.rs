//! Synchronous CRUD over the embedded relational store, with the
//! remote-describe step factored out: this module only ever touches the
//! local database, so every method here can run under the filesystem-wide
//! mutex without suspending.

use crate::error::{Error, Result};
use crate::index::schema::{self, DDL};
use crate::index::types::*;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(DDL)?;
        schema::check_or_set_schema_version(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(DDL)?;
        schema::check_or_set_schema_version(&conn)?;
        Ok(Self { conn })
    }

    fn allocate_inode(tx: &rusqlite::Transaction) -> Result<u64> {
        tx.execute(
            "INSERT INTO schema_meta (key, value) VALUES ('next_inode', '2')
             ON CONFLICT(key) DO NOTHING",
            [],
        )?;
        let current: i64 = tx.query_row(
            "SELECT value FROM schema_meta WHERE key = 'next_inode'",
            [],
            |r| r.get::<_, String>(0),
        )?.parse().map_err(|_| Error::corrupt("next_inode is not an integer"))?;
        tx.execute(
            "UPDATE schema_meta SET value = ?1 WHERE key = 'next_inode'",
            params![(current + 1).to_string()],
        )?;
        Ok(current as u64)
    }

    /// Inserts the root directory and every manifest-declared scaffolding
    /// path, project folder, and pre-known file in a single transaction.
    pub fn bootstrap(
        &mut self,
        scaffolding_paths: &[String],
        project_dirs: &[(String, String, String)], // (dirname path, project_id, folder)
        pre_known_files: &[(String, String, String, String, u64, i64, i64)], // (parent, fname, proj_id, file_id, size, ctime, mtime)
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        let already_root: Option<i64> = tx
            .query_row(
                "SELECT inode FROM directories WHERE inode = 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        if already_root.is_some() {
            tx.commit()?;
            return Ok(());
        }

        tx.execute(
            "INSERT INTO schema_meta (key, value) VALUES ('next_inode', '2')",
            [],
        )?;
        let now = now_unix();
        tx.execute(
            "INSERT INTO directories (inode, project_id, project_folder, populated, ctime, mtime)
             VALUES (1, '', '', 1, ?1, ?1)",
            params![now],
        )?;
        tx.execute(
            "INSERT INTO namespace (parent, name, obj_type, inode) VALUES ('', '/', 'directory', 1)",
            [],
        )?;

        for path in scaffolding_paths {
            let inode = Self::allocate_inode(&tx)?;
            let (parent, name) = split_path(path);
            tx.execute(
                "INSERT INTO directories (inode, project_id, project_folder, populated, ctime, mtime)
                 VALUES (?1, '', '', 1, ?2, ?2)",
                params![inode, now],
            )?;
            tx.execute(
                "INSERT INTO namespace (parent, name, obj_type, inode) VALUES (?1, ?2, 'directory', ?3)",
                params![parent, name, inode],
            )?;
        }

        for (path, project_id, folder) in project_dirs {
            let inode = Self::allocate_inode(&tx)?;
            let (parent, name) = split_path(path);
            tx.execute(
                "INSERT INTO directories (inode, project_id, project_folder, populated, ctime, mtime)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![inode, project_id, folder, now],
            )?;
            tx.execute(
                "INSERT INTO namespace (parent, name, obj_type, inode) VALUES (?1, ?2, 'directory', ?3)",
                params![parent, name, inode],
            )?;
        }

        for (parent, fname, proj_id, file_id, size, ctime, mtime) in pre_known_files {
            Self::create_data_object_in_tx(
                &tx,
                DataObjectKind::Regular,
                file_id,
                proj_id,
                *size,
                *ctime,
                *mtime,
                parent,
                fname,
                "",
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn root(&self) -> Result<Directory> {
        self.directory_by_inode(ROOT_INODE)?
            .ok_or_else(|| Error::corrupt("root directory row missing"))
    }

    pub fn directory_by_inode(&self, inode: u64) -> Result<Option<Directory>> {
        self.conn
            .query_row(
                "SELECT inode, project_id, project_folder, populated, ctime, mtime
                 FROM directories WHERE inode = ?1",
                params![inode],
                row_to_directory,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn data_object_by_inode(&self, inode: u64) -> Result<Option<DataObject>> {
        self.conn
            .query_row(
                "SELECT inode, kind, remote_id, project_id, size, ctime, mtime, nlink, inline_data
                 FROM data_objects WHERE inode = ?1",
                params![inode],
                row_to_data_object,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn data_object_by_remote_id(&self, remote_id: &str) -> Result<Option<DataObject>> {
        self.conn
            .query_row(
                "SELECT inode, kind, remote_id, project_id, size, ctime, mtime, nlink, inline_data
                 FROM data_objects WHERE remote_id = ?1",
                params![remote_id],
                row_to_data_object,
            )
            .optional()
            .map_err(Error::from)
    }

    /// Point query on the namespace table. Does not populate the parent;
    /// callers are expected to have already populated it before calling this.
    pub fn lookup_raw(&self, parent_path: &str, name: &str) -> Result<Option<(ObjType, u64)>> {
        self.conn
            .query_row(
                "SELECT obj_type, inode FROM namespace WHERE parent = ?1 AND name = ?2",
                params![parent_path, name],
                |row| {
                    let obj_type: String = row.get(0)?;
                    let inode: i64 = row.get(1)?;
                    Ok((parse_obj_type(&obj_type), inode as u64))
                },
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn namespace_entry_for_inode(&self, inode: u64) -> Result<Option<NamespaceEntry>> {
        self.conn
            .query_row(
                "SELECT parent, name, obj_type, inode FROM namespace WHERE inode = ?1",
                params![inode],
                row_to_namespace_entry,
            )
            .optional()
            .map_err(Error::from)
    }

    /// Path for an inode, reconstructed from its namespace row. Root's own
    /// path is the empty string (it is addressed by inode, never by name).
    pub fn path_for_inode(&self, inode: u64) -> Result<Option<String>> {
        if inode == ROOT_INODE {
            return Ok(Some(String::new()));
        }
        Ok(self.namespace_entry_for_inode(inode)?.map(|e| {
            if e.parent_path.is_empty() {
                e.name
            } else {
                format!("{}/{}", e.parent_path, e.name)
            }
        }))
    }

    /// Children of `parent_path`. Excludes the root's own self-row
    /// (`parent="", name="/", inode=ROOT_INODE`): root is addressed by
    /// inode, never as a named child of itself or of any other directory,
    /// so it must never appear in a listing even though it shares
    /// `parent=""` with every other top-level project/scaffolding directory.
    pub fn namespace_children(&self, parent_path: &str) -> Result<Vec<NamespaceEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT parent, name, obj_type, inode FROM namespace WHERE parent = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![parent_path], row_to_namespace_entry)?;
        let mut out = Vec::new();
        for row in rows {
            let entry = row?;
            if entry.inode == ROOT_INODE {
                continue;
            }
            out.push(entry);
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_data_object_in_tx(
        tx: &rusqlite::Transaction,
        kind: DataObjectKind,
        remote_id: &str,
        project_id: &str,
        size: u64,
        ctime: i64,
        mtime: i64,
        parent: &str,
        name: &str,
        inline_data: &str,
    ) -> Result<u64> {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT inode FROM data_objects WHERE remote_id = ?1",
                params![remote_id],
                |r| r.get(0),
            )
            .optional()?;

        let inode = if let Some(inode) = existing {
            tx.execute(
                "UPDATE data_objects SET nlink = nlink + 1 WHERE inode = ?1",
                params![inode],
            )?;
            inode as u64
        } else {
            let inode = Self::allocate_inode(tx)?;
            tx.execute(
                "INSERT INTO data_objects (inode, kind, remote_id, project_id, size, ctime, mtime, nlink, inline_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
                params![inode, kind.as_str(), remote_id, project_id, size, ctime, mtime, inline_data],
            )?;
            inode
        };

        let collision: Option<i64> = tx
            .query_row(
                "SELECT inode FROM namespace WHERE parent = ?1 AND name = ?2",
                params![parent, name],
                |r| r.get(0),
            )
            .optional()?;
        if collision.is_some() {
            return Err(Error::exists(format!("{parent}/{name} already exists")));
        }

        tx.execute(
            "INSERT INTO namespace (parent, name, obj_type, inode) VALUES (?1, ?2, 'data_object', ?3)",
            params![parent, name, inode],
        )?;

        Ok(inode)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_data_object(
        &mut self,
        kind: DataObjectKind,
        remote_id: &str,
        project_id: &str,
        size: u64,
        ctime: i64,
        mtime: i64,
        parent: &str,
        name: &str,
        inline_data: &str,
    ) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let inode = Self::create_data_object_in_tx(
            &tx, kind, remote_id, project_id, size, ctime, mtime, parent, name, inline_data,
        )?;
        tx.commit()?;
        Ok(inode)
    }

    pub fn create_empty_directory(
        &mut self,
        project_id: &str,
        project_folder: &str,
        ctime: i64,
        mtime: i64,
        path: &str,
        populated: bool,
    ) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let (parent, name) = split_path(path);

        let collision: Option<i64> = tx
            .query_row(
                "SELECT inode FROM namespace WHERE parent = ?1 AND name = ?2",
                params![parent, name],
                |r| r.get(0),
            )
            .optional()?;
        if collision.is_some() {
            return Err(Error::exists(format!("{path} already exists")));
        }

        let inode = Self::allocate_inode(&tx)?;
        tx.execute(
            "INSERT INTO directories (inode, project_id, project_folder, populated, ctime, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![inode, project_id, project_folder, populated as i64, ctime.max(mtime)],
        )?;
        tx.execute(
            "INSERT INTO namespace (parent, name, obj_type, inode) VALUES (?1, ?2, 'directory', ?3)",
            params![parent, name, inode],
        )?;
        tx.commit()?;
        Ok(inode)
    }

    pub fn update_file(&mut self, inode: u64, new_size: u64, new_mtime: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE data_objects SET size = ?1, mtime = ?2 WHERE inode = ?3",
            params![new_size, new_mtime, inode],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("no data object for inode {inode}")));
        }
        Ok(())
    }

    pub fn mark_populated(&mut self, inode: u64, ctime: i64, mtime: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE directories SET populated = 1, ctime = ?1, mtime = ?2 WHERE inode = ?3",
            params![ctime, mtime, inode],
        )?;
        Ok(())
    }

    /// A single transaction applying a freshly fixed-up folder listing:
    /// plain data objects, subfolders (empty, unpopulated), faux
    /// subdirectories (empty, already populated), then marks `path`
    /// populated with ctime/mtime approximated as min/max over children.
    pub fn commit_population(
        &mut self,
        dir_inode: u64,
        dir_path: &str,
        project_id: &str,
        subfolders: &[String],
        plain_objects: &[RemoteDataObjectDesc],
        faux_dirs: &[(String, Vec<RemoteDataObjectDesc>)],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        let mut min_ctime = i64::MAX;
        let mut max_mtime = i64::MIN;

        for obj in plain_objects {
            Self::create_data_object_in_tx(
                &tx,
                obj.kind,
                &obj.remote_id,
                project_id,
                obj.size,
                obj.ctime,
                obj.mtime,
                dir_path,
                &obj.name,
                obj.symlink_target.as_deref().unwrap_or(""),
            )?;
            min_ctime = min_ctime.min(obj.ctime);
            max_mtime = max_mtime.max(obj.mtime);
        }

        for name in subfolders {
            let child_path = join_path(dir_path, name);
            let inode = Self::allocate_inode(&tx)?;
            tx.execute(
                "INSERT INTO directories (inode, project_id, project_folder, populated, ctime, mtime)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![inode, project_id, child_path, now_unix()],
            )?;
            tx.execute(
                "INSERT INTO namespace (parent, name, obj_type, inode) VALUES (?1, ?2, 'directory', ?3)",
                params![dir_path, name, inode],
            )?;
        }

        for (faux_name, members) in faux_dirs {
            let child_path = join_path(dir_path, faux_name);
            let faux_inode = Self::allocate_inode(&tx)?;
            let mut faux_min = i64::MAX;
            let mut faux_max = i64::MIN;
            for member in members {
                Self::create_data_object_in_tx(
                    &tx,
                    member.kind,
                    &member.remote_id,
                    project_id,
                    member.size,
                    member.ctime,
                    member.mtime,
                    &child_path,
                    &member.name,
                    member.symlink_target.as_deref().unwrap_or(""),
                )?;
                faux_min = faux_min.min(member.ctime);
                faux_max = faux_max.max(member.mtime);
            }
            if faux_min == i64::MAX {
                faux_min = now_unix();
                faux_max = now_unix();
            }
            tx.execute(
                "INSERT INTO directories (inode, project_id, project_folder, populated, ctime, mtime)
                 VALUES (?1, ?2, '', 1, ?3, ?4)",
                params![faux_inode, project_id, faux_min, faux_max],
            )?;
            tx.execute(
                "INSERT INTO namespace (parent, name, obj_type, inode) VALUES (?1, ?2, 'directory', ?3)",
                params![dir_path, faux_name, faux_inode],
            )?;
            min_ctime = min_ctime.min(faux_min);
            max_mtime = max_mtime.max(faux_max);
        }

        if min_ctime == i64::MAX {
            min_ctime = now_unix();
            max_mtime = now_unix();
        }

        tx.execute(
            "UPDATE directories SET populated = 1, ctime = ?1, mtime = ?2 WHERE inode = ?3",
            params![min_ctime, max_mtime, dir_inode],
        )?;

        tx.commit()?;
        Ok(())
    }
}

fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn parse_obj_type(s: &str) -> ObjType {
    match s {
        "directory" => ObjType::Directory,
        _ => ObjType::DataObject,
    }
}

fn row_to_directory(row: &rusqlite::Row) -> rusqlite::Result<Directory> {
    Ok(Directory {
        inode: row.get::<_, i64>(0)? as u64,
        project_id: row.get(1)?,
        project_folder: row.get(2)?,
        populated: row.get::<_, i64>(3)? != 0,
        ctime: row.get(4)?,
        mtime: row.get(5)?,
    })
}

fn row_to_data_object(row: &rusqlite::Row) -> rusqlite::Result<DataObject> {
    let kind: String = row.get(1)?;
    Ok(DataObject {
        inode: row.get::<_, i64>(0)? as u64,
        kind: DataObjectKind::from_str(&kind),
        remote_id: row.get(2)?,
        project_id: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        ctime: row.get(5)?,
        mtime: row.get(6)?,
        nlink: row.get::<_, i64>(7)? as u32,
        inline_data: row.get(8)?,
    })
}

fn row_to_namespace_entry(row: &rusqlite::Row) -> rusqlite::Result<NamespaceEntry> {
    let obj_type: String = row.get(2)?;
    Ok(NamespaceEntry {
        parent_path: row.get(0)?,
        name: row.get(1)?,
        obj_type: parse_obj_type(&obj_type),
        inode: row.get::<_, i64>(3)? as u64,
    })
}
