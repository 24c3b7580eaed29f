//! SQL schema for the embedded metadata store. Every statement elsewhere in
//! `index/` is parameterized (`rusqlite::params!`) — never string-interpolated
//! — so identifiers containing quotes or backslashes cannot misparse.

pub const SCHEMA_VERSION: i64 = 1;

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS data_objects (
    inode        INTEGER PRIMARY KEY,
    kind         TEXT NOT NULL,
    remote_id    TEXT NOT NULL,
    project_id   TEXT NOT NULL,
    size         INTEGER NOT NULL,
    ctime        INTEGER NOT NULL,
    mtime        INTEGER NOT NULL,
    nlink        INTEGER NOT NULL,
    inline_data  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS data_objects_remote_id ON data_objects(remote_id);

CREATE TABLE IF NOT EXISTS namespace (
    parent   TEXT NOT NULL,
    name     TEXT NOT NULL,
    obj_type TEXT NOT NULL,
    inode    INTEGER NOT NULL,
    PRIMARY KEY (parent, name)
);
CREATE INDEX IF NOT EXISTS namespace_parent ON namespace(parent);
CREATE INDEX IF NOT EXISTS namespace_inode ON namespace(inode);

CREATE TABLE IF NOT EXISTS directories (
    inode           INTEGER PRIMARY KEY,
    project_id      TEXT NOT NULL,
    project_folder  TEXT NOT NULL,
    populated       INTEGER NOT NULL,
    ctime           INTEGER NOT NULL,
    mtime           INTEGER NOT NULL
);
"#;

use rusqlite::OptionalExtension;

pub fn check_or_set_schema_version(conn: &rusqlite::Connection) -> crate::error::Result<()> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(|v| v.parse().unwrap_or(-1));

    match existing {
        None => {
            conn.execute(
                "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
                rusqlite::params![SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        }
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(v) => Err(crate::error::Error::corrupt(format!(
            "metadata store schema_version {v} does not match expected {SCHEMA_VERSION}"
        ))),
    }
}
