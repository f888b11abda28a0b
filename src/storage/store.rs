//! Persistent store: the sqlite catalog plus the object directory.
//!
//! Two logical tables back the whole mount: `files` (identity, unique name,
//! tag set, metadata, symlink target) and `empty_tags` (markers created by
//! mkdir before any file bears the tag). File bytes live next door under
//! `store/<file_id>`; see `content`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, Transaction};

use crate::engine::index::{FileEntry, FileId};
use crate::error::{Result, TagError};

pub struct Store {
    conn: Mutex<Connection>,
    root: PathBuf,
}

impl Store {
    /// Open (creating on first run) the catalog under the datastore root.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join("store"))?;

        let conn = Connection::open(root.join("index.db"))?;

        // WAL mode for concurrent readers while a commit is in flight
        conn.pragma_update(None, "journal_mode", WAL)?;
        conn.pragma_update(None, "foreign_keys", ON)?;
        conn.pragma_update(None, "synchronous", NORMAL)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE,
                tags        TEXT NOT NULL DEFAULT '[]',
                mode        INTEGER NOT NULL,
                uid         INTEGER NOT NULL,
                gid         INTEGER NOT NULL,
                is_symlink  INTEGER NOT NULL DEFAULT 0,
                target      TEXT,
                created_at  DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at  DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS empty_tags (
                name TEXT PRIMARY KEY
            );
        "#,
        )?;

        tracing::info!("[Store] Catalog ready at {}", root.display());
        Ok(Self { conn: Mutex::new(conn), root: root.to_path_buf() })
    }

    /// Directory holding file bytes keyed by file id.
    pub fn object_root(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Run `f` inside a single transaction; commit on success. The commit is
    /// the linearization point for every mutation.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| TagError::State("Poisoned lock".into()))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Load every file row and marker for the index rebuild at mount.
    pub fn load(&self) -> Result<(Vec<FileEntry>, BTreeSet<String>)> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| TagError::State("Poisoned lock".into()))?;

        let mut stmt = conn.prepare(
            "SELECT file_id, name, tags, mode, uid, gid, is_symlink, target FROM files",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, FileId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, i32>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, name, raw_tags, mode, uid, gid, is_symlink, target) = row?;
            entries.push(FileEntry {
                id,
                name,
                tags: decode_tags(&raw_tags)?,
                mode,
                uid,
                gid,
                is_symlink: is_symlink != 0,
                target,
            });
        }

        let mut stmt = conn.prepare("SELECT name FROM empty_tags")?;
        let markers = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        Ok((entries, markers))
    }
}

// Row helpers, usable inside a transaction or on a bare connection.

pub fn insert_file(
    tx: &Transaction,
    name: &str,
    tags: &BTreeSet<String>,
    mode: u32,
    uid: u32,
    gid: u32,
    is_symlink: bool,
    target: Option<&str>,
) -> Result<FileId> {
    tx.execute(
        "INSERT INTO files (name, tags, mode, uid, gid, is_symlink, target)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![name, encode_tags(tags)?, mode, uid, gid, is_symlink as i32, target],
    )?;
    Ok(tx.last_insert_rowid())
}

pub fn delete_file(tx: &Transaction, id: FileId) -> Result<()> {
    tx.execute("DELETE FROM files WHERE file_id = ?1", params![id])?;
    Ok(())
}

pub fn update_tags(tx: &Transaction, id: FileId, tags: &BTreeSet<String>) -> Result<()> {
    tx.execute(
        "UPDATE files SET tags = ?1, updated_at = CURRENT_TIMESTAMP WHERE file_id = ?2",
        params![encode_tags(tags)?, id],
    )?;
    Ok(())
}

pub fn update_name(tx: &Transaction, id: FileId, name: &str) -> Result<()> {
    tx.execute(
        "UPDATE files SET name = ?1, updated_at = CURRENT_TIMESTAMP WHERE file_id = ?2",
        params![name, id],
    )?;
    Ok(())
}

pub fn update_mode(tx: &Transaction, id: FileId, mode: u32) -> Result<()> {
    tx.execute(
        "UPDATE files SET mode = ?1, updated_at = CURRENT_TIMESTAMP WHERE file_id = ?2",
        params![mode, id],
    )?;
    Ok(())
}

pub fn update_owner(tx: &Transaction, id: FileId, uid: u32, gid: u32) -> Result<()> {
    tx.execute(
        "UPDATE files SET uid = ?1, gid = ?2, updated_at = CURRENT_TIMESTAMP WHERE file_id = ?3",
        params![uid, gid, id],
    )?;
    Ok(())
}

pub fn insert_marker(tx: &Transaction, name: &str) -> Result<()> {
    tx.execute("INSERT OR IGNORE INTO empty_tags (name) VALUES (?1)", params![name])?;
    Ok(())
}

pub fn delete_marker(tx: &Transaction, name: &str) -> Result<()> {
    tx.execute("DELETE FROM empty_tags WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn rename_marker(tx: &Transaction, old: &str, new: &str) -> Result<()> {
    tx.execute("UPDATE empty_tags SET name = ?1 WHERE name = ?2", params![new, old])?;
    Ok(())
}

fn encode_tags(tags: &BTreeSet<String>) -> Result<String> {
    Ok(serde_json::to_string(tags)?)
}

fn decode_tags(raw: &str) -> Result<BTreeSet<String>> {
    Ok(serde_json::from_str(raw)?)
}

// SQL pragma constants
const WAL: &str = "WAL";
const ON: &str = "ON";
const NORMAL: &str = "NORMAL";
