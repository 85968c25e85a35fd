//! The fixed statement set over the relational store
//!
//! Every engine mutation and lookup goes through one of these prepared
//! statements (`prepare_cached`, so each SQL string compiles once per
//! connection). The connection mutex in [`super::Store`] guarantees a
//! statement's bind and step never interleave across threads.
//!
//! Not-found lookups return `Ok(None)` / empty vectors, never an error.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::{LinkRow, TagRow};

pub struct Repository<'a> {
    conn: &'a Connection,
}

impl<'a> Repository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ----- file rows -----

    pub fn insert_file(&self, id: u64, name: &str) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO file (id, name) VALUES (?1, ?2)")?;
        stmt.execute(params![id, name])?;
        Ok(())
    }

    pub fn update_file_name(&self, id: u64, name: &str) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE file SET name = ?1 WHERE id = ?2")?;
        stmt.execute(params![name, id])?;
        Ok(())
    }

    pub fn delete_file(&self, id: u64) -> Result<()> {
        let mut stmt = self.conn.prepare_cached("DELETE FROM file WHERE id = ?1")?;
        stmt.execute(params![id])?;
        Ok(())
    }

    // ----- tag rows -----

    #[allow(clippy::too_many_arguments)]
    pub fn insert_tag(
        &self,
        id: u64,
        name: &str,
        kind: u8,
        default_value: Option<&[u8]>,
        min_value: Option<i64>,
        max_value: Option<i64>,
        parent: Option<u64>,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO tag (id, name, kind, default_value, min_value, max_value, parent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        stmt.execute(params![id, name, kind, default_value, min_value, max_value, parent])?;
        Ok(())
    }

    pub fn update_tag_name(&self, id: u64, name: &str) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE tag SET name = ?1 WHERE id = ?2")?;
        stmt.execute(params![name, id])?;
        Ok(())
    }

    pub fn update_tag_default(&self, id: u64, default_value: Option<&[u8]>) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE tag SET default_value = ?1 WHERE id = ?2")?;
        stmt.execute(params![default_value, id])?;
        Ok(())
    }

    pub fn delete_tag(&self, id: u64) -> Result<()> {
        let mut stmt = self.conn.prepare_cached("DELETE FROM tag WHERE id = ?1")?;
        stmt.execute(params![id])?;
        Ok(())
    }

    // ----- file_tag rows -----

    /// Idempotent link upsert: re-linking refreshes the stored value.
    pub fn link(&self, file: u64, tag: u64, value: Option<&[u8]>) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO file_tag (file, tag, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(file, tag) DO UPDATE SET value = excluded.value",
        )?;
        stmt.execute(params![file, tag, value])?;
        Ok(())
    }

    pub fn unlink(&self, file: u64, tag: u64) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM file_tag WHERE file = ?1 AND tag = ?2")?;
        Ok(stmt.execute(params![file, tag])? > 0)
    }

    /// Cascading removal of every link row for one tag (drawer drop).
    pub fn unlink_all_for_tag(&self, tag: u64) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM file_tag WHERE tag = ?1")?;
        Ok(stmt.execute(params![tag])?)
    }

    pub fn unlink_all_for_file(&self, file: u64) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM file_tag WHERE file = ?1")?;
        Ok(stmt.execute(params![file])?)
    }

    // ----- alias rows -----

    pub fn insert_alias(&self, tag: u64, name: &str) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO tag_alias (id, name) VALUES (?1, ?2)")?;
        stmt.execute(params![tag, name])?;
        Ok(())
    }

    pub fn delete_alias(&self, name: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM tag_alias WHERE name = ?1")?;
        Ok(stmt.execute(params![name])? > 0)
    }

    pub fn delete_aliases_for_tag(&self, tag: u64) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM tag_alias WHERE id = ?1")?;
        Ok(stmt.execute(params![tag])?)
    }

    // ----- startup rebuild -----

    pub fn load_files(&self) -> Result<Vec<(u64, String)>> {
        let mut stmt = self.conn.prepare_cached("SELECT id, name FROM file")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        collect(rows)
    }

    pub fn load_tags(&self) -> Result<Vec<TagRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, kind, default_value, min_value, max_value, parent FROM tag",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TagRow {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: row.get(2)?,
                default_value: row.get(3)?,
                min_value: row.get(4)?,
                max_value: row.get(5)?,
                parent: row.get(6)?,
            })
        })?;
        collect(rows)
    }

    pub fn load_links(&self) -> Result<Vec<LinkRow>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT file, tag, value FROM file_tag")?;
        let rows = stmt.query_map([], |row| {
            Ok(LinkRow {
                file: row.get(0)?,
                tag: row.get(1)?,
                value: row.get(2)?,
            })
        })?;
        collect(rows)
    }

    pub fn load_aliases(&self) -> Result<Vec<(u64, String)>> {
        let mut stmt = self.conn.prepare_cached("SELECT id, name FROM tag_alias")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        collect(rows)
    }

    /// High-water marks for id minting. AUTOINCREMENT keeps
    /// `sqlite_sequence` at the largest id ever inserted, so deleted
    /// ids are never reused across restarts.
    pub fn max_ids(&self) -> Result<(u64, u64)> {
        let seq = |table: &str| -> Result<u64> {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT seq FROM sqlite_sequence WHERE name = ?1")?;
            Ok(stmt
                .query_row(params![table], |row| row.get::<_, i64>(0))
                .optional()?
                .unwrap_or(0)
                .max(0) as u64)
        };
        Ok((seq("file")?, seq("tag")?))
    }
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
