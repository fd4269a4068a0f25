use crate::error::{Result, StoreError};
use crate::traits::{DocumentStore, StoredThing, ThingMetadata, WriteTransaction};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024; // 10MB limit

/// Row as read from `things`, before timestamp parsing
type RawRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// SQLite-backed Thing Description store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open a store at the given path
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        info!("Opening TD store at: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create a store that lives only as long as this value
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn init_schema(&self) -> Result<()> {
        debug!("Initializing TD store schema");
        let conn = self.conn.lock();

        conn.execute_batch("PRAGMA journal_mode = WAL")?;

        // Content plus metadata, one row per registered document.
        // `seq` fixes insertion order for every query mode.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS things (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                uri TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                keywords TEXT NOT NULL DEFAULT '',
                endpoint TEXT,
                created_at TEXT,
                modified_at TEXT,
                expires_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_things_expires ON things(expires_at)",
            [],
        )?;

        // Keyword index
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS things_fts USING fts5(
                keywords,
                tokenize='unicode61'
            )",
        )?;

        // Surface for structured queries
        conn.execute_batch(
            "CREATE VIEW IF NOT EXISTS thing_view AS
             SELECT seq, uri, content, keywords, endpoint, created_at, modified_at, expires_at
             FROM things",
        )?;

        Self::create_fts_triggers(&conn)?;

        info!("TD store schema initialized successfully");
        Ok(())
    }

    /// Keep `things_fts` in sync with `things.keywords`
    fn create_fts_triggers(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS things_ai AFTER INSERT ON things
            BEGIN
                INSERT INTO things_fts(rowid, keywords) VALUES (new.seq, new.keywords);
            END",
        )?;

        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS things_au AFTER UPDATE OF keywords ON things
            BEGIN
                DELETE FROM things_fts WHERE rowid = old.seq;
                INSERT INTO things_fts(rowid, keywords) VALUES (new.seq, new.keywords);
            END",
        )?;

        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS things_ad AFTER DELETE ON things
            BEGIN
                DELETE FROM things_fts WHERE rowid = old.seq;
            END",
        )?;

        Ok(())
    }

    /// Number of stored documents
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM things", [], |row| row.get(0))?;
        Ok(total as usize)
    }

    fn contains_in(conn: &Connection, uri: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT seq FROM things WHERE uri = ?",
                params![uri],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn collect_uris(
        conn: &Connection,
        sql: &str,
        bind: Option<&str>,
    ) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = match bind {
            Some(value) => stmt
                .query_map(params![value], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(dedup_preserving_order(rows))
    }

    fn collect_values(conn: &Connection, sql: &str, expr: &str) -> Result<Vec<Value>> {
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params![expr], |row| {
                Ok((row.get::<_, Option<String>>(0)?, row.get::<_, SqlValue>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut values = Vec::with_capacity(raw.len());
        for (kind, value) in raw {
            match kind.as_deref() {
                None | Some("null") => continue,
                Some(kind) => values.push(json_from_sql(kind, value)?),
            }
        }
        Ok(values)
    }
}

impl DocumentStore for SqliteStore {
    fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteWriteTransaction {
            conn,
            finished: false,
        }))
    }

    fn contains(&self, uri: &str) -> Result<bool> {
        let conn = self.conn.lock();
        Self::contains_in(&conn, uri)
    }

    fn get_document(&self, uri: &str) -> Result<StoredThing> {
        let conn = self.conn.lock();
        let row: Option<RawRow> = conn
            .query_row(
                "SELECT uri, content, keywords, endpoint, created_at, modified_at, expires_at
                 FROM things WHERE uri = ?",
                params![uri],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        let (uri, content, keywords, endpoint, created, modified, expires) =
            row.ok_or_else(|| StoreError::DocumentNotFound(uri.to_string()))?;

        let metadata = match (endpoint, created, modified, expires) {
            (Some(endpoint), Some(created), Some(modified), Some(expires)) => Some(ThingMetadata {
                endpoint,
                created_at: parse_timestamp(&created)?,
                modified_at: parse_timestamp(&modified)?,
                expires_at: parse_timestamp(&expires)?,
            }),
            _ => None,
        };

        Ok(StoredThing {
            uri,
            content,
            keywords: keywords.split_whitespace().map(str::to_string).collect(),
            metadata,
        })
    }

    fn query_structured(&self, query: &str) -> Result<Vec<String>> {
        if has_statement_separator(query) {
            return Err(StoreError::QuerySyntax(
                "multiple statements are not allowed".to_string(),
            ));
        }

        let sql = format!("SELECT uri FROM thing_view WHERE ({}) ORDER BY seq", query);
        let conn = self.conn.lock();

        let stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::QuerySyntax(e.to_string()))?;
        if !stmt.readonly() {
            return Err(StoreError::QuerySyntax("query must be read-only".to_string()));
        }
        drop(stmt);

        // Statement compiled; anything failing from here on is the store's
        Ok(Self::collect_uris(&conn, &sql, None)?)
    }

    fn list_all(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        Ok(Self::collect_uris(
            &conn,
            "SELECT uri FROM things ORDER BY seq",
            None,
        )?)
    }

    fn query_text(&self, terms: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        Self::collect_uris(
            &conn,
            "SELECT t.uri FROM things t
             JOIN things_fts ON things_fts.rowid = t.seq
             WHERE things_fts MATCH ?
             ORDER BY t.seq",
            Some(terms),
        )
        .map_err(|e| StoreError::QuerySyntax(e.to_string()))
    }

    fn query_type_values(&self, expr: &str) -> Result<Vec<Value>> {
        if expr.starts_with('$') {
            validate_json_path(expr)?;
        }
        let conn = self.conn.lock();

        let result = if expr.starts_with('$') {
            Self::collect_values(
                &conn,
                "SELECT json_type(content, ?1), json_extract(content, ?1)
                 FROM things ORDER BY seq",
                expr,
            )
        } else {
            Self::collect_values(
                &conn,
                "SELECT j.type, j.value
                 FROM things t, json_tree(t.content) j
                 WHERE j.key = ?1
                 ORDER BY t.seq, j.id",
                expr,
            )
        };

        result.map_err(|e| match e {
            StoreError::Sqlite(e) => StoreError::QuerySyntax(e.to_string()),
            other => other,
        })
    }

    fn delete_document(&self, uri: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM things WHERE uri = ?", params![uri])?;
        if deleted > 0 {
            debug!("Deleted document {}", uri);
        }
        Ok(deleted > 0)
    }

    fn expiry_entries(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uri, expires_at FROM things
             WHERE expires_at IS NOT NULL
             ORDER BY expires_at, seq",
        )?;
        let raw = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut entries = Vec::with_capacity(raw.len());
        for (uri, expires) in raw {
            match parse_timestamp(&expires) {
                Ok(at) => entries.push((uri, at)),
                Err(e) => warn!("Skipping expiry entry for {}: {}", uri, e),
            }
        }
        Ok(entries)
    }
}

/// Write transaction holding the connection lock until it ends
struct SqliteWriteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl WriteTransaction for SqliteWriteTransaction<'_> {
    fn contains(&self, uri: &str) -> Result<bool> {
        SqliteStore::contains_in(&self.conn, uri)
    }

    fn put_document(&mut self, uri: &str, content: &str) -> Result<()> {
        if content.len() > MAX_CONTENT_SIZE {
            return Err(StoreError::TooLarge {
                size: content.len(),
                max: MAX_CONTENT_SIZE,
            });
        }
        serde_json::from_str::<Value>(content).map_err(|e| StoreError::Parse(e.to_string()))?;

        if SqliteStore::contains_in(&self.conn, uri)? {
            return Err(StoreError::DuplicateId(uri.to_string()));
        }

        debug!("Storing document: {}", uri);
        self.conn.execute(
            "INSERT INTO things (uri, content) VALUES (?, ?)",
            params![uri, content],
        )?;
        Ok(())
    }

    fn put_keywords(&mut self, uri: &str, keywords: &[String]) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE things SET keywords = ? WHERE uri = ?",
            params![keywords.join(" "), uri],
        )?;
        if updated == 0 {
            return Err(StoreError::DocumentNotFound(uri.to_string()));
        }
        Ok(())
    }

    fn put_metadata(&mut self, uri: &str, metadata: &ThingMetadata) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE things SET endpoint = ?, created_at = ?, modified_at = ?, expires_at = ?
             WHERE uri = ?",
            params![
                metadata.endpoint,
                format_timestamp(&metadata.created_at),
                format_timestamp(&metadata.modified_at),
                format_timestamp(&metadata.expires_at),
                uri
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::DocumentNotFound(uri.to_string()));
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteWriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Rollback of abandoned transaction failed: {}", e);
            }
        }
    }
}

/// Fixed-width RFC 3339 so that text order matches time order
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Parse(format!("bad timestamp '{}': {}", raw, e)))
}

/// Convert a SQLite JSON-function result back into a JSON value
fn json_from_sql(kind: &str, value: SqlValue) -> Result<Value> {
    let json = match (kind, value) {
        ("object" | "array", SqlValue::Text(text)) => serde_json::from_str(&text)?,
        ("true", _) => Value::Bool(true),
        ("false", _) => Value::Bool(false),
        (_, SqlValue::Null) => Value::Null,
        (_, SqlValue::Integer(i)) => Value::from(i),
        (_, SqlValue::Real(f)) => Value::from(f),
        (_, SqlValue::Text(text)) => Value::String(text),
        (kind, SqlValue::Blob(_)) => {
            return Err(StoreError::Custom(format!("unexpected blob for JSON {}", kind)))
        }
    };
    Ok(json)
}

/// Whether `query` holds a `;` outside string literals and quoted identifiers
fn has_statement_separator(query: &str) -> bool {
    let mut quote: Option<char> = None;
    for c in query.chars() {
        match quote {
            // A doubled quote closes and reopens, which nets out the same
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '[' => quote = Some(']'),
                ';' => return true,
                _ => {}
            },
        }
    }
    false
}

/// Check a JSON path (`$`, `.key`, `."quoted key"`, `[N]`, `[#]`, `[#-N]`)
/// before it is applied. SQLite only parses the steps it reaches, so a bad
/// path can otherwise go unnoticed on some documents.
fn validate_json_path(path: &str) -> Result<()> {
    let invalid = || StoreError::QuerySyntax(format!("bad JSON path: {}", path));
    let mut rest = path.strip_prefix('$').ok_or_else(invalid)?;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let len = match after.strip_prefix('"') {
                Some(quoted) => quoted.find('"').ok_or_else(invalid)? + 2,
                None => after.find(['.', '[']).unwrap_or(after.len()),
            };
            if len == 0 {
                return Err(invalid());
            }
            rest = &after[len..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or_else(invalid)?;
            let index = &after[..close];
            let digits = index
                .strip_prefix("#-")
                .or_else(|| (index != "#").then_some(index));
            match digits {
                None => {}
                Some(d) if !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()) => {}
                Some(_) => return Err(invalid()),
            }
            rest = &after[close + 1..];
        } else {
            return Err(invalid());
        }
    }
    Ok(())
}

fn dedup_preserving_order(uris: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(uris.len());
    uris.into_iter().filter(|uri| seen.insert(uri.clone())).collect()
}
