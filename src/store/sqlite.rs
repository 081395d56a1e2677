//! SQLite implementation of the item store

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::item::{ContentKind, ContentRecord, HistoryItem, Payload};
use crate::store::{ItemStore, Page, PinFilter, StoreError, StoreOrder};

const SCHEMA_VERSION: u32 = 1;

/// SQLite-backed durable store for history items
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at the given path. Failure here is
    /// fatal for the process; callers terminate with the diagnostic.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL for concurrent readers alongside the writer
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };

        store.initialize().await?;
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;

        let version = self.get_schema_version(&conn)?;

        if version == 0 {
            self.create_schema(&conn)?;
        } else if version < SCHEMA_VERSION {
            self.migrate_schema(&conn, version)?;
        }

        Ok(())
    }

    fn get_schema_version(&self, conn: &Connection) -> Result<u32, StoreError> {
        let table_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Option<u32> = conn
            .query_row(
                "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        Ok(version.unwrap_or(0))
    }

    fn create_schema(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS history_items (
                id TEXT PRIMARY KEY,
                first_copied_at INTEGER NOT NULL,
                last_copied_at INTEGER NOT NULL,
                copies INTEGER NOT NULL DEFAULT 1,
                pin TEXT,
                application TEXT,
                title TEXT NOT NULL DEFAULT '',
                remote INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS content_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id TEXT NOT NULL REFERENCES history_items(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                payload BLOB,
                file_path TEXT
            );

            CREATE INDEX idx_items_last_copied ON history_items(last_copied_at DESC);
            CREATE INDEX idx_items_pin ON history_items(pin);
            CREATE INDEX idx_records_item ON content_records(item_id);
            ",
        )?;

        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }

    fn migrate_schema(&self, _conn: &Connection, _from_version: u32) -> Result<(), StoreError> {
        // Future migrations would go here
        Ok(())
    }

    fn insert_records(
        tx: &Transaction<'_>,
        item_id: Uuid,
        records: &[ContentRecord],
    ) -> Result<(), StoreError> {
        let mut stmt = tx.prepare(
            "INSERT INTO content_records (item_id, kind, payload, file_path)
             VALUES (?, ?, ?, ?)",
        )?;
        for record in records {
            let (payload, file_path): (Option<&[u8]>, Option<String>) = match &record.payload {
                Payload::Inline(bytes) => (Some(bytes.as_slice()), None),
                Payload::External(path) => (None, Some(path.to_string_lossy().into_owned())),
            };
            stmt.execute(params![
                item_id.to_string(),
                record.kind.tag(),
                payload,
                file_path,
            ])?;
        }
        Ok(())
    }

    fn row_to_item(row: &Row) -> Result<HistoryItem, StoreError> {
        let id: String = row.get(0)?;
        let first_copied_at: i64 = row.get(1)?;
        let last_copied_at: i64 = row.get(2)?;
        let copies: u32 = row.get(3)?;
        let pin: Option<String> = row.get(4)?;
        let application: Option<String> = row.get(5)?;
        let title: String = row.get(6)?;
        let remote: bool = row.get(7)?;

        let id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let pin = match pin {
            Some(s) => Some(
                s.chars()
                    .next()
                    .ok_or_else(|| StoreError::Corrupt(format!("empty pin on item {id}")))?,
            ),
            None => None,
        };

        Ok(HistoryItem {
            id,
            contents: Vec::new(),
            first_copied_at: chrono::DateTime::from_timestamp_millis(first_copied_at)
                .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp on item {id}")))?,
            last_copied_at: chrono::DateTime::from_timestamp_millis(last_copied_at)
                .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp on item {id}")))?,
            copies,
            pin,
            application,
            title,
            remote,
            title_generation: 0,
        })
    }

    fn load_contents(conn: &Connection, item: &mut HistoryItem) -> Result<(), StoreError> {
        let mut stmt = conn.prepare(
            "SELECT kind, payload, file_path FROM content_records WHERE item_id = ? ORDER BY id",
        )?;
        let records = stmt.query_map(params![item.id.to_string()], |row| {
            let kind: String = row.get(0)?;
            let payload: Option<Vec<u8>> = row.get(1)?;
            let file_path: Option<String> = row.get(2)?;
            Ok((kind, payload, file_path))
        })?;

        for record in records {
            let (kind, payload, file_path) = record?;
            let kind = ContentKind::from_tag(&kind)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown content kind {kind}")))?;
            let payload = match (payload, file_path) {
                (_, Some(path)) => Payload::External(PathBuf::from(path)),
                (Some(bytes), None) => Payload::Inline(bytes),
                (None, None) => {
                    return Err(StoreError::Corrupt(format!(
                        "content record without payload on item {}",
                        item.id
                    )))
                }
            };
            item.contents.push(ContentRecord { kind, payload });
        }
        Ok(())
    }

    fn fetch_items(
        conn: &Connection,
        filter: PinFilter,
        order: StoreOrder,
        page: Page,
    ) -> Result<Vec<HistoryItem>, StoreError> {
        let predicate = match filter {
            PinFilter::Any => "1 = 1",
            PinFilter::Pinned => "pin IS NOT NULL",
            PinFilter::Unpinned => "pin IS NULL",
        };
        let direction = match order {
            StoreOrder::LastCopiedAsc => "ASC",
            StoreOrder::LastCopiedDesc => "DESC",
        };
        let limit = page.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = page.offset.unwrap_or(0) as i64;

        let sql = format!(
            "SELECT id, first_copied_at, last_copied_at, copies, pin, application, title, remote
             FROM history_items
             WHERE {predicate}
             ORDER BY last_copied_at {direction}
             LIMIT ? OFFSET ?",
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit, offset], |row| {
            Ok(SqliteStore::row_to_item(row))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let mut item = row??;
            Self::load_contents(conn, &mut item)?;
            items.push(item);
        }
        Ok(items)
    }
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn insert(&self, item: &HistoryItem) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO history_items
             (id, first_copied_at, last_copied_at, copies, pin, application, title, remote)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                item.id.to_string(),
                item.first_copied_at.timestamp_millis(),
                item.last_copied_at.timestamp_millis(),
                item.copies,
                item.pin.map(String::from),
                item.application,
                item.title,
                item.remote,
            ],
        )?;
        Self::insert_records(&tx, item.id, &item.contents)?;

        tx.commit()?;
        Ok(())
    }

    async fn update(&self, item: &HistoryItem) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE history_items
             SET first_copied_at = ?, last_copied_at = ?, copies = ?, pin = ?,
                 application = ?, title = ?, remote = ?
             WHERE id = ?",
            params![
                item.first_copied_at.timestamp_millis(),
                item.last_copied_at.timestamp_millis(),
                item.copies,
                item.pin.map(String::from),
                item.application,
                item.title,
                item.remote,
                item.id.to_string(),
            ],
        )?;
        tx.execute(
            "DELETE FROM content_records WHERE item_id = ?",
            params![item.id.to_string()],
        )?;
        Self::insert_records(&tx, item.id, &item.contents)?;

        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM history_items WHERE id = ?",
            params![id.to_string()],
        )?;
        Ok(())
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<HistoryItem>, StoreError> {
        let conn = self.conn.lock().await;
        let item = conn
            .query_row(
                "SELECT id, first_copied_at, last_copied_at, copies, pin, application, title, remote
                 FROM history_items WHERE id = ?",
                params![id.to_string()],
                |row| Ok(SqliteStore::row_to_item(row)),
            )
            .optional()?;

        match item {
            Some(item) => {
                let mut item = item?;
                Self::load_contents(&conn, &mut item)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn fetch(
        &self,
        filter: PinFilter,
        order: StoreOrder,
        page: Page,
    ) -> Result<Vec<HistoryItem>, StoreError> {
        let conn = self.conn.lock().await;
        Self::fetch_items(&conn, filter, order, page)
    }

    async fn count(&self, filter: PinFilter) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let predicate = match filter {
            PinFilter::Any => "1 = 1",
            PinFilter::Pinned => "pin IS NOT NULL",
            PinFilter::Unpinned => "pin IS NULL",
        };
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM history_items WHERE {predicate}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn delete_matching(&self, filter: PinFilter) -> Result<Vec<HistoryItem>, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let items = {
            let predicate = match filter {
                PinFilter::Any => "1 = 1",
                PinFilter::Pinned => "pin IS NOT NULL",
                PinFilter::Unpinned => "pin IS NULL",
            };
            let sql = format!(
                "SELECT id, first_copied_at, last_copied_at, copies, pin, application, title, remote
                 FROM history_items WHERE {predicate}",
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map([], |row| Ok(SqliteStore::row_to_item(row)))?;

            let mut items = Vec::new();
            for row in rows {
                let mut item = row??;
                Self::load_contents(&tx, &mut item)?;
                items.push(item);
            }

            for item in &items {
                tx.execute(
                    "DELETE FROM history_items WHERE id = ?",
                    params![item.id.to_string()],
                )?;
            }
            items
        };

        tx.commit()?;
        Ok(items)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}
