// SQLite-backed store
// One connection behind a mutex; every call takes the lock for its whole unit of work

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{local_day_bounds, Store, StoreError, StoreResult};
use crate::model::{Item, ItemType, Notification, NotificationKind};

/// Timestamps are stored as UTC text in this format so that string
/// comparison orders them chronologically
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ITEM_COLUMNS: &str = "id, type, content, link, tags, places, status, date, due_date";
const NOTIFICATION_COLUMNS: &str = "id, item_id, kind, last_notified_at, times_notified";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    done_task_list_days: u32,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>, done_task_list_days: u32) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        debug!(path = %path.display(), "opening database");
        Self::with_connection(Connection::open(path)?, done_task_list_days)
    }

    /// Private in-memory database, used by tests
    pub fn open_in_memory(done_task_list_days: u32) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, done_task_list_days)
    }

    fn with_connection(conn: Connection, done_task_list_days: u32) -> StoreResult<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            done_task_list_days,
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_items(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Item>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_item_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row??);
        }
        Ok(items)
    }

    fn query_notifications(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_notification_row)?;
        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row??);
        }
        Ok(notifications)
    }
}

fn migrate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys=ON;

        CREATE TABLE IF NOT EXISTS items (
          id TEXT PRIMARY KEY,
          type TEXT NOT NULL,
          content TEXT NOT NULL DEFAULT '',
          link TEXT NOT NULL DEFAULT '',
          tags TEXT NOT NULL DEFAULT '',
          places TEXT NOT NULL DEFAULT '',
          status TEXT NOT NULL DEFAULT '',
          date TEXT NOT NULL,
          due_date TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_items_type_date ON items(type, date);

        CREATE TABLE IF NOT EXISTS notifications (
          id TEXT PRIMARY KEY,
          item_id TEXT NOT NULL,
          kind TEXT NOT NULL,
          last_notified_at TEXT NOT NULL,
          times_notified INTEGER NOT NULL DEFAULT 1,
          FOREIGN KEY (item_id) REFERENCES items (id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_item_kind ON notifications(item_id, kind);
        "#,
    )?;
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| StoreError::Corrupt(format!("bad timestamp '{raw}'")))
}

fn join_list(values: &[String]) -> String {
    values.join(",")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// Decoding errors are returned inside the row result so a bad row surfaces as
// StoreError::Corrupt instead of a rusqlite conversion error.
fn read_item_row(row: &Row<'_>) -> rusqlite::Result<StoreResult<Item>> {
    let id: String = row.get(0)?;
    let item_type: String = row.get(1)?;
    let content: String = row.get(2)?;
    let link: String = row.get(3)?;
    let tags: String = row.get(4)?;
    let places: String = row.get(5)?;
    let status: String = row.get(6)?;
    let date: String = row.get(7)?;
    let due_date: Option<String> = row.get(8)?;

    Ok((|| -> StoreResult<Item> {
        Ok(Item {
            item_type: item_type
                .parse::<ItemType>()
                .map_err(|e| StoreError::Corrupt(format!("item {id}: {e}")))?,
            content,
            link,
            tags: split_list(&tags),
            places: split_list(&places),
            status,
            date: parse_ts(&date)?,
            due_date: due_date.as_deref().map(parse_ts).transpose()?,
            id,
        })
    })())
}

fn read_notification_row(row: &Row<'_>) -> rusqlite::Result<StoreResult<Notification>> {
    let id: String = row.get(0)?;
    let item_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let last_notified_at: String = row.get(3)?;
    let times_notified: u32 = row.get(4)?;

    Ok((|| -> StoreResult<Notification> {
        Ok(Notification {
            kind: kind
                .parse::<NotificationKind>()
                .map_err(|e| StoreError::Corrupt(format!("notification {id}: {e}")))?,
            last_notified_at: parse_ts(&last_notified_at)?,
            id,
            item_id,
            times_notified,
        })
    })())
}

impl Store for SqliteStore {
    fn create(&self, item: &Item) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                item.id,
                item.item_type.as_str(),
                item.content,
                item.link,
                join_list(&item.tags),
                join_list(&item.places),
                item.status,
                format_ts(item.date),
                item.due_date.map(format_ts),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Item> {
        self.query_items(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"), [id])?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn update(&self, item: &Item) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE items SET type = ?1, content = ?2, link = ?3, tags = ?4, places = ?5, \
             status = ?6, date = ?7, due_date = ?8 WHERE id = ?9",
            params![
                item.item_type.as_str(),
                item.content,
                item.link,
                join_list(&item.tags),
                join_list(&item.places),
                item.status,
                format_ts(item.date),
                item.due_date.map(format_ts),
                item.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(item.id.clone()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM items WHERE id = ?1", [id])?;
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<Item>> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.done_task_list_days));
        self.query_items(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM items \
                 WHERE type != 'task' \
                    OR status NOT IN ('done', 'canceled') \
                    OR date >= ?1 \
                 ORDER BY date"
            ),
            [format_ts(cutoff)],
        )
    }

    fn find_by_id_prefix(&self, prefix: &str) -> StoreResult<Item> {
        // An empty prefix would match every row
        if prefix.trim().is_empty() {
            return Err(StoreError::NotFound(prefix.to_string()));
        }
        match self.get(prefix) {
            Err(StoreError::NotFound(_)) => {}
            other => return other,
        }
        // Escape LIKE wildcards so the prefix is literal
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        self.query_items(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE id LIKE ?1 || '%' ESCAPE '\\' \
                 ORDER BY date LIMIT 1"
            ),
            [escaped],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(prefix.to_string()))
    }

    fn all_tasks(&self) -> StoreResult<Vec<Item>> {
        self.query_items(
            &format!("SELECT {ITEM_COLUMNS} FROM items WHERE type = 'task' ORDER BY date"),
            params![],
        )
    }

    fn items_for_day(&self, day: DateTime<Local>) -> StoreResult<Vec<Item>> {
        let (start, end) = local_day_bounds(day);
        self.query_items(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE date >= ?1 AND date < ?2 ORDER BY date"
            ),
            [format_ts(start), format_ts(end)],
        )
    }

    fn notes_and_links_for_day(&self, day: DateTime<Local>) -> StoreResult<Vec<Item>> {
        let (start, end) = local_day_bounds(day);
        self.query_items(
            &format!(
                "SELECT {ITEM_COLUMNS} FROM items \
                 WHERE type IN ('note', 'link') AND date >= ?1 AND date < ?2 ORDER BY date"
            ),
            [format_ts(start), format_ts(end)],
        )
    }

    fn overdue_tasks(
        &self,
        kind: NotificationKind,
        now: DateTime<Local>,
    ) -> StoreResult<Vec<Item>> {
        let (start, end) = local_day_bounds(now);
        self.query_items(
            "SELECT i.id, i.type, i.content, i.link, i.tags, i.places, i.status, i.date, i.due_date \
             FROM items i \
             WHERE i.type = 'task' \
               AND i.due_date IS NOT NULL \
               AND i.due_date < ?1 \
               AND i.status NOT IN ('done', 'canceled') \
               AND NOT EXISTS ( \
                 SELECT 1 FROM notifications n \
                 WHERE n.item_id = i.id AND n.kind = ?2 \
                   AND n.last_notified_at >= ?3 AND n.last_notified_at < ?4 \
               ) \
             ORDER BY i.due_date",
            params![
                format_ts(now.with_timezone(&Utc)),
                kind.as_str(),
                format_ts(start),
                format_ts(end),
            ],
        )
    }

    fn create_notification(&self, notification: &Notification) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                notification.id,
                notification.item_id,
                notification.kind.as_str(),
                format_ts(notification.last_notified_at),
                notification.times_notified,
            ],
        )?;
        Ok(())
    }

    fn get_notification(&self, id: &str) -> StoreResult<Notification> {
        self.query_notifications(
            &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
            [id],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotificationNotFound(id.to_string()))
    }

    fn notification_for(
        &self,
        item_id: &str,
        kind: NotificationKind,
    ) -> StoreResult<Option<Notification>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
                     WHERE item_id = ?1 AND kind = ?2 LIMIT 1"
                ),
                params![item_id, kind.as_str()],
                read_notification_row,
            )
            .optional()?;
        row.transpose()
    }

    fn touch_notification(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE notifications SET last_notified_at = ?1, times_notified = times_notified + 1 \
             WHERE id = ?2",
            params![format_ts(at), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotificationNotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete_notification(&self, id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM notifications WHERE id = ?1", [id])?;
        Ok(())
    }

    fn delete_notifications_for_item(&self, item_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM notifications WHERE item_id = ?1", [item_id])?;
        Ok(())
    }

    fn list_notifications(&self) -> StoreResult<Vec<Notification>> {
        self.query_notifications(
            &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications ORDER BY last_notified_at"),
            params![],
        )
    }
}
