// Persistent store for items and notification records
// The daemon shares one store handle between the scheduler and every connection

pub mod sqlite;

use chrono::{DateTime, Local, NaiveDate, Utc};
use thiserror::Error;

use crate::model::{Filter, Item, Notification, NotificationKind};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item with ID '{0}' not found")]
    NotFound(String),
    #[error("notification '{0}' not found")]
    NotificationNotFound(String),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Item and notification persistence.
///
/// Implementations must be safe for concurrent use from many threads; the
/// daemon puts no locking of its own above the store.
pub trait Store: Send + Sync {
    fn create(&self, item: &Item) -> StoreResult<()>;
    fn get(&self, id: &str) -> StoreResult<Item>;
    fn update(&self, item: &Item) -> StoreResult<()>;
    fn delete(&self, id: &str) -> StoreResult<()>;

    /// Everything except terminal tasks older than the retention window
    fn list(&self) -> StoreResult<Vec<Item>>;

    fn list_filtered(&self, filter: &Filter) -> StoreResult<Vec<Item>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect())
    }

    /// Exact id lookup, falling back to the first id with `prefix`
    fn find_by_id_prefix(&self, prefix: &str) -> StoreResult<Item>;

    /// All tasks ordered by capture date
    fn all_tasks(&self) -> StoreResult<Vec<Item>>;

    /// Items captured during the local day containing `day`
    fn items_for_day(&self, day: DateTime<Local>) -> StoreResult<Vec<Item>>;

    /// Notes and links captured during the local day containing `day`
    fn notes_and_links_for_day(&self, day: DateTime<Local>) -> StoreResult<Vec<Item>>;

    /// Open tasks due before `now` that have no `kind` notification in
    /// today's local window
    fn overdue_tasks(&self, kind: NotificationKind, now: DateTime<Local>)
        -> StoreResult<Vec<Item>>;

    fn create_notification(&self, notification: &Notification) -> StoreResult<()>;
    fn get_notification(&self, id: &str) -> StoreResult<Notification>;
    fn notification_for(
        &self,
        item_id: &str,
        kind: NotificationKind,
    ) -> StoreResult<Option<Notification>>;
    /// Record a repeat: bump the counter and move `last_notified_at`
    fn touch_notification(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()>;
    fn delete_notification(&self, id: &str) -> StoreResult<()>;
    fn delete_notifications_for_item(&self, item_id: &str) -> StoreResult<()>;
    fn list_notifications(&self) -> StoreResult<Vec<Notification>>;
}

/// UTC bounds of the local calendar day containing `day`
pub fn local_day_bounds(day: DateTime<Local>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date: NaiveDate = day.date_naive();
    let start = local_midnight(date).unwrap_or(day);
    let end = date
        .succ_opt()
        .and_then(local_midnight)
        .unwrap_or_else(|| start + chrono::Duration::hours(24));
    (start.with_timezone(&Utc), end.with_timezone(&Utc))
}

fn local_midnight(date: NaiveDate) -> Option<DateTime<Local>> {
    date.and_hms_opt(0, 0, 0)?
        .and_local_timezone(Local)
        .earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_bounds_cover_the_local_day() {
        let noon = Local.with_ymd_and_hms(2025, 6, 20, 12, 0, 0).unwrap();
        let (start, end) = local_day_bounds(noon);
        let noon_utc = noon.with_timezone(&Utc);

        assert!(start <= noon_utc && noon_utc < end);
        assert_eq!(start.with_timezone(&Local).date_naive(), noon.date_naive());
        assert_eq!(
            end.with_timezone(&Local).date_naive(),
            noon.date_naive().succ_opt().unwrap()
        );
    }
}
