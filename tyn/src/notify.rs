//! Desktop notifications for overdue tasks.
//!
//! The daemon only depends on the [`Notifier`] trait; [`DesktopNotifier`]
//! shells out to `notify-send`, the freedesktop notification client.

use std::process::Command;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use thiserror::Error;
use tracing::debug;

use crate::model::Item;

pub const OVERDUE_TITLE: &str = "Tyn: Task Overdue";
pub const REMINDER_TITLE: &str = "Tyn: Overdue Task Reminder";

const APP_NAME: &str = "Tyn";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to run notify-send: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("notify-send exited with {0}")]
    Failed(std::process::ExitStatus),
}

/// Sink for overdue-task notifications
pub trait Notifier: Send + Sync {
    /// First notification about an overdue task
    fn notify_overdue(&self, title: &str, message: &str) -> Result<(), NotifyError>;
    /// Repeat notification about a task that was already reported
    fn notify_reminder(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

/// Notifier backed by `notify-send`
pub struct DesktopNotifier {
    timeout: Duration,
}

impl DesktopNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        debug!(title, "sending desktop notification");
        let status = Command::new("notify-send")
            .arg("-t")
            .arg(self.timeout.as_millis().to_string())
            .arg("-a")
            .arg(APP_NAME)
            .arg(title)
            .arg(message)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(NotifyError::Failed(status))
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify_overdue(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        self.send(title, message)
    }

    fn notify_reminder(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        self.send(title, message)
    }
}

/// Body text shown for an overdue task
pub fn overdue_message(item: &Item) -> String {
    let due = item
        .due_date
        .map(format_due)
        .unwrap_or_else(|| "none".to_string());
    format!("Due date: {} - {}", due, item.content)
}

fn format_due(due: DateTime<Utc>) -> String {
    due.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn overdue_message_includes_local_due_date_and_content() {
        let mut item = Item::new(Utc::now());
        item.content = "pay rent".to_string();
        let due_local = Local.with_ymd_and_hms(2025, 6, 20, 9, 30, 0).unwrap();
        item.due_date = Some(due_local.with_timezone(&Utc));

        assert_eq!(overdue_message(&item), "Due date: 2025-06-20 09:30 - pay rent");
    }

    #[test]
    fn overdue_message_without_due_date() {
        let mut item = Item::new(Utc::now());
        item.content = "floating".to_string();
        assert_eq!(overdue_message(&item), "Due date: none - floating");
    }
}
