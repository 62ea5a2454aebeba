//! Background scheduler loop.
//!
//! One thread runs [`Scheduler::run_forever`]. Every tick performs, in
//! order: maintenance, a rate-limited overdue sweep, report regeneration.
//! The dedup set and both "last ran" timestamps are owned by the loop and
//! reset only when the process starts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use tracing::{debug, error, info, warn};

use super::config::Settings;
use crate::journal::ReportGenerator;
use crate::model::{Item, Notification, NotificationKind};
use crate::notify::{overdue_message, Notifier, OVERDUE_TITLE, REMINDER_TITLE};
use crate::store::Store;

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// The overdue query ran on this tick
    pub overdue_checked: bool,
    /// Notifications delivered without error
    pub notified: usize,
    pub report_generated: bool,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    reports: Arc<dyn ReportGenerator>,
    poll_interval: Duration,
    overdue_check_interval: Duration,
    report_interval: Duration,
    notified: HashSet<String>,
    last_overdue_check: Option<Instant>,
    last_report: Option<Instant>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        reports: Arc<dyn ReportGenerator>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            notifier,
            reports,
            poll_interval: settings.poll_interval,
            overdue_check_interval: settings.overdue_check_interval,
            report_interval: settings.report_interval,
            notified: HashSet::new(),
            last_overdue_check: None,
            last_report: None,
        }
    }

    /// Tick, sleep, repeat. There is no shutdown path.
    pub fn run_forever(mut self) -> ! {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "scheduler started"
        );
        loop {
            self.tick_at(Instant::now(), Local::now());
            std::thread::sleep(self.poll_interval);
        }
    }

    pub fn tick_at(&mut self, now: Instant, wall: DateTime<Local>) -> TickSummary {
        self.maintenance();

        let mut summary = TickSummary::default();
        if let Some(notified) = self.sweep_overdue(now, wall) {
            summary.overdue_checked = true;
            summary.notified = notified;
        }
        summary.report_generated = self.regenerate_report(now, wall);
        summary
    }

    /// Extension point for periodic housekeeping
    fn maintenance(&mut self) {}

    /// Returns `None` when the sweep is not due yet
    fn sweep_overdue(&mut self, now: Instant, wall: DateTime<Local>) -> Option<usize> {
        if let Some(last) = self.last_overdue_check {
            if now.saturating_duration_since(last) < self.overdue_check_interval {
                return None;
            }
        }
        self.last_overdue_check = Some(now);

        let tasks = match self.store.overdue_tasks(NotificationKind::DueDate, wall) {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "failed to query overdue tasks");
                return Some(0);
            }
        };
        debug!(count = tasks.len(), "overdue sweep");

        let mut delivered = 0;
        for task in tasks {
            if self.notified.contains(&task.id) {
                continue;
            }
            match self.notify_task(&task, wall.with_timezone(&Utc)) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(id = %task.id, error = %e, "overdue notification failed"),
            }
        }
        Some(delivered)
    }

    fn notify_task(&mut self, task: &Item, at: DateTime<Utc>) -> Result<()> {
        let kind = NotificationKind::DueDate;
        let is_new = match self.store.notification_for(&task.id, kind)? {
            Some(existing) => {
                self.store.touch_notification(&existing.id, at)?;
                false
            }
            None => {
                self.store
                    .create_notification(&Notification::first(&task.id, kind, at))?;
                true
            }
        };
        self.notified.insert(task.id.clone());

        let message = overdue_message(task);
        if is_new {
            self.notifier.notify_overdue(OVERDUE_TITLE, &message)?;
        } else {
            self.notifier.notify_reminder(REMINDER_TITLE, &message)?;
        }
        info!(id = %task.id, reminder = !is_new, "sent overdue notification");
        Ok(())
    }

    fn regenerate_report(&mut self, now: Instant, wall: DateTime<Local>) -> bool {
        let due = self
            .last_report
            .map_or(true, |last| now.saturating_duration_since(last) >= self.report_interval);
        if !due {
            return false;
        }

        match self.reports.generate_daily(wall) {
            Ok(()) => {
                self.last_report = Some(now);
                debug!("regenerated daily report");
                true
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "failed to regenerate daily report");
                false
            }
        }
    }
}
