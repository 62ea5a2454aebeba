// Daily journal generation
// Renders tasks, notes and links into markdown under <journal_dir>/journal/YYYY/MM/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Local, Utc};
use tracing::{debug, info};

use crate::model::{Item, ItemType, Status};
use crate::persistence::atomic_write;
use crate::store::Store;

const INDEX_FILE_NAME: &str = "index.md";
const OVERDUE_MARKER: &str = " ⌛️";

/// Regenerates the derived daily report
pub trait ReportGenerator: Send + Sync {
    fn generate_daily(&self, today: DateTime<Local>) -> Result<()>;
}

/// Markdown journal written from the store
pub struct JournalGenerator {
    store: Arc<dyn Store>,
    journal_dir: PathBuf,
}

impl JournalGenerator {
    pub fn new(store: Arc<dyn Store>, journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            journal_dir: journal_dir.into(),
        }
    }

    /// Path of the journal file for `day`
    pub fn journal_path(&self, day: DateTime<Local>) -> PathBuf {
        self.journal_dir.join(relative_journal_path(day))
    }

    pub fn index_path(&self) -> PathBuf {
        self.journal_dir.join(INDEX_FILE_NAME)
    }

    fn update_index(&self, today: DateTime<Local>) -> Result<()> {
        let content = render_index(&self.journal_dir, today);
        let path = self.index_path();
        atomic_write(&path, &content)
            .with_context(|| format!("Failed to write journal index: {}", path.display()))?;
        debug!(path = %path.display(), "updated journal index");
        Ok(())
    }
}

impl ReportGenerator for JournalGenerator {
    fn generate_daily(&self, today: DateTime<Local>) -> Result<()> {
        let tasks = self
            .store
            .all_tasks()
            .context("Failed to fetch tasks for journal")?;
        let notes_and_links = self
            .store
            .notes_and_links_for_day(today)
            .context("Failed to fetch today's notes and links")?;

        let (notes, links): (Vec<Item>, Vec<Item>) = notes_and_links
            .into_iter()
            .partition(|item| item.item_type == ItemType::Note);
        let links: Vec<Item> = links
            .into_iter()
            .filter(|item| item.item_type == ItemType::Link)
            .collect();

        let content = render_journal(today, &tasks, &notes, &links);
        let path = self.journal_path(today);
        atomic_write(&path, &content)
            .with_context(|| format!("Failed to write journal: {}", path.display()))?;
        info!(
            path = %path.display(),
            tasks = tasks.len(),
            notes = notes.len(),
            links = links.len(),
            "generated daily journal"
        );

        self.update_index(today)
    }
}

fn relative_journal_path(day: DateTime<Local>) -> PathBuf {
    PathBuf::from("journal")
        .join(day.format("%Y").to_string())
        .join(day.format("%m").to_string())
        .join(format!("{}.md", day.format("%Y%m%d")))
}

/// Render the markdown journal for `day`
pub fn render_journal(day: DateTime<Local>, tasks: &[Item], notes: &[Item], links: &[Item]) -> String {
    let now = Utc::now();
    let mut out = format!("# {}\n\n", day.format("%y%m%d"));

    out.push_str("## Tasks\n\n");
    if tasks.is_empty() {
        out.push_str("No tasks found.\n\n");
    } else {
        for status in Status::CYCLE {
            // Tasks with a missing or unknown status are listed as todo
            let group: Vec<&Item> = tasks
                .iter()
                .filter(|task| task.status().unwrap_or(Status::Todo) == status)
                .collect();
            if group.is_empty() {
                continue;
            }

            out.push_str(&format!("### {}\n\n", status.label()));
            for task in group {
                out.push_str(&task_line(task, now));
                out.push('\n');
            }
            out.push('\n');
        }
    }

    out.push_str("## Notes\n\n");
    if notes.is_empty() {
        out.push_str("No notes recorded today.\n");
    } else {
        for note in notes {
            out.push_str(&format!("- {}\n", note.content));
        }
    }
    out.push('\n');

    out.push_str("## Links\n\n");
    if links.is_empty() {
        out.push_str("No links recorded today.\n");
    } else {
        for link in links {
            out.push_str(&format!("- [{}]({})\n", link.content, link.link));
        }
    }

    out
}

fn task_line(task: &Item, now: DateTime<Utc>) -> String {
    let check = if task.status() == Some(Status::Done) { "x" } else { " " };
    let mut line = format!("- [{}] {}", check, task.content);
    if task.is_overdue(now) {
        line.push_str(OVERDUE_MARKER);
    }
    if !task.tags.is_empty() {
        let tags: Vec<String> = task.tags.iter().map(|t| format!("`#{}`", t)).collect();
        line.push(' ');
        line.push_str(&tags.join(" "));
    }
    line
}

/// Render the index listing this week's journal days, newest first.
/// Weeks start on Sunday; days without a journal file are skipped.
pub fn render_index(journal_dir: &Path, today: DateTime<Local>) -> String {
    let mut out = String::from("# Index\n\n## Journal\n\n");

    let days_since_sunday = i64::from(today.weekday().num_days_from_sunday());
    for offset in 0..=days_since_sunday {
        let day = today - Duration::days(offset);
        let rel = relative_journal_path(day);
        if !journal_dir.join(&rel).exists() {
            continue;
        }
        let label = if offset == 0 {
            "Today".to_string()
        } else {
            day.format("%A").to_string()
        };
        out.push_str(&format!("* [{}]({})\n", label, rel.display()));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn item(item_type: ItemType, content: &str, status: &str) -> Item {
        let mut item = Item::new(Utc::now());
        item.item_type = item_type;
        item.content = content.to_string();
        item.status = status.to_string();
        item
    }

    #[test]
    fn journal_groups_tasks_by_status_in_cycle_order() {
        let day = Local.with_ymd_and_hms(2025, 6, 20, 10, 0, 0).unwrap();
        let mut done = item(ItemType::Task, "ship it", "done");
        done.tags = vec!["work".to_string(), "q2".to_string()];
        let mut late = item(ItemType::Task, "pay rent", "todo");
        late.due_date = Some(Utc::now() - Duration::days(1));
        let odd = item(ItemType::Task, "mystery", "bogus");

        let content = render_journal(day, &[done, late, odd], &[], &[]);

        assert!(content.starts_with("# 250620\n\n## Tasks\n\n"));
        let todo_pos = content.find("### Todo").unwrap();
        let done_pos = content.find("### Done").unwrap();
        assert!(todo_pos < done_pos);
        assert!(content.contains("- [ ] pay rent ⌛️\n"));
        assert!(content.contains("- [ ] mystery\n"));
        assert!(content.contains("- [x] ship it `#work` `#q2`\n"));
        assert!(content.contains("No notes recorded today."));
        assert!(content.contains("No links recorded today."));
    }

    #[test]
    fn journal_lists_notes_and_links() {
        let day = Local::now();
        let note = item(ItemType::Note, "an idea", "");
        let mut link = item(ItemType::Link, "docs", "");
        link.link = "https://example.com".to_string();

        let content = render_journal(day, &[], &[note], &[link]);
        assert!(content.contains("No tasks found."));
        assert!(content.contains("## Notes\n\n- an idea\n"));
        assert!(content.contains("## Links\n\n- [docs](https://example.com)\n"));
    }

    #[test]
    fn index_lists_existing_days_newest_first() {
        let temp = TempDir::new().unwrap();
        // 2025-06-18 is a Wednesday
        let today = Local.with_ymd_and_hms(2025, 6, 18, 12, 0, 0).unwrap();
        let monday = today - Duration::days(2);
        for day in [today, monday] {
            let path = temp.path().join(relative_journal_path(day));
            atomic_write(&path, "x").unwrap();
        }

        let index = render_index(temp.path(), today);
        assert_eq!(
            index,
            "# Index\n\n## Journal\n\n\
             * [Today](journal/2025/06/20250618.md)\n\
             * [Monday](journal/2025/06/20250616.md)\n"
        );
    }

    #[test]
    fn generate_daily_writes_journal_and_index() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory(14).unwrap());
        store.create(&item(ItemType::Task, "write report", "wip")).unwrap();
        store.create(&item(ItemType::Note, "remember milk", "")).unwrap();

        let generator = JournalGenerator::new(store, temp.path());
        let today = Local::now();
        generator.generate_daily(today).unwrap();

        let journal = std::fs::read_to_string(generator.journal_path(today)).unwrap();
        assert!(journal.contains("### In Progress"));
        assert!(journal.contains("- [ ] write report"));
        assert!(journal.contains("- remember milk"));

        let index = std::fs::read_to_string(generator.index_path()).unwrap();
        assert!(index.contains("[Today]"));
    }
}
