// Core data model shared by the daemon, the store and the CLI
// Items are captured units of content; tasks are items with a status

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Number of leading id characters shown in listings and accepted as a short id
pub const SHORT_ID_LEN: usize = 4;

/// Date format accepted for due dates on the wire and in captured text
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Kind of captured item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Note,
    Task,
    Link,
    Draft,
}

impl ItemType {
    pub const ALL: [ItemType; 4] = [
        ItemType::Note,
        ItemType::Task,
        ItemType::Link,
        ItemType::Draft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Note => "note",
            ItemType::Task => "task",
            ItemType::Link => "link",
            ItemType::Draft => "draft",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown item type: {}", s))
    }
}

/// Task status, in cycle order
///
/// The cycle is fixed: `next`/`prev` walk it circularly, wrapping from the
/// last element to the first and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "todo")]
    Todo,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "wip")]
    InProgress,
    #[serde(rename = "blocked")]
    Blocked,
    #[serde(rename = "on-hold")]
    OnHold,
    #[serde(rename = "review")]
    Review,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "waiting")]
    Waiting,
}

impl Status {
    pub const CYCLE: [Status; 9] = [
        Status::Todo,
        Status::Ready,
        Status::InProgress,
        Status::Blocked,
        Status::OnHold,
        Status::Review,
        Status::Done,
        Status::Canceled,
        Status::Waiting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::Ready => "ready",
            Status::InProgress => "wip",
            Status::Blocked => "blocked",
            Status::OnHold => "on-hold",
            Status::Review => "review",
            Status::Done => "done",
            Status::Canceled => "canceled",
            Status::Waiting => "waiting",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Todo => "Todo",
            Status::Ready => "Ready",
            Status::InProgress => "In Progress",
            Status::Blocked => "Blocked",
            Status::OnHold => "On Hold",
            Status::Review => "Review",
            Status::Done => "Done",
            Status::Canceled => "Canceled",
            Status::Waiting => "Waiting",
        }
    }

    /// Done and canceled tasks are never overdue
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Canceled)
    }

    fn position(&self) -> usize {
        Status::CYCLE
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }

    pub fn next(&self) -> Status {
        Status::CYCLE[(self.position() + 1) % Status::CYCLE.len()]
    }

    pub fn prev(&self) -> Status {
        let len = Status::CYCLE.len();
        Status::CYCLE[(self.position() + len - 1) % len]
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::CYCLE
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid status: {}", s))
    }
}

/// Advance a free-form status string through the cycle.
/// Unrecognized values resolve to the first element of the cycle.
pub fn next_status(current: &str) -> Status {
    match current.parse::<Status>() {
        Ok(status) => status.next(),
        Err(_) => Status::CYCLE[0],
    }
}

/// Retreat a free-form status string through the cycle.
/// Unrecognized values resolve to the first element of the cycle.
pub fn prev_status(current: &str) -> Status {
    match current.parse::<Status>() {
        Ok(status) => status.prev(),
        Err(_) => Status::CYCLE[0],
    }
}

/// A captured unit of content with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub places: Vec<String>,
    /// Free-form status; only meaningful for tasks. Captured text may carry
    /// values outside the cycle, so this is kept as a string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// When the item was captured
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl Item {
    /// Create an empty note with a fresh id, captured at `date`
    pub fn new(date: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            item_type: ItemType::Note,
            content: String::new(),
            link: String::new(),
            tags: Vec::new(),
            places: Vec::new(),
            status: String::new(),
            date,
            due_date: None,
        }
    }

    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(SHORT_ID_LEN) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    pub fn is_task(&self) -> bool {
        self.item_type == ItemType::Task
    }

    /// Parsed status, if it is one of the cycle values
    pub fn status(&self) -> Option<Status> {
        self.status.parse().ok()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(|s| s.is_terminal())
    }

    /// A task with a past due date that is not done or canceled
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_task()
            && !self.is_terminal()
            && self.due_date.is_some_and(|due| due < now)
    }

    /// Due date rendered as `YYYY-MM-DD` in local time, or "none"
    pub fn due_date_label(&self) -> String {
        self.due_date
            .map(|d| d.with_timezone(&Local).format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    /// Whether the id satisfies a user-supplied reference.
    ///
    /// References up to `SHORT_ID_LEN` characters must equal the short id;
    /// longer references are matched as a literal prefix of the full id.
    pub fn matches_reference(&self, reference: &str) -> bool {
        if reference.chars().count() <= SHORT_ID_LEN {
            self.short_id() == reference
        } else {
            self.id.starts_with(reference)
        }
    }
}

/// The kinds of durable notification records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DueDate,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DueDate => "due_date",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "due_date" => Ok(NotificationKind::DueDate),
            _ => Err(format!("Unknown notification kind: {}", s)),
        }
    }
}

/// Durable memory of "already notified about this item"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub item_id: String,
    pub kind: NotificationKind,
    pub last_notified_at: DateTime<Utc>,
    pub times_notified: u32,
}

impl Notification {
    /// First notification for an item
    pub fn first(item_id: &str, kind: NotificationKind, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            item_id: item_id.to_string(),
            kind,
            last_notified_at: at,
            times_notified: 1,
        }
    }
}

/// Criteria for listing items; absent criteria match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub places: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Filter {
    pub fn matches(&self, item: &Item) -> bool {
        if self.item_type.is_some_and(|t| t != item.item_type) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| item.tags.contains(t)) {
            return false;
        }
        if !self.places.is_empty() && !self.places.iter().any(|p| item.places.contains(p)) {
            return false;
        }
        if let Some(status) = &self.status {
            if &item.status != status {
                return false;
            }
        }
        true
    }
}
