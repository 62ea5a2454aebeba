//! Command dispatcher.
//!
//! Requests are routed through the closed [`Command`] table; each handler
//! decodes its own parameters, does one unit of work against the store and
//! returns an optional JSON payload. Every failure, including bad
//! parameters, becomes a `{success:false, error}` response here and never
//! reaches the transport.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::protocol::{Request, Response};
use crate::model::{next_status, prev_status, Filter, Item, Status};
use crate::parser::{self, ParseError};
use crate::store::{Store, StoreError};

/// Every command the daemon understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Capture,
    List,
    Status,
    Update,
    Tag,
    Place,
    Date,
    Text,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Capture,
        Command::List,
        Command::Status,
        Command::Update,
        Command::Tag,
        Command::Place,
        Command::Date,
        Command::Text,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Capture => "capture",
            Command::List => "list",
            Command::Status => "status",
            Command::Update => "update",
            Command::Tag => "tag",
            Command::Place => "place",
            Command::Date => "date",
            Command::Text => "text",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Command::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("task with ID '{0}' not found")]
    TaskNotFound(String),
    #[error("item with ID '{0}' is not a task")]
    NotATask(String),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("unknown tag operation: {0}")]
    UnknownTagOperation(String),
    #[error("unknown place operation: {0}")]
    UnknownPlaceOperation(String),
    #[error("unknown date operation: {0}")]
    UnknownDateOperation(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("error encoding result: {0}")]
    Encode(#[from] serde_json::Error),
}

type HandlerResult = Result<Option<Value>, HandlerError>;

// ============================================================================
// Handler parameters and results
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureParams {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusParams {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// `set`, `next` or `prev`
    #[serde(default)]
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub original_status: String,
    pub new_status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateParams {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub places: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagParams {
    #[serde(default)]
    pub id: String,
    /// `add`, `remove` or `clear`
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaceParams {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub places: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateParams {
    #[serde(default)]
    pub id: String,
    /// `set` or `remove`
    #[serde(default)]
    pub operation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateChange {
    pub message: String,
    pub original_date: String,
    pub new_date: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextParams {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Dispatcher {
    store: Arc<dyn Store>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Route a request to its handler and wrap the outcome
    pub fn dispatch(&self, request: Request) -> Response {
        let Some(command) = Command::from_name(&request.command) else {
            warn!(command = %request.command, "unknown command");
            return Response::failure(format!("unknown command: {}", request.command));
        };

        match self.execute(command, request.params) {
            Ok(data) => Response::ok(data),
            Err(e) => {
                warn!(%command, error = %e, "command failed");
                Response::failure(e.to_string())
            }
        }
    }

    fn execute(&self, command: Command, params: Value) -> HandlerResult {
        match command {
            Command::Capture => self.capture(decode(params)?),
            Command::List => self.list(decode(params)?),
            Command::Status => self.status(decode(params)?),
            Command::Update => self.update(decode(params)?),
            Command::Tag => self.tag(decode(params)?),
            Command::Place => self.place(decode(params)?),
            Command::Date => self.date(decode(params)?),
            Command::Text => self.text(decode(params)?),
        }
    }

    /// Resolve a short id or id prefix to a task, in store list order
    fn resolve_task(&self, reference: &str) -> Result<Item, HandlerError> {
        let item = self
            .store
            .list()?
            .into_iter()
            .find(|item| item.matches_reference(reference))
            .ok_or_else(|| HandlerError::TaskNotFound(reference.to_string()))?;

        if !item.is_task() {
            return Err(HandlerError::NotATask(reference.to_string()));
        }
        debug!(reference, id = %item.id, "resolved task");
        Ok(item)
    }

    fn capture(&self, params: CaptureParams) -> HandlerResult {
        let item = parser::parse(&params.text)?;
        self.store.create(&item)?;
        info!(id = %item.id, item_type = %item.item_type, "captured item");
        encode(&item)
    }

    fn list(&self, filter: Filter) -> HandlerResult {
        let items = self.store.list_filtered(&filter)?;
        encode(&items)
    }

    fn status(&self, params: StatusParams) -> HandlerResult {
        let mut task = self.resolve_task(&params.id)?;
        let original_status = task.status.clone();

        let new_status = match params.operation.as_str() {
            "set" => params
                .status
                .parse::<Status>()
                .map_err(|_| HandlerError::InvalidStatus(params.status.clone()))?,
            "next" => next_status(&task.status),
            "prev" => prev_status(&task.status),
            other => return Err(HandlerError::InvalidOperation(other.to_string())),
        };

        task.status = new_status.as_str().to_string();
        self.store.update(&task)?;
        info!(id = %task.id, from = %original_status, to = %task.status, "changed status");

        encode(&StatusChange {
            original_status,
            new_status: task.status,
        })
    }

    fn update(&self, params: UpdateParams) -> HandlerResult {
        let mut item = self.store.find_by_id_prefix(&params.id)?;

        if let Some(tags) = params.tags {
            item.tags = tags;
        }
        if let Some(places) = params.places {
            item.places = places;
        }
        if let Some(due) = params.due.filter(|d| !d.is_empty()) {
            item.due_date = Some(parser::parse_due_date(&due)?);
        }
        if let Some(text) = params.text.filter(|t| !t.is_empty()) {
            item.content = text;
        }

        self.store.update(&item)?;
        info!(id = %item.id, "updated item");
        Ok(None)
    }

    fn tag(&self, params: TagParams) -> HandlerResult {
        let mut task = self.resolve_task(&params.id)?;
        let message = match params.operation.as_str() {
            "add" => {
                add_unique(&mut task.tags, &params.tags);
                format!("Added tags {} to task {}", bracketed(&params.tags), params.id)
            }
            "remove" => {
                task.tags.retain(|t| !params.tags.contains(t));
                format!("Removed tags {} from task {}", bracketed(&params.tags), params.id)
            }
            "clear" => {
                task.tags.clear();
                format!("Cleared all tags from task {}", params.id)
            }
            other => return Err(HandlerError::UnknownTagOperation(other.to_string())),
        };

        self.store.update(&task)?;
        encode(&Message { message })
    }

    fn place(&self, params: PlaceParams) -> HandlerResult {
        let mut task = self.resolve_task(&params.id)?;
        let message = match params.operation.as_str() {
            "add" => {
                add_unique(&mut task.places, &params.places);
                format!("Added places {} to task {}", bracketed(&params.places), params.id)
            }
            "remove" => {
                task.places.retain(|p| !params.places.contains(p));
                format!(
                    "Removed places {} from task {}",
                    bracketed(&params.places),
                    params.id
                )
            }
            "clear" => {
                task.places.clear();
                format!("Cleared all places from task {}", params.id)
            }
            other => return Err(HandlerError::UnknownPlaceOperation(other.to_string())),
        };

        self.store.update(&task)?;
        encode(&Message { message })
    }

    fn date(&self, params: DateParams) -> HandlerResult {
        let mut task = self.resolve_task(&params.id)?;
        let original_date = task.due_date_label();

        let message = match params.operation.as_str() {
            "set" => {
                task.due_date = Some(parser::parse_due_date(&params.date)?);
                format!("Set due date to {} for task {}", params.date, params.id)
            }
            "remove" => {
                task.due_date = None;
                format!("Removed due date from task {}", params.id)
            }
            other => return Err(HandlerError::UnknownDateOperation(other.to_string())),
        };

        self.store.update(&task)?;
        encode(&DateChange {
            message,
            original_date,
            new_date: task.due_date_label(),
        })
    }

    fn text(&self, params: TextParams) -> HandlerResult {
        let mut task = self.resolve_task(&params.id)?;
        task.content = params.text;
        self.store.update(&task)?;
        encode(&Message {
            message: format!("Updated text of task {}", params.id),
        })
    }
}

/// Decode handler parameters; absent params decode like an empty object
fn decode<T: DeserializeOwned>(params: Value) -> Result<T, HandlerError> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| HandlerError::InvalidParams(e.to_string()))
}

fn encode<T: Serialize>(data: &T) -> HandlerResult {
    Ok(Some(serde_json::to_value(data)?))
}

fn add_unique(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

fn bracketed(values: &[String]) -> String {
    format!("[{}]", values.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemType;
    use crate::store::SqliteStore;
    use chrono::Utc;
    use serde_json::json;

    fn setup() -> (Dispatcher, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory(14).unwrap());
        (Dispatcher::new(store.clone()), store)
    }

    fn insert(store: &SqliteStore, id: &str, item_type: ItemType, status: &str) -> Item {
        let mut item = Item::new(Utc::now());
        item.id = id.to_string();
        item.item_type = item_type;
        item.status = status.to_string();
        item.content = "original".to_string();
        store.create(&item).unwrap();
        item
    }

    fn call(dispatcher: &Dispatcher, command: &str, params: Value) -> Response {
        dispatcher.dispatch(Request::new(command, params))
    }

    #[test]
    fn test_command_table_roundtrips_names() {
        for command in Command::ALL {
            assert_eq!(Command::from_name(command.name()), Some(command));
        }
        assert_eq!(Command::from_name("foo"), None);
    }

    #[test]
    fn test_unknown_command() {
        let (dispatcher, _store) = setup();
        let response = call(&dispatcher, "foo", Value::Null);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": false, "error": "unknown command: foo"})
        );
    }

    #[test]
    fn test_status_next_from_todo() {
        let (dispatcher, store) = setup();
        insert(&store, "ab12cd34-0001", ItemType::Task, "todo");

        let response = call(
            &dispatcher,
            "status",
            json!({"id": "ab12", "operation": "next"}),
        );
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": true, "data": {"original_status": "todo", "new_status": "ready"}})
        );
        assert_eq!(store.get("ab12cd34-0001").unwrap().status, "ready");
    }

    #[test]
    fn test_status_prev_wraps_and_unknown_resets() {
        let (dispatcher, store) = setup();
        insert(&store, "aaaa0001", ItemType::Task, "todo");
        insert(&store, "bbbb0001", ItemType::Task, "bogus");

        let response = call(&dispatcher, "status", json!({"id": "aaaa", "operation": "prev"}));
        let change: StatusChange = response.data_as().unwrap();
        assert_eq!(change.new_status, "waiting");

        let response = call(&dispatcher, "status", json!({"id": "bbbb", "operation": "next"}));
        let change: StatusChange = response.data_as().unwrap();
        assert_eq!(change.original_status, "bogus");
        assert_eq!(change.new_status, "todo");
    }

    #[test]
    fn test_status_set_validates() {
        let (dispatcher, store) = setup();
        insert(&store, "aaaa0001", ItemType::Task, "todo");

        let response = call(
            &dispatcher,
            "status",
            json!({"id": "aaaa", "operation": "set", "status": "review"}),
        );
        assert!(response.success);
        assert_eq!(store.get("aaaa0001").unwrap().status, "review");

        let response = call(
            &dispatcher,
            "status",
            json!({"id": "aaaa", "operation": "set", "status": "later"}),
        );
        assert_eq!(response.error.as_deref(), Some("invalid status: later"));

        let response = call(&dispatcher, "status", json!({"id": "aaaa", "operation": "jump"}));
        assert_eq!(response.error.as_deref(), Some("invalid operation: jump"));
    }

    #[test]
    fn test_id_resolution_errors() {
        let (dispatcher, store) = setup();
        insert(&store, "note0001", ItemType::Note, "");

        let response = call(&dispatcher, "status", json!({"id": "zzzz", "operation": "next"}));
        assert_eq!(response.error.as_deref(), Some("task with ID 'zzzz' not found"));

        let response = call(&dispatcher, "status", json!({"id": "note", "operation": "next"}));
        assert_eq!(response.error.as_deref(), Some("item with ID 'note' is not a task"));
    }

    #[test]
    fn test_longer_reference_is_prefix_match() {
        let (dispatcher, store) = setup();
        insert(&store, "abcdef-0001", ItemType::Task, "todo");

        let response = call(&dispatcher, "status", json!({"id": "abcde", "operation": "next"}));
        assert!(response.success);

        // Three characters is neither the short id nor a long prefix
        let response = call(&dispatcher, "status", json!({"id": "abc", "operation": "next"}));
        assert!(!response.success);
    }

    #[test]
    fn test_bad_params_are_business_errors() {
        let (dispatcher, _store) = setup();
        let response = call(&dispatcher, "status", json!({"id": 42}));
        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("invalid parameters: "));
    }

    #[test]
    fn test_capture_creates_item() {
        let (dispatcher, store) = setup();
        let response = call(
            &dispatcher,
            "capture",
            json!({"text": "buy milk #errand @store :todo"}),
        );
        assert!(response.success);
        let item: Item = response.data_as().unwrap();
        assert_eq!(item.item_type, ItemType::Task);
        assert_eq!(item.content, "buy milk");
        assert_eq!(store.get(&item.id).unwrap().tags, vec!["errand"]);
    }

    #[test]
    fn test_capture_invalid_date_fails() {
        let (dispatcher, _store) = setup();
        let response = call(&dispatcher, "capture", json!({"text": "x ^tomorrow"}));
        assert_eq!(response.error.as_deref(), Some("invalid date format: tomorrow"));
    }

    #[test]
    fn test_list_filters() {
        let (dispatcher, store) = setup();
        insert(&store, "task0001", ItemType::Task, "todo");
        insert(&store, "note0001", ItemType::Note, "");

        let response = call(&dispatcher, "list", Value::Null);
        let all: Vec<Item> = response.data_as().unwrap();
        assert_eq!(all.len(), 2);

        let response = call(&dispatcher, "list", json!({"type": "task"}));
        let tasks: Vec<Item> = response.data_as().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "task0001");
    }

    #[test]
    fn test_update_replaces_fields() {
        let (dispatcher, store) = setup();
        insert(&store, "task0001", ItemType::Task, "todo");

        let response = call(
            &dispatcher,
            "update",
            json!({"id": "task0001", "tags": ["a", "b"], "due": "2030-01-02", "text": "new"}),
        );
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({"success": true}));

        let task = store.get("task0001").unwrap();
        assert_eq!(task.tags, vec!["a", "b"]);
        assert_eq!(task.content, "new");
        assert_eq!(task.due_date_label(), "2030-01-02");
        assert!(task.places.is_empty());
    }

    #[test]
    fn test_update_without_id_touches_nothing() {
        let (dispatcher, store) = setup();
        let mut kept = insert(&store, "task0001", ItemType::Task, "todo");
        kept.tags = vec!["keep".to_string()];
        store.update(&kept).unwrap();

        let response = call(&dispatcher, "update", json!({"tags": ["clobbered"]}));
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("item with ID '' not found"));
        assert_eq!(store.get("task0001").unwrap().tags, vec!["keep"]);
    }

    #[test]
    fn test_tag_operations() {
        let (dispatcher, store) = setup();
        insert(&store, "task0001", ItemType::Task, "todo");

        let response = call(
            &dispatcher,
            "tag",
            json!({"id": "task", "operation": "add", "tags": ["work", "work", "home"]}),
        );
        let msg: Message = response.data_as().unwrap();
        assert_eq!(msg.message, "Added tags [work work home] to task task");
        assert_eq!(store.get("task0001").unwrap().tags, vec!["work", "home"]);

        call(
            &dispatcher,
            "tag",
            json!({"id": "task", "operation": "remove", "tags": ["work"]}),
        );
        assert_eq!(store.get("task0001").unwrap().tags, vec!["home"]);

        let response = call(&dispatcher, "tag", json!({"id": "task", "operation": "clear"}));
        let msg: Message = response.data_as().unwrap();
        assert_eq!(msg.message, "Cleared all tags from task task");
        assert!(store.get("task0001").unwrap().tags.is_empty());

        let response = call(&dispatcher, "tag", json!({"id": "task", "operation": "zap"}));
        assert_eq!(response.error.as_deref(), Some("unknown tag operation: zap"));
    }

    #[test]
    fn test_place_operations() {
        let (dispatcher, store) = setup();
        insert(&store, "task0001", ItemType::Task, "todo");

        call(
            &dispatcher,
            "place",
            json!({"id": "task", "operation": "add", "places": ["office"]}),
        );
        assert_eq!(store.get("task0001").unwrap().places, vec!["office"]);

        let response = call(&dispatcher, "place", json!({"id": "task", "operation": "clear"}));
        assert!(response.success);
        assert!(store.get("task0001").unwrap().places.is_empty());
    }

    #[test]
    fn test_date_set_and_remove() {
        let (dispatcher, store) = setup();
        insert(&store, "task0001", ItemType::Task, "todo");

        let response = call(
            &dispatcher,
            "date",
            json!({"id": "task", "operation": "set", "date": "2030-05-06"}),
        );
        let change: DateChange = response.data_as().unwrap();
        assert_eq!(
            change,
            DateChange {
                message: "Set due date to 2030-05-06 for task task".to_string(),
                original_date: "none".to_string(),
                new_date: "2030-05-06".to_string(),
            }
        );

        let response = call(&dispatcher, "date", json!({"id": "task", "operation": "remove"}));
        let change: DateChange = response.data_as().unwrap();
        assert_eq!(change.original_date, "2030-05-06");
        assert_eq!(change.new_date, "none");
        assert!(store.get("task0001").unwrap().due_date.is_none());

        let response = call(
            &dispatcher,
            "date",
            json!({"id": "task", "operation": "set", "date": "05/06/2030"}),
        );
        assert_eq!(response.error.as_deref(), Some("invalid date format: 05/06/2030"));
    }

    #[test]
    fn test_text_replaces_content() {
        let (dispatcher, store) = setup();
        insert(&store, "task0001", ItemType::Task, "todo");

        let response = call(
            &dispatcher,
            "text",
            json!({"id": "task", "text": "rewritten"}),
        );
        assert!(response.success);
        assert_eq!(store.get("task0001").unwrap().content, "rewritten");
    }
}
