// tn: CLI for the tyn capture daemon
//
// Every command goes through the daemon over its unix socket; the daemon is
// started on demand. `tn serve` is the daemon itself.

use std::num::NonZeroUsize;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tyn_lib::daemon::client::DaemonClient;
use tyn_lib::daemon::config::{parse_duration, parse_interval, Config, Settings};
use tyn_lib::daemon::dispatch::{
    CaptureParams, Command as DaemonCommand, DateChange, DateParams, Message, PlaceParams,
    StatusChange, StatusParams, TagParams, TextParams, UpdateParams,
};
use tyn_lib::daemon::protocol::Response;
use tyn_lib::daemon::serve;
use tyn_lib::daemon::supervisor::{EnsureOutcome, Supervisor};
use tyn_lib::logging::{self, LogMode};
use tyn_lib::model::{Filter, Item, ItemType, Status};

const CONTENT_WIDTH: usize = 45;
const META_WIDTH: usize = 20;
const RULE_WIDTH: usize = 90;

#[derive(Parser, Debug)]
#[command(name = "tn")]
#[command(version, about = "Capture notes, tasks and links from the terminal")]
struct Cli {
    /// Print the raw daemon response as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture a new item: `tn capture call bob #work @office :todo ^2025-06-20`
    #[command(visible_alias = "c")]
    Capture {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// List items, optionally by type (note, task, link, draft)
    #[command(visible_aliases = ["ls", "l"])]
    List {
        item_type: Option<ItemType>,
        /// Filter by tag (comma separated)
        #[arg(short, long)]
        tag: Option<String>,
        /// Filter by place (comma separated)
        #[arg(short, long)]
        place: Option<String>,
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Manage tasks
    #[command(visible_alias = "t")]
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Inspect or start the background daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Run the background service
    #[command(hide = true)]
    Serve {
        /// Started detached by the supervisor
        #[arg(long)]
        daemon: bool,
        #[command(flatten)]
        overrides: ServeOverrides,
    },
}

/// Settings given on the command line win over file and environment
#[derive(clap::Args, Debug, Default)]
struct ServeOverrides {
    /// Sleep between scheduler ticks, e.g. `30s`
    #[arg(long)]
    poll_interval: Option<String>,
    /// Minimum time between journal regenerations, e.g. `1m`
    #[arg(long)]
    report_interval: Option<String>,
    /// How long desktop notifications stay visible, e.g. `5s`
    #[arg(long)]
    notification_timeout: Option<String>,
    /// Largest accepted request line in bytes
    #[arg(long)]
    max_frame_size: Option<NonZeroUsize>,
}

impl ServeOverrides {
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        let flag = |name: &str, raw: &Option<String>, parse: fn(&str) -> Result<Duration, String>| {
            raw.as_deref()
                .map(|r| parse(r).map_err(|e| anyhow::anyhow!("--{}: {}", name, e)))
                .transpose()
        };
        if let Some(value) = flag("poll-interval", &self.poll_interval, parse_interval)? {
            settings.poll_interval = value;
        }
        if let Some(value) = flag("report-interval", &self.report_interval, parse_interval)? {
            settings.report_interval = value;
        }
        if let Some(value) = flag(
            "notification-timeout",
            &self.notification_timeout,
            parse_duration,
        )? {
            settings.notification_timeout = value;
        }
        if let Some(value) = self.max_frame_size {
            settings.max_frame_size = value.get();
        }
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
enum TaskCommands {
    /// List tasks: `tn tasks list :todo #work @office`
    #[command(visible_aliases = ["ls", "l"])]
    List {
        /// `:status`, `#tag` and `@place` filters
        filters: Vec<String>,
        #[arg(short, long)]
        tag: Option<String>,
        #[arg(short, long)]
        place: Option<String>,
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Change task status
    #[command(visible_alias = "st")]
    Status {
        #[command(subcommand)]
        command: StatusCommands,
    },

    /// Update task attributes
    Update {
        id: String,
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
        #[arg(short, long, value_delimiter = ',')]
        places: Option<Vec<String>>,
        /// Due date (YYYY-MM-DD)
        #[arg(short, long)]
        due: Option<String>,
        #[arg(long)]
        text: Option<String>,
    },

    /// Replace task text
    Text {
        id: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Manage task tags
    Tag {
        #[command(subcommand)]
        command: LabelCommands,
    },

    /// Manage task places
    Place {
        #[command(subcommand)]
        command: LabelCommands,
    },

    /// Manage task due dates
    Date {
        #[command(subcommand)]
        command: DateCommands,
    },
}

#[derive(Subcommand, Debug)]
enum StatusCommands {
    /// Set a specific status
    Set { id: String, status: String },
    /// Move to the next status in the cycle
    Next { id: String },
    /// Move to the previous status in the cycle
    Prev { id: String },
}

#[derive(Subcommand, Debug)]
enum LabelCommands {
    Add {
        id: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    Remove {
        id: String,
        #[arg(required = true)]
        values: Vec<String>,
    },
    Clear { id: String },
}

#[derive(Subcommand, Debug)]
enum DateCommands {
    /// Set the due date (YYYY-MM-DD)
    Set { id: String, date: String },
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum DaemonCommands {
    /// Report whether the daemon is running
    Status,
    /// Start the daemon if it is not running
    Start,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { daemon, overrides } => run_serve(daemon, &overrides),
        command => {
            logging::init(LogMode::Cli);
            run(command, cli.json)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_serve(daemon: bool, overrides: &ServeOverrides) -> Result<()> {
    logging::init(if daemon {
        LogMode::Daemon
    } else {
        LogMode::Foreground
    });
    let mut config = Config::load().context("Failed to load configuration")?;
    overrides.apply(&mut config.settings)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(serve::run(config, daemon))
}

fn run(command: Commands, json: bool) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let supervisor = Supervisor::new(&config);

    match command {
        Commands::Daemon {
            command: DaemonCommands::Status,
        } => return daemon_status(&supervisor),
        Commands::Daemon {
            command: DaemonCommands::Start,
        } => return daemon_start(&supervisor),
        _ => {}
    }

    let mut client = DaemonClient::new(&config);
    match supervisor.ensure_running() {
        Ok(EnsureOutcome::Spawned(_)) => client = client.daemon_starting(),
        Ok(EnsureOutcome::AlreadyRunning) => {}
        Err(e) => tracing::warn!(error = %e, "could not start daemon"),
    }

    let cli = CliClient { client, json };

    match command {
        Commands::Capture { text } => cli.capture(text.join(" ")),
        Commands::List {
            item_type,
            tag,
            place,
            status,
        } => cli.list(Filter {
            item_type,
            tags: split_list(tag),
            places: split_list(place),
            status,
        }),
        Commands::Tasks { command } => cli.tasks(command),
        Commands::Daemon { .. } | Commands::Serve { .. } => Ok(()),
    }
}

fn daemon_status(supervisor: &Supervisor) -> Result<()> {
    if supervisor.is_running()? {
        match supervisor.read_pid()? {
            Some(pid) => println!("Daemon is running (PID {})", pid),
            None => println!("Daemon is running"),
        }
    } else {
        println!("Daemon is not running");
    }
    Ok(())
}

fn daemon_start(supervisor: &Supervisor) -> Result<()> {
    match supervisor.ensure_running()? {
        EnsureOutcome::AlreadyRunning => println!("Daemon already running"),
        EnsureOutcome::Spawned(pid) => println!("Daemon started (PID {})", pid),
    }
    Ok(())
}

struct CliClient {
    client: DaemonClient,
    json: bool,
}

impl CliClient {
    /// Send one command; prints the raw response in JSON mode and returns `None`
    fn call(&self, command: DaemonCommand, params: impl Serialize) -> Result<Option<Response>> {
        let params = serde_json::to_value(params).context("Failed to encode parameters")?;
        let response = self
            .client
            .send(command.name(), params)
            .context("Error communicating with daemon")?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                bail!("daemon returned an error");
            }
            return Ok(None);
        }

        if !response.success {
            bail!(
                "daemon returned error: {}",
                response.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(Some(response))
    }

    fn capture(&self, text: String) -> Result<()> {
        let Some(response) = self.call(DaemonCommand::Capture, CaptureParams { text })? else {
            return Ok(());
        };
        let item: Item = response.data_as().context("Error parsing response")?;
        println!("Captured {} {}", item.item_type, item.short_id());
        Ok(())
    }

    fn list(&self, filter: Filter) -> Result<()> {
        let Some(response) = self.call(DaemonCommand::List, &filter)? else {
            return Ok(());
        };
        let items: Vec<Item> = response.data_as().context("Error parsing response")?;
        for item in &items {
            println!("{}", format_item(item));
        }
        Ok(())
    }

    fn tasks(&self, command: TaskCommands) -> Result<()> {
        match command {
            TaskCommands::List {
                filters,
                tag,
                place,
                status,
            } => {
                let mut filter = Filter {
                    item_type: Some(ItemType::Task),
                    tags: split_list(tag),
                    places: split_list(place),
                    status,
                };
                apply_sigil_filters(&mut filter, &filters);
                self.list_tasks(filter)
            }
            TaskCommands::Status { command } => self.status(command),
            TaskCommands::Update {
                id,
                tags,
                places,
                due,
                text,
            } => {
                let params = UpdateParams {
                    id: id.clone(),
                    tags,
                    places,
                    due,
                    text,
                };
                if self.call(DaemonCommand::Update, params)?.is_some() {
                    println!("Task {} updated", id);
                }
                Ok(())
            }
            TaskCommands::Text { id, text } => {
                let params = TextParams {
                    id,
                    text: text.join(" "),
                };
                self.print_message(DaemonCommand::Text, params)
            }
            TaskCommands::Tag { command } => {
                let (id, operation, tags) = label_operation(command);
                self.print_message(DaemonCommand::Tag, TagParams { id, operation, tags })
            }
            TaskCommands::Place { command } => {
                let (id, operation, places) = label_operation(command);
                self.print_message(
                    DaemonCommand::Place,
                    PlaceParams {
                        id,
                        operation,
                        places,
                    },
                )
            }
            TaskCommands::Date { command } => {
                let params = match command {
                    DateCommands::Set { id, date } => DateParams {
                        id,
                        operation: "set".to_string(),
                        date,
                    },
                    DateCommands::Remove { id } => DateParams {
                        id,
                        operation: "remove".to_string(),
                        date: String::new(),
                    },
                };
                let Some(response) = self.call(DaemonCommand::Date, params)? else {
                    return Ok(());
                };
                let change: DateChange = response.data_as().context("Error parsing response")?;
                println!("{}", change.message);
                println!("Due date: {} → {}", change.original_date, change.new_date);
                Ok(())
            }
        }
    }

    fn list_tasks(&self, filter: Filter) -> Result<()> {
        let Some(response) = self.call(DaemonCommand::List, &filter)? else {
            return Ok(());
        };
        let tasks: Vec<Item> = response.data_as().context("Error parsing response")?;
        print!("{}", format_task_table(&tasks));
        Ok(())
    }

    fn status(&self, command: StatusCommands) -> Result<()> {
        let params = match command {
            StatusCommands::Set { id, status } => StatusParams {
                id,
                status,
                operation: "set".to_string(),
            },
            StatusCommands::Next { id } => StatusParams {
                id,
                status: String::new(),
                operation: "next".to_string(),
            },
            StatusCommands::Prev { id } => StatusParams {
                id,
                status: String::new(),
                operation: "prev".to_string(),
            },
        };
        let Some(response) = self.call(DaemonCommand::Status, params)? else {
            return Ok(());
        };
        let change: StatusChange = response.data_as().context("Error parsing response")?;
        println!(
            "Task status updated: '{}' → '{}'",
            change.original_status, change.new_status
        );
        println!(
            "{}",
            format_status_cycle(&change.original_status, &change.new_status)
        );
        Ok(())
    }

    fn print_message(&self, command: DaemonCommand, params: impl Serialize) -> Result<()> {
        let Some(response) = self.call(command, params)? else {
            return Ok(());
        };
        let message: Message = response.data_as().context("Error parsing response")?;
        println!("{}", message.message);
        Ok(())
    }
}

fn label_operation(command: LabelCommands) -> (String, String, Vec<String>) {
    match command {
        LabelCommands::Add { id, values } => (id, "add".to_string(), values),
        LabelCommands::Remove { id, values } => (id, "remove".to_string(), values),
        LabelCommands::Clear { id } => (id, "clear".to_string(), Vec::new()),
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|r| {
        r.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// Positional `:status`, `#tag` and `@place` arguments; the last status wins
fn apply_sigil_filters(filter: &mut Filter, args: &[String]) {
    for arg in args {
        if let Some(status) = arg.strip_prefix(':') {
            filter.status = Some(status.to_string());
        } else if let Some(tag) = arg.strip_prefix('#') {
            filter.tags.push(tag.to_string());
        } else if let Some(place) = arg.strip_prefix('@') {
            filter.places.push(place.to_string());
        }
    }
}

fn format_item(item: &Item) -> String {
    let due = item
        .due_date
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "ID: {}\nType: {}\nContent: {}\nTags: [{}]\nPlaces: [{}]\nStatus: {}\nLink: {}\nDate: {}\nDueDate: {}\n",
        item.id,
        item.item_type,
        item.content,
        item.tags.join(" "),
        item.places.join(" "),
        item.status,
        item.link,
        item.date.to_rfc3339(),
        due,
    )
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let kept: String = value.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}

fn format_task_table(tasks: &[Item]) -> String {
    if tasks.is_empty() {
        return "No tasks found.\n".to_string();
    }

    let now = Utc::now();
    let mut out = format!(
        "{:<6} {:<10} {:<45} {:<20} {}\n{}\n",
        "ID",
        "STATUS",
        "CONTENT",
        "TAGS/PLACES",
        "!",
        "-".repeat(RULE_WIDTH)
    );

    for task in tasks {
        let meta: Vec<String> = task
            .tags
            .iter()
            .map(|t| format!("#{}", t))
            .chain(task.places.iter().map(|p| format!("@{}", p)))
            .collect();
        let content = task.content.split_whitespace().collect::<Vec<_>>().join(" ");
        let overdue = if task.is_overdue(now) { "⌛" } else { " " };

        out.push_str(&format!(
            "{:<6} {:<10} {:<45} {:<20} {}\n",
            task.short_id(),
            format!("[{}]", task.status),
            truncate(&content, CONTENT_WIDTH),
            truncate(&meta.join(" "), META_WIDTH),
            overdue
        ));
    }
    out
}

/// The whole cycle with the new status in `[..]` and the old one in `<..>`
fn format_status_cycle(original: &str, new: &str) -> String {
    Status::CYCLE
        .iter()
        .map(|status| {
            let name = status.as_str();
            if name == new {
                format!("[{}]", name)
            } else if name == original {
                format!("<{}>", name)
            } else {
                name.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" → ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, content: &str) -> Item {
        let mut item = Item::new(Utc::now());
        item.id = id.to_string();
        item.item_type = ItemType::Task;
        item.status = "todo".to_string();
        item.content = content.to_string();
        item
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_status_next() {
        let cli = Cli::try_parse_from(["tn", "tasks", "status", "next", "ab12"]).unwrap();
        match cli.command {
            Commands::Tasks {
                command:
                    TaskCommands::Status {
                        command: StatusCommands::Next { id },
                    },
            } => assert_eq!(id, "ab12"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parses_hidden_serve() {
        let cli = Cli::try_parse_from(["tn", "serve", "--daemon"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { daemon: true, .. }));
    }

    #[test]
    fn test_serve_flags_override_settings() {
        let cli = Cli::try_parse_from(["tn", "serve", "--poll-interval", "5s", "--max-frame-size", "64"])
            .unwrap();
        let Commands::Serve { overrides, .. } = cli.command else {
            panic!("expected serve");
        };
        let mut settings = Settings::default();
        overrides.apply(&mut settings).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.max_frame_size, 64);
        assert_eq!(settings.report_interval, Settings::default().report_interval);

        let bad = ServeOverrides {
            report_interval: Some("soon".to_string()),
            ..ServeOverrides::default()
        };
        assert!(bad.apply(&mut settings).is_err());

        let zero = ServeOverrides {
            poll_interval: Some("0s".to_string()),
            ..ServeOverrides::default()
        };
        assert!(zero.apply(&mut settings).is_err());
        assert!(Cli::try_parse_from(["tn", "serve", "--max-frame-size", "0"]).is_err());
    }

    #[test]
    fn test_sigil_filters() {
        let mut filter = Filter::default();
        let args = [":wip", "#work", "@office", "plain"].map(String::from);
        apply_sigil_filters(&mut filter, &args);
        assert_eq!(filter.status.as_deref(), Some("wip"));
        assert_eq!(filter.tags, vec!["work"]);
        assert_eq!(filter.places, vec!["office"]);
    }

    #[test]
    fn test_split_list_skips_empty() {
        assert_eq!(split_list(Some("a, b,,c".to_string())), vec!["a", "b", "c"]);
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn test_status_cycle_marks_old_and_new() {
        let line = format_status_cycle("todo", "ready");
        assert!(line.starts_with("<todo> → [ready] → wip"));
        assert!(line.ends_with("→ waiting"));
    }

    #[test]
    fn test_task_table_truncates_and_marks_overdue() {
        let mut late = task("ab12cd34", &"long content ".repeat(10));
        late.tags = vec!["averyveryverylongtag".to_string()];
        late.due_date = Some(Utc::now() - chrono::Duration::days(1));

        let table = format_task_table(&[late]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID     STATUS"));
        assert_eq!(lines[1], "-".repeat(RULE_WIDTH));
        assert!(lines[2].starts_with("ab12   [todo]     long content"));
        assert!(lines[2].contains("#averyveryverylon..."));
        assert!(lines[2].ends_with('⌛'));
    }

    #[test]
    fn test_empty_task_table() {
        assert_eq!(format_task_table(&[]), "No tasks found.\n");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("ünïcödé", 10), "ünïcödé");
        assert_eq!(truncate("ünïcödé-long", 6), "ünï...");
    }
}
