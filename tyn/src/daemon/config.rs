// Configuration for daemon paths and tunables
// Layered: built-in defaults, then the YAML file, then environment variables.
// CLI flags on `tn serve` are applied on top by the binary.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::persistence::atomic_write;

pub const ENV_DAEMON_DIR: &str = "TYN_DAEMON_DIR";
pub const ENV_DB_PATH: &str = "TYN_DB_PATH";
pub const ENV_JOURNAL_DIR: &str = "TYN_JOURNAL_DIR";
pub const ENV_CONFIG: &str = "TYN_CONFIG";
pub const ENV_POLL_INTERVAL: &str = "TYN_POLL_INTERVAL";
pub const ENV_REPORT_INTERVAL: &str = "TYN_REPORT_INTERVAL";
pub const ENV_NOTIFICATION_TIMEOUT: &str = "TYN_NOTIFICATION_TIMEOUT";
pub const ENV_DONE_TASK_LIST_DAYS: &str = "TYN_DONE_TASK_LIST_DAYS";
pub const ENV_MAX_FRAME_SIZE: &str = "TYN_MAX_FRAME_SIZE";

/// Default maximum size of one request or response line (1MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Tunables for the scheduler, notifier, store and transport
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Sleep between scheduler ticks
    pub poll_interval: Duration,
    /// Minimum time between journal regenerations
    pub report_interval: Duration,
    /// Minimum time between overdue sweeps
    pub overdue_check_interval: Duration,
    /// How long desktop notifications stay visible
    pub notification_timeout: Duration,
    /// How many days finished tasks remain visible in listings
    pub done_task_list_days: u32,
    /// Largest accepted request or response line, in bytes
    pub max_frame_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            report_interval: Duration::from_secs(60),
            overdue_check_interval: Duration::from_secs(60 * 60),
            notification_timeout: Duration::from_secs(5),
            done_task_list_days: 14,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Configuration for daemon paths and settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the PID file, log, socket and database
    pub base_dir: PathBuf,
    /// Path to the daemon PID file
    pub pid_file: PathBuf,
    /// Append-only daemon log (daemon stdout/stderr)
    pub log_file: PathBuf,
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Root of the generated journal and its index
    pub journal_dir: PathBuf,
    pub settings: Settings,
}

impl Config {
    /// All runtime files under `base_dir`; the journal goes to `base_dir/documents`.
    pub fn for_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            pid_file: base_dir.join("daemon.pid"),
            log_file: base_dir.join("daemon.log"),
            socket_path: base_dir.join("daemon.sock"),
            db_path: base_dir.join("tyn.db"),
            journal_dir: base_dir.join("documents"),
            base_dir,
            settings: Settings::default(),
        }
    }

    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        let mut config = Self::for_dir(home.join(".tyn"));
        config.journal_dir = dirs::document_dir()
            .unwrap_or_else(|| home.join("Documents"))
            .join("tyn");
        config
    }

    /// Defaults overridden by path-related environment variables only
    pub fn from_env() -> Self {
        let mut config = match std::env::var(ENV_DAEMON_DIR) {
            // TYN_DAEMON_DIR moves every runtime file, keeping the journal where it is
            Ok(dir) if !dir.is_empty() => {
                let journal_dir = Self::default_paths().journal_dir;
                let mut config = Self::for_dir(dir);
                config.journal_dir = journal_dir;
                config
            }
            _ => Self::default_paths(),
        };
        config.apply_path_env();
        config
    }

    /// Full layered load: defaults, YAML file (created when missing), environment
    pub fn load() -> Result<Self> {
        let mut config = Self::from_env();

        if let Some(path) = config_file_path() {
            if let Err(e) = ensure_config_file(&path) {
                warn!(path = %path.display(), error = %e, "could not write default config file");
            }
            if path.exists() {
                let file = FileConfig::read(&path)?;
                config.apply_file(&file);
            }
        }

        // Environment wins over the file
        config.apply_path_env();
        config.settings.apply_env();
        Ok(config)
    }

    fn apply_path_env(&mut self) {
        if let Some(db) = non_empty_env(ENV_DB_PATH) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(journal) = non_empty_env(ENV_JOURNAL_DIR) {
            self.journal_dir = PathBuf::from(journal);
        }
    }

    fn apply_file(&mut self, file: &FileConfig) {
        if let Some(dir) = &file.journal_dir {
            self.journal_dir = expand_home(dir);
        }
        if let Some(db) = &file.db_path {
            self.db_path = expand_home(db);
        }
        self.settings.apply_file(file);
    }

    /// Ensure the base directory exists with 0700 permissions
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.base_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }
}

impl Settings {
    fn apply_file(&mut self, file: &FileConfig) {
        apply_interval(&mut self.poll_interval, file.poll_interval.as_deref(), "poll_interval");
        apply_interval(
            &mut self.report_interval,
            file.report_interval.as_deref(),
            "report_interval",
        );
        apply_interval(
            &mut self.overdue_check_interval,
            file.overdue_check_interval.as_deref(),
            "overdue_check_interval",
        );
        apply_duration(
            &mut self.notification_timeout,
            file.notification_timeout.as_deref(),
            "notification_timeout",
        );
        if let Some(days) = file.done_task_list_days {
            self.done_task_list_days = days;
        }
        match file.max_frame_size {
            Some(0) => warn!(source = "max_frame_size", "ignoring invalid value"),
            Some(size) => self.max_frame_size = size,
            None => {}
        }
    }

    /// Override from TYN_* variables; invalid values are skipped with a warning
    pub fn apply_env(&mut self) {
        apply_interval(
            &mut self.poll_interval,
            non_empty_env(ENV_POLL_INTERVAL).as_deref(),
            ENV_POLL_INTERVAL,
        );
        apply_interval(
            &mut self.report_interval,
            non_empty_env(ENV_REPORT_INTERVAL).as_deref(),
            ENV_REPORT_INTERVAL,
        );
        apply_duration(
            &mut self.notification_timeout,
            non_empty_env(ENV_NOTIFICATION_TIMEOUT).as_deref(),
            ENV_NOTIFICATION_TIMEOUT,
        );
        apply_parsed(
            &mut self.done_task_list_days,
            non_empty_env(ENV_DONE_TASK_LIST_DAYS).as_deref(),
            ENV_DONE_TASK_LIST_DAYS,
        );
        let mut frame_size = NonZeroUsize::new(self.max_frame_size).unwrap_or(NonZeroUsize::MIN);
        apply_parsed(
            &mut frame_size,
            non_empty_env(ENV_MAX_FRAME_SIZE).as_deref(),
            ENV_MAX_FRAME_SIZE,
        );
        self.max_frame_size = frame_size.get();
    }
}

/// Interval between two runs of something; zero would mean spinning
fn apply_interval(target: &mut Duration, raw: Option<&str>, source: &str) {
    let Some(raw) = raw else { return };
    match parse_interval(raw) {
        Ok(value) => *target = value,
        Err(e) => warn!(source, value = raw, error = %e, "ignoring invalid value"),
    }
}

fn apply_duration(target: &mut Duration, raw: Option<&str>, source: &str) {
    let Some(raw) = raw else { return };
    match parse_duration(raw) {
        Ok(value) => *target = value,
        Err(e) => warn!(source, value = raw, error = %e, "ignoring invalid duration"),
    }
}

fn apply_parsed<T: std::str::FromStr>(target: &mut T, raw: Option<&str>, source: &str) {
    let Some(raw) = raw else { return };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(source, value = raw, "ignoring invalid value"),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}

/// Location of the YAML config file.
///
/// `TYN_CONFIG` wins; with `TYN_DAEMON_DIR` set the file lives in that
/// directory so isolated instances never touch the user's real config.
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = non_empty_env(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }
    if let Some(dir) = non_empty_env(ENV_DAEMON_DIR) {
        return Some(PathBuf::from(dir).join("tyn.yml"));
    }
    dirs::home_dir().map(|h| h.join(".config").join("tyn").join("tyn.yml"))
}

/// Write the default settings to `path` unless a file already exists
pub fn ensure_config_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let contents = serde_yaml::to_string(&FileConfig::from(&Settings::default()))
        .context("Failed to serialize default config")?;
    atomic_write(path, &contents)
}

/// On-disk shape of `tyn.yml`; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(
        default,
        alias = "journal_update_interval",
        skip_serializing_if = "Option::is_none"
    )]
    pub report_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overdue_check_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_task_list_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

impl From<&Settings> for FileConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: Some(format_duration(settings.poll_interval)),
            report_interval: Some(format_duration(settings.report_interval)),
            overdue_check_interval: Some(format_duration(settings.overdue_check_interval)),
            notification_timeout: Some(format_duration(settings.notification_timeout)),
            done_task_list_days: Some(settings.done_task_list_days),
            max_frame_size: Some(settings.max_frame_size),
            journal_dir: None,
            db_path: None,
        }
    }
}

/// Parse `500ms`, `30s`, `1m`, `2h` or `1d`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {raw}"))?;
    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 60 * 60),
        "d" => Duration::from_secs(value * 60 * 60 * 24),
        other => return Err(format!("invalid duration unit '{other}' in {raw}")),
    };
    Ok(duration)
}

/// [`parse_duration`] that also rejects zero
pub fn parse_interval(raw: &str) -> Result<Duration, String> {
    match parse_duration(raw)? {
        d if d.is_zero() => Err(format!("interval must be greater than zero: {}", raw.trim())),
        d => Ok(d),
    }
}

/// Inverse of [`parse_duration`], choosing the largest exact unit
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{millis}ms");
    }
    let secs = duration.as_secs();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs >= size && secs % size == 0 {
            return format!("{}{}", secs / size, unit);
        }
    }
    format!("{secs}s")
}
