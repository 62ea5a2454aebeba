// Tracing subscriber setup shared by the daemon and the CLI

use tracing_subscriber::EnvFilter;

/// Environment variable consulted when RUST_LOG is unset
pub const ENV_LOG_LEVEL: &str = "TYN_LOG_LEVEL";

/// Who is logging; decides the default level and formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Background daemon writing into its log file
    Daemon,
    /// Foreground `tn serve`
    Foreground,
    /// Short-lived CLI invocation
    Cli,
}

impl LogMode {
    fn default_level(&self) -> &'static str {
        match self {
            LogMode::Daemon | LogMode::Foreground => "info",
            LogMode::Cli => "warn",
        }
    }
}

/// Resolve the filter: RUST_LOG, then TYN_LOG_LEVEL, then the mode default
pub fn log_filter(mode: LogMode) -> EnvFilter {
    let level = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(ENV_LOG_LEVEL))
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| mode.default_level().to_string());

    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(mode.default_level()))
}

/// Install the global subscriber on stderr.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(mode: LogMode) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(mode))
        .with_writer(std::io::stderr)
        .with_target(mode != LogMode::Cli)
        .with_ansi(mode != LogMode::Daemon)
        .try_init();
}
