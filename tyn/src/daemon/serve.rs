// Daemon entry point: claim the PID file, open the store, bind the socket,
// then run the scheduler thread and the accept loop for the process lifetime

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::config::Config;
use super::dispatch::Dispatcher;
use super::ipc;
use super::scheduler::Scheduler;
use super::supervisor::{Supervisor, SupervisorError};
use crate::journal::JournalGenerator;
use crate::notify::DesktopNotifier;
use crate::store::{SqliteStore, Store};

/// Run the daemon. Returns only on a fatal startup error.
///
/// Both modes claim the PID file. When another live daemon is recorded, a
/// detached daemon (`daemon_mode`) exits quietly, while a foreground run fails.
pub async fn run(config: Config, daemon_mode: bool) -> Result<()> {
    config
        .ensure_dirs()
        .context("Failed to create data directory")?;

    match Supervisor::new(&config).claim_current() {
        Ok(()) => {}
        // A redundant spawn leaves the recorded daemon and its socket alone
        Err(SupervisorError::AlreadyRunning(pid)) if daemon_mode => {
            info!(pid, "another daemon is already running, exiting");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to claim PID file"),
    }

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.db_path, config.settings.done_task_list_days)
            .with_context(|| format!("Failed to open store: {}", config.db_path.display()))?,
    );

    let listener = ipc::bind(&config.socket_path)?;
    info!(
        socket = %config.socket_path.display(),
        pid = std::process::id(),
        "daemon listening"
    );

    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::new(DesktopNotifier::new(config.settings.notification_timeout)),
        Arc::new(JournalGenerator::new(
            Arc::clone(&store),
            config.journal_dir.clone(),
        )),
        &config.settings,
    );
    std::thread::Builder::new()
        .name("tyn-scheduler".to_string())
        .spawn(move || scheduler.run_forever())
        .context("Failed to start scheduler thread")?;

    let dispatcher = Arc::new(Dispatcher::new(store));
    ipc::accept_loop(listener, dispatcher, config.settings.max_frame_size).await;
    Ok(())
}
