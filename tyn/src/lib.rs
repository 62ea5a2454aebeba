// Tyn: personal capture and task daemon

// Daemon internals (shared between the daemon process and the CLI client)
pub mod daemon;

// Collaborators consumed by the daemon
pub mod journal;
pub mod notify;
pub mod parser;
pub mod store;

pub mod logging;
pub mod model;
pub mod persistence;
