// Background daemon: supervisor, socket transport, command dispatch and scheduler

pub mod client;
pub mod config;
pub mod dispatch;
pub mod ipc;
pub mod protocol;
pub mod scheduler;
pub mod serve;
pub mod supervisor;
