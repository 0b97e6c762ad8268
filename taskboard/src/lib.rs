//! `Taskboard` -- task board client with live task-event synchronization.

pub mod api;
pub mod channel;
pub mod cli;
pub mod config;
pub mod notify;
pub mod session;
pub mod tasks;
pub mod transport;
pub mod view;
