//! Shared protocol definitions for the `Taskboard` REST and push wire formats.

pub mod cable;
pub mod event;
pub mod rest;
pub mod task;
pub mod user;
