//! `Taskboard` dev server library.
//!
//! An in-memory stand-in for the REST and Action Cable collaborators the
//! `taskboard` client talks to. Exposed for integration tests and local
//! demos; it keeps nothing on disk and enforces only sign-in.

pub mod config;
pub mod server;
pub mod store;
