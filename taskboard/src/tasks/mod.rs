//! Client-side task collection.
//!
//! [`Reconciler`] is the only writer of the collection a view displays.
//! Snapshots, push events and confirmed local mutations all go through it;
//! the ordering and identity rules live in [`merge`].

pub mod merge;
pub mod reconciler;

pub use merge::MergeOutcome;
pub use reconciler::{EventOutcome, LocalMutation, Reconciler, SnapshotOutcome, SnapshotRequest};
